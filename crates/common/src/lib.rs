//! Types shared by the three Aegis contexts: watch-list addresses, wallet
//! request arguments, the cross-context packet schema and the runtime port
//! between the content relay and the background.

pub mod address;
pub mod messages;
pub mod rpc;
pub mod runtime;
pub mod watchlist;

pub use address::{AddressError, TrackedAddress};
pub use messages::{AlertPacket, AlertPayload, AlertPriority, PacketBody, TargetTag};
pub use rpc::{RequestArguments, RpcMethod};
pub use watchlist::{MemoryWatchList, StoreError, WatchListStore};
