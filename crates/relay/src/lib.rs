//! Content relay between the page context and the privileged background.
//!
//! The relay shares the page's [`Window`](aegis_inpage::Window) but none of its
//! state. It listens on both alert channels, keeps only packets addressed to
//! it, drops the second copy of every dual-channel packet and forwards the
//! rest over the [`RuntimePort`](aegis_common::runtime::RuntimePort).

mod dedup;
mod relay;

pub use dedup::{DEFAULT_SEEN_CAPACITY, SeenPackets};
pub use relay::{ContentRelay, RelayHandle, RelayStats};
