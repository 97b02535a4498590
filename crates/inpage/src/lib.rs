//! Page context of the Aegis wallet guard: provider discovery and
//! interception, transaction classification, contract verification and the
//! dual-channel alert emitter.

pub mod activity;
pub mod classifier;
pub mod config;
pub mod context;
pub mod discovery;
pub mod emitter;
pub mod error;
pub mod interceptor;
mod listener;
pub mod registry;
pub mod rpc_monitor;
pub mod scheduler;
pub mod tracking;
pub mod verification;
pub mod window;

pub use classifier::{Classification, SigningKind, TransactionDescriptor, TxKind, classify};
pub use config::{PageConfig, VerificationConfig};
pub use context::{PageContext, PageServices};
pub use error::{ChannelError, LookupError, ObservationError, ProviderError};
pub use registry::{HookOutcome, HookRegistry};
pub use window::{DomEvent, Element, PageEvent, ProviderObject, RequestDispatch, Window};
