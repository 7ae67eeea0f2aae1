//! Runtime-agnostic building blocks for the relay: connection status types,
//! close-code classification, lifecycle events, dispatch reports and the
//! backoff/jitter math used by the tokio layer.

pub mod backoff;
pub mod types;

pub use backoff::{Jitter, ReconnectPolicy};
pub use types::*;
