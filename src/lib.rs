// Portable types and policy math live in relay-core
pub use relay_core::{backoff, types};

pub mod config;
pub mod connection;
pub mod error;
pub mod features;
pub mod relay;
pub mod store;
pub mod transport;

mod lifecycle;
mod reconnect;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{DispatchConfig, RelayConfig};
pub use connection::{BusyGuard, ConnectOutcome, ConnectionManager};
pub use error::ClientError;
pub use features::{ArchiveRegistry, GroupDispatcher};
pub use relay::{Relay, RelayBuilder};
pub use relay_core::{
    BroadcastReport, ClearReport, ConnectionEvent, ConnectionState, ConnectionStatus,
    DisconnectReason, Recipient, StatusInfo,
};
