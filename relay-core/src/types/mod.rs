pub mod connection;
pub mod dispatch;
pub mod events;
pub mod recipient;

pub use connection::{ConnectionState, ConnectionStatus, DisconnectReason, StatusInfo};
pub use dispatch::{BroadcastReport, ClearReport, DispatchResult};
pub use events::ConnectionEvent;
pub use recipient::{ChatMetadata, Recipient};
