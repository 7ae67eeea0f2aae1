use super::connection::DisconnectReason;
use serde::Serialize;
use std::time::Duration;

/// Lifecycle notifications published by the connection manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A pairing code was issued and should be entered on the phone.
    PairingCode { code: String },
    Connected { phone_number: Option<String> },
    /// The connection closed for a non-terminal reason or was disconnected
    /// on request.
    Disconnected { reason: DisconnectReason },
    /// The account was logged out; credentials have been wiped.
    LoggedOut { reason: DisconnectReason },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic reconnection hit its attempt cap and stopped.
    ReconnectExhausted { attempts: u32 },
}

impl ConnectionEvent {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}
