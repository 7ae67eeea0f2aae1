use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// The true connection state. `busy` is tracked separately as an overlay so
/// that entering and leaving it never loses whether a live session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Status as reported to callers: the true state, or `Busy` while the
/// overlay is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Busy,
}

impl ConnectionStatus {
    pub fn from_parts(state: ConnectionState, busy: bool) -> Self {
        if busy {
            return Self::Busy;
        }
        match state {
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub connected: bool,
    pub status: ConnectionStatus,
    pub busy: bool,
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl StatusInfo {
    pub fn new(
        state: ConnectionState,
        busy: bool,
        phone_number: Option<String>,
        last_connected_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            connected: state == ConnectionState::Connected,
            status: ConnectionStatus::from_parts(state, busy),
            busy,
            phone_number,
            last_connected_at,
        }
    }
}

/// Why the transport closed a connection, decoded from its status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    ServiceUnavailable,
    RestartRequired,
    Unknown(Option<i32>),
}

impl From<i32> for DisconnectReason {
    fn from(code: i32) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Forbidden,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::ServiceUnavailable,
            515 => Self::RestartRequired,
            _ => Self::Unknown(Some(code)),
        }
    }
}

impl From<Option<i32>> for DisconnectReason {
    fn from(code: Option<i32>) -> Self {
        code.map_or(Self::Unknown(None), Self::from)
    }
}

impl DisconnectReason {
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::LoggedOut => Some(401),
            Self::Forbidden => Some(403),
            Self::ConnectionLost => Some(408),
            Self::MultideviceMismatch => Some(411),
            Self::ConnectionClosed => Some(428),
            Self::ConnectionReplaced => Some(440),
            Self::BadSession => Some(500),
            Self::ServiceUnavailable => Some(503),
            Self::RestartRequired => Some(515),
            Self::Unknown(code) => *code,
        }
    }

    /// A terminal close: the account was logged out and the stored
    /// credentials are no longer usable.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    pub fn should_reconnect(&self) -> bool {
        !self.is_logged_out()
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{self:?} ({code})"),
            None => write!(f, "{self:?}"),
        }
    }
}
