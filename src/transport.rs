//! The abstract capabilities the relay needs from a messaging transport.
//!
//! Wire protocol, handshake and credential encoding belong to the transport
//! adapter; the relay only opens connections, reacts to lifecycle events and
//! issues per-chat commands.

use async_trait::async_trait;
use relay_core::ChatMetadata;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque credential material owned by the transport. The relay persists it
/// verbatim whenever the transport reports an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials(pub serde_json::Value);

/// An event produced by an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Credentials changed and must be persisted before the next event is
    /// handled.
    CredsUpdated(Credentials),
    /// The transport is ready to link a new device; a pairing code may now
    /// be requested.
    PairingAvailable,
    Open,
    Closed { status_code: Option<i32> },
}

/// Acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAck {
    pub message_id: String,
}

/// A chat-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatModification {
    Archive(bool),
    Delete,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The recipient does not exist or the account is not a member.
    #[error("recipient not found: {0}")]
    NotFound(String),
    #[error("transport connection is closed")]
    Closed,
    #[error("request rejected with status {code}: {message}")]
    Rejected { code: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A live transport connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the credentials this transport was opened with belong to an
    /// already linked device.
    fn is_registered(&self) -> bool;

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError>;

    async fn logout(&self) -> Result<(), TransportError>;

    async fn list_participating(&self) -> Result<Vec<ChatMetadata>, TransportError>;

    async fn send_text(&self, recipient: &str, text: &str) -> Result<MessageAck, TransportError>;

    async fn modify_chat(
        &self,
        recipient: &str,
        modification: ChatModification,
    ) -> Result<(), TransportError>;

    /// Closes the connection without logging out.
    async fn close(&self);
}

/// Opens transports, returning the connection and its event stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError>;
}
