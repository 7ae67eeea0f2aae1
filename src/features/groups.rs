use crate::config::DispatchConfig;
use crate::connection::ConnectionManager;
use crate::error::ClientError;
use crate::features::archive::ArchiveRegistry;
use crate::transport::{ChatModification, MessageAck, Transport, TransportError};
use log::{debug, info, warn};
use relay_core::backoff::Jitter;
use relay_core::{BroadcastReport, ClearReport, DispatchResult, Recipient};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const CLEAR_SEQUENCE: [ChatModification; 3] = [
    ChatModification::Archive(true),
    ChatModification::Archive(false),
    ChatModification::Delete,
];

/// Batched operations over the groups the account participates in.
///
/// Recipients are always processed one at a time, in the order given, with
/// a randomized pause before each one. A failing recipient never aborts the
/// batch; it is reported in the result instead.
pub struct GroupDispatcher {
    connection: Arc<ConnectionManager>,
    archive: ArchiveRegistry,
    config: DispatchConfig,
}

impl GroupDispatcher {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        let config = connection.config().dispatch.clone();
        Self::with_config(connection, config)
    }

    pub fn with_config(connection: Arc<ConnectionManager>, config: DispatchConfig) -> Self {
        Self {
            connection,
            archive: ArchiveRegistry::new(),
            config,
        }
    }

    pub fn archive(&self) -> &ArchiveRegistry {
        &self.archive
    }

    /// All groups the account participates in, with the local archive bit.
    pub async fn list_recipients(&self) -> Result<Vec<Recipient>, ClientError> {
        let transport = self.connection.transport()?;
        let chats = transport.list_participating().await?;
        debug!(target: "Relay/Groups", "Transport reported {} groups", chats.len());

        Ok(chats
            .into_iter()
            .map(|meta| {
                let archived = self.archive.contains(&meta.id);
                Recipient::from_metadata(meta, archived)
            })
            .collect())
    }

    pub async fn list_archived_recipients(&self) -> Result<Vec<Recipient>, ClientError> {
        let mut recipients = self.list_recipients().await?;
        recipients.retain(|r| r.archived);
        Ok(recipients)
    }

    /// Sends `message` to every recipient in order. `correlation_id` is
    /// echoed back in the report.
    pub async fn send_broadcast(
        &self,
        recipients: &[String],
        message: &str,
        correlation_id: &str,
    ) -> Result<BroadcastReport, ClientError> {
        if recipients.is_empty() {
            return Err(ClientError::InvalidArgument("recipient list is empty"));
        }
        if message.is_empty() {
            return Err(ClientError::InvalidArgument("message is empty"));
        }
        let transport = self.connection.transport()?;
        let _lease = self.connection.busy_guard();
        let recipients = distinct(recipients);

        info!(
            target: "Relay/Groups",
            "Broadcasting {correlation_id} to {} groups",
            recipients.len()
        );
        let mut result = DispatchResult::new();
        for recipient in recipients {
            pause(&self.config.send_jitter).await;
            match self.send_with_retry(transport.as_ref(), recipient, message).await {
                Ok(ack) => {
                    debug!(target: "Relay/Groups", "Sent to {recipient} ({})", ack.message_id);
                    result.record_success(recipient);
                }
                Err(e) => {
                    warn!(target: "Relay/Groups", "Giving up on {recipient}: {e}");
                    result.record_failure(recipient);
                }
            }
        }

        info!(
            target: "Relay/Groups",
            "Broadcast {correlation_id} finished: {} sent, {} failed",
            result.succeeded().len(),
            result.failed().len()
        );
        Ok(result.into_broadcast_report(correlation_id))
    }

    /// One retry after a fixed backoff, except for recipients the transport
    /// says do not exist.
    async fn send_with_retry(
        &self,
        transport: &dyn Transport,
        recipient: &str,
        message: &str,
    ) -> Result<MessageAck, TransportError> {
        match transport.send_text(recipient, message).await {
            Ok(ack) => Ok(ack),
            Err(e) if e.is_not_found() => Err(e),
            Err(e) => {
                warn!(
                    target: "Relay/Groups",
                    "Send to {recipient} failed ({e}), retrying in {:?}",
                    self.config.retry_backoff
                );
                tokio::time::sleep(self.config.retry_backoff).await;
                transport.send_text(recipient, message).await
            }
        }
    }

    /// Archives, unarchives and then deletes each chat, which makes the
    /// transport drop its local history before the chat entry goes away.
    pub async fn clear_recipient_history(
        &self,
        recipients: &[String],
    ) -> Result<ClearReport, ClientError> {
        if recipients.is_empty() {
            return Err(ClientError::InvalidArgument("recipient list is empty"));
        }
        let transport = self.connection.transport()?;
        let _lease = self.connection.busy_guard();
        let recipients = distinct(recipients);

        let mut result = DispatchResult::new();
        for recipient in recipients.iter().copied() {
            pause(&self.config.clear_jitter).await;
            match clear_chat(transport.as_ref(), recipient).await {
                Ok(()) => result.record_success(recipient),
                Err(e) => {
                    warn!(target: "Relay/Groups", "Failed to clear {recipient}: {e}");
                    result.record_failure(recipient);
                }
            }
        }

        info!(
            target: "Relay/Groups",
            "Cleared {} of {} groups",
            result.succeeded().len(),
            recipients.len()
        );
        Ok(result.into_clear_report())
    }

    pub fn set_archived(&self, recipient: &str, archived: bool) -> Result<(), ClientError> {
        if recipient.is_empty() {
            return Err(ClientError::InvalidArgument("recipient id is empty"));
        }
        if self.archive.set(recipient, archived) {
            debug!(target: "Relay/Groups", "Marked {recipient} archived={archived}");
        }
        Ok(())
    }

    /// Replaces the archived set with exactly `recipients`.
    pub fn set_archived_bulk(&self, recipients: &[String]) -> Result<(), ClientError> {
        if recipients.iter().any(|id| id.is_empty()) {
            return Err(ClientError::InvalidArgument("recipient id is empty"));
        }
        self.archive.replace_all(recipients.iter().cloned());
        debug!(target: "Relay/Groups", "Archived set replaced ({} groups)", recipients.len());
        Ok(())
    }

    pub fn archived_ids(&self) -> Vec<String> {
        self.archive.snapshot()
    }
}

/// Drops repeated ids, keeping first occurrences in order, so each
/// recipient is handled once and reported once.
fn distinct(recipients: &[String]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(recipients.len());
    let unique: Vec<&str> = recipients
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();
    if unique.len() < recipients.len() {
        debug!(
            target: "Relay/Groups",
            "Skipping {} duplicate recipient ids",
            recipients.len() - unique.len()
        );
    }
    unique
}

async fn clear_chat(transport: &dyn Transport, recipient: &str) -> Result<(), TransportError> {
    for modification in CLEAR_SEQUENCE {
        transport.modify_chat(recipient, modification).await?;
    }
    Ok(())
}

async fn pause(jitter: &Jitter) {
    let delay: Duration = jitter.sample(&mut rand::rng());
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
