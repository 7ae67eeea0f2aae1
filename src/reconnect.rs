use crate::connection::{ConnectionManager, Initiator};
use crate::error::ClientError;
use log::{debug, info, warn};
use relay_core::{ConnectionEvent, ConnectionState, DisconnectReason};
use std::sync::Arc;
use std::sync::atomic::Ordering;

impl ConnectionManager {
    /// Requests reconnection after a non-terminal close. At most one
    /// reconnection task runs; a close that lands while it is in flight
    /// (including right after one of its attempts opened) leaves the
    /// pending flag set, and the task runs another round for it.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>) {
        if self.is_shut_down.load(Ordering::SeqCst) {
            debug!(target: "Relay/Reconnect", "Shut down, not reconnecting");
            return;
        }
        self.reconnect_pending.store(true, Ordering::SeqCst);
        if self.is_reconnecting.swap(true, Ordering::SeqCst) {
            debug!(target: "Relay/Reconnect", "Reconnection already in flight");
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                {
                    let _guard = scopeguard::guard((), |_| {
                        this.is_reconnecting.store(false, Ordering::SeqCst);
                    });
                    while this.reconnect_pending.swap(false, Ordering::SeqCst) {
                        let epoch = this.reconnect_epoch.load(Ordering::SeqCst);
                        this.reconnect_loop(epoch).await;
                    }
                }
                // A close between the last check and the guard release
                // found the task still marked as running.
                if !this.reconnect_pending.load(Ordering::SeqCst)
                    || this.is_reconnecting.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            }
        });
    }

    fn reconnect_still_wanted(&self, epoch: u64) -> bool {
        !self.is_shut_down.load(Ordering::SeqCst)
            && self.reconnect_epoch.load(Ordering::SeqCst) == epoch
            && self.session().state == ConnectionState::Disconnected
    }

    async fn reconnect_loop(self: &Arc<Self>, epoch: u64) {
        let policy = self.config.reconnect.clone();

        loop {
            let attempt = self.session().reconnect_attempt;
            if policy.is_exhausted(attempt) {
                warn!(
                    target: "Relay/Reconnect",
                    "Giving up after {attempt} reconnect attempts; an explicit connect is required"
                );
                self.emit(ConnectionEvent::ReconnectExhausted { attempts: attempt });
                return;
            }

            let delay = policy.delay_for(attempt);
            info!(
                target: "Relay/Reconnect",
                "Reconnecting in {delay:?} (attempt {}/{})",
                attempt + 1,
                policy.max_attempts
            );
            self.emit(ConnectionEvent::ReconnectScheduled {
                attempt: attempt + 1,
                delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.reconnect_cancel.notified() => {
                    debug!(target: "Relay/Reconnect", "Reconnection cancelled while waiting");
                    return;
                }
            }
            if !self.reconnect_still_wanted(epoch) {
                debug!(target: "Relay/Reconnect", "Session taken over, standing down");
                return;
            }

            self.session().reconnect_attempt = attempt + 1;
            let outcome = self.connect_inner(None, Initiator::Reconnect).await;
            if outcome.is_err() {
                // The close behind this failure is the attempt itself.
                self.reconnect_pending.store(false, Ordering::SeqCst);
            }
            match outcome {
                Ok(_) => {
                    info!(target: "Relay/Reconnect", "Reconnect attempt {} succeeded", attempt + 1);
                    return;
                }
                Err(e) if ends_reconnection(&e) => {
                    info!(target: "Relay/Reconnect", "Stopping reconnection: {e}");
                    return;
                }
                Err(e) => {
                    warn!(target: "Relay/Reconnect", "Reconnect attempt {} failed: {e}", attempt + 1);
                }
            }

            if !self.reconnect_still_wanted(epoch) {
                debug!(target: "Relay/Reconnect", "Session taken over, standing down");
                return;
            }
        }
    }
}

fn ends_reconnection(err: &ClientError) -> bool {
    match err {
        ClientError::AlreadyConnected
        | ClientError::ConnectInProgress
        | ClientError::ShutDown
        | ClientError::Pairing(_) => true,
        ClientError::ConnectionClosed { code } => DisconnectReason::from(*code).is_logged_out(),
        _ => false,
    }
}
