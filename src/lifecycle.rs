//! Reacts to the events of one transport connection.
//!
//! One task runs per connect attempt. It resolves the attempt's completion
//! exactly once (with a pairing code, on open, or with the failure) and keeps
//! handling events afterwards until the connection closes or the attempt is
//! superseded.

use crate::connection::{ConnectOutcome, ConnectionManager};
use crate::error::ClientError;
use crate::transport::{Transport, TransportEvent};
use chrono::Utc;
use log::{debug, error, info, warn};
use relay_core::{ConnectionEvent, ConnectionState, DisconnectReason};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Completion = Option<oneshot::Sender<ConnectOutcome>>;

fn resolve(completion: &mut Completion, outcome: ConnectOutcome) {
    if let Some(tx) = completion.take() {
        // The caller may have timed out and dropped the receiver.
        let _ = tx.send(outcome);
    }
}

impl ConnectionManager {
    pub(crate) async fn drive_lifecycle(
        self: Arc<Self>,
        generation: u64,
        transport: Arc<dyn Transport>,
        mut events: mpsc::Receiver<TransportEvent>,
        completion: oneshot::Sender<ConnectOutcome>,
    ) {
        let mut completion = Some(completion);
        let mut pairing_requested = false;

        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                debug!(
                    target: "Relay/Connection",
                    "Discarding {event:?} from superseded attempt {generation}"
                );
                return;
            }

            match event {
                TransportEvent::CredsUpdated(credentials) => {
                    self.persist_credentials(&credentials);
                }
                TransportEvent::PairingAvailable => {
                    if pairing_requested || transport.is_registered() {
                        continue;
                    }
                    let phone_number = self.session().phone_number.clone();
                    let Some(phone_number) = phone_number else {
                        debug!(target: "Relay/Connection", "Pairing available but no phone number set");
                        continue;
                    };
                    pairing_requested = true;

                    match transport.request_pairing_code(&phone_number).await {
                        Ok(code) => {
                            {
                                let mut session = self.session();
                                if !self.is_current(generation) {
                                    return;
                                }
                                session.pairing_code = Some(code.clone());
                            }
                            info!(target: "Relay/Connection", "Pairing code issued for {phone_number}");
                            self.emit(ConnectionEvent::PairingCode { code: code.clone() });
                            resolve(&mut completion, Ok(Some(code)));
                        }
                        Err(e) => {
                            if !self.is_current(generation) {
                                return;
                            }
                            error!(target: "Relay/Connection", "Pairing code request failed: {e}");
                            self.clear_session().await;
                            resolve(&mut completion, Err(ClientError::Pairing(e)));
                            return;
                        }
                    }
                }
                TransportEvent::Open => {
                    let (code, phone_number) = {
                        let mut session = self.session();
                        if !self.is_current(generation) {
                            return;
                        }
                        let live = session.pending.take().unwrap_or_else(|| transport.clone());
                        session.state = ConnectionState::Connected;
                        session.transport = Some(live);
                        session.reconnect_attempt = 0;
                        session.last_connected_at = Some(Utc::now());
                        (session.pairing_code.take(), session.phone_number.clone())
                    };
                    info!(target: "Relay/Connection", "Connection open");
                    self.emit(ConnectionEvent::Connected { phone_number });
                    resolve(&mut completion, Ok(code));
                }
                TransportEvent::Closed { status_code } => {
                    self.handle_close(generation, status_code, &mut completion)
                        .await;
                    return;
                }
            }
        }

        if self.is_current(generation) {
            warn!(target: "Relay/Connection", "Transport event stream ended without a close event");
            self.handle_close(generation, None, &mut completion).await;
        }
    }

    async fn handle_close(
        self: &Arc<Self>,
        generation: u64,
        status_code: Option<i32>,
        completion: &mut Completion,
    ) {
        let reason = DisconnectReason::from(status_code);
        {
            let mut session = self.session();
            if !self.is_current(generation) {
                debug!(target: "Relay/Connection", "Ignoring close of superseded attempt {generation}");
                return;
            }
            session.state = ConnectionState::Disconnected;
            session.transport = None;
            session.pending = None;
            session.pairing_code = None;
        }

        if reason.is_logged_out() {
            warn!(target: "Relay/Connection", "Connection closed: {reason}; clearing session");
            self.clear_session().await;
            self.emit(ConnectionEvent::LoggedOut { reason });
            resolve(completion, Err(ClientError::ConnectionClosed { code: status_code }));
            return;
        }

        info!(target: "Relay/Connection", "Connection closed: {reason}");
        self.emit(ConnectionEvent::Disconnected { reason });
        // Must run before the completion resolves: a reconnection round
        // awaiting this attempt clears the pending flag once it sees the
        // failure, and counts the close as its own failed attempt.
        self.schedule_reconnect();
        resolve(completion, Err(ClientError::ConnectionClosed { code: status_code }));
    }
}
