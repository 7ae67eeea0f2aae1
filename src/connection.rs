use crate::config::RelayConfig;
use crate::error::ClientError;
use crate::store::CredentialStore;
use crate::transport::{Credentials, Transport, TransportFactory};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use relay_core::{ConnectionEvent, ConnectionState, DisconnectReason, StatusInfo};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, broadcast, oneshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What a connect call resolves with: the pairing code issued during the
/// attempt, if any.
pub type ConnectOutcome = Result<Option<String>, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initiator {
    Caller,
    Reconnect,
}

#[derive(Default)]
pub(crate) struct Session {
    pub(crate) state: ConnectionState,
    pub(crate) phone_number: Option<String>,
    pub(crate) pairing_code: Option<String>,
    /// Live handle, present only while connected.
    pub(crate) transport: Option<Arc<dyn Transport>>,
    /// Handle of the attempt in progress, present only while connecting.
    pub(crate) pending: Option<Arc<dyn Transport>>,
    pub(crate) reconnect_attempt: u32,
    pub(crate) last_connected_at: Option<DateTime<Utc>>,
    /// Set while `disconnect` is logging out and wiping credentials.
    pub(crate) tearing_down: bool,
    busy: bool,
    busy_leases: usize,
}

impl Session {
    pub(crate) fn is_busy(&self) -> bool {
        self.busy || self.busy_leases > 0
    }

    fn take_handles(&mut self) -> [Option<Arc<dyn Transport>>; 2] {
        [self.transport.take(), self.pending.take()]
    }
}

/// Owns the single logical connection of the process.
///
/// The true state machine is `disconnected -> connecting -> connected`; the
/// busy overlay is tracked beside it. Every connect attempt gets a new
/// generation number, and lifecycle events from older generations are
/// discarded, so a torn-down attempt can never mutate the current session.
pub struct ConnectionManager {
    pub(crate) config: RelayConfig,
    pub(crate) transport_factory: Arc<dyn TransportFactory>,
    pub(crate) credential_store: Arc<dyn CredentialStore>,
    pub(crate) session: Mutex<Session>,
    pub(crate) generation: AtomicU64,

    pub(crate) is_reconnecting: AtomicBool,
    /// Set by every non-terminal close; the reconnection task keeps
    /// running while it finds this set.
    pub(crate) reconnect_pending: AtomicBool,
    /// Bumped whenever a caller takes over the session (connect, disconnect,
    /// shutdown); a pending reconnection from an older epoch stands down.
    pub(crate) reconnect_epoch: AtomicU64,
    pub(crate) reconnect_cancel: Notify,
    pub(crate) is_shut_down: AtomicBool,

    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(
        config: RelayConfig,
        transport_factory: Arc<dyn TransportFactory>,
        credential_store: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            transport_factory,
            credential_store,
            session: Mutex::new(Session::default()),
            generation: AtomicU64::new(0),
            is_reconnecting: AtomicBool::new(false),
            reconnect_pending: AtomicBool::new(false),
            reconnect_epoch: AtomicU64::new(0),
            reconnect_cancel: Notify::new(),
            is_shut_down: AtomicBool::new(false),
            events,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn status(&self) -> StatusInfo {
        let session = self.session();
        StatusInfo::new(
            session.state,
            session.is_busy(),
            session.phone_number.clone(),
            session.last_connected_at,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.session().state == ConnectionState::Connected
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.session().reconnect_attempt
    }

    /// The live transport handle, shared for the duration of one operation.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        let session = self.session();
        match (&session.state, &session.transport) {
            (ConnectionState::Connected, Some(transport)) => Ok(transport.clone()),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Sets or clears the manual busy overlay. The true connection state is
    /// untouched, so clearing the overlay always reveals the real state.
    pub fn set_busy(&self, busy: bool) {
        let mut session = self.session();
        session.busy = busy;
        debug!(
            target: "Relay/Connection",
            "Busy overlay {} (state {:?})",
            if busy { "set" } else { "cleared" },
            session.state
        );
    }

    /// Holds the busy overlay until the returned guard is dropped. Leases
    /// stack, so overlapping batches keep the overlay up until the last one
    /// finishes.
    pub fn busy_guard(self: &Arc<Self>) -> BusyGuard {
        self.session().busy_leases += 1;
        BusyGuard {
            manager: self.clone(),
        }
    }

    /// Opens a connection, returning the pairing code if one had to be
    /// issued. Returns as soon as a pairing code exists; otherwise waits
    /// for the connection to open, close, or time out.
    pub async fn connect(self: &Arc<Self>, phone_number: Option<String>) -> ConnectOutcome {
        self.connect_inner(phone_number, Initiator::Caller).await
    }

    /// Resumes a previously paired session if credentials were persisted.
    /// Returns whether the connection attempt succeeded.
    pub async fn resume(self: &Arc<Self>) -> bool {
        if !self.credential_store.exists() {
            info!(target: "Relay/Connection", "No stored session found, waiting for explicit connect");
            return false;
        }
        info!(target: "Relay/Connection", "Stored session found, resuming");
        match self.connect(None).await {
            Ok(_) => true,
            Err(e) => {
                warn!(target: "Relay/Connection", "Failed to resume stored session: {e}");
                false
            }
        }
    }

    /// Moves the session to connecting. A caller may supersede an attempt
    /// that already issued its pairing code; the superseded handle is
    /// returned so it can be closed.
    fn begin_attempt(
        &self,
        phone_number: Option<String>,
        initiator: Initiator,
    ) -> Result<(u64, Option<Arc<dyn Transport>>), ClientError> {
        if self.is_shut_down.load(Ordering::SeqCst) {
            return Err(ClientError::ShutDown);
        }
        let mut session = self.session();
        // The overlay holds back callers, never recovery.
        if initiator == Initiator::Caller && session.is_busy() {
            return Err(ClientError::Busy);
        }
        let superseded = match session.state {
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            ConnectionState::Connecting
                if initiator == Initiator::Caller && session.pairing_code.is_some() =>
            {
                info!(target: "Relay/Connection", "Abandoning unused pairing code for a fresh attempt");
                session.pending.take()
            }
            ConnectionState::Connecting => return Err(ClientError::ConnectInProgress),
            ConnectionState::Disconnected if session.tearing_down => {
                return Err(ClientError::ConnectInProgress);
            }
            ConnectionState::Disconnected => None,
        };

        session.state = ConnectionState::Connecting;
        session.pairing_code = None;
        if phone_number.is_some() {
            session.phone_number = phone_number;
        }
        if initiator == Initiator::Caller {
            self.reconnect_epoch.fetch_add(1, Ordering::SeqCst);
        }
        Ok((self.next_generation(), superseded))
    }

    pub(crate) async fn connect_inner(
        self: &Arc<Self>,
        phone_number: Option<String>,
        initiator: Initiator,
    ) -> ConnectOutcome {
        let (generation, superseded) = self.begin_attempt(phone_number, initiator)?;
        if initiator == Initiator::Caller {
            self.reconnect_cancel.notify_waiters();
        }
        if let Some(transport) = superseded {
            transport.close().await;
        }

        let credentials = match self.credential_store.load() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(target: "Relay/Connection", "Failed to load stored credentials: {e}");
                self.abort_attempt(generation).await;
                return Err(e.into());
            }
        };

        info!(
            target: "Relay/Connection",
            "Opening transport (generation {generation}, {} credentials)",
            if credentials.is_some() { "stored" } else { "fresh" }
        );

        let (transport, events) = match self.transport_factory.open(credentials).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(target: "Relay/Connection", "Failed to open transport: {e}");
                self.abort_attempt(generation).await;
                return Err(e.into());
            }
        };

        let superseded = {
            let mut session = self.session();
            if self.is_current(generation) {
                session.pending = Some(transport.clone());
                false
            } else {
                true
            }
        };
        if superseded {
            debug!(target: "Relay/Connection", "Attempt {generation} superseded while opening");
            transport.close().await;
            return Err(ClientError::ConnectionClosed { code: None });
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        tokio::spawn(self.clone().drive_lifecycle(
            generation,
            transport,
            events,
            completion_tx,
        ));

        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, completion_rx).await {
            Ok(Ok(outcome)) => outcome,
            // The lifecycle task went away without resolving: it was
            // superseded by a newer attempt or a teardown.
            Ok(Err(_)) => Err(ClientError::ConnectionClosed { code: None }),
            Err(_) => {
                if self.abort_attempt(generation).await {
                    warn!(target: "Relay/Connection", "No connection event within {timeout:?}, giving up");
                    Err(ClientError::ConnectTimeout(timeout))
                } else if self.is_connected() {
                    Ok(None)
                } else {
                    Err(ClientError::ConnectTimeout(timeout))
                }
            }
        }
    }

    /// Rolls a still-connecting attempt back to disconnected. Returns
    /// whether anything was rolled back.
    pub(crate) async fn abort_attempt(&self, generation: u64) -> bool {
        let pending = {
            let mut session = self.session();
            if !self.is_current(generation) || session.state != ConnectionState::Connecting {
                return false;
            }
            self.next_generation();
            session.state = ConnectionState::Disconnected;
            session.pairing_code = None;
            session.pending.take()
        };
        if let Some(transport) = pending {
            transport.close().await;
        }
        true
    }

    /// Logs out, wipes credentials and resets the session.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let transport = {
            let mut session = self.session();
            if session.state != ConnectionState::Connected {
                return Err(ClientError::NotConnected);
            }
            if session.is_busy() {
                return Err(ClientError::Busy);
            }
            // Events the logout provokes belong to a dead generation.
            self.next_generation();
            session.state = ConnectionState::Disconnected;
            session.tearing_down = true;
            session.transport.take()
        };
        self.cancel_reconnect();

        info!(target: "Relay/Connection", "Disconnecting on request");
        if let Some(transport) = transport {
            if let Err(e) = transport.logout().await {
                warn!(target: "Relay/Connection", "Logout failed, continuing disconnect: {e}");
            }
            transport.close().await;
        }
        self.wipe_credentials();

        {
            let mut session = self.session();
            session.phone_number = None;
            session.pairing_code = None;
            session.reconnect_attempt = 0;
            session.tearing_down = false;
        }
        self.emit(ConnectionEvent::LoggedOut {
            reason: DisconnectReason::LoggedOut,
        });
        Ok(())
    }

    /// Process teardown: stops reconnection and closes the transport while
    /// keeping credentials, so the next process can resume the session.
    /// Shutdown is final; later connects fail with [`ClientError::ShutDown`].
    pub async fn shutdown(&self) {
        self.is_shut_down.store(true, Ordering::SeqCst);
        self.cancel_reconnect();
        let handles = {
            let mut session = self.session();
            self.next_generation();
            session.state = ConnectionState::Disconnected;
            session.pairing_code = None;
            session.take_handles()
        };
        for transport in handles.into_iter().flatten() {
            transport.close().await;
        }
        info!(target: "Relay/Connection", "Connection manager shut down");
    }

    /// Tears down the session after an unrecoverable failure: handles are
    /// released, the phone number forgotten and credentials wiped.
    pub(crate) async fn clear_session(&self) {
        let handles = {
            let mut session = self.session();
            self.next_generation();
            session.state = ConnectionState::Disconnected;
            session.phone_number = None;
            session.pairing_code = None;
            session.reconnect_attempt = 0;
            session.take_handles()
        };
        for transport in handles.into_iter().flatten() {
            transport.close().await;
        }
        self.wipe_credentials();
        info!(target: "Relay/Connection", "Session cleared");
    }

    pub(crate) fn persist_credentials(&self, credentials: &Credentials) {
        if let Err(e) = self.credential_store.persist(credentials) {
            error!(target: "Relay/Connection", "Failed to persist updated credentials: {e}");
        }
    }

    pub(crate) fn wipe_credentials(&self) {
        match self.credential_store.wipe() {
            Ok(()) => debug!(target: "Relay/Connection", "Stored credentials wiped"),
            Err(e) => {
                error!(target: "Relay/Connection", "Failed to wipe stored credentials, continuing: {e}")
            }
        }
    }

    pub(crate) fn cancel_reconnect(&self) {
        self.reconnect_epoch.fetch_add(1, Ordering::SeqCst);
        self.reconnect_cancel.notify_waiters();
    }
}

/// Keeps the busy overlay raised while alive.
pub struct BusyGuard {
    manager: Arc<ConnectionManager>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut session = self.manager.session();
        session.busy_leases = session.busy_leases.saturating_sub(1);
    }
}
