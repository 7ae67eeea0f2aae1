use crate::config::{DispatchConfig, RelayConfig};
use crate::connection::ConnectionManager;
use crate::store::{MemoryCredentialStore, Result as StoreResult};
pub(crate) use crate::store::CredentialStore;
use crate::transport::{
    ChatModification, Credentials, MessageAck, Transport, TransportError, TransportEvent,
    TransportFactory,
};
use async_trait::async_trait;
use relay_core::{ChatMetadata, ConnectionEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Ok,
    NotFound,
    Fail,
}

/// Behaviour and call log shared by every transport a factory opens.
#[derive(Default)]
pub(crate) struct MockState {
    registered: AtomicBool,
    pairing_code: Mutex<Option<String>>,
    pairing_requests: Mutex<Vec<String>>,
    chats: Mutex<Vec<ChatMetadata>>,
    send_script: Mutex<HashMap<String, VecDeque<SendOutcome>>>,
    sends: Mutex<Vec<(String, String)>>,
    modifications: Mutex<Vec<(String, ChatModification)>>,
    failing_modification: Mutex<Option<(String, ChatModification)>>,
    logout_calls: AtomicUsize,
    logout_fails: AtomicBool,
    close_on_logout: Mutex<Option<Option<i32>>>,
}

impl MockState {
    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// `None` makes pairing-code requests fail.
    pub fn set_pairing_code(&self, code: Option<&str>) {
        *self.pairing_code.lock().unwrap() = code.map(str::to_string);
    }

    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().unwrap().clone()
    }

    pub fn set_chats(&self, chats: Vec<ChatMetadata>) {
        *self.chats.lock().unwrap() = chats;
    }

    /// Outcomes for successive sends to `recipient`; sends beyond the
    /// script succeed.
    pub fn script_sends(&self, recipient: &str, outcomes: &[SendOutcome]) {
        self.send_script
            .lock()
            .unwrap()
            .insert(recipient.to_string(), outcomes.iter().copied().collect());
    }

    pub fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sends_to(&self, recipient: &str) -> usize {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == recipient)
            .count()
    }

    pub fn modifications(&self) -> Vec<(String, ChatModification)> {
        self.modifications.lock().unwrap().clone()
    }

    pub fn fail_modification(&self, recipient: &str, modification: ChatModification) {
        *self.failing_modification.lock().unwrap() = Some((recipient.to_string(), modification));
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    /// Makes logout emit a close event, as real transports do.
    pub fn close_on_logout(&self, status_code: Option<i32>) {
        *self.close_on_logout.lock().unwrap() = Some(status_code);
    }
}

pub(crate) struct MockTransport {
    state: Arc<MockState>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    closes: AtomicUsize,
}

impl MockTransport {
    fn sender(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.events.lock().unwrap().clone()
    }

    pub async fn emit(&self, event: TransportEvent) {
        let tx = self.sender().expect("event stream already hung up");
        tx.send(event).await.expect("lifecycle task stopped listening");
    }

    /// Drops the event stream without a close event.
    pub fn hang_up(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_registered(&self) -> bool {
        self.state.registered.load(Ordering::SeqCst)
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError> {
        self.state
            .pairing_requests
            .lock()
            .unwrap()
            .push(phone_number.to_string());
        let code = self.state.pairing_code.lock().unwrap().clone();
        code.ok_or_else(|| TransportError::Rejected {
            code: 400,
            message: "pairing refused".into(),
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.state.logout_calls.fetch_add(1, Ordering::SeqCst);
        let close = *self.state.close_on_logout.lock().unwrap();
        if let (Some(status_code), Some(tx)) = (close, self.sender()) {
            let _ = tx.send(TransportEvent::Closed { status_code }).await;
        }
        if self.state.logout_fails.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn list_participating(&self) -> Result<Vec<ChatMetadata>, TransportError> {
        Ok(self.state.chats.lock().unwrap().clone())
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<MessageAck, TransportError> {
        let attempt = {
            let mut sends = self.state.sends.lock().unwrap();
            sends.push((recipient.to_string(), text.to_string()));
            sends.len()
        };
        let outcome = self
            .state
            .send_script
            .lock()
            .unwrap()
            .get_mut(recipient)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendOutcome::Ok);
        match outcome {
            SendOutcome::Ok => Ok(MessageAck {
                message_id: format!("MSG{attempt}"),
            }),
            SendOutcome::NotFound => Err(TransportError::NotFound(recipient.to_string())),
            SendOutcome::Fail => Err(TransportError::Other(anyhow::anyhow!("rate limited"))),
        }
    }

    async fn modify_chat(
        &self,
        recipient: &str,
        modification: ChatModification,
    ) -> Result<(), TransportError> {
        self.state
            .modifications
            .lock()
            .unwrap()
            .push((recipient.to_string(), modification));
        let failing = self.state.failing_modification.lock().unwrap().clone();
        if failing == Some((recipient.to_string(), modification)) {
            return Err(TransportError::Other(anyhow::anyhow!("modify failed")));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens mock transports that replay one scripted event list per open.
#[derive(Default)]
pub(crate) struct MockTransportFactory {
    pub state: Arc<MockState>,
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    default_script: Mutex<Vec<TransportEvent>>,
    fail_next_open: AtomicBool,
    opened_with: Mutex<Vec<Option<Credentials>>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn push_script(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    /// Script used once the queued scripts run out.
    pub fn set_default_script(&self, events: Vec<TransportEvent>) {
        *self.default_script.lock().unwrap() = events;
    }

    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opened_with.lock().unwrap().len()
    }

    pub fn opened_with(&self) -> Vec<Option<Credentials>> {
        self.opened_with.lock().unwrap().clone()
    }

    pub fn last_transport(&self) -> Arc<MockTransport> {
        self.transports
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport opened yet")
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn open(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        self.opened_with.lock().unwrap().push(credentials);
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Other(anyhow::anyhow!("connection refused")));
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone());
        let (tx, rx) = mpsc::channel(32);
        for event in script {
            tx.try_send(event).expect("script longer than channel capacity");
        }

        let transport = Arc::new(MockTransport {
            state: self.state.clone(),
            events: Mutex::new(Some(tx)),
            closes: AtomicUsize::new(0),
        });
        self.transports.lock().unwrap().push(transport.clone());
        Ok((transport, rx))
    }
}

/// Memory-backed store that counts writes and wipes.
#[derive(Default)]
pub(crate) struct RecordingCredentialStore {
    inner: MemoryCredentialStore,
    persists: AtomicUsize,
    wipes: AtomicUsize,
}

impl RecordingCredentialStore {
    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    pub fn wipes(&self) -> usize {
        self.wipes.load(Ordering::SeqCst)
    }
}

impl CredentialStore for RecordingCredentialStore {
    fn persist(&self, credentials: &Credentials) -> StoreResult<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        self.inner.persist(credentials)
    }

    fn load(&self) -> StoreResult<Option<Credentials>> {
        self.inner.load()
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn wipe(&self) -> StoreResult<()> {
        self.wipes.fetch_add(1, Ordering::SeqCst);
        self.inner.wipe()
    }
}

pub(crate) fn config_with_attempts(max_attempts: u32) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.reconnect.max_attempts = max_attempts;
    config
}

pub(crate) fn immediate_config() -> RelayConfig {
    RelayConfig {
        dispatch: DispatchConfig::immediate(),
        ..RelayConfig::default()
    }
}

pub(crate) struct Harness {
    pub manager: Arc<ConnectionManager>,
    pub factory: Arc<MockTransportFactory>,
    pub state: Arc<MockState>,
    pub store: Arc<RecordingCredentialStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let factory = Arc::new(MockTransportFactory::default());
        let store = Arc::new(RecordingCredentialStore::default());
        let manager = ConnectionManager::new(config, factory.clone(), store.clone());
        Self {
            state: factory.state.clone(),
            manager,
            factory,
            store,
        }
    }

    pub async fn connected() -> Self {
        Self::connected_with_config(RelayConfig::default()).await
    }

    pub async fn connected_with_config(config: RelayConfig) -> Self {
        let harness = Self::with_config(config);
        harness.factory.push_script(vec![TransportEvent::Open]);
        harness
            .manager
            .connect(None)
            .await
            .expect("scripted connect should succeed");
        harness
    }
}

/// Waits for the first event matching `pred`, skipping everything else.
pub(crate) async fn wait_for<F>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    pred: F,
) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(24 * 3600), wait)
        .await
        .expect("expected event was never published")
}

/// Lets every pending timer and task run to quiescence.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_secs(3600)).await;
}
