use crate::config::RelayConfig;
use crate::connection::ConnectionManager;
use crate::features::GroupDispatcher;
use crate::store::{CredentialStore, FileCredentialStore};
use crate::transport::TransportFactory;
use anyhow::Result;
use log::{debug, info, warn};
use relay_core::ConnectionEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task;

type EventHandlerCallback = Arc<
    dyn Fn(ConnectionEvent, Arc<ConnectionManager>) -> Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// One connection manager plus the dispatcher bound to it.
pub struct Relay {
    connection: Arc<ConnectionManager>,
    groups: Arc<GroupDispatcher>,
    event_handler: Option<EventHandlerCallback>,
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    pub fn connection(&self) -> Arc<ConnectionManager> {
        self.connection.clone()
    }

    pub fn groups(&self) -> Arc<GroupDispatcher> {
        self.groups.clone()
    }

    /// Starts forwarding lifecycle events to the `on_event` callback and
    /// resumes a stored session if there is one. Returns whether a session
    /// was resumed.
    pub async fn start(&mut self) -> bool {
        if let Some(handler) = self.event_handler.take() {
            let events = self.connection.subscribe();
            tokio::spawn(pump_events(events, handler, self.connection.clone()));
        }
        self.connection.resume().await
    }

    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

async fn pump_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    handler: EventHandlerCallback,
    connection: Arc<ConnectionManager>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let handler = handler.clone();
                let connection = connection.clone();
                task::spawn(async move {
                    handler(event, connection).await;
                });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "Relay", "Event handler lagging, skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(target: "Relay", "Event pump stopped");
}

#[derive(Default)]
pub struct RelayBuilder {
    event_handler: Option<EventHandlerCallback>,
    config: Option<RelayConfig>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
}

impl RelayBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ConnectionEvent, Arc<ConnectionManager>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_handler = Some(Arc::new(move |event, connection| {
            Box::pin(handler(event, connection))
        }));
        self
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Overrides the default file store rooted at the configured auth path.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Relay> {
        let transport_factory = self.transport_factory.ok_or_else(|| {
            anyhow::anyhow!("Transport factory is required. Use with_transport_factory() to set it.")
        })?;
        let config = self.config.unwrap_or_default();

        let credential_store = match self.credential_store {
            Some(store) => store,
            None => {
                info!(
                    target: "Relay",
                    "Using file credential store at '{}'",
                    config.auth_path.display()
                );
                Arc::new(FileCredentialStore::new(config.auth_path.clone()))
            }
        };

        let connection = ConnectionManager::new(config, transport_factory, credential_store);
        let groups = Arc::new(GroupDispatcher::new(connection.clone()));

        Ok(Relay {
            connection,
            groups,
            event_handler: self.event_handler,
        })
    }
}
