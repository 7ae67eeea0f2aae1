use super::error::Result;
use super::traits::CredentialStore;
use crate::transport::Credentials;
use std::sync::Mutex;

/// Keeps credentials in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Credentials>> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn persist(&self, credentials: &Credentials) -> Result<()> {
        *self.slot() = Some(credentials.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Credentials>> {
        Ok(self.slot().clone())
    }

    fn exists(&self) -> bool {
        self.slot().is_some()
    }

    fn wipe(&self) -> Result<()> {
        self.slot().take();
        Ok(())
    }
}
