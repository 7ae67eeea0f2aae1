use super::error::Result;
use crate::transport::Credentials;

/// Durable storage for the transport's credentials.
///
/// Calls are synchronous: when `persist` or `wipe` returns, the change is on
/// stable storage. The connection manager relies on this to persist
/// credential updates before it hands control back to the transport.
pub trait CredentialStore: Send + Sync {
    fn persist(&self, credentials: &Credentials) -> Result<()>;

    fn load(&self) -> Result<Option<Credentials>>;

    /// Whether a prior session left credentials behind.
    fn exists(&self) -> bool;

    /// Removes all stored credentials. Wiping an empty store succeeds.
    fn wipe(&self) -> Result<()>;
}
