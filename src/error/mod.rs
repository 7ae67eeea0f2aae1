use crate::store::StoreError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
    #[error("client is not connected")]
    NotConnected,
    #[error("client is busy")]
    Busy,
    #[error("connection manager has been shut down")]
    ShutDown,
    #[error("failed to obtain pairing code: {0}")]
    Pairing(#[source] TransportError),
    #[error("connection closed{}", fmt_code(.code))]
    ConnectionClosed { code: Option<i32> },
    #[error("no connection event within {0:?}")]
    ConnectTimeout(Duration),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("credential store error: {0}")]
    Credentials(#[from] StoreError),
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map(|c| format!(" (status {c})")).unwrap_or_default()
}
