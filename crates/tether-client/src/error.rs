// crates/tether-client/src/error.rs
// Typed failures for gateway calls and the event stream

use thiserror::Error;

/// Failure taxonomy for everything that crosses the gateway boundary.
///
/// One-shot request failures are returned to the immediate caller and never
/// retried here; stream failures are absorbed by the sync controller and
/// turned into scheduled reconnects.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection refused, timeout, or any other transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The gateway rejected the configured credential.
    #[error("gateway rejected credentials")]
    Auth,

    /// The gateway answered, but the payload did not decode.
    #[error("failed to decode gateway payload: {0}")]
    Decode(String),

    /// Any non-2xx response other than 401.
    #[error("gateway returned HTTP {0}")]
    HttpStatus(u16),
}

/// Convenience alias used throughout the client.
pub type Result<T> = std::result::Result<T, ClientError>;

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}
