use std::io;

use thiserror::Error;

/// Fatal errors that can be returned from [`crate::Relay::start`].
///
/// These are the only errors that propagate out of the relay; everything else is a
/// per-packet recoverable condition that is logged and dropped.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("MTU {0} is below the minimum of {min}", min = crate::relay::MIN_MTU)]
    MtuTooSmall(u16),
    #[error("packet buffer size ({buffer_size}) must exceed transform overhead ({overhead})")]
    BufferTooSmall { buffer_size: usize, overhead: usize },
    #[error("unknown proxy mode `{0}`")]
    UnknownMode(String),
    #[error("invalid pre-shared key for mode `{mode}`: {reason}")]
    InvalidPsk { mode: String, reason: String },
    #[error("failed to resolve upstream endpoint `{0}`")]
    UnresolvableEndpoint(String),
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Returned by [`crate::transform::Transform`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("unknown transform mode `{0}`")]
    UnknownMode(String),
    #[error("invalid pre-shared key: {0}")]
    InvalidPsk(String),
    #[error("buffer too small for transform")]
    BufferTooSmall,
    #[error("authentication or format failure while decrypting")]
    DecryptFailed,
}

/// Non-fatal failure to apply a socket option. Logged as a warning, never propagated.
#[derive(Debug, Error)]
#[error("failed to set socket option {option}: {source}")]
pub struct SoftSocketError {
    pub option: &'static str,
    #[source]
    pub source: io::Error,
}
