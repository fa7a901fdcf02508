//! Error types for peercache

use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by groups, peers and the transport layer.
///
/// `Clone` so that one coalesced load can hand the same outcome to every
/// waiter of its burst.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // === Request Errors ===
    #[error("key is required")]
    EmptyKey,

    #[error("no such data: {0}")]
    FilteredAbsent(String),

    // === Load Errors ===
    #[error("{0}")]
    Loader(Arc<anyhow::Error>),

    #[error("peer fetch failed: {0}")]
    Peer(#[from] PeerError),

    // === Registry Errors ===
    #[error("no such group: {0}")]
    NoSuchGroup(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Ways a remote fetch can fail. All of them are recovered from by loading
/// locally, so they only ever reach a caller through logs or a peer-only API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("server returned: {status} {body}")]
    BadStatus { status: u16, body: String },

    #[error("reading response body: {0}")]
    Decode(String),
}

impl Error {
    /// Wrap a loader failure, keeping its message verbatim.
    pub fn loader(err: anyhow::Error) -> Self {
        Error::Loader(Arc::new(err))
    }

    /// Did a remote fetch fail (for any reason)?
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, Error::Peer(_))
    }

    /// Convert to the HTTP status used by the peer protocol and the public API
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NoSuchGroup(_) => StatusCode::NO_CONTENT,
            Error::EmptyKey | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
