//! Error taxonomy for reconstruction workflows
//!
//! Transport and timeout failures during topology-based connects are
//! recoverable by rotating endpoints; everything that happens during a
//! reconstruction proper is surfaced to the caller.

use scrolls_chain::cip25::Cip25Error;
use scrolls_chain::header::HeaderError;
use scrolls_chain::stream::StreamError;
use scrolls_network::facade;
use scrolls_network::miniprotocols::{blockfetch, chainsync, handshake};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("handshake refused by peer: {reason}")]
    HandshakeRefused { reason: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("integrity failure on {which}: expected {expected}, got {actual}")]
    IntegrityFailure {
        which: &'static str,
        expected: String,
        actual: String,
    },

    #[error("malformed data in {location}: {reason}")]
    Malformed {
        location: &'static str,
        reason: String,
    },

    #[error("timeout during {op}")]
    Timeout { op: &'static str },
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    pub fn malformed(location: &'static str, reason: impl Into<String>) -> Self {
        Error::Malformed {
            location,
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry on a fresh connection
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout { .. })
    }
}

impl From<facade::Error> for Error {
    fn from(err: facade::Error) -> Self {
        match err {
            facade::Error::ConnectFailure(io) => Error::Transport(io.to_string()),
            facade::Error::ConnectTimeout => Error::Timeout { op: "connect" },
            facade::Error::HandshakeRefused(reason) => Error::HandshakeRefused {
                reason: format!("{reason:?}"),
            },
            facade::Error::HandshakeProtocol(handshake::ClientError::Plexer(inner)) => {
                Error::Transport(inner.to_string())
            }
            facade::Error::NoUsableEndpoint => {
                Error::Transport("no endpoint in the topology could be reached".into())
            }
            other => Error::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<chainsync::ClientError> for Error {
    fn from(err: chainsync::ClientError) -> Self {
        match err {
            chainsync::ClientError::Timeout => Error::Timeout { op: "chain-sync" },
            chainsync::ClientError::IntersectionNotFound => {
                Error::not_found("intersection point on the relay's chain")
            }
            other => Error::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<blockfetch::ClientError> for Error {
    fn from(err: blockfetch::ClientError) -> Self {
        match err {
            blockfetch::ClientError::Timeout => Error::Timeout { op: "block-fetch" },
            blockfetch::ClientError::NoBlocks => {
                Error::not_found("block on relay for this point")
            }
            other => Error::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<StreamError> for Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Client(inner) => inner.into(),
            StreamError::Header(inner) => inner.into(),
        }
    }
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        Error::malformed("block header", err.to_string())
    }
}

impl From<Cip25Error> for Error {
    fn from(err: Cip25Error) -> Self {
        Error::malformed("cip-25 metadata", err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::malformed("json document", err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout { op: "indexer http" }
        } else {
            Error::Transport(err.to_string())
        }
    }
}
