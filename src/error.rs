use crate::types::{CollectiveKind, Rank};

pub type Result<T> = std::result::Result<T, ConcordError>;

#[derive(Debug, thiserror::Error)]
pub enum ConcordError {
    #[error("algorithm {name:?} already registered for {kind}")]
    DuplicateAlgorithm {
        kind: CollectiveKind,
        name: &'static str,
    },

    #[error("unknown {kind} algorithm {name:?} (valid: {known})")]
    UnknownAlgorithm {
        kind: CollectiveKind,
        name: String,
        known: String,
    },

    #[error("invalid process tree over {size} ranks rooted at {root}: {reason}")]
    InvalidTree {
        root: Rank,
        size: u32,
        arity: u32,
        reason: &'static str,
    },

    #[error("{algorithm} requires {requirement} (group size {size})")]
    Precondition {
        algorithm: &'static str,
        requirement: &'static str,
        size: u32,
    },

    #[error("{algorithm} is not applicable to a group of {size} ranks: {reason}")]
    NotApplicable {
        algorithm: &'static str,
        size: u32,
        reason: &'static str,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("datatype mismatch: send buffer is {send}, receive buffer is {recv}")]
    DatatypeMismatch {
        send: crate::types::DataType,
        recv: crate::types::DataType,
    },

    #[error("invalid rank {rank}: group size is {size}")]
    InvalidRank { rank: Rank, size: u32 },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConcordError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a lower-level failure as a `CollectiveFailed` against a peer.
    pub fn collective(operation: &'static str, rank: Rank, err: impl std::fmt::Display) -> Self {
        Self::CollectiveFailed {
            operation,
            rank,
            reason: err.to_string(),
        }
    }
}
