use thiserror::Error;

/// Canonical error type surfaced by the coordination layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity was not found on any candidate shard.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"vector"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Vector length does not match the declared database dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared on the database descriptor.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// No reachable shard can serve the request.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Human-readable description of what was unreachable.
        message: String,
    },

    /// Deadline expired before the operation completed.
    #[error("timed out: {message}")]
    Timeout {
        /// Description of the operation that timed out.
        message: String,
    },

    /// Submitted cluster config was rejected by the parser or validator.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Human-readable rejection reason.
        message: String,
    },

    /// Create of a database that already exists with a different shape.
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable conflict description.
        message: String,
    },

    /// Wire-level failure talking to a storage node.
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable protocol violation.
        message: String,
    },

    /// Lookup was attempted on a ring with no shards.
    #[error("hash ring is empty")]
    EmptyRing,

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl Error {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a `DimensionMismatch` variant.
    #[must_use]
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates an `Unavailable` variant.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` variant.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates an `InvalidConfig` variant.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a `Conflict` variant.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `Protocol` variant.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error means "the record does not exist here", as
    /// opposed to a transport or shard failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}

/// Convenient result alias for coordination-layer operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
