//! Error types for kyrowatch.
//!
//! Failures that reach a subscriber are values inside the stream
//! (`ObserverError`). Failures of the stream plumbing itself (a disconnected
//! or timed-out receive) are reported through `WatchError`.

use thiserror::Error;

use crate::object::ObjectId;

/// Errors raised by a persistence context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The entity name is not declared in the schema.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// The relationship is not declared for the entity.
    #[error("Unknown relationship '{relationship}' on entity '{entity}'")]
    UnknownRelationship {
        entity: String,
        relationship: String,
    },

    /// The fetch predicate cannot be evaluated.
    #[error("Invalid predicate: {reason}")]
    InvalidPredicate {
        reason: String,
    },

    /// The object is not registered in the context (never inserted, or deleted).
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// The object belongs to a different context.
    #[error("Object {0} belongs to another context")]
    ForeignObject(ObjectId),

    /// Backend error.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// The store failed without a classifiable cause.
    #[error("Unknown store failure")]
    Unknown,
}

/// Failure of a query re-execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request is structurally invalid; every re-execution will fail.
    #[error("Invalid fetch request: {reason}")]
    InvalidRequest {
        reason: String,
    },

    /// The store reported an error while executing the request.
    #[error("Fetch failed: {message}")]
    Store {
        message: String,
    },

    /// The failure could not be classified.
    #[error("Fetch failed for an unknown reason")]
    Unknown,
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownEntity(_)
            | StoreError::UnknownRelationship { .. }
            | StoreError::InvalidPredicate { .. } => Self::InvalidRequest {
                reason: err.to_string(),
            },
            StoreError::Unknown => Self::Unknown,
            other => Self::Store {
                message: other.to_string(),
            },
        }
    }
}

/// Failure delivered as a value inside a watcher stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// The watched root object was deleted. Terminal for object streams.
    #[error("Observed object {id} was deleted")]
    ObjectDeleted {
        id: ObjectId,
    },

    /// Query execution failed. Query streams stay active after this.
    #[error("Query fetch error: {0}")]
    Fetch(#[from] FetchError),
}

impl ObserverError {
    /// Returns true if no further items follow this failure.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ObjectDeleted { .. })
    }
}

/// Top-level error type for kyrowatch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Resolving the object to watch failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A failure delivered inside a stream, surfaced by `recv_value_timeout`.
    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),

    #[error("Stream '{stream}' is disconnected")]
    Disconnected {
        stream: String,
    },

    #[error("Receive timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

impl WatchError {
    /// Creates a disconnect error for the named stream.
    #[must_use]
    pub fn disconnected(stream: impl Into<String>) -> Self {
        Self::Disconnected {
            stream: stream.into(),
        }
    }

    /// Returns true if the stream has completed.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Returns true if a receive timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if retrying the receive may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Observer(e) => matches!(e, ObserverError::Fetch(FetchError::Store { .. })),
            Self::Store(_) | Self::Disconnected { .. } => false,
        }
    }
}

/// Result type alias for kyrowatch operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// Result type alias for persistence context operations.
pub type StoreResult<T> = Result<T, StoreError>;
