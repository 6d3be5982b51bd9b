use std::str::FromStr;

use thiserror::Error;

use crate::message::MessageEnvelope;
use crate::transport::{Operation, RemoteError};

/// Error types for queue client operations.
///
/// Every variant that originates from the remote service keeps the classified
/// [`RemoteError`] as its source so callers can inspect the original fault.
#[derive(Debug, Error)]
pub enum QueueClientError {
    /// The connection could not be configured.
    ///
    /// Raised for empty credentials or endpoints and for environment
    /// configuration that selects an endpoint which was never provided.
    #[error("invalid connection configuration: {0}")]
    Configuration(String),

    /// A network or service level failure, including authentication and
    /// throttling faults.
    #[error("{operation} failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: RemoteError,
    },

    #[error("failed to create queue `{queue}`: {source}")]
    QueueCreation {
        queue: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to send message to queue `{queue}`: {source}")]
    Send {
        queue: String,
        #[source]
        source: RemoteError,
    },

    /// The receipt handle is stale, expired or was already used.
    #[error("no in-flight message for receipt handle `{receipt_handle}`")]
    MessageNotFound {
        receipt_handle: String,
        #[source]
        source: RemoteError,
    },

    /// A cancellable receive was aborted by the caller.
    #[error("receive on queue `{queue}` was cancelled")]
    Cancelled { queue: String },

    /// `receive_and_delete` dequeued a message but could not acknowledge it.
    ///
    /// The envelope is handed back so the caller can still process it; the
    /// message stays in flight and is redelivered after its visibility timeout.
    #[error("message `{}` was received but not deleted: {source}", .envelope.id)]
    DeleteAfterReceive {
        envelope: MessageEnvelope,
        #[source]
        source: Box<QueueClientError>,
    },
}

impl QueueClientError {
    pub(crate) fn transport(operation: Operation, source: RemoteError) -> Self {
        QueueClientError::Transport { operation, source }
    }

    /// Returns the remote error behind this failure, if there is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            QueueClientError::Transport { source, .. }
            | QueueClientError::QueueCreation { source, .. }
            | QueueClientError::Send { source, .. }
            | QueueClientError::MessageNotFound { source, .. } => Some(source),
            QueueClientError::DeleteAfterReceive { source, .. } => source.remote(),
            QueueClientError::Configuration(_) | QueueClientError::Cancelled { .. } => None,
        }
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// The client never retries on its own; this only helps callers decide.
    pub fn is_transient(&self) -> bool {
        match self.remote() {
            Some(remote) => remote.kind.is_transient(),
            None => false,
        }
    }
}

/// Failure returned by consumer handlers.
///
/// A failed handler leaves its message in flight, so it is delivered again
/// once the visibility timeout elapses.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

impl FromStr for HandlerError {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HandlerError::new(s))
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError::new(s)
    }
}
