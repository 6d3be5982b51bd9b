//! The remote queue-service boundary.
//!
//! [`QueueTransport`] is everything the client needs from the service: six
//! request/response calls, each returning a raw payload or a classified
//! [`RemoteError`]. Signing, marshaling and endpoint routing live behind it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::QueueSettings;

pub mod memory;
pub mod sqs;

pub use memory::InMemoryTransport;
pub use sqs::SqsTransport;

/// The remote operations a transport exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListQueues,
    CreateQueue,
    GetQueueAttributes,
    SendMessage,
    ReceiveMessage,
    DeleteMessage,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ListQueues => "list-queues",
            Operation::CreateQueue => "create-queue",
            Operation::GetQueueAttributes => "get-queue-attributes",
            Operation::SendMessage => "send-message",
            Operation::ReceiveMessage => "receive-message",
            Operation::DeleteMessage => "delete-message",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a fault reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    QueueNotExist,
    QueueAlreadyExist,
    /// No message became available. Routine for receive calls.
    MessageNotExist,
    ReceiptHandleInvalid,
    InvalidArgument,
    Unauthorized,
    Throttled,
    Network,
    MalformedResponse,
    Service,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::QueueNotExist => "queue does not exist",
            RemoteErrorKind::QueueAlreadyExist => "queue already exists",
            RemoteErrorKind::MessageNotExist => "no message available",
            RemoteErrorKind::ReceiptHandleInvalid => "receipt handle invalid",
            RemoteErrorKind::InvalidArgument => "invalid argument",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::Throttled => "throttled",
            RemoteErrorKind::Network => "network failure",
            RemoteErrorKind::MalformedResponse => "malformed response",
            RemoteErrorKind::Service => "service error",
        }
    }

    /// Network, throttling and generic service faults may clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteErrorKind::Network | RemoteErrorKind::Throttled | RemoteErrorKind::Service
        )
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault reported by the remote service, already classified.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    /// The service's own error code, when it sent one.
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        RemoteError {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// One page of a queue listing.
#[derive(Debug, Clone, Default)]
pub struct QueuePage {
    pub names: Vec<String>,
    /// Marker for the next page; `None` on the last page.
    pub next_marker: Option<String>,
}

/// A message as handed out by the service for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub body: String,
    pub receipt_handle: String,
}

/// Queue attributes exactly as reported by the service.
///
/// Counts stay unparsed here; interpreting them is the caller's business.
#[derive(Debug, Clone, Default)]
pub struct RawQueueAttributes {
    pub active_messages: Option<String>,
    pub inflight_messages: Option<String>,
}

/// Request/response client for a remote queue service.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Fetches the page of queue names that starts after `marker`.
    async fn list_queues(
        &self,
        prefix: Option<&str>,
        marker: Option<String>,
    ) -> Result<QueuePage, RemoteError>;

    async fn create_queue(&self, name: &str, settings: &QueueSettings) -> Result<(), RemoteError>;

    async fn queue_attributes(&self, name: &str) -> Result<RawQueueAttributes, RemoteError>;

    /// Enqueues `body` and returns the id the service assigned.
    async fn send_message(&self, name: &str, body: &str) -> Result<String, RemoteError>;

    /// Waits up to `wait` for a message and hides it for `visibility`.
    ///
    /// `None` for either falls back to what the queue was created with. A
    /// transport may report "nothing arrived" either as `Ok(None)` or as a
    /// [`RemoteErrorKind::MessageNotExist`] error.
    async fn receive_message(
        &self,
        name: &str,
        wait: Option<Duration>,
        visibility: Option<Duration>,
    ) -> Result<Option<RawMessage>, RemoteError>;

    async fn delete_message(&self, name: &str, receipt_handle: &str) -> Result<(), RemoteError>;
}
