use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::errors::QueueClientError;
use crate::queue::QueueReference;
use crate::transport::{Operation, RawMessage, RemoteError, RemoteErrorKind};

/// One delivery of a message.
///
/// `receipt_handle` identifies this delivery only. It stops working once the
/// message is deleted or its visibility timeout runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub id: String,
    pub body: String,
    pub receipt_handle: String,
}

impl From<RawMessage> for MessageEnvelope {
    fn from(raw: RawMessage) -> Self {
        MessageEnvelope {
            id: raw.id,
            body: raw.body,
            receipt_handle: raw.receipt_handle,
        }
    }
}

impl QueueReference {
    /// Enqueues `content` and returns the id the service assigned to it.
    ///
    /// Size and encoding limits are enforced by the service; a violation is
    /// reported as [`QueueClientError::Send`]. A failed attempt is not retried.
    #[instrument(skip(self, content), fields(queue = %self.name(), bytes = content.len()))]
    pub async fn send(&self, content: &str) -> Result<String, QueueClientError> {
        let id = self
            .transport()
            .send_message(self.name(), content)
            .await
            .map_err(|source| QueueClientError::Send {
                queue: self.name().to_string(),
                source,
            })?;
        debug!(message_id = %id, "sent message");
        Ok(id)
    }

    /// Long-polls for one message.
    ///
    /// Waits up to [`polling_wait`](QueueReference::polling_wait), or the
    /// queue's creation-time wait when the reference carries none, and returns
    /// `None` if nothing arrived. A returned message stays hidden from other
    /// receivers for the visibility timeout unless it is deleted.
    #[instrument(skip(self), fields(queue = %self.name()))]
    pub async fn receive(&self) -> Result<Option<MessageEnvelope>, QueueClientError> {
        self.receive_for(self.polling_wait()).await
    }

    /// Like [`receive`](QueueReference::receive), but gives up after
    /// `timeout` if that is shorter than the polling wait.
    ///
    /// Without a local polling wait the poll itself is abandoned at `timeout`.
    /// A message the service handed out in that instant stays in flight and
    /// is redelivered after its visibility timeout.
    pub async fn receive_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueClientError> {
        match self.polling_wait() {
            Some(wait) => self.receive_for(Some(timeout.min(wait))).await,
            None => tokio::time::timeout(timeout, self.receive_for(None))
                .await
                .unwrap_or(Ok(None)),
        }
    }

    /// Like [`receive`](QueueReference::receive), but aborts with
    /// [`QueueClientError::Cancelled`] as soon as `cancel` completes.
    pub async fn receive_until<F>(
        &self,
        cancel: F,
    ) -> Result<Option<MessageEnvelope>, QueueClientError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!(queue = %self.name(), "receive cancelled");
                Err(QueueClientError::Cancelled {
                    queue: self.name().to_string(),
                })
            }
            received = self.receive() => received,
        }
    }

    async fn receive_for(
        &self,
        wait: Option<Duration>,
    ) -> Result<Option<MessageEnvelope>, QueueClientError> {
        let received = self
            .transport()
            .receive_message(self.name(), wait, self.visibility_timeout())
            .await;

        match received {
            Ok(Some(raw)) => {
                debug!(message_id = %raw.id, "received message");
                Ok(Some(raw.into()))
            }
            Ok(None) => Ok(None),
            Err(RemoteError {
                kind: RemoteErrorKind::MessageNotExist,
                ..
            }) => Ok(None),
            Err(e) => Err(QueueClientError::transport(Operation::ReceiveMessage, e)),
        }
    }

    /// Acknowledges a delivery, removing the message for good.
    ///
    /// A stale, expired or already used handle fails with
    /// [`QueueClientError::MessageNotFound`].
    #[instrument(skip(self), fields(queue = %self.name()))]
    pub async fn delete(&self, receipt_handle: &str) -> Result<(), QueueClientError> {
        self.transport()
            .delete_message(self.name(), receipt_handle)
            .await
            .map_err(|source| match source.kind {
                RemoteErrorKind::ReceiptHandleInvalid | RemoteErrorKind::MessageNotExist => {
                    QueueClientError::MessageNotFound {
                        receipt_handle: receipt_handle.to_string(),
                        source,
                    }
                }
                _ => QueueClientError::transport(Operation::DeleteMessage, source),
            })?;
        debug!("deleted message");
        Ok(())
    }

    /// Receives one message and deletes it right away.
    ///
    /// The two steps are not atomic. If the delete fails, the call fails with
    /// [`QueueClientError::DeleteAfterReceive`], which still carries the
    /// envelope; the message remains in flight and comes back after the
    /// visibility timeout. Callers that need exactly-once processing should
    /// receive, process, then [`delete`](QueueReference::delete) themselves.
    pub async fn receive_and_delete(&self) -> Result<Option<MessageEnvelope>, QueueClientError> {
        let Some(envelope) = self.receive().await? else {
            return Ok(None);
        };

        if let Err(e) = self.delete(&envelope.receipt_handle).await {
            warn!(
                queue = %self.name(),
                message_id = %envelope.id,
                error = %e,
                "message received but not deleted"
            );
            return Err(QueueClientError::DeleteAfterReceive {
                envelope,
                source: Box::new(e),
            });
        }
        Ok(Some(envelope))
    }
}
