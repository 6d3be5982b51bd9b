use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, TryStreamExt};
use tracing::{debug, instrument};

use crate::client::Connection;
use crate::errors::QueueClientError;
use crate::transport::{Operation, QueueTransport, RemoteError, RemoteErrorKind};

mod config;

pub use config::QueueSettings;

/// A named queue resolved against a [`Connection`].
///
/// Resolving is purely local; whether the queue exists is only discovered by
/// the first operation that touches it.
///
/// A reference either defers to the polling wait and visibility timeout the
/// queue was created with, or carries its own that override them per request.
#[derive(Clone)]
pub struct QueueReference {
    name: String,
    settings: Option<QueueSettings>,
    transport: Arc<dyn QueueTransport>,
}

impl QueueReference {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The settings this reference overrides the queue's own with, if any.
    pub fn settings(&self) -> Option<QueueSettings> {
        self.settings
    }

    /// How long [`receive`](QueueReference::receive) waits for a message.
    /// `None` means the wait configured when the queue was created.
    pub fn polling_wait(&self) -> Option<Duration> {
        self.settings.map(|s| s.polling_wait())
    }

    pub fn visibility_timeout(&self) -> Option<Duration> {
        self.settings.map(|s| s.visibility_timeout())
    }

    pub(crate) fn transport(&self) -> &dyn QueueTransport {
        self.transport.as_ref()
    }

    /// Reads the queue's message counts from the service.
    ///
    /// Every call performs a fresh remote read. A count the service leaves
    /// out is reported as zero; a count that is present but not a
    /// non-negative integer is a [`RemoteErrorKind::MalformedResponse`].
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn attributes(&self) -> Result<QueueAttributesSnapshot, QueueClientError> {
        let raw = self
            .transport
            .queue_attributes(&self.name)
            .await
            .map_err(|e| QueueClientError::transport(Operation::GetQueueAttributes, e))?;

        let snapshot = QueueAttributesSnapshot {
            active_messages: parse_count("active_messages", raw.active_messages.as_deref())?,
            inflight_messages: parse_count("inflight_messages", raw.inflight_messages.as_deref())?,
        };
        debug!(
            active = snapshot.active_messages,
            inflight = snapshot.inflight_messages,
            "fetched queue attributes"
        );
        Ok(snapshot)
    }

    /// Number of messages currently available for receive.
    pub async fn message_count(&self) -> Result<u64, QueueClientError> {
        Ok(self.attributes().await?.active_messages)
    }
}

impl fmt::Debug for QueueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReference")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Message counts of a queue at the moment they were read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueAttributesSnapshot {
    /// Messages available for receive.
    pub active_messages: u64,
    /// Messages received but neither deleted nor timed out yet.
    pub inflight_messages: u64,
}

fn parse_count(field: &'static str, raw: Option<&str>) -> Result<u64, QueueClientError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    raw.trim().parse::<u64>().map_err(|_| {
        QueueClientError::transport(
            Operation::GetQueueAttributes,
            RemoteError::new(
                RemoteErrorKind::MalformedResponse,
                format!("{field} is not a non-negative integer: {raw:?}"),
            ),
        )
    })
}

impl Connection {
    /// Lists queue names, fetching one remote page at a time.
    ///
    /// The stream is lazy and finite. Calling this again starts a fresh
    /// listing. A failed page fetch is yielded as an error and ends the stream.
    pub fn list_queues(
        &self,
        prefix: Option<&str>,
    ) -> impl Stream<Item = Result<String, QueueClientError>> + Send + use<> {
        let transport = Arc::clone(self.transport());
        let prefix = prefix.map(str::to_owned);

        // `None` state means the previous page was the last one.
        stream::unfold(Some(None::<String>), move |marker| {
            let transport = Arc::clone(&transport);
            let prefix = prefix.clone();
            async move {
                let marker = marker?;
                match transport.list_queues(prefix.as_deref(), marker).await {
                    Ok(page) => {
                        debug!(count = page.names.len(), "fetched queue page");
                        Some((Ok(page.names), page.next_marker.map(Some)))
                    }
                    Err(e) => Some((
                        Err(QueueClientError::transport(Operation::ListQueues, e)),
                        None,
                    )),
                }
            }
        })
        .map_ok(|names| stream::iter(names.into_iter().map(Ok::<String, QueueClientError>)))
        .try_flatten()
    }

    /// Creates a queue with the given polling parameters.
    ///
    /// Creation is not idempotent: the service may reject a name that is
    /// already taken, and that rejection is reported like any other.
    #[instrument(skip(self, settings))]
    pub async fn create_queue(
        &self,
        name: &str,
        settings: QueueSettings,
    ) -> Result<(), QueueClientError> {
        self.transport()
            .create_queue(name, &settings)
            .await
            .map_err(|source| QueueClientError::QueueCreation {
                queue: name.to_string(),
                source,
            })?;
        debug!(
            polling_wait = settings.polling_wait_seconds,
            visibility_timeout = settings.visibility_timeout_seconds,
            "created queue"
        );
        Ok(())
    }

    /// Resolves `name`. Receives use the polling wait and visibility timeout
    /// the queue was created with.
    pub fn resolve_queue(&self, name: impl Into<String>) -> QueueReference {
        self.reference(name.into(), None)
    }

    /// Resolves `name` with settings that take precedence over the queue's
    /// creation-time ones on every receive.
    pub fn resolve_queue_with(
        &self,
        name: impl Into<String>,
        settings: QueueSettings,
    ) -> QueueReference {
        self.reference(name.into(), Some(settings))
    }

    fn reference(&self, name: String, settings: Option<QueueSettings>) -> QueueReference {
        QueueReference {
            name,
            settings,
            transport: Arc::clone(self.transport()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_count_is_zero() {
        assert_eq!(parse_count("active_messages", None).unwrap(), 0);
    }

    #[test]
    fn count_is_trimmed_and_parsed() {
        assert_eq!(parse_count("active_messages", Some(" 17 ")).unwrap(), 17);
    }

    #[test]
    fn non_numeric_count_is_malformed() {
        for raw in ["", "many", "-3", "1.5"] {
            let err = parse_count("active_messages", Some(raw)).unwrap_err();
            assert_eq!(
                err.remote().map(|r| r.kind),
                Some(RemoteErrorKind::MalformedResponse),
                "input {raw:?}"
            );
        }
    }
}
