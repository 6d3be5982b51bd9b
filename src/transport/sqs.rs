//! [`QueueTransport`] backed by `aws-sdk-sqs`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::config::{Credentials, SharedCredentialsProvider};
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{QueuePage, QueueTransport, RawMessage, RawQueueAttributes, RemoteError, RemoteErrorKind};
use crate::queue::QueueSettings;

/// Longest single long poll SQS accepts.
const MAX_WAIT_SECONDS: u64 = 20;
const LIST_PAGE_SIZE: i32 = 1000;

/// SQS transport.
///
/// Queue names are resolved to queue URLs once and remembered.
pub struct SqsTransport {
    client: aws_sdk_sqs::Client,
    queue_urls: RwLock<HashMap<String, String>>,
}

impl SqsTransport {
    /// Wraps an already configured SDK client.
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        SqsTransport {
            client,
            queue_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Builds an SDK client for `endpoint` with static credentials.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The service endpoint URL
    /// * `access_id` - The access key id
    /// * `access_key` - The secret access key
    /// * `region` - The signing region (e.g. "us-east-1")
    pub fn with_credentials(endpoint: &str, access_id: &str, access_key: &str, region: &str) -> Self {
        let credentials = Credentials::new(access_id, access_key, None, None, "rs-queue-client");

        let config = aws_sdk_sqs::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .build();

        Self::new(aws_sdk_sqs::Client::from_conf(config))
    }

    async fn queue_url(&self, name: &str) -> Result<String, RemoteError> {
        if let Some(url) = self.queue_urls.read().await.get(name) {
            return Ok(url.clone());
        }

        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(classify)?;
        let url = output.queue_url().map(str::to_string).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::MalformedResponse,
                format!("no queue url returned for `{name}`"),
            )
        })?;

        self.queue_urls
            .write()
            .await
            .insert(name.to_string(), url.clone());
        Ok(url)
    }
}

/// Classifies an SDK failure by transport outcome and service error code.
fn classify<E, R>(err: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            RemoteError::new(RemoteErrorKind::Network, message)
        }
        _ => match err.code() {
            Some(code) => RemoteError::new(kind_for_code(code), message).with_code(code),
            None => RemoteError::new(RemoteErrorKind::Service, message),
        },
    }
}

fn kind_for_code(code: &str) -> RemoteErrorKind {
    match code {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            RemoteErrorKind::QueueNotExist
        }
        "QueueAlreadyExists" | "QueueNameExists" | "QueueDeletedRecently" => {
            RemoteErrorKind::QueueAlreadyExist
        }
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" | "MessageNotInflight" => {
            RemoteErrorKind::ReceiptHandleInvalid
        }
        "InvalidParameterValue" | "InvalidAttributeName" | "InvalidAttributeValue"
        | "InvalidMessageContents" | "MissingParameter" | "InvalidAddress" => {
            RemoteErrorKind::InvalidArgument
        }
        "AccessDenied" | "AccessDeniedException" | "InvalidClientTokenId"
        | "SignatureDoesNotMatch" | "InvalidSecurity" | "UnrecognizedClientException" => {
            RemoteErrorKind::Unauthorized
        }
        "RequestThrottled" | "ThrottlingException" | "OverLimit" | "KmsThrottled" => {
            RemoteErrorKind::Throttled
        }
        _ => RemoteErrorKind::Service,
    }
}

/// Seconds to long-poll for when `remaining` is left until the deadline.
///
/// SQS only takes whole seconds. Partial seconds round up so a sub-second
/// wait still long-polls instead of degrading to a short poll.
fn poll_seconds(remaining: Duration) -> u64 {
    let seconds = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    seconds.min(MAX_WAIT_SECONDS)
}

/// The queue name is the last path segment of an SQS queue URL.
fn queue_name_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn list_queues(
        &self,
        prefix: Option<&str>,
        marker: Option<String>,
    ) -> Result<QueuePage, RemoteError> {
        let output = self
            .client
            .list_queues()
            .set_queue_name_prefix(prefix.map(str::to_string))
            .set_next_token(marker)
            .max_results(LIST_PAGE_SIZE)
            .send()
            .await
            .map_err(classify)?;

        Ok(QueuePage {
            names: output
                .queue_urls()
                .iter()
                .map(|url| queue_name_from_url(url).to_string())
                .collect(),
            next_marker: output.next_token().map(str::to_string),
        })
    }

    async fn create_queue(&self, name: &str, settings: &QueueSettings) -> Result<(), RemoteError> {
        let polling_wait = u64::from(settings.polling_wait_seconds).min(MAX_WAIT_SECONDS);
        let output = self
            .client
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                polling_wait.to_string(),
            )
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                settings.visibility_timeout_seconds.to_string(),
            )
            .send()
            .await
            .map_err(classify)?;

        if let Some(url) = output.queue_url() {
            self.queue_urls
                .write()
                .await
                .insert(name.to_string(), url.to_string());
        }
        Ok(())
    }

    async fn queue_attributes(&self, name: &str) -> Result<RawQueueAttributes, RemoteError> {
        let url = self.queue_url(name).await?;
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .send()
            .await
            .map_err(classify)?;

        let attributes = output.attributes();
        let get = |name: QueueAttributeName| attributes.and_then(|a| a.get(&name)).cloned();
        Ok(RawQueueAttributes {
            active_messages: get(QueueAttributeName::ApproximateNumberOfMessages),
            inflight_messages: get(QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
        })
    }

    async fn send_message(&self, name: &str, body: &str) -> Result<String, RemoteError> {
        let url = self.queue_url(name).await?;
        let output = self
            .client
            .send_message()
            .queue_url(url)
            .message_body(body)
            .send()
            .await
            .map_err(classify)?;

        output.message_id().map(str::to_string).ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::MalformedResponse, "no message id returned")
        })
    }

    async fn receive_message(
        &self,
        name: &str,
        wait: Option<Duration>,
        visibility: Option<Duration>,
    ) -> Result<Option<RawMessage>, RemoteError> {
        let url = self.queue_url(name).await?;
        let visibility = visibility.map(|v| i32::try_from(v.as_secs()).unwrap_or(i32::MAX));
        let deadline = wait.map(|w| Instant::now() + w);

        // SQS caps one long poll at 20 seconds; longer waits take several.
        // Without an explicit wait the queue's own ReceiveMessageWaitTimeSeconds applies.
        loop {
            let wait_seconds = deadline
                .map(|d| poll_seconds(d.saturating_duration_since(Instant::now())));

            let output = self
                .client
                .receive_message()
                .queue_url(&url)
                .max_number_of_messages(1)
                .set_wait_time_seconds(wait_seconds.map(|s| s as i32))
                .set_visibility_timeout(visibility)
                .send()
                .await
                .map_err(classify)?;

            if let Some(message) = output.messages().first() {
                let (Some(id), Some(receipt_handle)) = (message.message_id(), message.receipt_handle())
                else {
                    return Err(RemoteError::new(
                        RemoteErrorKind::MalformedResponse,
                        "received message without id or receipt handle",
                    ));
                };
                return Ok(Some(RawMessage {
                    id: id.to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                    receipt_handle: receipt_handle.to_string(),
                }));
            }

            match (deadline, wait_seconds) {
                (Some(deadline), Some(seconds)) if seconds > 0 && Instant::now() < deadline => {
                    debug!(queue = %name, "long poll returned empty, polling again");
                }
                _ => return Ok(None),
            }
        }
    }

    async fn delete_message(&self, name: &str, receipt_handle: &str) -> Result<(), RemoteError> {
        let url = self.queue_url(name).await?;
        self.client
            .delete_message()
            .queue_url(url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_service_codes() {
        assert_eq!(
            kind_for_code("AWS.SimpleQueueService.NonExistentQueue"),
            RemoteErrorKind::QueueNotExist
        );
        assert_eq!(kind_for_code("QueueAlreadyExists"), RemoteErrorKind::QueueAlreadyExist);
        assert_eq!(
            kind_for_code("ReceiptHandleIsInvalid"),
            RemoteErrorKind::ReceiptHandleInvalid
        );
        assert_eq!(kind_for_code("InvalidClientTokenId"), RemoteErrorKind::Unauthorized);
        assert_eq!(kind_for_code("RequestThrottled"), RemoteErrorKind::Throttled);
        assert_eq!(kind_for_code("InternalError"), RemoteErrorKind::Service);
    }

    #[test]
    fn partial_seconds_round_up_to_a_long_poll() {
        assert_eq!(poll_seconds(Duration::ZERO), 0);
        assert_eq!(poll_seconds(Duration::from_millis(300)), 1);
        assert_eq!(poll_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(poll_seconds(Duration::from_secs(7)), 7);
        assert_eq!(poll_seconds(Duration::from_secs(45)), MAX_WAIT_SECONDS);
    }

    #[test]
    fn extracts_queue_name_from_url() {
        assert_eq!(
            queue_name_from_url("https://sqs.us-east-1.amazonaws.com/123456789012/orders"),
            "orders"
        );
        assert_eq!(
            queue_name_from_url("http://localhost:4566/000000000000/jobs-fifo/"),
            "jobs-fifo"
        );
        assert_eq!(queue_name_from_url("plain"), "plain");
    }
}
