//! A process-local queue service.
//!
//! Behaves like the remote service as far as the client can observe: receive
//! long-polls, deliveries are hidden for their visibility timeout, every
//! delivery gets a fresh receipt handle and expired deliveries come back.
//! Time is measured with `tokio::time`, so tests can run on a paused clock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, sleep_until};
use uuid::Uuid;

use super::{
    Operation, QueuePage, QueueTransport, RawMessage, RawQueueAttributes, RemoteError,
    RemoteErrorKind,
};
use crate::queue::QueueSettings;

const DEFAULT_PAGE_SIZE: usize = 1000;
const MAX_QUEUE_NAME_LEN: usize = 256;

/// In-memory [`QueueTransport`].
///
/// Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

#[derive(Default)]
struct State {
    queues: BTreeMap<String, MemoryQueue>,
    faults: HashMap<Operation, VecDeque<RemoteError>>,
}

impl State {
    fn take_fault(&mut self, operation: Operation) -> Result<(), RemoteError> {
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut MemoryQueue, RemoteError> {
        self.queues.get_mut(name).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::QueueNotExist,
                format!("queue `{name}` does not exist"),
            )
        })
    }
}

struct MemoryQueue {
    settings: QueueSettings,
    visible: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    notify: Arc<Notify>,
}

struct StoredMessage {
    id: String,
    body: String,
}

struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

impl MemoryQueue {
    fn new(settings: QueueSettings) -> Self {
        MemoryQueue {
            settings,
            visible: VecDeque::new(),
            in_flight: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Makes deliveries whose visibility timeout ran out available again.
    /// Their receipt handles stop working.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                self.visible.push_back(flight.message);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.visible_at).min()
    }
}

fn validate_queue_name(name: &str) -> Result<(), RemoteError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_QUEUE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::new(
            RemoteErrorKind::InvalidArgument,
            format!("invalid queue name `{name}`"),
        ))
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates a transport that lists at most `page_size` queues per page.
    pub fn with_page_size(page_size: usize) -> Self {
        InMemoryTransport {
            state: Arc::new(Mutex::new(State::default())),
            page_size: page_size.max(1),
        }
    }

    /// Makes the next call of `operation` fail with `error`.
    ///
    /// Faults queue up: injecting twice fails the next two calls.
    pub async fn inject_fault(&self, operation: Operation, error: RemoteError) {
        let mut state = self.state.lock().await;
        state.faults.entry(operation).or_default().push_back(error);
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn list_queues(
        &self,
        prefix: Option<&str>,
        marker: Option<String>,
    ) -> Result<QueuePage, RemoteError> {
        let mut state = self.state.lock().await;
        state.take_fault(Operation::ListQueues)?;

        let mut names: Vec<String> = state
            .queues
            .keys()
            .filter(|name| marker.as_deref().is_none_or(|m| name.as_str() > m))
            .filter(|name| prefix.is_none_or(|p| name.starts_with(p)))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next_marker = if names.len() > self.page_size {
            names.truncate(self.page_size);
            names.last().cloned()
        } else {
            None
        };
        Ok(QueuePage { names, next_marker })
    }

    async fn create_queue(&self, name: &str, settings: &QueueSettings) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.take_fault(Operation::CreateQueue)?;
        validate_queue_name(name)?;

        if state.queues.contains_key(name) {
            return Err(RemoteError::new(
                RemoteErrorKind::QueueAlreadyExist,
                format!("queue `{name}` already exists"),
            ));
        }
        state.queues.insert(name.to_string(), MemoryQueue::new(*settings));
        Ok(())
    }

    async fn queue_attributes(&self, name: &str) -> Result<RawQueueAttributes, RemoteError> {
        let mut state = self.state.lock().await;
        state.take_fault(Operation::GetQueueAttributes)?;

        let queue = state.queue_mut(name)?;
        queue.reclaim_expired(Instant::now());
        Ok(RawQueueAttributes {
            active_messages: Some(queue.visible.len().to_string()),
            inflight_messages: Some(queue.in_flight.len().to_string()),
        })
    }

    async fn send_message(&self, name: &str, body: &str) -> Result<String, RemoteError> {
        let mut state = self.state.lock().await;
        state.take_fault(Operation::SendMessage)?;

        let queue = state.queue_mut(name)?;
        let id = Uuid::new_v4().to_string();
        queue.visible.push_back(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
        });
        queue.notify.notify_waiters();
        Ok(id)
    }

    async fn receive_message(
        &self,
        name: &str,
        wait: Option<Duration>,
        visibility: Option<Duration>,
    ) -> Result<Option<RawMessage>, RemoteError> {
        let (deadline, visibility) = {
            let mut state = self.state.lock().await;
            state.take_fault(Operation::ReceiveMessage)?;
            let settings = state.queue_mut(name)?.settings;
            (
                Instant::now() + wait.unwrap_or_else(|| settings.polling_wait()),
                visibility.unwrap_or_else(|| settings.visibility_timeout()),
            )
        };

        loop {
            let mut state = self.state.lock().await;
            let queue = state.queue_mut(name)?;
            let now = Instant::now();
            queue.reclaim_expired(now);

            if let Some(message) = queue.visible.pop_front() {
                let receipt_handle = Uuid::new_v4().simple().to_string();
                let raw = RawMessage {
                    id: message.id.clone(),
                    body: message.body.clone(),
                    receipt_handle: receipt_handle.clone(),
                };
                queue.in_flight.insert(
                    receipt_handle,
                    InFlight {
                        message,
                        visible_at: now + visibility,
                    },
                );
                return Ok(Some(raw));
            }

            if now >= deadline {
                return Err(RemoteError::new(
                    RemoteErrorKind::MessageNotExist,
                    format!("no message available in queue `{name}`"),
                ));
            }

            // Wake on a new message, on the next redelivery or at the deadline.
            let wake_at = queue.next_expiry().map_or(deadline, |t| t.min(deadline));
            let notify = Arc::clone(&queue.notify);
            let notified = notify.notified();
            drop(state);

            tokio::select! {
                _ = notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(&self, name: &str, receipt_handle: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.take_fault(Operation::DeleteMessage)?;

        let queue = state.queue_mut(name)?;
        queue.reclaim_expired(Instant::now());
        match queue.in_flight.remove(receipt_handle) {
            Some(_) => Ok(()),
            None => Err(RemoteError::new(
                RemoteErrorKind::ReceiptHandleInvalid,
                format!("receipt handle `{receipt_handle}` is not valid"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(30);

    async fn transport_with_queue(name: &str) -> InMemoryTransport {
        let transport = InMemoryTransport::new();
        transport
            .create_queue(name, &QueueSettings::default())
            .await
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn duplicate_queue_is_rejected() {
        let transport = transport_with_queue("orders").await;
        let err = transport
            .create_queue("orders", &QueueSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::QueueAlreadyExist);
    }

    #[tokio::test]
    async fn invalid_queue_name_is_rejected() {
        let transport = InMemoryTransport::new();
        for name in ["", "has space", "dots.are.bad"] {
            let err = transport
                .create_queue(name, &QueueSettings::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind, RemoteErrorKind::InvalidArgument, "name {name:?}");
        }
    }

    #[tokio::test]
    async fn unknown_queue_reports_queue_not_exist() {
        let transport = InMemoryTransport::new();
        let err = transport.send_message("missing", "x").await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::QueueNotExist);
    }

    #[tokio::test(start_paused = true)]
    async fn each_delivery_gets_a_new_receipt_handle() {
        let transport = transport_with_queue("jobs").await;
        transport.send_message("jobs", "work").await.unwrap();

        let first = transport
            .receive_message("jobs", Some(Duration::ZERO), Some(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let second = transport
            .receive_message("jobs", Some(Duration::ZERO), Some(VISIBILITY))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.receipt_handle, second.receipt_handle);

        let err = transport
            .delete_message("jobs", &first.receipt_handle)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::ReceiptHandleInvalid);
        transport
            .delete_message("jobs", &second.receipt_handle)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_receive_wakes_on_send() {
        let transport = transport_with_queue("jobs").await;

        let receiver = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .receive_message("jobs", Some(Duration::from_secs(30)), Some(VISIBILITY))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        let started = Instant::now();
        transport.send_message("jobs", "late").await.unwrap();

        let received = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(received.body, "late");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_receive_picks_up_redelivery() {
        let transport = transport_with_queue("jobs").await;
        transport.send_message("jobs", "retry me").await.unwrap();
        transport
            .receive_message("jobs", Some(Duration::ZERO), Some(Duration::from_secs(3)))
            .await
            .unwrap()
            .unwrap();

        let started = Instant::now();
        let again = transport
            .receive_message("jobs", Some(Duration::from_secs(10)), Some(VISIBILITY))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(again.body, "retry me");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_without_overrides_uses_creation_settings() {
        let transport = InMemoryTransport::new();
        transport
            .create_queue(
                "jobs",
                &QueueSettings {
                    polling_wait_seconds: 2,
                    visibility_timeout_seconds: 3,
                },
            )
            .await
            .unwrap();

        let started = Instant::now();
        let err = transport
            .receive_message("jobs", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::MessageNotExist);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));

        transport.send_message("jobs", "work").await.unwrap();
        transport
            .receive_message("jobs", None, None)
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        let attributes = transport.queue_attributes("jobs").await.unwrap();
        assert_eq!(attributes.active_messages.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let transport = transport_with_queue("jobs").await;
        transport
            .inject_fault(
                Operation::SendMessage,
                RemoteError::new(RemoteErrorKind::Throttled, "slow down"),
            )
            .await;

        let err = transport.send_message("jobs", "x").await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Throttled);
        transport.send_message("jobs", "x").await.unwrap();
    }

    #[tokio::test]
    async fn listing_pages_by_marker() {
        let transport = InMemoryTransport::with_page_size(2);
        for name in ["a", "b", "c"] {
            transport
                .create_queue(name, &QueueSettings::default())
                .await
                .unwrap();
        }

        let first = transport.list_queues(None, None).await.unwrap();
        assert_eq!(first.names, vec!["a", "b"]);
        assert_eq!(first.next_marker.as_deref(), Some("b"));

        let second = transport.list_queues(None, first.next_marker).await.unwrap();
        assert_eq!(second.names, vec!["c"]);
        assert!(second.next_marker.is_none());
    }
}
