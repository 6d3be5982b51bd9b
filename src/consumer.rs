use std::future::{Future, pending};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};

use crate::errors::{HandlerError, QueueClientError};
use crate::message::MessageEnvelope;
use crate::queue::QueueReference;

mod config;
mod functions;

pub use config::ConsumerConfig;
pub use functions::{FnHandler, MessageHandler};

/// Polls queues and feeds every received message to a handler.
///
/// Each registered handler gets its own loop: receive, call the handler,
/// delete the message when the handler succeeds. A failing handler leaves the
/// message in flight for redelivery. All loops run concurrently on the task
/// that drives the consumer.
///
/// # Example
///
/// ```rust,no_run
/// use rs_queue_client::{HandlerError, client::connect, consumer::QueueConsumer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connection = connect("http://localhost:4566", "id", "secret")?;
/// let queue = connection.resolve_queue("orders");
///
/// let mut consumer = QueueConsumer::new();
/// consumer.add_handler_fn(&queue, |message, prefix: String| async move {
///     println!("{prefix}{}", message.body);
///     Ok::<(), HandlerError>(())
/// }, "order: ".to_string());
///
/// let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
/// tokio::spawn(async move { consumer.start_all_handlers_with_shutdown(shutdown_rx).await });
/// // ...
/// let _ = shutdown_tx.send(());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct QueueConsumer {
    loops: Vec<ConsumerLoop>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConsumerConfig) -> Self {
        QueueConsumer {
            loops: Vec::new(),
            config,
        }
    }

    /// Registers a handler for `queue`.
    pub fn add_handler<H>(&mut self, queue: &QueueReference, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.loops.push(ConsumerLoop {
            queue: queue.clone(),
            handler: Arc::new(handler),
            config: self.config.clone(),
        });
    }

    /// Registers a handler function that is also handed a clone of
    /// `shared_resources` on every call.
    pub fn add_handler_fn<RFn, Fut, TShared>(
        &mut self,
        queue: &QueueReference,
        rv_fn: RFn,
        shared_resources: TShared,
    ) where
        RFn: Fn(MessageEnvelope, TShared) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        TShared: Send + Sync + Clone + 'static,
    {
        self.add_handler(queue, FnHandler::new(rv_fn, shared_resources));
    }

    pub fn handler_count(&self) -> usize {
        self.loops.len()
    }

    /// Runs all handler loops until the process ends.
    pub async fn start_all_handlers(&self) {
        let (_stop_tx, stop_rx) = watch::channel(false);
        join_all(self.loops.iter().map(|l| l.run(stop_rx.clone()))).await;
    }

    /// Runs all handler loops until `shutdown` fires or its sender is dropped.
    ///
    /// Shutdown is graceful: a loop that is running a handler finishes that
    /// message first, a loop that is waiting in receive stops waiting.
    pub async fn start_all_handlers_with_shutdown(&self, shutdown: oneshot::Receiver<()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let all = join_all(self.loops.iter().map(|l| l.run(stop_rx.clone())));
        tokio::pin!(all);

        tokio::select! {
            _ = &mut all => {}
            _ = shutdown => {
                debug!(handlers = self.loops.len(), "shutting down consumer");
                let _ = stop_tx.send(true);
                all.await;
            }
        }
    }
}

struct ConsumerLoop {
    queue: QueueReference,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl ConsumerLoop {
    async fn run(&self, stop: watch::Receiver<bool>) {
        let queue = self.queue.name();

        loop {
            if *stop.borrow() {
                break;
            }

            let polled_at = Instant::now();
            let envelope = match self.queue.receive_until(stopped(stop.clone())).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    debug!(queue = %queue, "no messages received");
                    let stop_requested = tokio::select! {
                        _ = stopped(stop.clone()) => true,
                        _ = sleep_until(polled_at + self.config.min_poll_interval) => false,
                    };
                    if stop_requested {
                        break;
                    }
                    continue;
                }
                Err(QueueClientError::Cancelled { .. }) => break,
                Err(e) => {
                    error!(queue = %queue, error = %e, "error receiving messages");
                    let stop_requested = tokio::select! {
                        _ = stopped(stop.clone()) => true,
                        _ = tokio::time::sleep(self.config.error_backoff) => false,
                    };
                    if stop_requested {
                        break;
                    }
                    continue;
                }
            };

            let message_id = envelope.id.clone();
            let receipt_handle = envelope.receipt_handle.clone();
            match self.handler.handle(envelope).await {
                Ok(()) => {
                    if let Err(e) = self.queue.delete(&receipt_handle).await {
                        warn!(queue = %queue, message_id = %message_id, error = %e, "error deleting message");
                    }
                }
                Err(e) => {
                    warn!(queue = %queue, message_id = %message_id, error = %e, "handler failed, message left for redelivery");
                }
            }
        }
    }
}

/// Completes once the stop flag is raised. Never completes if the flag can no
/// longer change.
async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            pending::<()>().await;
        }
    }
}
