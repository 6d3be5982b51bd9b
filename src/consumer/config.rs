use std::time::Duration;

/// Configuration for a [`QueueConsumer`](super::QueueConsumer).
///
/// # Fields
/// - `error_backoff`: How long a loop pauses after a failed receive before
///   polling again.
/// - `min_poll_interval`: Shortest time between the starts of two receives
///   that came back empty. Keeps queues with a zero polling wait from being
///   polled in a tight loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Pause after a receive fails with a transport error.
    pub error_backoff: Duration,

    /// Lower bound on one empty poll cycle.
    pub min_poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            error_backoff: Duration::from_secs(1),
            min_poll_interval: Duration::from_secs(1),
        }
    }
}
