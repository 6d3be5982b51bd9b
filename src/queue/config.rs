use std::time::Duration;

/// Per-queue polling parameters.
///
/// Used both when creating a queue and when resolving a reference to one.
///
/// # Fields
/// - `polling_wait_seconds`: How long a receive waits for a message before
///   reporting an empty result.
/// - `visibility_timeout_seconds`: How long a received message stays hidden
///   from other receivers before it is delivered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// The wait time for long polling, in seconds.
    pub polling_wait_seconds: u32,

    /// The visibility timeout of a delivered message, in seconds.
    pub visibility_timeout_seconds: u32,
}

impl QueueSettings {
    pub fn polling_wait(&self) -> Duration {
        Duration::from_secs(u64::from(self.polling_wait_seconds))
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_timeout_seconds))
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            polling_wait_seconds: 30,
            visibility_timeout_seconds: 30,
        }
    }
}
