//! Self-Heal Backoff
//!
//! A fixed wait schedule that saturates at its last entry, and a retry
//! driver that runs a fallible async operation through it until success or
//! cancellation. The driver never bounds total elapsed time; cancellation
//! is observed between sleeps.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// The reconnect wait schedule. The final entry repeats indefinitely.
pub const DEFAULT_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(600),
];

/// Walks a wait schedule, saturating at the last entry.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    waits: Vec<Duration>,
    index: usize,
    attempts: u32,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE.to_vec())
    }
}

impl BackoffSchedule {
    /// Create a schedule from explicit waits. An empty list falls back to
    /// the default schedule.
    #[must_use]
    pub fn new(waits: Vec<Duration>) -> Self {
        let waits = if waits.is_empty() {
            DEFAULT_SCHEDULE.to_vec()
        } else {
            waits
        };
        Self {
            waits,
            index: 0,
            attempts: 0,
        }
    }

    /// Next wait. Advances the position, saturating at the final entry.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.waits[self.index];
        self.index = (self.index + 1).min(self.waits.len() - 1);
        self.attempts += 1;
        delay
    }

    /// Reset after a success.
    pub fn reset(&mut self) {
        self.index = 0;
        self.attempts = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Run `op` until it succeeds, sleeping through `schedule` between
/// failures.
///
/// Returns `None` when `cancel` fires; cancellation is observed both
/// before each attempt and during the backoff sleep.
pub async fn retry_with_backoff<T, E, F, Fut>(
    schedule: &mut BackoffSchedule,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Option<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    loop {
        if cancel.is_cancelled() {
            return None;
        }

        match op().await {
            Ok(value) => return Some(value),
            Err(error) => {
                let delay = schedule.next_delay();
                tracing::warn!(
                    error = %error,
                    attempt = schedule.attempts(),
                    delay_secs = delay.as_secs(),
                    "{what} failed, backing off"
                );

                tokio::select! {
                    () = cancel.cancelled() => return None,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
