//! Resettable inactivity timer.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backoff::add_jitter;

/// Deadline-based timer that can be re-armed from synchronous contexts.
///
/// Each arm picks a fresh jittered duration. `expired` is cancel-safe and
/// observes resets that happen while it is waiting.
pub struct ResettableTimer {
    timeout: Duration,
    jitter: Duration,
    deadline: Mutex<Instant>,
    rearmed: Notify,
}

impl ResettableTimer {
    pub fn new(timeout: Duration, jitter: Duration) -> Self {
        Self {
            timeout,
            jitter,
            deadline: Mutex::new(Instant::now() + add_jitter(timeout, jitter)),
            rearmed: Notify::new(),
        }
    }

    /// Push the deadline out to a fresh jittered window from now.
    pub fn reset(&self) {
        let deadline = Instant::now() + add_jitter(self.timeout, self.jitter);
        *self.deadline.lock().unwrap() = deadline;
        self.rearmed.notify_waiters();
    }

    /// Resolve when the deadline passes without an intervening reset.
    pub async fn expired(&self) {
        loop {
            let deadline = *self.deadline.lock().unwrap();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    // The deadline may have moved while we slept.
                    if *self.deadline.lock().unwrap() <= Instant::now() {
                        return;
                    }
                }
                _ = self.rearmed.notified() => {}
            }
        }
    }
}
