//! Update throttling for consumers
//!
//! Store writes can arrive hundreds of times per second; consumers only need
//! the latest state at a bounded cadence. The throttle is trailing-edge: the
//! first change in an idle period opens a window of one interval, later
//! changes inside the window replace the pending value, and the value pending
//! when the window closes is emitted. The final change is never dropped.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Trailing-edge throttle state machine. Time is passed in explicitly.
#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
        }
    }

    /// Record a new value. Opens a window if none is open.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some(value);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    /// Emit the pending value once the window has closed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// When the open window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Spawn a task that republishes `read()` at most once per `interval`,
/// driven by bumps of the `changes` counter.
///
/// The returned receiver starts with the current value. `read` runs only at
/// emission time, so each emission carries the latest state. The task stops
/// when every receiver is dropped, or after flushing the last pending change
/// once `changes` closes.
pub fn spawn_throttled<T, F>(
    mut changes: watch::Receiver<u64>,
    interval: Duration,
    mut read: F,
) -> watch::Receiver<T>
where
    T: Send + Sync + 'static,
    F: FnMut() -> T + Send + 'static,
{
    let (tx, rx) = watch::channel(read());

    tokio::spawn(async move {
        let mut throttle = Throttle::new(interval);
        let mut source_open = true;

        loop {
            let deadline = throttle.deadline();
            if !source_open && deadline.is_none() {
                break;
            }

            tokio::select! {
                changed = changes.changed(), if source_open => {
                    match changed {
                        Ok(()) => {
                            let generation = *changes.borrow_and_update();
                            throttle.push(generation, Instant::now());
                        }
                        Err(_) => source_open = false,
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if throttle.poll(Instant::now()).is_some() && tx.send(read()).is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
        }

        debug!(interval_ms = interval.as_millis() as u64, "throttled view stopped");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_single_emission_carries_latest() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(INTERVAL);

        throttle.push(1, t0);
        throttle.push(2, t0 + ms(30));
        throttle.push(3, t0 + ms(60));

        assert_eq!(throttle.poll(t0 + ms(99)), None);
        assert_eq!(throttle.poll(t0 + ms(100)), Some(3));
        assert_eq!(throttle.poll(t0 + ms(250)), None);
    }

    #[test]
    fn test_window_reopens_after_emission() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(INTERVAL);

        throttle.push("a", t0);
        assert_eq!(throttle.poll(t0 + ms(100)), Some("a"));
        assert!(throttle.deadline().is_none());

        throttle.push("b", t0 + ms(140));
        assert_eq!(throttle.deadline(), Some(t0 + ms(240)));
        assert_eq!(throttle.poll(t0 + ms(200)), None);
        assert_eq!(throttle.poll(t0 + ms(240)), Some("b"));
    }

    #[test]
    fn test_idle_throttle_emits_nothing() {
        let mut throttle: Throttle<u32> = Throttle::new(INTERVAL);
        assert!(!throttle.has_pending());
        assert_eq!(throttle.poll(Instant::now() + ms(1_000)), None);
    }
}
