use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ObserverError;

/// Result slot of an observer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Pending,
    Resolved(T),
    Failed(ObserverError),
}

impl<T> Outcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    pub fn is_done(&self) -> bool {
        !self.is_pending()
    }

    /// `None` while pending.
    pub fn into_result(self) -> Option<Result<T, ObserverError>> {
        match self {
            Outcome::Pending => None,
            Outcome::Resolved(value) => Some(Ok(value)),
            Outcome::Failed(cause) => Some(Err(cause)),
        }
    }
}

/// Lifecycle shared by every observer: exactly-once terminal outcome,
/// monotonic start time, optional deadline and cooperative cancellation.
///
/// Waiters suspend on a watch channel that the line hooks signal; hooks never
/// block.
#[derive(Debug)]
pub struct ObserverCore<T> {
    outcome: watch::Sender<Outcome<T>>,
    started_at: Instant,
    deadline: Mutex<Option<Instant>>,
    cancelled: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static> ObserverCore<T> {
    pub fn new(timeout: Option<Duration>) -> Self {
        let started_at = Instant::now();
        let (outcome, _) = watch::channel(Outcome::Pending);
        Self {
            outcome,
            started_at,
            deadline: Mutex::new(timeout.map(|t| started_at + t)),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Terminal success. Returns `false` if the observer already ended.
    pub fn resolve(&self, value: T) -> bool {
        self.finish(Outcome::Resolved(value))
    }

    /// Terminal failure. Returns `false` if the observer already ended.
    pub fn fail(&self, cause: ObserverError) -> bool {
        self.finish(Outcome::Failed(cause))
    }

    fn finish(&self, outcome: Outcome<T>) -> bool {
        let mut outcome = Some(outcome);
        self.outcome.send_if_modified(|current| {
            if !current.is_pending() {
                return false;
            }
            match outcome.take() {
                Some(next) => {
                    *current = next;
                    true
                }
                None => false,
            }
        })
    }

    pub fn outcome(&self) -> Outcome<T> {
        self.outcome.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.borrow().is_done()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Deadline counted from the observer creation.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.deadline.lock() = Some(self.started_at + timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    /// Fails with a timeout when the deadline has passed.
    pub fn check_deadline(&self) -> bool {
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => self.fail(ObserverError::Timeout {
                elapsed: self.elapsed(),
            }),
            _ => false,
        }
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Suspends until the outcome is terminal or the deadline expires.
    ///
    /// Expiry is driven by the timer, so it is detected even when no data
    /// arrives anymore.
    pub async fn wait(&self) -> Outcome<T> {
        self.check_deadline();
        let mut rx = self.outcome.subscribe();
        match self.deadline() {
            Some(deadline) => {
                let timed_out = tokio::time::timeout_at(deadline, rx.wait_for(Outcome::is_done))
                    .await
                    .is_err();
                if timed_out {
                    self.fail(ObserverError::Timeout {
                        elapsed: self.elapsed(),
                    });
                }
            }
            None => {
                let _ = rx.wait_for(Outcome::is_done).await;
            }
        }
        self.outcome()
    }
}
