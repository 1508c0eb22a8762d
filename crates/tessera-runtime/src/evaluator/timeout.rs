//! The timeout race.
//!
//! ```text
//!            pending
//!           /       \
//!  try_start()     cancel()
//!  (timer thread)  (evaluation thread)
//!         |           |
//!      started     cancelled ── cancel() returned true: no timeout
//!         |
//!   force-close session; cancel() returns false: report timeout
//! ```
//!
//! Both transitions happen under one mutex, so exactly one side wins.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Default)]
struct TaskState {
    started: bool,
    cancelled: bool,
}

/// Per-evaluation race between the deadline and normal completion.
///
/// # Example
///
/// ```
/// use tessera_runtime::evaluator::TimeoutTask;
///
/// let task = TimeoutTask::new();
/// assert!(task.cancel());
/// assert!(!task.try_start());
///
/// let task = TimeoutTask::new();
/// assert!(task.try_start());
/// assert!(!task.cancel());
/// ```
#[derive(Debug, Default)]
pub struct TimeoutTask {
    state: Mutex<TaskState>,
    cancelled: Notify,
}

impl TimeoutTask {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timer side: claims the forced close unless already cancelled.
    pub fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }
        state.started = true;
        true
    }

    /// Evaluation side: returns `true` if the timer had not started.
    ///
    /// Also wakes the pending timer so it releases its slot early.
    pub fn cancel(&self) -> bool {
        let won = {
            let mut state = self.state.lock();
            state.cancelled = true;
            !state.started
        };
        self.cancelled.notify_one();
        won
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

type Fire = Box<dyn FnOnce() + Send>;

struct Job {
    delay: Duration,
    task: Arc<TimeoutTask>,
    fire: Fire,
}

/// One lazily started background thread firing timeout tasks.
///
/// The thread is detached and never joined, so it cannot hold up
/// process exit. Dropping the sender stops it and discards pending
/// timers.
#[derive(Default)]
pub(crate) struct TimeoutScheduler {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for TimeoutScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutScheduler")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

impl TimeoutScheduler {
    /// Runs `fire` after `delay` if `task` can still be started.
    ///
    /// `fire` runs on the timer thread and may block it until the
    /// session is torn down.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the timer thread cannot be started.
    pub(crate) fn schedule(
        &self,
        delay: Duration,
        task: Arc<TimeoutTask>,
        fire: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<()> {
        let mut sender = self.sender.lock();
        if sender.is_none() {
            *sender = Some(Self::start(Arc::clone(&self.pending))?);
        }
        let Some(tx) = sender.as_ref() else {
            return Err(std::io::Error::other("timeout thread has stopped"));
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        tx.send(Job {
            delay,
            task,
            fire: Box::new(fire),
        })
        .map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            std::io::Error::other("timeout thread has stopped")
        })
    }

    fn start(pending: Arc<AtomicUsize>) -> std::io::Result<mpsc::UnboundedSender<Job>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name("tessera-timeout".into())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        let pending = Arc::clone(&pending);
                        tokio::spawn(async move {
                            tokio::select! {
                                () = tokio::time::sleep(job.delay) => {
                                    if job.task.try_start() {
                                        tracing::debug!(delay = ?job.delay, "timeout fired");
                                        (job.fire)();
                                    }
                                }
                                () = job.task.cancelled.notified() => {}
                            }
                            pending.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
                runtime.shutdown_background();
            })?;
        tracing::debug!("timeout scheduler started");
        Ok(tx)
    }

    /// Timers still sleeping or firing.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stops the timer thread. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!("timeout scheduler stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn cancel_before_start_wins() {
        let task = TimeoutTask::new();
        assert!(task.cancel());
        assert!(!task.try_start());
        assert!(!task.is_started());
    }

    #[test]
    fn start_before_cancel_loses() {
        let task = TimeoutTask::new();
        assert!(task.try_start());
        assert!(!task.cancel());
        assert!(task.is_started());
    }

    #[test]
    fn scheduler_fires_after_delay() {
        let scheduler = TimeoutScheduler::default();
        assert!(!scheduler.is_running());
        let (tx, rx) = std_mpsc::channel();
        let task = Arc::new(TimeoutTask::new());
        scheduler
            .schedule(Duration::from_millis(10), Arc::clone(&task), move || {
                let _ = tx.send(());
            })
            .expect("should schedule");
        rx.recv_timeout(Duration::from_secs(5))
            .expect("timer should fire");
        assert!(task.is_started());
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn cancelled_task_does_not_fire() {
        let scheduler = TimeoutScheduler::default();
        let (tx, rx) = std_mpsc::channel();
        let task = Arc::new(TimeoutTask::new());
        scheduler
            .schedule(Duration::from_millis(20), Arc::clone(&task), move || {
                let _ = tx.send(());
            })
            .expect("should schedule");
        assert!(task.cancel());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        scheduler.shutdown();
    }

    #[test]
    fn cancelled_timer_is_released_before_its_deadline() {
        let scheduler = TimeoutScheduler::default();
        let tasks: Vec<_> = (0..16).map(|_| Arc::new(TimeoutTask::new())).collect();
        for task in &tasks {
            scheduler
                .schedule(Duration::from_secs(600), Arc::clone(task), || {})
                .expect("should schedule");
        }
        assert_eq!(scheduler.pending(), 16);
        for task in &tasks {
            assert!(task.cancel());
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while scheduler.pending() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(scheduler.pending(), 0);
        scheduler.shutdown();
    }

    proptest! {
        // Whatever the interleaving, exactly one side wins.
        #[test]
        fn exactly_one_side_wins(timer_first in any::<bool>()) {
            let task = TimeoutTask::new();
            let (started, won) = if timer_first {
                let started = task.try_start();
                (started, task.cancel())
            } else {
                let won = task.cancel();
                (task.try_start(), won)
            };
            prop_assert!(started != won);
        }
    }
}
