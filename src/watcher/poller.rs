//! The shared change poller.
//!
//! One background thread ticks at a fixed interval and evaluates every
//! registered [`PollTask`] whose own delay has elapsed. Registration and
//! removal never wait for a tick: the task list is copy-on-write, each tick
//! works on a snapshot, and removals are applied once the pass is over.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use super::{WatchError, WatchFlow};
use crate::config::PollConfig;

/// Work evaluated by the poller on each due tick.
pub trait PollTask: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &str;

    /// Minimum time between two evaluations of this task.
    fn delay(&self) -> Duration;

    /// Run change detection. `Stop` removes the task after the tick.
    fn poll(&self) -> Result<WatchFlow, WatchError>;

    /// Apply deferred path additions and removals.
    fn apply_pending(&self) {}

    /// The owner asked for this task to be dropped.
    fn exit_requested(&self) -> bool {
        false
    }
}

/// Handle for a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tasks whose detection ran.
    pub evaluated: usize,
    /// Tasks whose detection failed or panicked.
    pub failed: usize,
    /// Tasks removed at the end of the tick.
    pub removed: usize,
}

struct Registration {
    id: WatchId,
    task: Arc<dyn PollTask>,
    delay: Duration,
    last_check: Mutex<Option<Instant>>,
}

impl Registration {
    fn is_due(&self, now: Instant) -> bool {
        match *self.last_check.lock() {
            Some(last) => now.duration_since(last) >= self.delay,
            None => true,
        }
    }
}

struct Shared {
    registered: RwLock<Arc<Vec<Arc<Registration>>>>,
    pending_removal: Mutex<HashSet<WatchId>>,
    next_id: AtomicU64,
    interval_ms: AtomicU64,
    min_interval: Duration,
    cancelled: AtomicBool,
    clamp_noted: AtomicBool,
}

impl Shared {
    fn clamp(&self, requested: Duration) -> Duration {
        if requested >= self.min_interval {
            return requested;
        }
        if !self.clamp_noted.swap(true, Ordering::SeqCst) {
            tracing::info!(
                "[poller] requested interval {}ms is below the minimum, using {}ms",
                requested.as_millis(),
                self.min_interval.as_millis()
            );
        }
        self.min_interval
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        if self.cancelled.load(Ordering::SeqCst) {
            return summary;
        }

        // Tasks registered from here on are picked up next tick
        let snapshot = Arc::clone(&self.registered.read());
        let now = Instant::now();
        let mut finished = HashSet::new();

        for registration in snapshot.iter() {
            let task = &registration.task;
            if task.exit_requested() || self.pending_removal.lock().contains(&registration.id) {
                finished.insert(registration.id);
                continue;
            }
            if !registration.is_due(now) {
                continue;
            }
            *registration.last_check.lock() = Some(now);
            summary.evaluated += 1;

            match catch_unwind(AssertUnwindSafe(|| task.poll())) {
                Ok(Ok(WatchFlow::Continue)) => {}
                Ok(Ok(WatchFlow::Stop)) => {
                    crate::debug_event!("poller", "finished", "{}", task.name());
                    finished.insert(registration.id);
                }
                Ok(Err(e)) => {
                    summary.failed += 1;
                    tracing::warn!("[poller] {} detection failed: {e}", task.name());
                }
                Err(_) => {
                    summary.failed += 1;
                    tracing::error!("[poller] {} panicked during detection", task.name());
                }
            }
        }

        finished.extend(self.pending_removal.lock().drain());
        if !finished.is_empty() {
            let mut registered = self.registered.write();
            let before = registered.len();
            let kept: Vec<_> = registered
                .iter()
                .filter(|registration| !finished.contains(&registration.id))
                .cloned()
                .collect();
            summary.removed = before - kept.len();
            *registered = Arc::new(kept);
        }

        for registration in snapshot.iter() {
            registration.task.apply_pending();
        }

        summary
    }
}

pub struct ChangePoller {
    shared: Arc<Shared>,
    worker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl ChangePoller {
    pub fn new(config: &PollConfig) -> Self {
        Self::with_interval(
            Duration::from_millis(config.interval_ms),
            Duration::from_millis(config.min_interval_ms),
        )
    }

    /// A stopped poller. `interval` is clamped up to `min_interval`.
    pub fn with_interval(interval: Duration, min_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            registered: RwLock::new(Arc::new(Vec::new())),
            pending_removal: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            interval_ms: AtomicU64::new(0),
            min_interval,
            cancelled: AtomicBool::new(false),
            clamp_noted: AtomicBool::new(false),
        });
        let interval = shared.clamp(interval);
        shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);

        Self {
            shared,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background thread. Starting twice is a no-op.
    pub fn start(&self) -> Result<(), WatchError> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Err(WatchError::PollerStopped);
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("strata-poller".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(shared.interval()) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Stop signal, or the poller itself is gone
                        _ => break,
                    }
                    if shared.cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    shared.tick();
                }
                crate::debug_event!("poller", "stopped");
            })?;

        *worker = Some((stop_tx, handle));
        crate::log_event!("poller", "started", "{}ms", self.shared.interval().as_millis());
        Ok(())
    }

    /// Register a task; it is evaluated from the next tick on.
    ///
    /// A delay below the process minimum is raised to the minimum.
    pub fn register(&self, task: Arc<dyn PollTask>) -> Result<WatchId, WatchError> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Err(WatchError::PollerStopped);
        }
        let id = WatchId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let registration = Arc::new(Registration {
            id,
            delay: self.shared.clamp(task.delay()),
            task,
            last_check: Mutex::new(None),
        });

        let mut registered = self.shared.registered.write();
        let mut next: Vec<_> = registered.iter().cloned().collect();
        crate::debug_event!("poller", "registered", "{}", registration.task.name());
        next.push(registration);
        *registered = Arc::new(next);
        Ok(id)
    }

    /// Remove a task at the end of the next tick.
    pub fn unregister(&self, id: WatchId) {
        self.shared.pending_removal.lock().insert(id);
    }

    /// Run one pass over the registered tasks on the calling thread.
    pub fn tick(&self) -> TickSummary {
        self.shared.tick()
    }

    /// Change the tick interval. Returns the interval actually applied.
    pub fn set_poll_interval(&self, interval_ms: u64) -> Duration {
        let interval = self.shared.clamp(Duration::from_millis(interval_ms));
        self.shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        interval
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.interval()
    }

    pub fn min_interval(&self) -> Duration {
        self.shared.min_interval
    }

    pub fn watcher_count(&self) -> usize {
        self.shared.registered.read().len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some() && !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Stop ticking. A tick in progress runs to completion.
    pub fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((stop_tx, handle)) = self.worker.lock().take() {
            let _ = stop_tx.try_send(());
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::error!("[poller] background thread panicked");
            }
        }
        crate::log_event!("poller", "cancelled");
    }
}

impl Drop for ChangePoller {
    fn drop(&mut self) {
        self.cancel();
    }
}
