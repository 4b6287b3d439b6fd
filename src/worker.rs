//! Shared worker bookkeeping (C5): the parts of a worker's state every
//! variant needs, independent of how it finds its next item.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// A monotonic clock anchored at pool construction, so per-worker
/// timestamps can live in a plain `AtomicU64` instead of behind a lock.
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            epoch: Instant::now(),
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// V2-only worker lifecycle state (§4.9). V1/V3 infer position from the
/// dispatch loop itself and never consult this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Ready,
    Running,
    Exiting,
}

impl WorkerStatus {
    fn to_u8(self) -> u8 {
        match self {
            WorkerStatus::Ready => 0,
            WorkerStatus::Running => 1,
            WorkerStatus::Exiting => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Ready,
            1 => WorkerStatus::Running,
            _ => WorkerStatus::Exiting,
        }
    }
}

/// Per-worker state visible to the pool, the registry, and (for V2) other
/// producer threads selecting a target worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub name: String,
    /// Created as part of the minimum floor; never exits on idle (§4.3).
    pub is_permanent: bool,
    last_item_processed_millis: AtomicU64,
    status: AtomicU8,
    /// V2 only: tasks enqueued to this worker but not yet completed.
    outstanding_tasks: AtomicU64,
}

impl WorkerHandle {
    pub fn new(name: String, is_permanent: bool) -> Self {
        WorkerHandle {
            name,
            is_permanent,
            last_item_processed_millis: AtomicU64::new(0),
            status: AtomicU8::new(WorkerStatus::Ready.to_u8()),
            outstanding_tasks: AtomicU64::new(0),
        }
    }

    pub fn touch(&self, clock: &Clock) {
        self.last_item_processed_millis
            .store(clock.now_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self, clock: &Clock) -> Duration {
        let last = self.last_item_processed_millis.load(Ordering::Relaxed);
        Duration::from_millis(clock.now_millis().saturating_sub(last))
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: WorkerStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn outstanding_tasks(&self) -> u64 {
        self.outstanding_tasks.load(Ordering::Relaxed)
    }

    pub fn increment_outstanding(&self) {
        self.outstanding_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_outstanding(&self) {
        self.outstanding_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    /// Should this worker exit right now?
    ///
    /// `cancelled` takes priority over everything else. A permanent
    /// worker never exits on idle alone (§4.3 step 1).
    pub fn should_exit(&self, cancelled: bool, idle_timeout: Option<Duration>, clock: &Clock) -> bool {
        if cancelled {
            return true;
        }
        if self.is_permanent {
            return false;
        }
        match idle_timeout {
            Some(timeout) => self.idle_for(clock) > timeout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_worker_never_idle_exits() {
        let clock = Clock::new();
        let worker = WorkerHandle::new("w".into(), true);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!worker.should_exit(false, Some(Duration::from_millis(1)), &clock));
    }

    #[test]
    fn non_permanent_worker_exits_after_idle_timeout() {
        let clock = Clock::new();
        let worker = WorkerHandle::new("w".into(), false);
        worker.touch(&clock);
        std::thread::sleep(Duration::from_millis(15));
        assert!(worker.should_exit(false, Some(Duration::from_millis(1)), &clock));
    }

    #[test]
    fn infinite_idle_timeout_disables_idle_exit() {
        let clock = Clock::new();
        let worker = WorkerHandle::new("w".into(), false);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!worker.should_exit(false, None, &clock));
    }

    #[test]
    fn cancellation_forces_exit_regardless_of_permanence() {
        let clock = Clock::new();
        let permanent = WorkerHandle::new("w".into(), true);
        assert!(permanent.should_exit(true, None, &clock));
    }

    #[test]
    fn outstanding_task_counter_tracks_increments_and_decrements() {
        let worker = WorkerHandle::new("w".into(), false);
        assert_eq!(worker.outstanding_tasks(), 0);
        worker.increment_outstanding();
        worker.increment_outstanding();
        assert_eq!(worker.outstanding_tasks(), 2);
        worker.decrement_outstanding();
        assert_eq!(worker.outstanding_tasks(), 1);
    }

    #[test]
    fn status_round_trips() {
        let worker = WorkerHandle::new("w".into(), false);
        assert_eq!(worker.status(), WorkerStatus::Ready);
        worker.set_status(WorkerStatus::Running);
        assert_eq!(worker.status(), WorkerStatus::Running);
        worker.set_status(WorkerStatus::Exiting);
        assert_eq!(worker.status(), WorkerStatus::Exiting);
    }
}
