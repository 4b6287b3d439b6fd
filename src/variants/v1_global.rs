//! V1: a single global FIFO queue with competing consumers (§4.5).
//!
//! Grounded on `compute_pool_deque::GlobalQueue`, the Michael-Scott-style
//! MPMC queue this workspace's `compute-pool-deque` crate exposes for
//! exactly this purpose.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use compute_pool_deque::GlobalQueue;
use uuid::Uuid;

use crate::pool::PoolInner;
use crate::work_item::WorkItem;
use crate::worker::WorkerHandle;

pub(crate) struct State {
    queue: GlobalQueue<WorkItem>,
    /// Signalled on every enqueue so an idle worker's bounded wait can
    /// wake early instead of sleeping out the full `queue_arrival_wait`.
    arrival: (Mutex<()>, Condvar),
}

impl State {
    pub(crate) fn new() -> Self {
        State {
            queue: GlobalQueue::new(),
            arrival: (Mutex::new(()), Condvar::new()),
        }
    }
}

pub(crate) fn submit(pool: &Arc<PoolInner>, state: &Arc<State>, item: WorkItem) -> bool {
    if pool.cancel_token.is_cancelled() {
        return false;
    }
    state.queue.enqueue(item);
    {
        let (lock, cvar) = &state.arrival;
        let _guard = lock.lock().unwrap();
        cvar.notify_one();
    }

    // Backlog signal for growth: more items sitting in the queue than
    // there are workers to drain it (§4.8).
    let backlog = state.queue.approximate_count() > pool.registry.len();
    if pool.try_claim_growth(backlog) {
        spawn_worker(pool, state, false);
    }
    true
}

pub(crate) fn spawn_worker(pool: &Arc<PoolInner>, state: &Arc<State>, permanent: bool) {
    let name = format!("worker-{}", Uuid::new_v4());
    let handle = Arc::new(WorkerHandle::new(name.clone(), permanent));
    pool.register_worker(handle.clone());

    let pool = pool.clone();
    let state = state.clone();
    thread::Builder::new()
        .name(name)
        .spawn(move || run_loop(&pool, &state, &handle))
        .expect("failed to spawn V1 worker thread");
}

fn run_loop(pool: &Arc<PoolInner>, state: &Arc<State>, handle: &Arc<WorkerHandle>) {
    loop {
        let cancelled = pool.cancel_token.is_cancelled();
        if cancelled {
            break;
        }
        if !handle.is_permanent {
            if let Some(timeout) = pool.config.idle_timeout {
                // Shrinkage floor (§4.3 step 1): a non-permanent worker
                // only actually exits on idle while the pool is above
                // min_threads.
                if handle.idle_for(&pool.clock) > timeout && pool.registry.len() > pool.config.min_threads {
                    break;
                }
            }
        }

        match state.queue.try_dequeue() {
            Some(item) => {
                handle.touch(&pool.clock);
                pool.execute_work_item(item);
            }
            None => {
                let (lock, cvar) = &state.arrival;
                let guard = lock.lock().unwrap();
                let _ = cvar.wait_timeout(guard, pool.config.queue_arrival_wait);
            }
        }
    }
    pool.unregister_worker(&handle.name);
}
