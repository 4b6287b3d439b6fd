//! V3: a work-stealing deque per worker, backed by a global overflow
//! queue (§4.7).
//!
//! Follows the classic injector/worker/stealer split `compute-pool-deque`
//! is modelled on: a thread-local pointer identifies whether the
//! submitting thread is itself a pool worker. A producer's submission
//! always lands on the global overflow queue; a work item that itself
//! calls back into the pool lands on the submitting worker's own deque
//! (owner push), never the slow path. A worker's search order drains its
//! own deque first, then the overflow queue, then its peers' stealers —
//! matching `compute-pool-deque`'s own documented search order.

use std::cell::Cell;
use std::sync::{Arc, Mutex};
use std::thread;

use compute_pool_deque::{Deque, GlobalQueue, Pusher, Stealer};
use crossbeam_utils::Backoff;
use uuid::Uuid;

use crate::pool::PoolInner;
use crate::work_item::WorkItem;
use crate::worker::WorkerHandle;

thread_local! {
    /// Set for the duration of a V3 worker's dispatch loop; absent for
    /// producer threads and for workers of the other two variants (§4.7).
    static CURRENT_DEQUE: Cell<Option<*const Pusher<WorkItem>>> = Cell::new(None);
}

pub(crate) struct State {
    global: GlobalQueue<WorkItem>,
    /// One slot per worker ever spawned; a departed worker's slot is set
    /// to `None` rather than removed, so concurrent peers mid-steal never
    /// see the vector reindexed out from under them (§9: "coarse lock
    /// around a plain vector").
    stealers: Mutex<Vec<Option<Stealer<WorkItem>>>>,
}

impl State {
    pub(crate) fn new() -> Self {
        State {
            global: GlobalQueue::new(),
            stealers: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) fn submit(pool: &Arc<PoolInner>, state: &Arc<State>, item: WorkItem) -> bool {
    if pool.cancel_token.is_cancelled() {
        return false;
    }

    // A worker calling back into the pool (e.g. a work item forking more
    // work) pushes onto its own deque; everyone else lands on the
    // overflow queue under the thread-local's absence (§4.7).
    let local_pusher = CURRENT_DEQUE.with(|cell| cell.get());

    match local_pusher {
        // Safety: only ever set to a live reference for the duration of
        // `run_loop`'s borrow below, on this same thread.
        Some(ptr) => unsafe { &*ptr }.push(item),
        None => state.global.enqueue(item),
    }

    // Backlog condition (§4.8, V3): sum of every deque's count plus the
    // overflow queue's count exceeds `max_threads`. One formula for both
    // submission paths; §4.7's per-path wording ("evaluate growth") is
    // just the trigger to consult it.
    if pool.try_claim_growth(total_backlog(pool, state)) {
        spawn_worker(pool, state, false);
    }
    true
}

/// Sum of every live deque's approximate length plus the overflow queue's
/// count, compared against `max_threads` per §4.8's V3 backlog condition.
fn total_backlog(pool: &Arc<PoolInner>, state: &Arc<State>) -> bool {
    let deque_total: usize = state
        .stealers
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|s| s.approximate_len())
        .sum();
    deque_total + state.global.approximate_count() > pool.config.max_threads
}

pub(crate) fn spawn_worker(pool: &Arc<PoolInner>, state: &Arc<State>, permanent: bool) {
    let name = format!("worker-{}", Uuid::new_v4());
    let handle = Arc::new(WorkerHandle::new(name.clone(), permanent));
    let deque: Deque<WorkItem> = Deque::new();
    let index = {
        let mut stealers = state.stealers.lock().unwrap();
        match stealers.iter().position(|slot| slot.is_none()) {
            Some(free) => {
                stealers[free] = Some(deque.stealer());
                free
            }
            None => {
                stealers.push(Some(deque.stealer()));
                stealers.len() - 1
            }
        }
    };
    pool.register_worker(handle.clone());

    let pool = pool.clone();
    let state = state.clone();
    thread::Builder::new()
        .name(name)
        .spawn(move || run_loop(&pool, &state, &handle, deque, index))
        .expect("failed to spawn V3 worker thread");
}

/// Tries every other live slot once, retrying a given slot a couple of
/// times on `Steal::Retry` before moving on — a contended peer is worth
/// a second look, but not worth looping forever on.
fn steal_from_peers(state: &Arc<State>, own_index: usize) -> Option<WorkItem> {
    let stealers: Vec<_> = state.stealers.lock().unwrap().clone();
    for (index, slot) in stealers.iter().enumerate() {
        if index == own_index {
            continue;
        }
        let Some(stealer) = slot else { continue };
        for _ in 0..3 {
            match stealer.steal() {
                compute_pool_deque::Steal::Success(item) => return Some(item),
                compute_pool_deque::Steal::Empty => break,
                compute_pool_deque::Steal::Retry => continue,
            }
        }
    }
    None
}

fn run_loop(pool: &Arc<PoolInner>, state: &Arc<State>, handle: &Arc<WorkerHandle>, deque: Deque<WorkItem>, index: usize) {
    // Installed for the duration of this loop so a work item that calls
    // back into `Pool::submit` from this thread is detected as
    // worker-originated and pushed onto `deque` directly (§4.7).
    let pusher = deque.pusher();
    CURRENT_DEQUE.with(|cell| cell.set(Some(&pusher as *const _)));

    let backoff = Backoff::new();
    loop {
        let cancelled = pool.cancel_token.is_cancelled();
        if cancelled {
            break;
        }
        if !handle.is_permanent {
            if let Some(timeout) = pool.config.idle_timeout {
                if handle.idle_for(&pool.clock) > timeout && pool.registry.len() > pool.config.min_threads {
                    break;
                }
            }
        }

        // Search order (§4.7): owner pop, then the overflow queue, then
        // peer deques — matching `compute_pool_deque`'s own documented
        // search order.
        if let Some(item) = deque.pop() {
            backoff.reset();
            handle.touch(&pool.clock);
            pool.execute_work_item(item);
            continue;
        }
        if let Some(item) = state.global.try_dequeue() {
            backoff.reset();
            handle.touch(&pool.clock);
            pool.execute_work_item(item);
            continue;
        }
        if let Some(item) = steal_from_peers(state, index) {
            backoff.reset();
            handle.touch(&pool.clock);
            pool.execute_work_item(item);
            continue;
        }

        // No wait primitive here by design (§4.3 step 2): a V3 worker
        // just re-evaluates its exit conditions on the next pass, backing
        // off briefly so an all-idle pool doesn't spin every core at 100%.
        backoff.snooze();
    }
    // Clear before `pusher` drops at the end of this function, so the
    // thread-local never holds a dangling pointer.
    CURRENT_DEQUE.with(|cell| cell.set(None));
    state.stealers.lock().unwrap()[index] = None;
    pool.unregister_worker(&handle.name);
}
