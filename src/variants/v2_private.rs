//! V2: a bounded private queue per worker, with pluggable selection
//! (§4.6).
//!
//! Each worker owns a `crossbeam-channel` bounded channel instead of a
//! shared structure; growth and selection both have to cope with a
//! worker that is mid-exit, since nothing stops a worker's idle timeout
//! firing between selection and the send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::config::SelectionPolicy;
use crate::event::PoolEvent;
use crate::pool::PoolInner;
use crate::work_item::WorkItem;
use crate::worker::{WorkerHandle, WorkerStatus};

/// Threshold for "this worker looks backed up" growth signal. The
/// original source's selector grew a new thread whenever the selected
/// worker had any outstanding work at all (`!= 0`); spec.md §9 flags that
/// as too eager to replicate blindly, so this requires more than one
/// outstanding item before a new worker is even considered.
const DEFAULT_GROWTH_THRESHOLD: u64 = 1;

pub(crate) struct State {
    selection: SelectionPolicy,
    queue_capacity: usize,
    senders: Mutex<HashMap<String, Sender<WorkItem>>>,
}

impl State {
    pub(crate) fn new(selection: SelectionPolicy, queue_capacity: usize) -> Self {
        State {
            selection,
            queue_capacity,
            senders: Mutex::new(HashMap::new()),
        }
    }
}

fn select_worker(pool: &Arc<PoolInner>, state: &Arc<State>) -> Option<Arc<WorkerHandle>> {
    match state.selection {
        SelectionPolicy::RoundRobin => pool.registry.next_round_robin(),
        SelectionPolicy::MinLoadRandom => {
            let snapshot = pool.registry.snapshot();
            let live: Vec<_> = snapshot
                .into_iter()
                .filter(|h| h.status() != WorkerStatus::Exiting)
                .collect();
            let min_load = live.iter().map(|h| h.outstanding_tasks()).min()?;
            let tied: Vec<_> = live.into_iter().filter(|h| h.outstanding_tasks() == min_load).collect();
            tied.choose(&mut rand::thread_rng()).cloned()
        }
    }
}

pub(crate) fn submit(pool: &Arc<PoolInner>, state: &Arc<State>, item: WorkItem) -> bool {
    let mut item = item;
    loop {
        if pool.cancel_token.is_cancelled() {
            return false;
        }

        let Some(handle) = select_worker(pool, state) else {
            // No live worker at all: only reachable if every worker raced
            // into Exiting at once, since the config validator forbids
            // min_threads == 0. Try to grow past it; back off briefly so
            // this can't spin a core at 100% while waiting for a spawn.
            if pool.try_claim_growth(true) {
                spawn_worker(pool, state, false);
            }
            thread::sleep(pool.config.queue_arrival_wait);
            continue;
        };

        if handle.status() == WorkerStatus::Exiting {
            continue;
        }

        let backlog = handle.outstanding_tasks() > DEFAULT_GROWTH_THRESHOLD;
        if pool.try_claim_growth(backlog) {
            spawn_worker(pool, state, false);
            // Re-select against the (possibly larger) worker set rather
            // than committing to the pre-growth candidate.
            continue;
        }

        let sender = state.senders.lock().unwrap().get(&handle.name).cloned();
        let Some(sender) = sender else {
            continue; // worker exited between selection and send
        };

        handle.increment_outstanding();
        item = match sender.try_send(item) {
            Ok(()) => {
                pool.emit(PoolEvent::WorkerSelected {
                    worker_name: handle.name.clone(),
                    task_count: handle.outstanding_tasks() as usize,
                });
                return true;
            }
            Err(TrySendError::Full(returned)) => {
                handle.decrement_outstanding();
                pool.emit(PoolEvent::WorkerAssignmentFailed {
                    worker_name: handle.name.clone(),
                    task_count: handle.outstanding_tasks() as usize,
                });
                returned
            }
            Err(TrySendError::Disconnected(returned)) => {
                handle.decrement_outstanding();
                returned
            }
        };
    }
}

pub(crate) fn spawn_worker(pool: &Arc<PoolInner>, state: &Arc<State>, permanent: bool) {
    let name = format!("worker-{}", Uuid::new_v4());
    let handle = Arc::new(WorkerHandle::new(name.clone(), permanent));
    let (sender, receiver) = bounded(state.queue_capacity);
    state.senders.lock().unwrap().insert(name.clone(), sender);
    pool.register_worker(handle.clone());

    let pool = pool.clone();
    let state = state.clone();
    thread::Builder::new()
        .name(name)
        .spawn(move || run_loop(&pool, &state, &handle, receiver))
        .expect("failed to spawn V2 worker thread");
}

fn run_loop(pool: &Arc<PoolInner>, state: &Arc<State>, handle: &Arc<WorkerHandle>, receiver: Receiver<WorkItem>) {
    // `cancel_rx` closes the instant the pool is cancelled, so the
    // `select!` below wakes immediately instead of waiting out the next
    // `queue_arrival_wait` tick.
    let cancel_rx = pool.cancel_token.wait_channel();
    loop {
        if pool.cancel_token.is_cancelled() {
            break;
        }
        if !handle.is_permanent {
            if let Some(timeout) = pool.config.idle_timeout {
                if handle.idle_for(&pool.clock) > timeout {
                    break;
                }
            }
        }

        handle.set_status(WorkerStatus::Ready);
        crossbeam_channel::select! {
            recv(receiver) -> msg => match msg {
                Ok(item) => {
                    handle.set_status(WorkerStatus::Running);
                    handle.touch(&pool.clock);
                    pool.execute_work_item(item);
                    handle.decrement_outstanding();
                }
                Err(_) => break,
            },
            recv(cancel_rx) -> _ => break,
            default(pool.config.queue_arrival_wait) => continue,
        }
    }
    handle.set_status(WorkerStatus::Exiting);
    state.senders.lock().unwrap().remove(&handle.name);
    pool.unregister_worker(&handle.name);
}
