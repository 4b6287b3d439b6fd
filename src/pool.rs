//! The pool orchestrator (C4): construction, growth throttling, dispatch,
//! and disposal, shared by all three variants.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::cancel::{CancelHandle, CancellationToken};
use crate::config::Config;
use crate::event::{EventSink, NoopEventSink, PoolEvent};
use crate::registry::Registry;
use crate::variants::{self, Dispatch};
use crate::work_item::{ExecutionContext, UserData, WorkItem, WorkItemPanic};
use crate::worker::{Clock, WorkerHandle};

type ExceptionHandler = Box<dyn Fn(&WorkItemPanic, &UserData) + Send + Sync>;

/// Shared state behind every [`Pool`] clone and every worker thread's
/// `Arc`. Not exposed directly; `Pool` is the public handle.
pub(crate) struct PoolInner {
    pub(crate) name: String,
    pub(crate) config: Config,
    pub(crate) clock: Clock,
    pub(crate) registry: Registry,
    pub(crate) cancel_token: CancellationToken,
    last_thread_birth_millis: AtomicU64,
    event_sink: Arc<dyn EventSink>,
    exception_handlers: Mutex<Vec<ExceptionHandler>>,
    size_warned: AtomicBool,
    disposed: AtomicBool,
    pub(crate) dispatch: Dispatch,
}

impl PoolInner {
    /// Logs at a level appropriate to the event, then forwards it to the
    /// configured [`EventSink`]. The two are independent channels (see
    /// [`crate::event`]'s module doc) but share this one call site so
    /// every emission point only has to call one function.
    pub(crate) fn emit(&self, event: PoolEvent) {
        match &event {
            PoolEvent::PoolStarted { name, min_threads, max_threads } => {
                log::info!("pool `{name}` started (min={min_threads}, max={max_threads})");
            }
            PoolEvent::PoolCancelled { name, live_count } => {
                log::info!("pool `{name}` cancelled with {live_count} worker(s) still live");
            }
            PoolEvent::WorkerStart { worker_name } => log::debug!("worker `{worker_name}` started"),
            PoolEvent::WorkerExit { worker_name } => log::debug!("worker `{worker_name}` exited"),
            PoolEvent::WorkerSelected { worker_name, task_count } => {
                log::trace!("worker `{worker_name}` selected (outstanding={task_count})");
            }
            PoolEvent::WorkerAssignmentFailed { worker_name, task_count } => {
                log::trace!("assignment to `{worker_name}` deferred (outstanding={task_count})");
            }
            PoolEvent::SizeWarning { pool_name, current_size, max_threads } => {
                log::warn!("pool `{pool_name}` at {current_size}/{max_threads} threads");
            }
            PoolEvent::WorkItemFailure { message } => log::warn!("work item failure: {message}"),
            PoolEvent::Failure { message } => log::error!("internal pool failure: {message}"),
        }
        self.event_sink.on_event(event);
    }

    /// Registers a freshly spawned worker: adds it to the registry, stamps
    /// its idle clock so the idle timer starts from spawn rather than from
    /// the pool epoch, and emits the size warning the first time the live
    /// count crosses the threshold (§6, "emitted at least once").
    pub(crate) fn register_worker(&self, handle: Arc<WorkerHandle>) {
        handle.touch(&self.clock);
        self.registry.insert(handle.clone());
        self.emit(PoolEvent::WorkerStart {
            worker_name: handle.name.clone(),
        });

        let threshold = self.config.size_warning_threshold();
        if self.registry.len() >= threshold && !self.size_warned.swap(true, Ordering::AcqRel) {
            self.emit(PoolEvent::SizeWarning {
                pool_name: self.name.clone(),
                current_size: self.registry.len(),
                max_threads: self.config.max_threads,
            });
        }
    }

    pub(crate) fn unregister_worker(&self, name: &str) {
        self.registry.remove(name);
        self.emit(PoolEvent::WorkerExit {
            worker_name: name.to_string(),
        });
    }

    /// Runs a work item and routes a caught panic to the exception
    /// channel. Shared by all three variants' dispatch loops.
    pub(crate) fn execute_work_item(&self, item: WorkItem) {
        if let Err((panic, user_data)) = item.run() {
            log::warn!("work item panicked: {}", panic.message);
            self.emit(PoolEvent::WorkItemFailure {
                message: panic.message.clone(),
            });
            let handlers = self.exception_handlers.lock().unwrap();
            for handler in handlers.iter() {
                handler(&panic, &user_data);
            }
        }
    }

    /// Attempts to claim the right to spawn a new, non-permanent worker.
    /// Returns `true` at most once per `new_thread_spacing` window, and
    /// never once the pool is cancelled, at capacity, or `backlog_signal`
    /// is false (§4.3 step 2, §4.8).
    pub(crate) fn try_claim_growth(&self, backlog_signal: bool) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        if !backlog_signal {
            return false;
        }
        if self.registry.len() >= self.config.max_threads {
            return false;
        }
        let spacing = self.config.new_thread_spacing.as_millis() as u64;
        let now = self.clock.now_millis();
        let last = self.last_thread_birth_millis.load(Ordering::Relaxed);
        if now.saturating_sub(last) < spacing {
            return false;
        }
        self.last_thread_birth_millis
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// A bounded, user-space compute thread pool.
///
/// Cloning a `Pool` is cheap and shares the same underlying workers and
/// queues; the pool is torn down when [`Pool::dispose`] is called, not
/// when the last clone is dropped (workers hold their own `Arc` to the
/// shared state for the lifetime of the process, same as the original
/// source's background thread pool).
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Builds and starts a pool: spawns `config.min_threads` permanent
    /// workers immediately and links `external_cancel` so cancelling the
    /// caller's token cancels this pool too (§4.4).
    pub fn new(config: Config, external_cancel: CancellationToken) -> Self {
        Self::with_event_sink(config, external_cancel, Arc::new(NoopEventSink))
    }

    /// Same as [`Pool::new`] but with an explicit [`EventSink`] instead of
    /// the default no-op one.
    pub fn with_event_sink(
        config: Config,
        external_cancel: CancellationToken,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let name = format!("pool-{}", Uuid::new_v4());
        let dispatch = variants::build(&config.variant);

        let inner = Arc::new(PoolInner {
            name: name.clone(),
            clock: Clock::new(),
            registry: Registry::new(),
            cancel_token: CancellationToken::new(),
            last_thread_birth_millis: AtomicU64::new(0),
            event_sink,
            exception_handlers: Mutex::new(Vec::new()),
            size_warned: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            dispatch,
            config,
        });

        // Any cancellation of the caller's token cancels this pool's
        // internal token; `dispose()` never reaches back out to
        // `external_cancel` (§4.4: cancellation flows inward only).
        let forwarded = inner.cancel_token.clone();
        external_cancel.register(move || forwarded.cancel());

        inner.emit(PoolEvent::PoolStarted {
            name,
            min_threads: inner.config.min_threads,
            max_threads: inner.config.max_threads,
        });

        for _ in 0..inner.config.min_threads {
            variants::spawn_worker(&inner, true);
        }

        Pool { inner }
    }

    /// Submits a unit of work. Returns `false` without enqueuing anything
    /// if the pool has already been cancelled (§4.1). The callable is
    /// never null in a strongly-typed language, so the original source's
    /// null-callable `InvalidArgument` has no counterpart here.
    pub fn submit<F>(&self, user_data: UserData, callable: F) -> bool
    where
        F: FnOnce(&CancelHandle, &UserData) + Send + 'static,
    {
        if self.inner.cancel_token.is_cancelled() {
            return false;
        }
        let cancel_handle = CancelHandle::new(self.inner.cancel_token.clone());
        let execution_context = ExecutionContext::capture(self.inner.config.capture_caller_context);
        let item = WorkItem::new(Box::new(callable), user_data, cancel_handle, execution_context);
        variants::submit(&self.inner, item)
    }

    /// The number of workers currently registered, permanent and
    /// non-permanent combined.
    pub fn total_threads(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registers a callback invoked whenever a submitted work item's
    /// callable panics. Handlers run synchronously on the worker thread
    /// that caught the panic, in registration order (§6).
    pub fn subscribe_exception<F>(&self, handler: F)
    where
        F: Fn(&WorkItemPanic, &UserData) + Send + Sync + 'static,
    {
        self.inner
            .exception_handlers
            .lock()
            .unwrap()
            .push(Box::new(handler));
    }

    /// Cancels the pool. Idempotent: the second and subsequent calls
    /// observe the flag already set and return immediately. Blocks until
    /// every subscriber of the internal cancellation token has run, but
    /// does not wait for worker threads to actually exit (§4.4).
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let live_count = self.inner.registry.len();
        self.inner.cancel_token.cancel();
        self.inner.emit(PoolEvent::PoolCancelled {
            name: self.inner.name.clone(),
            live_count,
        });
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("total_threads", &self.inner.registry.len())
            .field("cancelled", &self.inner.cancel_token.is_cancelled())
            .finish()
    }
}

#[allow(dead_code)]
fn _assert_pool_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Pool>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn global_config(min: usize, max: usize) -> Config {
        ConfigBuilder::new()
            .min_threads(min)
            .max_threads(max)
            .idle_timeout(Some(Duration::from_millis(50)))
            .new_thread_spacing(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    #[test]
    fn starts_with_min_threads_permanent_workers() {
        let pool = Pool::new(global_config(3, 5), CancellationToken::new());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.total_threads(), 3);
        pool.dispose();
    }

    #[test]
    fn submit_after_dispose_is_rejected() {
        let pool = Pool::new(global_config(1, 2), CancellationToken::new());
        pool.dispose();
        assert!(!pool.submit(Box::new(()), |_c, _u| {}));
    }

    #[test]
    fn dispose_is_idempotent() {
        let pool = Pool::new(global_config(1, 1), CancellationToken::new());
        pool.dispose();
        pool.dispose(); // must not panic or double-run subscribers
    }

    #[test]
    fn external_cancellation_token_cancels_the_pool() {
        let external = CancellationToken::new();
        let pool = Pool::new(global_config(1, 1), external.clone());
        external.cancel();
        assert!(!pool.submit(Box::new(()), |_c, _u| {}));
    }

    #[test]
    fn submitted_work_runs_on_a_worker_thread() {
        let pool = Pool::new(global_config(1, 2), CancellationToken::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        pool.submit(
            Box::new(()),
            move |_cancel, _user_data| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        pool.dispose();
    }

    #[test]
    fn panicking_work_item_is_reported_to_exception_subscribers() {
        let pool = Pool::new(global_config(1, 1), CancellationToken::new());
        let caught = Arc::new(AtomicUsize::new(0));
        let caught_clone = caught.clone();
        pool.subscribe_exception(move |panic, user_data| {
            assert_eq!(panic.message, "boom");
            assert_eq!(*user_data.downcast_ref::<i32>().unwrap(), 123);
            caught_clone.fetch_add(1, Ordering::SeqCst);
        });
        pool.submit(Box::new(123i32), |_cancel, _user_data| panic!("boom"));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(caught.load(Ordering::SeqCst), 1);
        pool.dispose();
    }
}
