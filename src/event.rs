//! The pool's event sink: an abstract, best-effort consumer of lifecycle
//! and error tracing events (§6).
//!
//! `EventSink` is the stable, structured contract a host application wires
//! up to its own diagnostics (a metrics counter, a tracing exporter, a
//! test probe). It is deliberately separate from the unstructured
//! `log`-facade diagnostics the pool also emits at the same call sites:
//! `log` is for a developer reading this crate's own logs, `EventSink` is
//! for a consumer that wants to react to pool lifecycle programmatically.
//! The sink is not guaranteed to be reliable or ordered, and its callbacks
//! run on whichever thread produced the event — usually a worker thread.

use std::fmt;

/// A structured pool lifecycle or failure event.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    PoolStarted {
        name: String,
        min_threads: usize,
        max_threads: usize,
    },
    PoolCancelled {
        name: String,
        live_count: usize,
    },
    WorkerStart {
        worker_name: String,
    },
    WorkerExit {
        worker_name: String,
    },
    WorkerSelected {
        worker_name: String,
        task_count: usize,
    },
    WorkerAssignmentFailed {
        worker_name: String,
        task_count: usize,
    },
    SizeWarning {
        pool_name: String,
        current_size: usize,
        max_threads: usize,
    },
    WorkItemFailure {
        message: String,
    },
    Failure {
        message: String,
    },
}

/// An opaque collaborator that receives [`PoolEvent`]s.
///
/// Implementations must not block for long or panic; a slow or panicking
/// sink runs on the thread that produced the event (often a worker) and
/// will stall that thread's dispatch loop.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: PoolEvent);
}

impl fmt::Debug for dyn EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn EventSink")
    }
}

/// A sink that discards every event. The default when no sink is supplied.
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn on_event(&self, _event: PoolEvent) {}
}
