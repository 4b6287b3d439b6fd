//! The inert descriptor submitted to the pool (C2).
//!
//! The original source dispatched the callable through reflection
//! (`DynamicInvoke`-style). A systems language has no such thing and does
//! not need it: a strongly-typed, boxed `FnOnce` is a strict simplification
//! with no loss of functionality (spec.md §9).

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::cancel::CancelHandle;

/// Opaque, caller-supplied state threaded through to both the work item's
/// callable and, if it panics, every subscribed exception handler.
///
/// The callable borrows this rather than consuming it, so the pool can
/// still hand it to the exception channel after a panic unwinds out of
/// the callable.
pub type UserData = Box<dyn Any + Send>;

type Callable = Box<dyn FnOnce(&CancelHandle, &UserData) + Send>;

/// Optionally captures the submitter's ambient execution state at
/// submission time, to be restored around execution.
///
/// This crate has no culture/security/correlation context to capture, so
/// this is a documented no-op hook: when `capture_caller_context` is
/// `false` (the default) no `ExecutionContext` is created at all. When
/// `true`, a real embedding would populate `capture` with whatever ambient
/// state it needs propagated onto the worker thread, and `restore` would
/// install it before the callable runs.
pub struct ExecutionContext {
    _private: (),
}

impl ExecutionContext {
    pub(crate) fn capture(enabled: bool) -> Option<Self> {
        if enabled {
            Some(ExecutionContext { _private: () })
        } else {
            None
        }
    }

    /// Installs the captured state on the current (worker) thread. No-op
    /// until a real ambient-context mechanism is plugged into this hook.
    pub(crate) fn restore(&self) {}
}

/// An immutable, submitted unit of work.
pub struct WorkItem {
    callable: Callable,
    user_data: UserData,
    cancel_handle: CancelHandle,
    execution_context: Option<ExecutionContext>,
}

impl WorkItem {
    pub(crate) fn new(
        callable: Callable,
        user_data: UserData,
        cancel_handle: CancelHandle,
        execution_context: Option<ExecutionContext>,
    ) -> Self {
        WorkItem {
            callable,
            user_data,
            cancel_handle,
            execution_context,
        }
    }

    /// Runs the callable, catching any panic. Returns `Err` with the
    /// captured panic and a reference to the item's user data (for the
    /// exception channel) rather than propagating the unwind.
    pub(crate) fn run(self) -> Result<(), (WorkItemPanic, UserData)> {
        let WorkItem {
            callable,
            user_data,
            cancel_handle,
            execution_context,
        } = self;

        if let Some(ctx) = &execution_context {
            ctx.restore();
        }

        match catch_unwind(AssertUnwindSafe(|| callable(&cancel_handle, &user_data))) {
            Ok(()) => Ok(()),
            Err(payload) => Err((WorkItemPanic::from_payload(payload), user_data)),
        }
    }
}

/// A captured, non-propagated panic from a user work item's callable.
pub struct WorkItemPanic {
    pub message: String,
    pub payload: Box<dyn Any + Send>,
}

impl WorkItemPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "work item panicked with a non-string payload".to_string()
        };
        WorkItemPanic { message, payload }
    }
}

impl std::fmt::Debug for WorkItemPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemPanic")
            .field("message", &self.message)
            .finish()
    }
}

impl std::fmt::Display for WorkItemPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work item panicked: {}", self.message)
    }
}

impl std::error::Error for WorkItemPanic {}
