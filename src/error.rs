//! Error types surfaced synchronously to callers.
//!
//! Cancellation and user work-item panics are *not* modelled as errors
//! here: cancellation is cooperative (`submit` returns `false`) and a
//! panicking work item is routed to the exception channel (see
//! [`crate::event`] and [`crate::work_item::WorkItemPanic`]) rather than
//! propagated as a `Result`.

use thiserror::Error;

/// Fails validation of a [`crate::config::ConfigBuilder`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid argument for `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("`{field}` out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}
