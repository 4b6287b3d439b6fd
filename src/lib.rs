//! A bounded, user-space compute thread pool with pluggable dispatch
//! strategies.
//!
//! ```no_run
//! use compute_pool::{CancellationToken, ConfigBuilder, Pool};
//!
//! let config = ConfigBuilder::new()
//!     .min_threads(2)
//!     .max_threads(8)
//!     .build()
//!     .expect("valid configuration");
//!
//! let cancel = CancellationToken::new();
//! let pool = Pool::new(config, cancel.clone());
//!
//! pool.submit(Box::new(()), |_cancel, _user_data| {
//!     println!("running on a pool thread");
//! });
//!
//! pool.dispose();
//! ```
//!
//! Three variants share this one API surface, selected via
//! [`Variant`] on [`Config`]:
//!
//! - **Global** — one shared FIFO queue, competing consumers.
//! - **Private queues** — one bounded queue per worker, with a
//!   configurable [`SelectionPolicy`].
//! - **Work stealing** — one deque per worker, each able to steal from
//!   its peers, backstopped by a global overflow queue.
//!
//! Submitted work is opaque to the pool: a callable paired with
//! caller-supplied [`UserData`] it borrows rather than consumes, so a
//! panic caught inside the pool can still hand the original data to any
//! subscribed exception handler ([`Pool::subscribe_exception`]).

mod cancel;
mod config;
mod error;
mod event;
mod pool;
mod registry;
mod variants;
mod work_item;
mod worker;

pub use cancel::{CancelHandle, CancellationToken};
pub use config::{Config, ConfigBuilder, SelectionPolicy, Variant};
pub use error::ConfigError;
pub use event::{EventSink, NoopEventSink, PoolEvent};
pub use pool::Pool;
pub use work_item::{UserData, WorkItemPanic};
