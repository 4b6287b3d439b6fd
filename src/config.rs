//! Validated pool configuration (C1).

use std::time::Duration;

use crate::error::ConfigError;

/// A platform-dependent ceiling on `max_threads`, mirroring the upper
/// bound the original source imposed on its worker count.
const MAX_THREADS_HARD_CAP: usize = 32_767;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_NEW_THREAD_SPACING: Duration = Duration::from_secs(5);
const DEFAULT_QUEUE_ARRIVAL_WAIT: Duration = Duration::from_millis(100);
const DEFAULT_V2_QUEUE_CAPACITY: usize = 1024;

/// How V2 (private per-worker queues) picks a target worker for a
/// submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// A stateful integer index, wrapping modulo the live worker count.
    RoundRobin,
    /// Scan live workers, collect those tied for fewest outstanding tasks,
    /// pick uniformly among them.
    MinLoadRandom,
}

/// Which of the three dispatch strategies a [`crate::Pool`] runs (§4.5–§4.7).
#[derive(Debug, Clone)]
pub enum Variant {
    /// V1: a single global FIFO queue with competing consumers.
    Global,
    /// V2: a bounded private queue per worker.
    PrivateQueues {
        selection: SelectionPolicy,
        queue_capacity: usize,
    },
    /// V3: per-worker work-stealing deques backed by a global overflow
    /// queue.
    WorkStealing,
}

impl Variant {
    /// V2 with the recommended min-load-random selection policy and the
    /// default per-worker queue capacity.
    pub fn private_queues() -> Self {
        Variant::PrivateQueues {
            selection: SelectionPolicy::MinLoadRandom,
            queue_capacity: DEFAULT_V2_QUEUE_CAPACITY,
        }
    }
}

/// Immutable, validated pool configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub min_threads: usize,
    pub max_threads: usize,
    /// `None` represents `INFINITE`: shrinkage below `max_threads` is
    /// disabled and non-permanent workers never idle-exit.
    pub idle_timeout: Option<Duration>,
    pub new_thread_spacing: Duration,
    pub queue_arrival_wait: Duration,
    pub capture_caller_context: bool,
    pub variant: Variant,
}

impl Config {
    /// `ceil(0.95 * max_threads)` — crossing this emits a size warning.
    pub fn size_warning_threshold(&self) -> usize {
        ((self.max_threads as f64) * 0.95).ceil() as usize
    }
}

/// Builds a [`Config`], validating it on [`ConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Option<Duration>,
    new_thread_spacing: Duration,
    queue_arrival_wait: Duration,
    capture_caller_context: bool,
    variant: Variant,
}

impl ConfigBuilder {
    /// Starts from the documented defaults (§6): `min_threads = 1`,
    /// `max_threads = logical_cpu_count` (capped), `idle_timeout = 120s`,
    /// `queue_arrival_wait = 100ms`, `new_thread_spacing = 5s`.
    pub fn new() -> Self {
        let max_threads = num_cpus::get().max(1).min(MAX_THREADS_HARD_CAP);
        ConfigBuilder {
            min_threads: 1,
            max_threads,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            new_thread_spacing: DEFAULT_NEW_THREAD_SPACING,
            queue_arrival_wait: DEFAULT_QUEUE_ARRIVAL_WAIT,
            capture_caller_context: false,
            variant: Variant::Global,
        }
    }

    pub fn min_threads(&mut self, value: usize) -> &mut Self {
        self.min_threads = value;
        self
    }

    pub fn max_threads(&mut self, value: usize) -> &mut Self {
        self.max_threads = value;
        self
    }

    /// Pass `None` for `INFINITE` (disables shrinkage).
    pub fn idle_timeout(&mut self, value: Option<Duration>) -> &mut Self {
        self.idle_timeout = value;
        self
    }

    pub fn new_thread_spacing(&mut self, value: Duration) -> &mut Self {
        self.new_thread_spacing = value;
        self
    }

    pub fn queue_arrival_wait(&mut self, value: Duration) -> &mut Self {
        self.queue_arrival_wait = value;
        self
    }

    pub fn capture_caller_context(&mut self, value: bool) -> &mut Self {
        self.capture_caller_context = value;
        self
    }

    pub fn variant(&mut self, value: Variant) -> &mut Self {
        self.variant = value;
        self
    }

    /// Validates and finalizes the configuration.
    ///
    /// Fails with [`ConfigError::InvalidArgument`] when `min_threads < 1`
    /// or `max_threads < 1`, and [`ConfigError::OutOfRange`] when
    /// `min_threads > max_threads` (spec.md §3).
    pub fn build(&self) -> Result<Config, ConfigError> {
        if self.min_threads < 1 {
            return Err(ConfigError::InvalidArgument {
                field: "min_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_threads < 1 {
            return Err(ConfigError::InvalidArgument {
                field: "max_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_threads > self.max_threads {
            return Err(ConfigError::OutOfRange {
                field: "min_threads",
                reason: format!(
                    "min_threads ({}) must not exceed max_threads ({})",
                    self.min_threads, self.max_threads
                ),
            });
        }
        let max_threads = self.max_threads.min(MAX_THREADS_HARD_CAP);

        Ok(Config {
            min_threads: self.min_threads,
            max_threads,
            idle_timeout: self.idle_timeout,
            new_thread_spacing: self.new_thread_spacing,
            queue_arrival_wait: self.queue_arrival_wait,
            capture_caller_context: self.capture_caller_context,
            variant: self.variant.clone(),
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConfigBuilder::new().build().expect("defaults must validate");
        assert_eq!(config.min_threads, 1);
        assert!(config.max_threads >= 1);
        assert_eq!(config.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
    }

    #[test]
    fn rejects_zero_min_threads() {
        let err = ConfigBuilder::new().min_threads(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument { field: "min_threads", .. }));
    }

    #[test]
    fn rejects_zero_max_threads() {
        let err = ConfigBuilder::new()
            .max_threads(0)
            .min_threads(0)
            .max_threads(0)
            .build();
        // min_threads = 0 is checked first; exercise max_threads alone too.
        assert!(err.is_err());
        let err = ConfigBuilder::new().min_threads(1).max_threads(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument { field: "max_threads", .. }));
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let err = ConfigBuilder::new()
            .min_threads(10)
            .max_threads(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn size_warning_threshold_is_ceil_of_95_percent() {
        let config = ConfigBuilder::new().min_threads(1).max_threads(100).build().unwrap();
        assert_eq!(config.size_warning_threshold(), 95);

        let config = ConfigBuilder::new().min_threads(1).max_threads(10).build().unwrap();
        assert_eq!(config.size_warning_threshold(), 10);
    }

    #[test]
    fn idle_timeout_none_means_infinite() {
        let config = ConfigBuilder::new()
            .idle_timeout(None)
            .build()
            .unwrap();
        assert_eq!(config.idle_timeout, None);
    }
}
