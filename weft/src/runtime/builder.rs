use super::core::Loop;
use crate::error::{Result, TaskError};

use std::fmt;
use std::rc::Rc;

/// Callback receiving every task failure.
pub(crate) type ErrorHook = Rc<dyn Fn(&TaskError)>;

/// Loop configuration, fixed at construction.
#[derive(Clone)]
pub(crate) struct Config {
    /// Execution contexts handed out per loop iteration.
    pub(crate) context_quota: usize,

    /// Deferred-track size below which insertion scans linearly.
    pub(crate) linear_scan_threshold: usize,

    /// Readiness events collected per poll.
    pub(crate) event_capacity: usize,

    pub(crate) on_task_error: ErrorHook,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("context_quota", &self.context_quota)
            .field("linear_scan_threshold", &self.linear_scan_threshold)
            .field("event_capacity", &self.event_capacity)
            .finish_non_exhaustive()
    }
}

fn log_task_error(report: &TaskError) {
    tracing::warn!(
        eval = %report.evaluation,
        proc = report.proc_name.as_deref().unwrap_or("<anonymous>"),
        error = %report.error,
        "task failed"
    );
}

/// Builder for configuring and creating a [`Loop`].
///
/// # Examples
///
/// ```rust,ignore
/// let lp = LoopBuilder::new()
///     .context_quota(8)
///     .on_task_error(|report| eprintln!("{report}"))
///     .build()?;
/// ```
pub struct LoopBuilder {
    config: Config,
}

impl LoopBuilder {
    /// Creates a new `LoopBuilder` with default configuration.
    ///
    /// By default one execution context is handed out per iteration,
    /// deferred insertion scans linearly up to 32 carts, and task failures
    /// are logged at `warn` level.
    pub fn new() -> Self {
        Self {
            config: Config {
                context_quota: 1,
                linear_scan_threshold: 32,
                event_capacity: 64,
                on_task_error: Rc::new(log_task_error),
            },
        }
    }

    /// Sets how many fresh execution contexts one loop iteration may take.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn context_quota(mut self, n: usize) -> Self {
        assert!(n > 0, "context_quota must be > 0");

        self.config.context_quota = n;
        self
    }

    /// Sets the deferred-track size up to which insertion uses a linear
    /// scan instead of a binary search.
    pub fn linear_scan_threshold(mut self, n: usize) -> Self {
        self.config.linear_scan_threshold = n;
        self
    }

    /// Sets how many readiness events one poll may report.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.config.event_capacity = n;
        self
    }

    /// Replaces the hook that receives every task failure.
    pub fn on_task_error(mut self, hook: impl Fn(&TaskError) + 'static) -> Self {
        self.config.on_task_error = Rc::new(hook);
        self
    }

    /// Builds the loop with the configured options.
    ///
    /// Fails if the OS readiness primitive cannot be created.
    pub fn build(self) -> Result<Loop> {
        Loop::with_config(self.config)
    }
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoopBuilder::new().config;

        assert_eq!(config.context_quota, 1);
        assert_eq!(config.linear_scan_threshold, 32);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    #[should_panic(expected = "context_quota must be > 0")]
    fn zero_quota_is_rejected() {
        let _ = LoopBuilder::new().context_quota(0);
    }
}
