//! Error taxonomy of the runtime.
//!
//! Every fallible operation of the loop returns [`Result`]. The variants
//! separate user failures raised by task bodies from the control-flow
//! signals the loop itself uses (cancellation, timeouts) and from
//! programming errors and fatal loop faults.

use crate::task::evaluation::EvalId;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A centralized error type for all loop and task operations.
///
/// `Error` is cheap to clone so that a concluded evaluation can hand the
/// same failure to every awaiter.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// A task body failed.
    #[error("task failed: {0}")]
    Task(Arc<anyhow::Error>),

    /// The readiness primitive reported an OS error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The waiting evaluation was concluded while suspended.
    ///
    /// This is a control-flow signal, not an application failure: it only
    /// travels up to the top of the task body, where it is discarded.
    #[error("evaluation was concluded while waiting")]
    Cancelled,

    /// A wait with a deadline elapsed and no timeout result was given.
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    /// The runtime was used in a way that breaks its protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A fault the loop cannot recover from in place.
    #[error("fatal loop error: {0}")]
    Fatal(String),

    /// The loop was reinitialized after a fatal fault.
    #[error("loop torn down: {0}")]
    LoopTeardown(Box<Error>),
}

impl Error {
    /// Wraps an arbitrary failure raised by a task body.
    pub fn task(error: impl Into<anyhow::Error>) -> Self {
        Error::Task(Arc::new(error.into()))
    }

    /// Builds a fatal error; returning it from a task body tears the loop down.
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Fatal(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    /// Returns `true` for the cancellation signal.
    ///
    /// Catch-all handlers inside task bodies should let this one through.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `true` for errors that force the loop to reinitialize.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// Returns `true` if the error reports an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// A task failure reported to the loop's error hook.
///
/// Every failed task body is published this way, whether or not anyone
/// awaits the result. Fire-and-forget tasks are only observable here.
#[derive(Debug, Clone)]
pub struct TaskError {
    /// Evaluation whose body failed.
    pub evaluation: EvalId,

    /// Name of the proc that launched it, if it was named.
    pub proc_name: Option<String>,

    pub error: Error,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.proc_name {
            Some(name) => write!(f, "{} ({name}): {}", self.evaluation, self.error),
            None => write!(f, "{}: {}", self.evaluation, self.error),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Task(Arc::new(error))
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Task(a), Self::Task(b)) => Arc::ptr_eq(a, b),
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::Timeout(a), Self::Timeout(b)) => a == b,
            (Self::Protocol(a), Self::Protocol(b)) => a == b,
            (Self::Fatal(a), Self::Fatal(b)) => a == b,
            (Self::LoopTeardown(a), Self::LoopTeardown(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_task_error_is_the_same_failure() {
        let err = Error::task(anyhow::anyhow!("boom"));
        let copy = err.clone();

        assert_eq!(err, copy);
        assert_eq!(err.to_string(), "task failed: boom");
    }

    #[test]
    fn classification() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::fatal("x").is_fatal());
        assert!(Error::Timeout(Duration::from_millis(5)).is_timeout());
        assert!(!Error::protocol("x").is_cancellation());
    }

    #[test]
    fn task_error_names_its_proc() {
        let report = TaskError {
            evaluation: EvalId(3),
            proc_name: Some("fetch".into()),
            error: Error::Cancelled,
        };

        assert_eq!(
            report.to_string(),
            "eval#3 (fetch): evaluation was concluded while waiting"
        );
    }

    #[test]
    fn io_errors_compare_by_kind() {
        let a: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        let b: Error = io::Error::new(io::ErrorKind::WouldBlock, "again").into();

        assert_eq!(a, b);
    }
}
