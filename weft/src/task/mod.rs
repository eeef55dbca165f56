//! Task evaluations.
//!
//! A [`ConcurrentProc`] is a procedure whose invocations run as task
//! evaluations on a [`Loop`](crate::Loop). Each evaluation is tracked by
//! an [`Evaluation`] handle (typed by its result) or an [`EvalRef`]
//! (untyped, for manual resumes and attached data).

pub(crate) mod evaluation;
pub(crate) mod proc;
pub(crate) mod state;

pub use evaluation::{EvalId, EvalRef, Evaluation};
pub use proc::{Attempt, ConcurrentProc};
pub use state::EvalState;
