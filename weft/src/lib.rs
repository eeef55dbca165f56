//! # weft
//!
//! **weft** is a cooperative, single-threaded concurrency runtime.
//!
//! A [`Loop`] interleaves many logical tasks on one thread. Tasks only
//! switch at explicit suspension points: waiting for a delay, for a file
//! descriptor to become readable or writable, for a manual resume, or for
//! another task's result. In between, a task runs uninterrupted.
//!
//! - A **run queue** with an immediate track (FIFO) and a deferred track
//!   (ordered by wake time, stable among equal times)
//! - A **readiness watcher** over `epoll` (Linux) or `poll(2)`
//! - A **pool of execution contexts** recycled between task evaluations
//! - **Four launch modes**: blocking call, non-blocking attempt, scheduled
//!   and fire-and-forget
//! - **Deadlines** on every suspension primitive
//! - **Ergonomic macros** `#[weft::main]` and `#[weft::test]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use weft::{ConcurrentProc, Loop};
//!
//! #[weft::main]
//! async fn main(lp: Loop) -> weft::Result<()> {
//!     let double = ConcurrentProc::new(|lp: Loop, x: u32| async move {
//!         lp.wait(Duration::from_millis(10)).await?;
//!         Ok(x * 2)
//!     });
//!
//!     let pending = double.schedule(&lp, 21);
//!     assert_eq!(pending.await_result().await?, 42);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Failures of task bodies are reported to whoever awaits the result and
//! always to the loop's error hook (see [`LoopBuilder::on_task_error`]).
//! Fatal faults (a panicking task, [`Error::Fatal`], a loop with nothing
//! left to wait for) reinitialize the loop and surface as
//! [`Error::LoopTeardown`].

mod error;
mod reactor;
mod runtime;
mod utils;

pub mod task;
pub mod time;

pub use error::{Error, Result, TaskError};
pub use runtime::{ContextId, Loop, LoopBuilder};
pub use task::{Attempt, ConcurrentProc, EvalId, EvalRef, EvalState, Evaluation};
pub use time::Wait;

pub use weft_macros::{main, test};
