//! Core runtime components.
//!
//! This module contains the [`Loop`] and the machinery behind it:
//! - the run queue of pending resumptions,
//! - the execution context pool task bodies run in,
//! - the driver that runs one loop iteration at a time,
//! - the suspension primitives and the resumption path.
//!
//! Most users interact with [`Loop`] and
//! [`ConcurrentProc`](crate::ConcurrentProc) rather than with the
//! individual components.

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod driver;
pub(crate) mod pool;
pub(crate) mod queue;
pub(crate) mod suspend;
pub(crate) mod yield_now;

pub use self::builder::LoopBuilder;
pub use self::core::Loop;
pub use self::pool::ContextId;
