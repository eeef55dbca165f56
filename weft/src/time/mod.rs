//! Time and suspension primitives.
//!
//! This module provides:
//! - [`Clock`], the monotonic time source of a loop,
//! - [`Wait`], the future behind every suspension primitive
//!   ([`Loop::wait`](crate::Loop::wait), readiness waits, manual waits and
//!   result waits), with its `within` deadline option.

pub(crate) mod clock;
pub(crate) mod wait;

#[doc(inline)]
pub use clock::Clock;

#[doc(inline)]
pub use wait::Wait;
