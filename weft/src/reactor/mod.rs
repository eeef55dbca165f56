//! Readiness watching.
//!
//! The [`ReadinessWatcher`](watcher::ReadinessWatcher) maps file
//! descriptors to the evaluations waiting for them to become readable or
//! writable, on top of a platform poller. The loop driver polls it with the
//! time left until the next deferred cart.
//!
//! Most users never touch it directly; they go through
//! [`Loop::wait_readable`](crate::Loop::wait_readable) and
//! [`Loop::wait_writable`](crate::Loop::wait_writable).

pub(crate) mod event;
pub(crate) mod poller;
pub(crate) mod watcher;
