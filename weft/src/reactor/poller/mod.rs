//! Platform-specific I/O poller abstraction.
//!
//! This module provides a unified interface over the OS readiness
//! primitives: `epoll` on Linux and `poll(2)` on the other unix targets.
//! The concrete implementation is selected at compile time.

pub(crate) mod common;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(not(target_os = "linux"))]
mod poll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(not(target_os = "linux"))]
pub(crate) type Poller = poll::PollPoller;
