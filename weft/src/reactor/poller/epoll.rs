//! Linux `epoll`-based poller implementation.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness, bounded by the loop's next deadline
//!
//! This backend is selected automatically on Linux targets. Descriptors
//! are their own tokens: the watcher holds at most one registration per
//! descriptor.

use super::common::{Interest, timeout_ms};
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Linux `epoll` poller.
///
/// This poller owns an `epoll` instance and a reusable event buffer.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    /// Create a new `EpollPoller` reporting at most `capacity` events per poll.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, interest)
    }

    /// Update interest flags for an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, interest)
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until at least one file descriptor becomes ready or the
    /// timeout expires. An interrupted wait reports no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & ((EPOLLOUT | EPOLLERR | EPOLLHUP) as u32) != 0;

            Event::merge(
                events,
                Event {
                    fd: ev.u64 as RawFd,
                    readable,
                    writable,
                },
            );
        }

        self.events.clear();

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
