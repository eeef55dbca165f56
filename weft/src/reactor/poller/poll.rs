//! Portable `poll(2)`-based poller implementation.
//!
//! Used on unix targets without `epoll`. The registry lives in user space
//! and the `pollfd` set is rebuilt for every call, which is fine for the
//! handful of descriptors a single loop usually watches.

use super::common::{Interest, timeout_ms};
use crate::reactor::event::Event;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, pollfd};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub(crate) struct PollPoller {
    /// Registered descriptors: `fd → interest`.
    reg: HashMap<RawFd, Interest>,

    /// Reusable `pollfd` buffer.
    fds: Vec<pollfd>,
}

impl PollPoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            reg: HashMap::new(),
            fds: Vec::with_capacity(capacity),
        })
    }

    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if self.reg.contains_key(&fd) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }

        self.reg.insert(fd, interest);
        Ok(())
    }

    pub(crate) fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        match self.reg.get_mut(&fd) {
            Some(current) => {
                *current = interest;
                Ok(())
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.reg
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    /// Poll for I/O readiness events.
    ///
    /// An invalid descriptor is reported ready in both directions.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();
        self.fds.clear();

        for (&fd, interest) in &self.reg {
            let mut flags = 0;

            if interest.read {
                flags |= POLLIN;
            }
            if interest.write {
                flags |= POLLOUT;
            }

            self.fds.push(pollfd {
                fd,
                events: flags,
                revents: 0,
            });
        }

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
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

        for p in self.fds.iter().filter(|p| p.revents != 0) {
            let failed = p.revents & (POLLERR | POLLHUP | POLLNVAL) != 0;

            events.push(Event {
                fd: p.fd,
                readable: failed || p.revents & POLLIN != 0,
                writable: failed || p.revents & POLLOUT != 0,
            });
        }

        Ok(())
    }
}
