//! Readiness watcher.
//!
//! Keeps at most one waiting evaluation per descriptor and direction and
//! keeps the OS poller registration in sync with those waiters.

use super::event::Event;
use super::poller::Poller;
use super::poller::common::Interest;
use crate::task::evaluation::{EvalCore, EvalId};

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Direction of a readiness wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Direction {
    Read,
    Write,
}

pub(crate) struct ReadinessWatcher {
    poller: Poller,
    readers: HashMap<RawFd, Rc<EvalCore>>,
    writers: HashMap<RawFd, Rc<EvalCore>>,

    /// Interest currently registered with the poller.
    registered: HashMap<RawFd, Interest>,

    events: Vec<Event>,
}

impl ReadinessWatcher {
    pub(crate) fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new(event_capacity)?,
            readers: HashMap::new(),
            writers: HashMap::new(),
            registered: HashMap::new(),
            events: Vec::with_capacity(event_capacity),
        })
    }

    fn waiters(&mut self, direction: Direction) -> &mut HashMap<RawFd, Rc<EvalCore>> {
        match direction {
            Direction::Read => &mut self.readers,
            Direction::Write => &mut self.writers,
        }
    }

    fn wanted(&self, fd: RawFd) -> Interest {
        Interest {
            read: self.readers.contains_key(&fd),
            write: self.writers.contains_key(&fd),
        }
    }

    /// Brings the poller registration of `fd` in line with its waiters.
    fn sync(&mut self, fd: RawFd) -> io::Result<()> {
        let wanted = self.wanted(fd);

        match self.registered.get(&fd).copied() {
            None if wanted.is_empty() => {}
            None => {
                self.poller.register(fd, wanted)?;
                self.registered.insert(fd, wanted);
            }
            Some(_) if wanted.is_empty() => {
                self.registered.remove(&fd);

                // A descriptor closed while watched is already gone from the poller.
                if let Err(err) = self.poller.deregister(fd) {
                    trace!(fd, error = %err, "deregister failed");
                }
            }
            Some(current) if current == wanted => {}
            Some(_) => {
                if self.poller.reregister(fd, wanted).is_err() {
                    self.poller.register(fd, wanted)?;
                }
                self.registered.insert(fd, wanted);
            }
        }

        Ok(())
    }

    /// Watches `fd` in `direction` on behalf of `eval`.
    ///
    /// A previous waiter for the same descriptor and direction is replaced
    /// and returned. On error nothing is registered.
    pub(crate) fn await_fd(
        &mut self,
        fd: RawFd,
        direction: Direction,
        eval: Rc<EvalCore>,
    ) -> io::Result<Option<Rc<EvalCore>>> {
        let previous = self.waiters(direction).insert(fd, eval);

        if let Err(err) = self.sync(fd) {
            match previous {
                Some(prev) => self.waiters(direction).insert(fd, prev),
                None => self.waiters(direction).remove(&fd),
            };
            return Err(err);
        }

        if let Some(prev) = &previous {
            debug!(fd, ?direction, replaced = %prev.id, "readiness waiter replaced");
        }

        Ok(previous)
    }

    pub(crate) fn await_reader(
        &mut self,
        fd: RawFd,
        eval: Rc<EvalCore>,
    ) -> io::Result<Option<Rc<EvalCore>>> {
        self.await_fd(fd, Direction::Read, eval)
    }

    pub(crate) fn await_writer(
        &mut self,
        fd: RawFd,
        eval: Rc<EvalCore>,
    ) -> io::Result<Option<Rc<EvalCore>>> {
        self.await_fd(fd, Direction::Write, eval)
    }

    /// Stops watching `fd` in `direction`, returning the waiter it had.
    pub(crate) fn take(&mut self, fd: RawFd, direction: Direction) -> io::Result<Option<Rc<EvalCore>>> {
        let taken = self.waiters(direction).remove(&fd);

        if taken.is_some() {
            self.sync(fd)?;
        }

        Ok(taken)
    }

    pub(crate) fn cancel_reader(&mut self, fd: RawFd) -> io::Result<Option<Rc<EvalCore>>> {
        self.take(fd, Direction::Read)
    }

    pub(crate) fn cancel_writer(&mut self, fd: RawFd) -> io::Result<Option<Rc<EvalCore>>> {
        self.take(fd, Direction::Write)
    }

    /// Like [`take`](Self::take), but only if `eval` is still the
    /// registered waiter.
    pub(crate) fn take_if(
        &mut self,
        fd: RawFd,
        direction: Direction,
        eval: EvalId,
    ) -> io::Result<Option<Rc<EvalCore>>> {
        let owned = self
            .waiters(direction)
            .get(&fd)
            .is_some_and(|waiter| waiter.id == eval);

        if !owned {
            return Ok(None);
        }

        self.take(fd, direction)
    }

    /// Stops watching `fd` only if `eval` is still the registered waiter.
    pub(crate) fn cancel_if(&mut self, fd: RawFd, direction: Direction, eval: EvalId) -> bool {
        match self.take_if(fd, direction, eval) {
            Ok(taken) => taken.is_some(),
            Err(err) => {
                debug!(fd, ?direction, error = %err, "failed to update poller registration");
                true
            }
        }
    }

    /// `true` while any descriptor is watched.
    pub(crate) fn is_awaiting(&self) -> bool {
        !self.readers.is_empty() || !self.writers.is_empty()
    }

    pub(crate) fn is_watching(&self, fd: RawFd, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.readers.contains_key(&fd),
            Direction::Write => self.writers.contains_key(&fd),
        }
    }

    /// Waits up to `timeout` seconds for readiness and reports every ready
    /// `(fd, direction)` that has a waiter, together with that waiter.
    ///
    /// The readiness only belongs to the waiter reported here: one that
    /// registers on the same descriptor later must be polled again.
    /// An infinite timeout blocks until something becomes ready.
    pub(crate) fn poll(&mut self, timeout: f64) -> io::Result<Vec<(RawFd, Direction, EvalId)>> {
        let timeout = timeout
            .is_finite()
            .then(|| Duration::from_secs_f64(timeout.max(0.0)));

        self.poller.poll(&mut self.events, timeout)?;

        let mut ready = Vec::with_capacity(self.events.len());

        for ev in &self.events {
            if let Some(waiter) = self.readers.get(&ev.fd).filter(|_| ev.readable) {
                ready.push((ev.fd, Direction::Read, waiter.id));
            }
            if let Some(waiter) = self.writers.get(&ev.fd).filter(|_| ev.writable) {
                ready.push((ev.fd, Direction::Write, waiter.id));
            }
        }

        trace!(ready = ready.len(), "readiness poll returned");

        Ok(ready)
    }

    /// Drops every registration. Used when the loop is reinitialized.
    pub(crate) fn clear(&mut self) {
        for fd in std::mem::take(&mut self.registered).into_keys() {
            if let Err(err) = self.poller.deregister(fd) {
                trace!(fd, error = %err, "deregister failed");
            }
        }

        self.readers.clear();
        self.writers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::evaluation::Kind;

    fn eval(id: u64) -> Rc<EvalCore> {
        Rc::new(EvalCore::new(
            EvalId(id),
            Kind::Task { keeps_result: true },
            None,
        ))
    }

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn close(fds: (RawFd, RawFd)) {
        unsafe {
            libc::close(fds.0);
            libc::close(fds.1);
        }
    }

    #[test]
    fn reports_readable_pipe() {
        let mut watcher = ReadinessWatcher::new(8).unwrap();
        let (rx, tx) = pipe();

        watcher.await_reader(rx, eval(1)).unwrap();
        assert!(watcher.poll(0.0).unwrap().is_empty());

        assert_eq!(unsafe { libc::write(tx, b"x".as_ptr().cast(), 1) }, 1);

        assert_eq!(watcher.poll(0.0).unwrap(), vec![(rx, Direction::Read, EvalId(1))]);

        let waiter = watcher.take(rx, Direction::Read).unwrap().unwrap();
        assert_eq!(waiter.id, EvalId(1));
        assert!(!watcher.is_awaiting());

        close((rx, tx));
    }

    #[test]
    fn pipe_write_end_is_writable() {
        let mut watcher = ReadinessWatcher::new(8).unwrap();
        let (rx, tx) = pipe();

        watcher.await_writer(tx, eval(1)).unwrap();

        assert_eq!(watcher.poll(0.0).unwrap(), vec![(tx, Direction::Write, EvalId(1))]);

        close((rx, tx));
    }

    #[test]
    fn second_waiter_replaces_the_first() {
        let mut watcher = ReadinessWatcher::new(8).unwrap();
        let (rx, tx) = pipe();

        assert!(watcher.await_reader(rx, eval(1)).unwrap().is_none());
        let replaced = watcher.await_reader(rx, eval(2)).unwrap().unwrap();
        assert_eq!(replaced.id, EvalId(1));

        assert!(!watcher.cancel_if(rx, Direction::Read, EvalId(1)));
        assert!(watcher.is_watching(rx, Direction::Read));
        assert!(watcher.cancel_if(rx, Direction::Read, EvalId(2)));
        assert!(!watcher.is_awaiting());

        close((rx, tx));
    }

    #[test]
    fn both_directions_share_one_registration() {
        let mut watcher = ReadinessWatcher::new(8).unwrap();
        let (rx, tx) = pipe();

        watcher.await_reader(tx, eval(1)).unwrap();
        watcher.await_writer(tx, eval(2)).unwrap();

        assert_eq!(watcher.poll(0.0).unwrap(), vec![(tx, Direction::Write, EvalId(2))]);

        watcher.cancel_writer(tx).unwrap();
        assert!(watcher.is_watching(tx, Direction::Read));
        assert!(watcher.poll(0.0).unwrap().is_empty());

        watcher.clear();
        assert!(!watcher.is_awaiting());

        close((rx, tx));
    }

    #[test]
    fn readiness_is_not_handed_to_a_later_waiter() {
        let mut watcher = ReadinessWatcher::new(8).unwrap();
        let (rx, tx) = pipe();

        watcher.await_writer(tx, eval(1)).unwrap();
        let ready = watcher.poll(0.0).unwrap();
        assert_eq!(ready, vec![(tx, Direction::Write, EvalId(1))]);

        // The reported waiter moved on and another one took its place.
        watcher.cancel_writer(tx).unwrap();
        watcher.await_writer(tx, eval(2)).unwrap();

        assert!(watcher.take_if(tx, Direction::Write, EvalId(1)).unwrap().is_none());
        assert!(watcher.is_watching(tx, Direction::Write));

        let waiter = watcher.take_if(tx, Direction::Write, EvalId(2)).unwrap().unwrap();
        assert_eq!(waiter.id, EvalId(2));
        assert!(!watcher.is_awaiting());

        close((rx, tx));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn bad_descriptor_is_rejected() {
        let mut watcher = ReadinessWatcher::new(8).unwrap();

        assert!(watcher.await_reader(-1, eval(1)).is_err());
        assert!(!watcher.is_awaiting());
    }
}
