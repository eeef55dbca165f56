use std::os::fd::RawFd;

/// An I/O event reported by the poller.
///
/// An `Event` carries readiness information for a registered file
/// descriptor. It is produced by the poller and consumed by the
/// readiness watcher to resume the evaluation waiting on that descriptor.
///
/// Error and hang-up conditions are folded into both flags so that the
/// waiter gets to observe the failure on its next I/O call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    /// The descriptor the event is about.
    pub(crate) fd: RawFd,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}

impl Event {
    /// Folds a second report for the same descriptor into the first one.
    pub(crate) fn merge(events: &mut Vec<Event>, event: Event) {
        if let Some(e) = events.iter_mut().find(|e| e.fd == event.fd) {
            e.readable |= event.readable;
            e.writable |= event.writable;
        } else {
            events.push(event);
        }
    }
}
