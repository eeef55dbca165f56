//! Suspension primitives of the loop.
//!
//! Each primitive returns a [`Wait`] that parks the current evaluation when
//! awaited. The loop side of the protocol lives here: registering the
//! resources a wait needs and releasing all of them as soon as the wait is
//! over, whichever way it ended.

use super::core::Loop;
use crate::error::Result;
use crate::reactor::watcher::Direction;
use crate::task::evaluation::{EvalCore, Resumption, WaitTokens};
use crate::task::state::EvalState;
use crate::time::wait::{Target, Wait};

use std::any::TypeId;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

impl Loop {
    /// Suspends the current evaluation for `duration`.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// lp.wait(Duration::from_millis(10)).await?;
    /// ```
    pub fn wait(&self, duration: Duration) -> Wait<()> {
        Wait::delay(self.clone(), duration)
    }

    /// Suspends the current evaluation until `fd` is readable.
    ///
    /// Only one evaluation waits on a descriptor per direction; a later
    /// waiter replaces the earlier one.
    pub fn wait_readable(&self, fd: RawFd) -> Wait<()> {
        Wait::readable(self.clone(), fd)
    }

    /// Suspends the current evaluation until `fd` is writable.
    pub fn wait_writable(&self, fd: RawFd) -> Wait<()> {
        Wait::writable(self.clone(), fd)
    }

    /// Suspends the current evaluation until someone calls
    /// [`resume`](Self::resume) on it with a `V`.
    pub fn wait_resume<V: 'static>(&self) -> Wait<V> {
        Wait::manual(self.clone())
    }

    /// Registers everything `target` needs and parks `eval`.
    pub(crate) fn suspend(
        &self,
        eval: &Rc<EvalCore>,
        target: &Target,
        within: Option<Duration>,
        expects: TypeId,
    ) -> Result<()> {
        let mut tokens = WaitTokens {
            expects: Some(expects),
            ..WaitTokens::default()
        };

        match target {
            Target::Delay(duration) => {
                self.queue()
                    .schedule_deferred(eval, *duration, Resumption::Ready);
            }
            Target::Yield => {
                self.queue()
                    .schedule_immediate(eval, Resumption::Ready, true);
            }
            Target::Readable(fd) => {
                self.watcher().await_reader(*fd, eval.clone())?;
                tokens.reader = Some(*fd);
            }
            Target::Writable(fd) => {
                self.watcher().await_writer(*fd, eval.clone())?;
                tokens.writer = Some(*fd);
            }
            Target::Manual => {}
            Target::Conclusion(awaited) => {
                awaited.add_awaiter(eval.clone());
                tokens.awaiting = Some(awaited.clone());
            }
        }

        if let Some(limit) = within {
            self.queue()
                .schedule_deferred(eval, limit, Resumption::TimedOut);
        }

        eval.set_wait(tokens);
        eval.set_state(EvalState::Waiting);
        trace!(eval = %eval.id, "suspended");

        Ok(())
    }

    /// Releases every cart and registration of the wait `eval` is in.
    ///
    /// Called as soon as a resumption is queued or delivered, so the losing
    /// side of a timeout race can never resume the evaluation again.
    pub(crate) fn release_wait(&self, eval: &EvalCore) {
        self.queue().cancel(eval.id, false);

        let Some(tokens) = eval.take_wait() else {
            return;
        };

        if let Some(fd) = tokens.reader {
            self.watcher().cancel_if(fd, Direction::Read, eval.id);
        }
        if let Some(fd) = tokens.writer {
            self.watcher().cancel_if(fd, Direction::Write, eval.id);
        }
        if let Some(awaited) = tokens.awaiting {
            awaited.remove_awaiter(eval.id);
        }
    }

    /// Tears down a wait whose future was dropped before it completed.
    pub(crate) fn abandon_wait(&self, eval: &EvalCore) {
        self.release_wait(eval);
        eval.take_mailbox();

        if eval.state().is_suspended() {
            eval.set_state(EvalState::Running);
        }

        trace!(eval = %eval.id, "wait abandoned");
    }
}
