//! The loop driver.
//!
//! One iteration either drains everything that is due (immediate carts,
//! due deferred carts, ready descriptors) or, when nothing is due, blocks
//! in the readiness poll until the next deferred cart is due. A loop with
//! nothing scheduled and nothing watched can never make progress again;
//! that is reported as a fatal error.

use super::core::Loop;
use crate::error::{Error, Result};
use crate::task::evaluation::Resumption;

use tracing::trace;

impl Loop {
    /// Runs one iteration of the loop.
    ///
    /// [`block_on`](Self::block_on) calls this while its future is
    /// suspended; it can also be used to drive the loop by hand from
    /// outside any task. A fatal error reinitializes the loop and is
    /// returned wrapped in [`Error::LoopTeardown`].
    pub fn run_once(&self) -> Result<()> {
        if self.current().is_task() {
            return Err(Error::protocol("run_once called from inside a task"));
        }

        let outcome = self
            .iterate()
            .and_then(|()| self.take_poison().map_or(Ok(()), Err));

        outcome.map_err(|err| self.teardown(err))
    }

    fn iterate(&self) -> Result<()> {
        self.pool().reset_quota();

        let wait = self.queue().waiting_time();
        let watching = self.is_awaiting_io();

        trace!(wait, watching, "loop iteration");

        if wait == 0.0 {
            if watching {
                self.process_ready_in(0.0)?;
            }
            self.process_pending()
        } else if watching || wait.is_finite() {
            self.process_ready_in(wait)
        } else {
            Err(Error::fatal("infinitely running loop detected"))
        }
    }

    /// Delivers every cart due now, in queue order.
    fn process_pending(&self) -> Result<()> {
        let batch = self.queue().take_pending();

        for key in batch {
            if self.is_poisoned() {
                break;
            }

            let claimed = self.queue().claim(key);

            if let Some((eval, resumption)) = claimed {
                self.deliver(&eval, resumption)?;
            }
        }

        Ok(())
    }

    /// Waits up to `timeout` seconds for readiness and resumes the waiters
    /// of every ready descriptor.
    fn process_ready_in(&self, timeout: f64) -> Result<()> {
        let ready = self.watcher().poll(timeout)?;

        for (fd, direction, id) in ready {
            if self.is_poisoned() {
                break;
            }

            // An earlier waiter in this batch may have parked someone else
            // on `fd`; that one waits for the next poll.
            let waiter = self.watcher().take_if(fd, direction, id)?;

            if let Some(eval) = waiter {
                trace!(fd, ?direction, eval = %eval.id, "descriptor ready");
                self.deliver(&eval, Resumption::Ready)?;
            }
        }

        Ok(())
    }
}
