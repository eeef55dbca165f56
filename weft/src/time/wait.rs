use crate::error::{Error, Result};
use crate::runtime::core::Loop;
use crate::task::evaluation::{EvalCore, Resumption};

use std::any::TypeId;
use std::future::Future;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// What a suspended evaluation waits for.
pub(crate) enum Target {
    /// A deferred cart after the given delay.
    Delay(Duration),

    /// An immediate cart for the next drain pass.
    Yield,

    Readable(RawFd),
    Writable(RawFd),

    /// Nothing but an explicit [`Loop::resume`].
    Manual,

    /// Conclusion of another evaluation.
    Conclusion(Rc<EvalCore>),
}

/// Turns a delivered resumption into the wait's output.
type Extract<V> = fn(&Target, Resumption) -> Result<V>;

/// Registration of an armed wait.
struct Armed {
    eval: Rc<EvalCore>,

    /// Loop generation the registration belongs to.
    epoch: u64,
}

/// A suspension primitive.
///
/// Awaiting a `Wait` parks the current evaluation until the loop resumes
/// it: when the timer fires, the descriptor becomes ready, someone calls
/// [`Loop::resume`], or the awaited evaluation concludes, depending on how
/// the wait was built.
///
/// Every wait accepts a deadline through [`within`](Self::within). Whichever
/// of the real event and the deadline the loop processes first wins and the
/// other is cancelled. Without a [`timeout_result`](Self::timeout_result),
/// an elapsed deadline resolves to [`Error::Timeout`].
///
/// Dropping an armed wait releases its carts and registrations, so a
/// cancelled task never leaks a timer or a watched descriptor.
///
/// If the evaluation was concluded from outside while it kept running, the
/// next wait it reaches resolves to [`Error::Cancelled`].
#[must_use = "waits do nothing unless awaited"]
pub struct Wait<V> {
    lp: Loop,
    target: Target,
    within: Option<Duration>,
    timeout_result: Option<V>,
    extract: Extract<V>,
    armed: Option<Armed>,
    done: bool,
}

impl<V> Unpin for Wait<V> {}

impl Wait<()> {
    pub(crate) fn delay(lp: Loop, duration: Duration) -> Self {
        Self::new(lp, Target::Delay(duration), unit)
    }

    pub(crate) fn yielding(lp: Loop) -> Self {
        Self::new(lp, Target::Yield, unit)
    }

    pub(crate) fn readable(lp: Loop, fd: RawFd) -> Self {
        Self::new(lp, Target::Readable(fd), unit)
    }

    pub(crate) fn writable(lp: Loop, fd: RawFd) -> Self {
        Self::new(lp, Target::Writable(fd), unit)
    }
}

impl<V: 'static> Wait<V> {
    fn new(lp: Loop, target: Target, extract: Extract<V>) -> Self {
        Self {
            lp,
            target,
            within: None,
            timeout_result: None,
            extract,
            armed: None,
            done: false,
        }
    }

    pub(crate) fn manual(lp: Loop) -> Self {
        Self::new(lp, Target::Manual, value::<V>)
    }

    /// Bounds the wait by `duration`.
    pub fn within(mut self, duration: Duration) -> Self {
        self.within = Some(duration);
        self
    }

    /// Value returned instead of [`Error::Timeout`] when the deadline wins.
    pub fn timeout_result(mut self, value: V) -> Self {
        self.timeout_result = Some(value);
        self
    }

    /// Parks the current evaluation on the first poll.
    fn arm(&mut self) -> Poll<Result<V>> {
        let eval = self.lp.current();

        if eval.is_concluded() {
            self.done = true;
            return Poll::Ready(Err(Error::Cancelled));
        }

        if eval.state().is_suspended() {
            self.done = true;
            return Poll::Ready(Err(Error::protocol(format!(
                "{} is already suspended in another wait",
                eval.id
            ))));
        }

        if let Target::Conclusion(target) = &self.target {
            if Rc::ptr_eq(target, &eval) {
                self.done = true;
                return Poll::Ready(Err(Error::protocol(
                    "an evaluation cannot await its own result",
                )));
            }

            if target.is_concluded() {
                self.done = true;
                return Poll::Ready((self.extract)(&self.target, Resumption::Ready));
            }
        }

        if let Err(err) = self
            .lp
            .suspend(&eval, &self.target, self.within, TypeId::of::<V>())
        {
            self.done = true;
            return Poll::Ready(Err(err));
        }

        self.armed = Some(Armed {
            eval,
            epoch: self.lp.epoch(),
        });

        Poll::Pending
    }
}

impl<T: Clone + 'static> Wait<T> {
    pub(crate) fn conclusion(lp: Loop, target: Rc<EvalCore>) -> Self {
        Self::new(lp, Target::Conclusion(target), conclusion::<T>)
    }
}

impl<V: 'static> Future for Wait<V> {
    type Output = Result<V>;

    /// Arms the wait on the first poll; afterwards, completes once the loop
    /// has delivered a resumption to the parked evaluation.
    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(Err(Error::protocol("wait polled after completion")));
        }

        let Some(armed) = &this.armed else {
            return this.arm();
        };

        if armed.epoch != this.lp.epoch() {
            this.armed = None;
            this.done = true;
            return Poll::Ready(Err(Error::fatal("loop was reinitialized during the wait")));
        }

        let Some(resumption) = armed.eval.take_mailbox() else {
            return Poll::Pending;
        };

        this.armed = None;
        this.done = true;

        Poll::Ready(match resumption {
            Resumption::TimedOut => this
                .timeout_result
                .take()
                .ok_or(Error::Timeout(this.within.unwrap_or_default())),
            Resumption::Start => Err(Error::fatal("suspended evaluation received a start request")),
            other => (this.extract)(&this.target, other),
        })
    }
}

impl<V> Drop for Wait<V> {
    fn drop(&mut self) {
        if let Some(armed) = self.armed.take() {
            if armed.epoch == self.lp.epoch() {
                self.lp.abandon_wait(&armed.eval);
            }
        }
    }
}

fn unit(_: &Target, _: Resumption) -> Result<()> {
    Ok(())
}

fn value<V: 'static>(_: &Target, resumption: Resumption) -> Result<V> {
    match resumption {
        Resumption::Value(payload) => payload
            .downcast::<V>()
            .map(|v| *v)
            .map_err(|_| Error::protocol("resumed with a value of the wrong type")),
        other => Err(Error::protocol(format!(
            "manual wait resumed with {other:?}"
        ))),
    }
}

/// A manual resume overrides the awaited result for this awaiter only.
fn conclusion<T: Clone + 'static>(target: &Target, resumption: Resumption) -> Result<T> {
    match (resumption, target) {
        (Resumption::Value(payload), _) => value(target, Resumption::Value(payload)),
        (_, Target::Conclusion(core)) => core
            .cloned_result::<T>()
            .unwrap_or_else(|| Err(Error::protocol("awaited evaluation has no result"))),
        _ => Err(Error::protocol("conclusion wait without a target")),
    }
}
