use super::evaluation::{BodyFuture, EvalCore, Evaluation, Kind, Resumption};
use crate::error::Result;
use crate::runtime::core::Loop;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tracing::trace;

type ProcBody<A, T> = dyn Fn(Loop, A) -> Pin<Box<dyn Future<Output = Result<T>>>>;

/// Outcome of a non-blocking [`ConcurrentProc::attempt`].
#[derive(Debug)]
pub enum Attempt<T> {
    /// The body ran to completion without suspending.
    Done(T),

    /// The body suspended; the evaluation keeps running on the loop.
    Pending(Evaluation<T>),
}

impl<T> Attempt<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Attempt::Done(_))
    }
}

/// A procedure whose invocations run as task evaluations on a [`Loop`].
///
/// The body receives a loop handle and the call arguments and returns a
/// future. Each invocation creates a new evaluation, launched in one of
/// four modes:
///
/// - [`call`](Self::call): run inline, wait for the result,
/// - [`attempt`](Self::attempt): run inline until the first suspension,
/// - [`schedule`](Self::schedule): start on the next loop iteration,
/// - [`spawn`](Self::spawn): like `schedule`, discarding the result.
///
/// A failure of the body is published to the loop's error hook in every
/// mode, and returned to whoever waits for the result.
///
/// # Examples
///
/// ```rust,ignore
/// let double = ConcurrentProc::new(|lp: Loop, x: u32| async move {
///     lp.wait(Duration::from_millis(10)).await?;
///     Ok(x * 2)
/// });
///
/// assert_eq!(double.call_blocking(&lp, 21)?, 42);
/// ```
pub struct ConcurrentProc<A, T> {
    body: Rc<ProcBody<A, T>>,
    name: Option<Rc<str>>,
}

impl<A, T> Clone for ConcurrentProc<A, T> {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
            name: self.name.clone(),
        }
    }
}

impl<A: 'static, T: Clone + 'static> ConcurrentProc<A, T> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(Loop, A) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let body: Rc<ProcBody<A, T>> = Rc::new(move |lp: Loop, args: A| {
            Box::pin(body(lp, args)) as Pin<Box<dyn Future<Output = Result<T>>>>
        });

        Self { body, name: None }
    }

    /// Names the proc; the name shows up in logs and error reports.
    pub fn named(mut self, name: impl Into<Rc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Creates the evaluation of one invocation and its body future.
    fn prepare(&self, lp: &Loop, args: A, keeps_result: bool) -> (Rc<EvalCore>, BodyFuture) {
        let core = lp.new_evaluation(Kind::Task { keeps_result }, self.name.clone());
        let future = (self.body)(lp.clone(), args);

        let handle = lp.clone();
        let eval = Rc::downgrade(&core);

        let body: BodyFuture = Box::pin(async move {
            let result = future.await;

            if let Some(eval) = eval.upgrade() {
                handle.finish(&eval, result);
            }
        });

        (core, body)
    }

    /// Runs the body in the current loop iteration until it first
    /// suspends.
    ///
    /// Returns [`Attempt::Done`] if it completed without suspending, and the
    /// running evaluation otherwise. A failure of an inline completion is
    /// returned directly.
    pub async fn attempt(&self, lp: &Loop, args: A) -> Result<Attempt<T>> {
        let id = lp.take_context().await?;
        let (core, body) = self.prepare(lp, args, true);

        lp.start_in(id, &core, body)?;

        match core.cloned_result::<T>() {
            Some(result) => result.map(Attempt::Done),
            None => Ok(Attempt::Pending(Evaluation::new(core, lp.clone()))),
        }
    }

    /// Runs the body and waits for its result.
    ///
    /// The body starts inline; if it suspends, the caller suspends until
    /// the evaluation concludes.
    pub async fn call(&self, lp: &Loop, args: A) -> Result<T> {
        match self.attempt(lp, args).await? {
            Attempt::Done(value) => Ok(value),
            Attempt::Pending(eval) => eval.await_result().await,
        }
    }

    /// Runs [`call`](Self::call) to completion from outside the loop,
    /// driving the loop in the meantime.
    pub fn call_blocking(&self, lp: &Loop, args: A) -> Result<T> {
        lp.block_on(self.call(lp, args)).and_then(|result| result)
    }

    /// Queues the invocation; the body starts on the next loop iteration.
    pub fn schedule(&self, lp: &Loop, args: A) -> Evaluation<T> {
        let core = self.enqueue(lp, args, true);
        Evaluation::new(core, lp.clone())
    }

    /// Queues the invocation and forgets about it.
    ///
    /// The result is discarded; failures only reach the error hook.
    pub fn spawn(&self, lp: &Loop, args: A) {
        self.enqueue(lp, args, false);
    }

    fn enqueue(&self, lp: &Loop, args: A, keeps_result: bool) -> Rc<EvalCore> {
        let (core, body) = self.prepare(lp, args, keeps_result);

        core.set_launch(body);
        lp.queue()
            .schedule_immediate(&core, Resumption::Start, true);

        trace!(eval = %core.id, proc = self.name(), "scheduled");

        core
    }
}

impl<A, T> fmt::Debug for ConcurrentProc<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentProc")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
