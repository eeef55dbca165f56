use super::builder::{Config, LoopBuilder};
use super::pool::{ContextId, ContextPool};
use super::queue::RunQueue;
use crate::error::{Error, Result, TaskError};
use crate::reactor::watcher::{Direction, ReadinessWatcher};
use crate::task::evaluation::{BodyFuture, EvalCore, EvalId, EvalRef, Kind, Resumption};
use crate::task::state::EvalState;
use crate::time::Clock;

use std::any::{Any, TypeId, type_name};
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::future::Future;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, error, trace};

/// State shared by every handle to one loop.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) clock: Clock,

    pub(crate) queue: RefCell<RunQueue>,
    pub(crate) watcher: RefCell<ReadinessWatcher>,
    pub(crate) pool: RefCell<ContextPool>,

    /// The outer evaluation `block_on` runs its future in.
    pub(crate) root: Rc<EvalCore>,

    /// Evaluation whose code is executing right now.
    pub(crate) current: RefCell<Rc<EvalCore>>,

    /// Bumped on every reinitialization; waits armed under an older epoch
    /// no longer own anything.
    pub(crate) epoch: Cell<u64>,

    /// Fatal error waiting to be turned into a teardown.
    pub(crate) poisoned: RefCell<Option<Error>>,

    pub(crate) in_block_on: Cell<bool>,
    pub(crate) next_eval: Cell<u64>,
}

/// A cooperative, single-threaded event loop.
///
/// `Loop` is a cheap handle; clones share the same loop. It owns:
/// - the run queue of pending resumptions (immediate and deferred),
/// - the readiness watcher for file descriptors,
/// - the pool of execution contexts task bodies run in.
///
/// All code runs on the thread that drives the loop. Evaluations only
/// switch at suspension points, so nothing here needs to be `Send`.
///
/// # Examples
///
/// ```rust,ignore
/// let lp = Loop::new()?;
///
/// let answer = lp.block_on({
///     let lp = lp.clone();
///     async move {
///         lp.wait(Duration::from_millis(10)).await?;
///         Ok::<_, weft::Error>(42)
///     }
/// })??;
/// ```
#[derive(Clone)]
pub struct Loop {
    pub(crate) shared: Rc<Shared>,
}

/// Resets the re-entrancy flag of `block_on`.
struct BlockOnGuard<'a>(&'a Cell<bool>);

impl Drop for BlockOnGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>")
}

impl Loop {
    /// Creates a loop with the default configuration.
    pub fn new() -> Result<Self> {
        LoopBuilder::new().build()
    }

    /// Returns a [`LoopBuilder`] to configure a new loop.
    pub fn builder() -> LoopBuilder {
        LoopBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        let clock = Clock::new();
        let watcher = ReadinessWatcher::new(config.event_capacity)?;
        let root = Rc::new(EvalCore::new(EvalId(0), Kind::Root, None));

        debug!(?config, "loop created");

        Ok(Self {
            shared: Rc::new(Shared {
                queue: RefCell::new(RunQueue::new(clock, config.linear_scan_threshold)),
                watcher: RefCell::new(watcher),
                pool: RefCell::new(ContextPool::new(config.context_quota)),
                current: RefCell::new(root.clone()),
                root,
                epoch: Cell::new(0),
                poisoned: RefCell::new(None),
                in_block_on: Cell::new(false),
                next_eval: Cell::new(1),
                clock,
                config,
            }),
        })
    }

    /// Seconds elapsed on the loop's monotonic clock.
    pub fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    pub fn clock(&self) -> Clock {
        self.shared.clock
    }

    pub(crate) fn queue(&self) -> RefMut<'_, RunQueue> {
        self.shared.queue.borrow_mut()
    }

    pub(crate) fn watcher(&self) -> RefMut<'_, ReadinessWatcher> {
        self.shared.watcher.borrow_mut()
    }

    pub(crate) fn pool(&self) -> RefMut<'_, ContextPool> {
        self.shared.pool.borrow_mut()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.shared.epoch.get()
    }

    pub(crate) fn is_same(&self, other: &Loop) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn new_evaluation(&self, kind: Kind, proc_name: Option<Rc<str>>) -> Rc<EvalCore> {
        let id = self.shared.next_eval.get();
        self.shared.next_eval.set(id + 1);

        Rc::new(EvalCore::new(EvalId(id), kind, proc_name))
    }

    /// `true` while any evaluation waits for descriptor readiness.
    pub fn is_awaiting_io(&self) -> bool {
        self.shared.watcher.borrow().is_awaiting()
    }

    /// `true` while some evaluation waits for `fd` to become readable.
    pub fn is_watching_readable(&self, fd: RawFd) -> bool {
        self.shared.watcher.borrow().is_watching(fd, Direction::Read)
    }

    /// `true` while some evaluation waits for `fd` to become writable.
    pub fn is_watching_writable(&self, fd: RawFd) -> bool {
        self.shared.watcher.borrow().is_watching(fd, Direction::Write)
    }

    /// Stops watching `fd` for readability.
    ///
    /// The evaluation that was waiting stays suspended; it can still be
    /// resumed manually, by its deadline, or concluded.
    pub fn cancel_reader(&self, fd: RawFd) -> Result<()> {
        let removed = self.watcher().cancel_reader(fd)?;

        if let Some(eval) = removed {
            debug!(fd, eval = %eval.id, "reader cancelled");
        }

        Ok(())
    }

    /// Stops watching `fd` for writability. See [`cancel_reader`](Self::cancel_reader).
    pub fn cancel_writer(&self, fd: RawFd) -> Result<()> {
        let removed = self.watcher().cancel_writer(fd)?;

        if let Some(eval) = removed {
            debug!(fd, eval = %eval.id, "writer cancelled");
        }

        Ok(())
    }

    /// Number of execution contexts created so far.
    pub fn context_count(&self) -> usize {
        self.shared.pool.borrow().len()
    }

    /// Number of execution contexts currently idle in the pool.
    pub fn idle_context_count(&self) -> usize {
        self.shared.pool.borrow().idle()
    }

    /// Number of resumptions queued and still active.
    pub fn pending_resumptions(&self) -> usize {
        self.shared.queue.borrow().pending()
    }

    /// Resumes a waiting evaluation with `value` on the next loop iteration.
    ///
    /// The evaluation must be suspended, and the suspension primitive must
    /// accept a `V`: a [`wait_resume::<V>`](Self::wait_resume) wait, a
    /// result wait for a `V`, or a `()` for the other primitives. Resuming
    /// an evaluation that is running, already resumed, or concluded is a
    /// protocol error.
    pub fn resume<V: 'static>(&self, eval: &EvalRef, value: V) -> Result<()> {
        if !self.is_same(&eval.lp) {
            return Err(Error::protocol("evaluation belongs to another loop"));
        }

        let core = &eval.core;

        if core.state() != EvalState::Waiting {
            return Err(Error::protocol(format!(
                "cannot resume {}: it is {:?}, not waiting",
                core.id,
                core.state()
            )));
        }

        if core.expected_type() != Some(TypeId::of::<V>()) {
            return Err(Error::protocol(format!(
                "cannot resume {} with a `{}`",
                core.id,
                type_name::<V>()
            )));
        }

        debug!(eval = %core.id, "manual resume");
        self.schedule_resume(core, Resumption::Value(Box::new(value)));

        Ok(())
    }

    /// Queues `resumption` for a suspended evaluation.
    pub(crate) fn schedule_resume(&self, eval: &Rc<EvalCore>, resumption: Resumption) {
        self.release_wait(eval);
        eval.set_state(EvalState::Scheduled);
        self.queue().schedule_immediate(eval, resumption, true);
    }

    /// Delivers a claimed resumption.
    pub(crate) fn deliver(&self, eval: &Rc<EvalCore>, resumption: Resumption) -> Result<()> {
        match eval.state() {
            EvalState::Fresh => {
                return match resumption {
                    Resumption::Start => self.launch(eval),
                    other => Err(Error::fatal(format!(
                        "{} resumed with {other:?} before it started",
                        eval.id
                    ))),
                };
            }
            EvalState::Concluded => {
                trace!(eval = %eval.id, ?resumption, "resumption dropped, evaluation concluded");
                return Ok(());
            }
            EvalState::Running => {
                return Err(Error::fatal(format!(
                    "cannot resume {}: it is not suspended",
                    eval.id
                )));
            }
            EvalState::Waiting | EvalState::Scheduled => {}
        }

        trace!(eval = %eval.id, ?resumption, "delivering");

        self.release_wait(eval);
        eval.set_state(EvalState::Running);
        eval.put_mailbox(resumption);

        match eval.context() {
            Some(id) => self.run_context(id, eval),
            None if !eval.is_task() => Ok(()),
            None => Err(Error::fatal(format!(
                "cannot resume {}: it has no execution context",
                eval.id
            ))),
        }
    }

    /// Starts a scheduled evaluation, or puts it back in line while no
    /// context is idle and this iteration's creation quota is used up.
    fn launch(&self, eval: &Rc<EvalCore>) -> Result<()> {
        let taken = self.pool().try_take();

        let Some(id) = taken else {
            trace!(eval = %eval.id, "context quota exhausted, start postponed");
            self.queue()
                .schedule_immediate(eval, Resumption::Start, true);
            return Ok(());
        };

        let Some(body) = eval.take_launch() else {
            self.recycle(id, eval);
            return Err(Error::fatal(format!("{} has no body to start", eval.id)));
        };

        self.start_in(id, eval, body)
    }

    /// Binds `eval` to context `id` and runs its body until it first
    /// suspends or finishes.
    pub(crate) fn start_in(&self, id: ContextId, eval: &Rc<EvalCore>, body: BodyFuture) -> Result<()> {
        debug!(eval = %eval.id, context = %id, proc = eval.proc_name.as_deref(), "starting evaluation");

        eval.set_context(Some(id));
        eval.set_state(EvalState::Running);
        self.pool().install(id, eval.clone(), body);

        self.run_context(id, eval)
    }

    /// Polls the body stored in context `id` with `eval` as the current
    /// evaluation.
    pub(crate) fn run_context(&self, id: ContextId, eval: &Rc<EvalCore>) -> Result<()> {
        let taken = self.pool().take_body(id);

        let Some(mut body) = taken else {
            return Err(Error::fatal(format!(
                "cannot resume {id}: no suspended body for {}",
                eval.id
            )));
        };

        let mut cx = Context::from_waker(Waker::noop());

        let polled = self.enter(eval.clone(), || {
            panic::catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)))
        });

        match polled {
            Ok(Poll::Pending) if eval.is_concluded() => {
                drop(body);
                self.recycle(id, eval);
            }
            Ok(Poll::Pending) if !eval.state().is_suspended() => {
                drop(body);
                self.recycle(id, eval);

                let err = Error::protocol(format!(
                    "{} is pending outside of a suspension primitive",
                    eval.id
                ));
                self.publish(eval, &err);
                eval.settle_failed(err);
                self.wake_awaiters(eval);
            }
            Ok(Poll::Pending) => self.pool().store_body(id, body),
            Ok(Poll::Ready(())) => {
                drop(body);
                self.recycle(id, eval);
            }
            Err(payload) => {
                let err = Error::fatal(format!(
                    "{} panicked: {}",
                    eval.id,
                    panic_message(&*payload)
                ));

                drop(body);
                self.recycle(id, eval);

                if !eval.is_concluded() {
                    self.publish(eval, &err);
                    eval.settle_failed(err.clone());
                    self.wake_awaiters(eval);
                }

                self.poison(err);
            }
        }

        Ok(())
    }

    fn recycle(&self, id: ContextId, eval: &EvalCore) {
        eval.set_context(None);

        let leftover = self.pool().recycle(id);
        drop(leftover);
    }

    /// Settles the result a task body returned.
    pub(crate) fn finish<T: 'static>(&self, eval: &Rc<EvalCore>, result: Result<T>) {
        if eval.is_concluded() {
            trace!(eval = %eval.id, "body result discarded, evaluation already concluded");
            return;
        }

        match &result {
            Ok(_) => trace!(eval = %eval.id, "body finished"),
            Err(err) => {
                debug!(eval = %eval.id, error = %err, "body failed");

                if err.is_fatal() {
                    self.poison(err.clone());
                }
                self.publish(eval, err);
            }
        }

        eval.settle(result);
        self.wake_awaiters(eval);
    }

    /// Concludes `eval` from outside its body.
    ///
    /// A fresh evaluation never starts; a suspended one has its body
    /// dropped and its context recycled. An evaluation concluding itself
    /// keeps running until its next suspension primitive, which fails with
    /// [`Error::Cancelled`].
    pub(crate) fn conclude<T: 'static>(&self, eval: &Rc<EvalCore>, result: Result<T>) -> Result<()> {
        if eval.is_concluded() {
            return Err(Error::protocol(format!("{} is already concluded", eval.id)));
        }

        if !eval.is_task() {
            return Err(Error::protocol("the outer evaluation cannot be concluded"));
        }

        debug!(eval = %eval.id, state = ?eval.state(), "concluding evaluation");

        let suspended = eval
            .context()
            .and_then(|id| self.pool().take_body(id).map(|body| (id, body)));
        let launch = eval.take_launch();

        self.release_wait(eval);
        self.queue().cancel(eval.id, false);

        eval.settle(result);
        self.wake_awaiters(eval);

        drop(launch);

        if let Some((id, body)) = suspended {
            drop(body);
            self.recycle(id, eval);
        }

        Ok(())
    }

    /// Queues a resumption for every evaluation awaiting `eval`'s result.
    fn wake_awaiters(&self, eval: &EvalCore) {
        for awaiter in eval.take_awaiters() {
            if awaiter.state().is_suspended() {
                trace!(eval = %awaiter.id, awaited = %eval.id, "result ready");
                self.schedule_resume(&awaiter, Resumption::Ready);
            }
        }
    }

    fn publish(&self, eval: &EvalCore, error: &Error) {
        let report = TaskError {
            evaluation: eval.id,
            proc_name: eval.proc_name.as_deref().map(str::to_owned),
            error: error.clone(),
        };

        (self.shared.config.on_task_error)(&report);
    }

    /// Records a fatal error; the loop tears down at its next safe point.
    pub(crate) fn poison(&self, err: Error) {
        let mut poisoned = self.shared.poisoned.borrow_mut();

        if poisoned.is_none() {
            *poisoned = Some(err);
        }
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.shared.poisoned.borrow().is_some()
    }

    pub(crate) fn take_poison(&self) -> Option<Error> {
        self.shared.poisoned.borrow_mut().take()
    }

    /// Runs `future` to completion as the outer evaluation, driving the
    /// loop whenever it suspends.
    ///
    /// This is the synchronous entry point of the loop (e.g. in `main` or
    /// tests). It is not re-entrant and cannot be called from a task.
    ///
    /// If a fatal error occurs, the loop is reinitialized: every pending
    /// evaluation is abandoned, every registration dropped, and the error
    /// is returned wrapped in [`Error::LoopTeardown`]. The loop stays
    /// usable afterwards.
    ///
    /// A panic in `future` itself propagates to the caller.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        if self.current().is_task() {
            return Err(Error::protocol("block_on called from inside a task"));
        }

        if self.shared.in_block_on.replace(true) {
            return Err(Error::protocol("block_on is not re-entrant"));
        }
        let _reset = BlockOnGuard(&self.shared.in_block_on);

        let root = self.shared.root.clone();
        let mut future = pin!(future);
        let mut cx = Context::from_waker(Waker::noop());

        loop {
            let polled = self.enter(root.clone(), || future.as_mut().poll(&mut cx));

            if let Some(err) = self.take_poison() {
                return Err(self.teardown(err));
            }

            if let Poll::Ready(output) = polled {
                return Ok(output);
            }

            if !root.state().is_suspended() {
                return Err(Error::protocol(
                    "outer future is pending outside of a suspension primitive",
                ));
            }

            while root.state().is_suspended() {
                self.run_once()?;
            }
        }
    }

    /// Reinitializes the loop after a fatal error.
    ///
    /// Returns the error to hand to whoever triggered it.
    pub(crate) fn teardown(&self, err: Error) -> Error {
        error!(error = %err, "fatal loop error, reinitializing");

        self.shared.epoch.set(self.epoch() + 1);

        let config = &self.shared.config;
        let queue = self.shared.queue.replace(RunQueue::new(
            self.shared.clock,
            config.linear_scan_threshold,
        ));
        let pool = self
            .shared
            .pool
            .replace(ContextPool::new(config.context_quota));
        self.watcher().clear();
        self.shared.poisoned.replace(None);

        let reason = Error::LoopTeardown(Box::new(err));

        let root = self.shared.root.clone();
        root.abandon(reason.clone());
        self.shared.current.replace(root);

        let (evals, bodies) = pool.into_parts();
        let abandoned = evals.len();

        for eval in evals.into_iter().chain(queue.into_evaluations()) {
            eval.abandon(reason.clone());
        }

        drop(bodies);

        debug!(abandoned, epoch = self.epoch(), "loop reinitialized");

        reason
    }
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("epoch", &self.epoch())
            .field("contexts", &self.context_count())
            .field("pending", &self.pending_resumptions())
            .field("stored", &self.shared.queue.borrow().stored())
            .finish()
    }
}
