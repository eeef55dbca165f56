use super::state::EvalState;
use crate::error::{Error, Result};
use crate::runtime::core::Loop;
use crate::runtime::pool::ContextId;
use crate::time::wait::Wait;

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;

/// Body future installed in an execution context.
///
/// The output is erased: the body concludes its own evaluation before
/// returning.
pub(crate) type BodyFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Identity of an evaluation, unique for the lifetime of a loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvalId(pub(crate) u64);

impl fmt::Display for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval#{}", self.0)
    }
}

/// Value handed to a suspended evaluation when it is resumed.
pub(crate) enum Resumption {
    /// Start a fresh task body.
    Start,

    /// Resume with an explicit value (timer expiry, manual resume, override).
    Value(Box<dyn Any>),

    /// The watched descriptor or the awaited evaluation is ready.
    Ready,

    /// The `within` deadline fired first.
    TimedOut,
}

impl fmt::Debug for Resumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resumption::Start => f.write_str("Start"),
            Resumption::Value(_) => f.write_str("Value(..)"),
            Resumption::Ready => f.write_str("Ready"),
            Resumption::TimedOut => f.write_str("TimedOut"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    /// The calling context of `block_on`. Never concludes.
    Root,

    /// A task body. `keeps_result` is false for fire-and-forget launches.
    Task { keeps_result: bool },
}

/// Settled outcome of a task evaluation.
enum Outcome {
    Value(Box<dyn Any>),
    Failed(Error),
}

/// Bookkeeping of the suspension primitive an evaluation is parked in.
///
/// Run-queue carts are tracked by the queue itself; these are the other
/// resources that must be released when the wait ends.
#[derive(Default)]
pub(crate) struct WaitTokens {
    pub(crate) reader: Option<RawFd>,
    pub(crate) writer: Option<RawFd>,
    pub(crate) awaiting: Option<Rc<EvalCore>>,

    /// Type a manual resume must deliver.
    pub(crate) expects: Option<TypeId>,
}

/// Shared state behind every evaluation handle.
pub(crate) struct EvalCore {
    pub(crate) id: EvalId,
    pub(crate) kind: Kind,
    pub(crate) proc_name: Option<Rc<str>>,

    state: Cell<EvalState>,
    context: Cell<Option<ContextId>>,

    /// Body of a fresh evaluation waiting for an execution context.
    launch: RefCell<Option<BodyFuture>>,

    /// Last resumption delivered, consumed by the suspension primitive.
    mailbox: RefCell<Option<Resumption>>,

    wait: RefCell<Option<WaitTokens>>,
    outcome: RefCell<Option<Outcome>>,
    awaiting_result: RefCell<Vec<Rc<EvalCore>>>,
    data: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

impl EvalCore {
    pub(crate) fn new(id: EvalId, kind: Kind, proc_name: Option<Rc<str>>) -> Self {
        let state = match kind {
            Kind::Root => EvalState::Running,
            Kind::Task { .. } => EvalState::Fresh,
        };

        Self {
            id,
            kind,
            proc_name,
            state: Cell::new(state),
            context: Cell::new(None),
            launch: RefCell::new(None),
            mailbox: RefCell::new(None),
            wait: RefCell::new(None),
            outcome: RefCell::new(None),
            awaiting_result: RefCell::new(Vec::new()),
            data: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn state(&self) -> EvalState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: EvalState) {
        self.state.set(state);
    }

    pub(crate) fn is_task(&self) -> bool {
        matches!(self.kind, Kind::Task { .. })
    }

    pub(crate) fn is_concluded(&self) -> bool {
        self.state() == EvalState::Concluded
    }

    pub(crate) fn context(&self) -> Option<ContextId> {
        self.context.get()
    }

    pub(crate) fn set_context(&self, id: Option<ContextId>) {
        self.context.set(id);
    }

    pub(crate) fn set_launch(&self, body: BodyFuture) {
        *self.launch.borrow_mut() = Some(body);
    }

    pub(crate) fn take_launch(&self) -> Option<BodyFuture> {
        self.launch.borrow_mut().take()
    }

    pub(crate) fn put_mailbox(&self, resumption: Resumption) {
        *self.mailbox.borrow_mut() = Some(resumption);
    }

    pub(crate) fn take_mailbox(&self) -> Option<Resumption> {
        self.mailbox.borrow_mut().take()
    }

    pub(crate) fn set_wait(&self, tokens: WaitTokens) {
        *self.wait.borrow_mut() = Some(tokens);
    }

    pub(crate) fn take_wait(&self) -> Option<WaitTokens> {
        self.wait.borrow_mut().take()
    }

    pub(crate) fn expected_type(&self) -> Option<TypeId> {
        self.wait.borrow().as_ref().and_then(|w| w.expects)
    }

    pub(crate) fn add_awaiter(&self, awaiter: Rc<EvalCore>) {
        self.awaiting_result.borrow_mut().push(awaiter);
    }

    pub(crate) fn remove_awaiter(&self, id: EvalId) {
        self.awaiting_result.borrow_mut().retain(|a| a.id != id);
    }

    pub(crate) fn take_awaiters(&self) -> Vec<Rc<EvalCore>> {
        std::mem::take(&mut *self.awaiting_result.borrow_mut())
    }

    /// Settles the outcome. The caller guarantees this happens once.
    pub(crate) fn settle<T: 'static>(&self, result: Result<T>) {
        let keeps_result = matches!(self.kind, Kind::Task { keeps_result: true });

        if keeps_result {
            let outcome = match result {
                Ok(value) => Outcome::Value(Box::new(value)),
                Err(err) => Outcome::Failed(err),
            };

            *self.outcome.borrow_mut() = Some(outcome);
        }

        self.set_state(EvalState::Concluded);
    }

    /// Settles with a failure without knowing the result type.
    pub(crate) fn settle_failed(&self, err: Error) {
        *self.outcome.borrow_mut() = Some(Outcome::Failed(err));
        self.set_state(EvalState::Concluded);
    }

    /// Clones the settled result, if any.
    pub(crate) fn cloned_result<T: Clone + 'static>(&self) -> Option<Result<T>> {
        let outcome = self.outcome.borrow();

        match outcome.as_ref()? {
            Outcome::Failed(err) => Some(Err(err.clone())),
            Outcome::Value(value) => Some(
                value
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or_else(|| Error::protocol("result requested with the wrong type")),
            ),
        }
    }

    /// Concludes an evaluation whose loop is being reinitialized.
    ///
    /// Awaiters are not resumed: they belong to the same torn-down loop.
    pub(crate) fn abandon(&self, err: Error) {
        if self.is_concluded() {
            return;
        }

        self.take_launch();
        self.take_mailbox();
        self.take_wait();
        self.awaiting_result.borrow_mut().clear();
        self.set_context(None);

        if self.is_task() {
            self.settle_failed(err);
        } else {
            self.set_state(EvalState::Running);
        }
    }
}

/// Untyped handle to an evaluation.
///
/// This is what [`Loop::current_evaluation`] returns: it can be used to
/// resume the evaluation manually and to reach its attached data.
#[derive(Clone)]
pub struct EvalRef {
    pub(crate) core: Rc<EvalCore>,
    pub(crate) lp: Loop,
}

impl EvalRef {
    pub(crate) fn new(core: Rc<EvalCore>, lp: Loop) -> Self {
        Self { core, lp }
    }

    /// Identity of the evaluation.
    pub fn id(&self) -> EvalId {
        self.core.id
    }

    pub fn state(&self) -> EvalState {
        self.core.state()
    }

    /// `true` while suspended in a suspension primitive.
    pub fn is_waiting(&self) -> bool {
        self.core.state().is_suspended()
    }

    pub fn is_concluded(&self) -> bool {
        self.core.is_concluded()
    }

    /// Name of the proc that launched this evaluation, if it was named.
    pub fn proc_name(&self) -> Option<&str> {
        self.core.proc_name.as_deref()
    }

    /// Resumes the evaluation with `value` on the next loop iteration.
    ///
    /// See [`Loop::resume`].
    pub fn resume<V: 'static>(&self, value: V) -> Result<()> {
        self.lp.resume(self, value)
    }

    /// Attaches a value of type `D`, returning the previous one.
    pub fn insert_data<D: 'static>(&self, value: D) -> Option<D> {
        self.core
            .data
            .borrow_mut()
            .insert(TypeId::of::<D>(), Box::new(value))
            .and_then(|old| old.downcast::<D>().ok())
            .map(|old| *old)
    }

    /// Returns a copy of the attached value of type `D`.
    pub fn data<D: Clone + 'static>(&self) -> Option<D> {
        self.core
            .data
            .borrow()
            .get(&TypeId::of::<D>())
            .and_then(|v| v.downcast_ref::<D>())
            .cloned()
    }

    /// Runs `f` on the attached value of type `D`.
    ///
    /// The data table is borrowed for the duration of `f`; calling back
    /// into this evaluation's data from `f` panics.
    pub fn with_data<D: 'static, R>(&self, f: impl FnOnce(&mut D) -> R) -> Option<R> {
        let mut data = self.core.data.borrow_mut();
        let value = data.get_mut(&TypeId::of::<D>())?.downcast_mut::<D>()?;

        Some(f(value))
    }

    /// Detaches and returns the value of type `D`.
    pub fn remove_data<D: 'static>(&self) -> Option<D> {
        self.core
            .data
            .borrow_mut()
            .remove(&TypeId::of::<D>())
            .and_then(|v| v.downcast::<D>().ok())
            .map(|v| *v)
    }
}

impl fmt::Debug for EvalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalRef")
            .field("id", &self.core.id)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Handle to a task evaluation producing a `T`.
///
/// Returned by [`ConcurrentProc::schedule`](crate::ConcurrentProc::schedule)
/// and by a non-blocking [`attempt`](crate::ConcurrentProc::attempt) whose
/// body suspended. Dropping the handle does **not** cancel the task.
pub struct Evaluation<T> {
    handle: EvalRef,
    _result: PhantomData<fn() -> T>,
}

impl<T> Clone for Evaluation<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _result: PhantomData,
        }
    }
}

impl<T: Clone + 'static> Evaluation<T> {
    pub(crate) fn new(core: Rc<EvalCore>, lp: Loop) -> Self {
        Self {
            handle: EvalRef::new(core, lp),
            _result: PhantomData,
        }
    }

    /// The untyped handle, for manual resumes and attached data.
    pub fn handle(&self) -> &EvalRef {
        &self.handle
    }

    pub fn id(&self) -> EvalId {
        self.handle.id()
    }

    pub fn state(&self) -> EvalState {
        self.handle.state()
    }

    pub fn is_waiting(&self) -> bool {
        self.handle.is_waiting()
    }

    pub fn is_concluded(&self) -> bool {
        self.handle.is_concluded()
    }

    /// Returns the settled result without waiting.
    pub fn result(&self) -> Option<Result<T>> {
        self.handle.core.cloned_result::<T>()
    }

    /// Suspends the current evaluation until this one concludes.
    ///
    /// Awaiting an already concluded evaluation returns its result
    /// immediately; every await observes the same value.
    pub fn await_result(&self) -> Wait<T> {
        Wait::conclusion(self.handle.lp.clone(), self.handle.core.clone())
    }

    /// Concludes the evaluation with `value` from outside its body.
    ///
    /// A suspended body is cancelled and its execution context returned to
    /// the pool. Concluding twice is a protocol error.
    pub fn conclude_to(&self, value: T) -> Result<()> {
        self.handle.lp.conclude(&self.handle.core, Ok(value))
    }
}

impl<T> fmt::Debug for Evaluation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Evaluation").field(&self.handle).finish()
    }
}
