/// Lifecycle state of an evaluation.
///
/// Task evaluations move `Fresh → Running → (Waiting ⇄ Running) → Concluded`.
/// The outer evaluation of a loop only alternates between `Running` and
/// `Waiting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalState {
    /// Created but its body has not been started in an execution context.
    Fresh,

    /// Currently executing, or resumed and about to execute.
    Running,

    /// Suspended inside a suspension primitive.
    Waiting,

    /// Suspended, with a resumption already queued on the run queue.
    ///
    /// A second manual resume is rejected in this state.
    Scheduled,

    /// The result is settled and will never change.
    Concluded,
}

impl EvalState {
    /// `true` while the evaluation sits inside a suspension primitive.
    pub fn is_suspended(self) -> bool {
        matches!(self, EvalState::Waiting | EvalState::Scheduled)
    }
}
