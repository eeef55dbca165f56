use super::core::Loop;
use super::pool::ContextId;
use crate::task::evaluation::{EvalCore, EvalRef};

use std::cell::RefCell;
use std::rc::Rc;

/// Restores the previously current evaluation, also on unwind.
struct Restore<'a> {
    slot: &'a RefCell<Rc<EvalCore>>,
    prev: Option<Rc<EvalCore>>,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            self.slot.replace(prev);
        }
    }
}

impl Loop {
    /// Runs `f` with `eval` installed as the current evaluation.
    ///
    /// Suspension primitives polled inside `f` park `eval`. After the
    /// closure completes, the previous evaluation is restored.
    pub(crate) fn enter<R>(&self, eval: Rc<EvalCore>, f: impl FnOnce() -> R) -> R {
        let prev = self.shared.current.replace(eval);
        let _restore = Restore {
            slot: &self.shared.current,
            prev: Some(prev),
        };

        f()
    }

    pub(crate) fn current(&self) -> Rc<EvalCore> {
        self.shared.current.borrow().clone()
    }

    /// Handle to the evaluation currently executing.
    ///
    /// Outside of any task this is the loop's outer evaluation, the one
    /// [`block_on`](Self::block_on) runs its future in.
    pub fn current_evaluation(&self) -> EvalRef {
        EvalRef::new(self.current(), self.clone())
    }

    /// Execution context of the current evaluation; `None` outside tasks.
    pub fn current_context(&self) -> Option<ContextId> {
        self.current().context()
    }
}
