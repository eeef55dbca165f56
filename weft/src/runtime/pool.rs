//! Execution context pool.
//!
//! An execution context is a slot that owns the suspended body of a task
//! evaluation. Contexts are recycled when their evaluation concludes, so a
//! program launching tasks one after the other keeps reusing the same
//! handful of slots.
//!
//! Idle contexts are handed out freely. Creating a new one is limited to
//! `quota` per loop iteration; the allowance is refilled by the driver at
//! the start of every iteration.

use crate::task::evaluation::{BodyFuture, EvalCore};

use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Identity of an execution context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Default)]
struct ExecutionContext {
    /// Suspended body; `None` while idle or while being polled.
    body: Option<BodyFuture>,

    /// Evaluation bound to this context.
    eval: Option<Rc<EvalCore>>,

    idle: bool,
}

pub(crate) struct ContextPool {
    contexts: Vec<ExecutionContext>,

    /// Idle contexts, most recently recycled last.
    free: Vec<ContextId>,

    quota: usize,
    allowance: usize,
}

impl ContextPool {
    pub(crate) fn new(quota: usize) -> Self {
        Self {
            contexts: Vec::new(),
            free: Vec::new(),
            quota,
            allowance: quota,
        }
    }

    /// Takes an idle context, creating one if none is idle.
    ///
    /// Returns `None` when nothing is idle and this iteration's creation
    /// quota is used up. Reusing an idle context is never throttled.
    pub(crate) fn try_take(&mut self) -> Option<ContextId> {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                if self.allowance == 0 {
                    return None;
                }
                self.allowance -= 1;

                let id = ContextId(self.contexts.len() as u32);
                self.contexts.push(ExecutionContext::default());
                trace!(context = %id, "created execution context");
                id
            }
        };

        self.contexts[id.0 as usize].idle = false;

        Some(id)
    }

    /// Binds `eval` and its body to a taken context.
    pub(crate) fn install(&mut self, id: ContextId, eval: Rc<EvalCore>, body: BodyFuture) {
        if let Some(ctx) = self.contexts.get_mut(id.0 as usize) {
            ctx.eval = Some(eval);
            ctx.body = Some(body);
        }
    }

    /// Takes the suspended body out for polling.
    pub(crate) fn take_body(&mut self, id: ContextId) -> Option<BodyFuture> {
        self.contexts.get_mut(id.0 as usize)?.body.take()
    }

    /// Puts a body that is still pending back into its context.
    pub(crate) fn store_body(&mut self, id: ContextId, body: BodyFuture) {
        if let Some(ctx) = self.contexts.get_mut(id.0 as usize) {
            ctx.body = Some(body);
        }
    }

    /// Returns a context to the idle set.
    ///
    /// Any body still stored is handed back so the caller can drop it
    /// outside of the pool borrow.
    pub(crate) fn recycle(&mut self, id: ContextId) -> Option<BodyFuture> {
        let ctx = self.contexts.get_mut(id.0 as usize)?;

        if ctx.idle {
            return None;
        }

        ctx.idle = true;
        ctx.eval = None;
        let body = ctx.body.take();

        self.free.push(id);
        trace!(context = %id, "recycled execution context");

        body
    }

    pub(crate) fn reset_quota(&mut self) {
        self.allowance = self.quota;
    }

    /// Number of contexts ever created.
    pub(crate) fn len(&self) -> usize {
        self.contexts.len()
    }

    pub(crate) fn idle(&self) -> usize {
        self.free.len()
    }

    /// Consumes the pool, returning the bound evaluations and every body
    /// still stored.
    pub(crate) fn into_parts(self) -> (Vec<Rc<EvalCore>>, Vec<BodyFuture>) {
        let mut evals = Vec::new();
        let mut bodies = Vec::new();

        for ctx in self.contexts {
            evals.extend(ctx.eval);
            bodies.extend(ctx.body);
        }

        (evals, bodies)
    }
}
