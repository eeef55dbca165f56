use crate::task::evaluation::{EvalCore, Resumption};

use std::rc::Rc;

/// When a cart becomes due.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum When {
    /// On the next drain pass of the immediate track.
    Immediate,

    /// At an absolute clock reading, in seconds.
    At(f64),
}

/// A scheduled resumption.
///
/// Carts are never removed from their track on cancellation; flipping
/// `active` is enough for the drain pass to skip them.
pub(crate) struct Cart {
    /// Evaluation to resume.
    pub(crate) eval: Rc<EvalCore>,

    pub(crate) when: When,

    /// Value delivered on resumption.
    pub(crate) payload: Resumption,

    pub(crate) active: bool,
}

impl Cart {
    pub(crate) fn new(eval: Rc<EvalCore>, when: When, payload: Resumption) -> Self {
        Self {
            eval,
            when,
            payload,
            active: true,
        }
    }

    pub(crate) fn is_deferred(&self) -> bool {
        matches!(self.when, When::At(_))
    }
}
