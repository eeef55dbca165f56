//! The run queue.
//!
//! Pending resumptions ("carts") live in a generational arena and are
//! referenced from two tracks: the immediate track (FIFO, drained once per
//! loop iteration) and the deferred track (ordered by wake time, stable
//! among equal times). Cancelling only flips a cart's `active` flag; the
//! drain pass discards inactive carts when it reaches them.

mod cart;
mod track;

use cart::{Cart, When};
use track::{DeferredTrack, ImmediateTrack};

use crate::task::evaluation::{EvalCore, EvalId, Resumption};
use crate::time::clock::Clock;
use crate::utils::{Key, Slab};

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

/// Handle to a scheduled cart.
pub(crate) type CartKey = Key;

pub(crate) struct RunQueue {
    clock: Clock,

    /// Arena owning every cart still referenced by a track.
    carts: Slab<Cart>,

    immediate: ImmediateTrack,
    deferred: DeferredTrack,

    /// Cancellable carts per evaluation.
    cancellable: HashMap<EvalId, Vec<CartKey>>,
}

impl RunQueue {
    pub(crate) fn new(clock: Clock, linear_scan_threshold: usize) -> Self {
        Self {
            clock,
            carts: Slab::new(64),
            immediate: ImmediateTrack::default(),
            deferred: DeferredTrack::new(linear_scan_threshold),
            cancellable: HashMap::new(),
        }
    }

    /// Schedules `eval` to be resumed with `payload` on the next drain pass.
    ///
    /// A cancellable cart supersedes any immediate cart still active for the
    /// same evaluation.
    pub(crate) fn schedule_immediate(
        &mut self,
        eval: &Rc<EvalCore>,
        payload: Resumption,
        cancellable: bool,
    ) -> CartKey {
        if cancellable {
            self.deactivate(eval.id, |cart| !cart.is_deferred());
        }

        let key = self
            .carts
            .insert(Cart::new(eval.clone(), When::Immediate, payload));

        self.immediate.push(key);

        if cancellable {
            self.cancellable.entry(eval.id).or_default().push(key);
        }

        key
    }

    /// Schedules `eval` to be resumed with `payload` once `delay` elapsed.
    pub(crate) fn schedule_deferred(
        &mut self,
        eval: &Rc<EvalCore>,
        delay: Duration,
        payload: Resumption,
    ) -> CartKey {
        let at = self.clock.now() + delay.as_secs_f64();
        self.schedule_at(eval, at, payload)
    }

    /// Schedules `eval` at an absolute clock reading.
    pub(crate) fn schedule_at(
        &mut self,
        eval: &Rc<EvalCore>,
        at: f64,
        payload: Resumption,
    ) -> CartKey {
        let key = self.carts.insert(Cart::new(eval.clone(), When::At(at), payload));

        self.deferred.insert(at, key);
        self.cancellable.entry(eval.id).or_default().push(key);

        key
    }

    /// Deactivates the carts of `eval`; with `only_if_deferred`, immediate
    /// carts are left alone. Idempotent.
    pub(crate) fn cancel(&mut self, eval: EvalId, only_if_deferred: bool) -> usize {
        if only_if_deferred {
            self.deactivate(eval, Cart::is_deferred)
        } else {
            self.deactivate(eval, |_| true)
        }
    }

    fn deactivate(&mut self, eval: EvalId, mut matches: impl FnMut(&Cart) -> bool) -> usize {
        let Some(keys) = self.cancellable.get_mut(&eval) else {
            return 0;
        };

        let mut cancelled = 0;

        keys.retain(|&key| match self.carts.get_mut(key) {
            Some(cart) if matches(&*cart) => {
                if cart.active {
                    cart.active = false;
                    cancelled += 1;
                }
                false
            }
            Some(_) => true,
            None => false,
        });

        if keys.is_empty() {
            self.cancellable.remove(&eval);
        }

        cancelled
    }

    /// Seconds until the next resumption is due.
    ///
    /// `0.0` if the immediate track holds anything, `f64::INFINITY` if
    /// nothing is pending. Inactive carts at the head of the deferred track
    /// are pruned on the way.
    pub(crate) fn waiting_time(&mut self) -> f64 {
        if !self.immediate.is_empty() {
            return 0.0;
        }

        while let Some((at, key)) = self.deferred.peek() {
            let active = self.carts.get(key).is_some_and(|cart| cart.active);

            if active {
                return (at - self.clock.now()).max(0.0);
            }

            self.deferred.pop();
            self.carts.remove(key);
        }

        f64::INFINITY
    }

    /// Takes every cart due now: the whole immediate track, then the due
    /// part of the deferred track in wake-time order.
    ///
    /// Carts are only claimed one by one through [`claim`](Self::claim), so
    /// a cart cancelled while the batch is being processed is still skipped.
    pub(crate) fn take_pending(&mut self) -> Vec<CartKey> {
        let mut batch = self.immediate.take();
        batch.extend(self.deferred.pop_due(self.clock.now()));
        batch
    }

    /// Removes a cart taken by [`take_pending`](Self::take_pending).
    ///
    /// Returns its evaluation and payload if it was still active.
    pub(crate) fn claim(&mut self, key: CartKey) -> Option<(Rc<EvalCore>, Resumption)> {
        let cart = self.carts.remove(key)?;

        if let When::At(at) = cart.when {
            trace!(eval = %cart.eval.id, late = self.clock.now() - at, "deferred cart due");
        }

        if let Some(keys) = self.cancellable.get_mut(&cart.eval.id) {
            keys.retain(|&k| k != key);

            if keys.is_empty() {
                self.cancellable.remove(&cart.eval.id);
            }
        }

        cart.active.then_some((cart.eval, cart.payload))
    }

    /// Number of active carts.
    pub(crate) fn pending(&self) -> usize {
        self.immediate
            .iter()
            .chain(self.deferred.iter())
            .filter(|&key| self.carts.get(key).is_some_and(|cart| cart.active))
            .count()
    }

    /// Number of carts still stored, active or not.
    pub(crate) fn stored(&self) -> usize {
        self.carts.len()
    }

    /// Evaluations referenced by active carts, consuming the queue.
    pub(crate) fn into_evaluations(mut self) -> Vec<Rc<EvalCore>> {
        let keys: Vec<_> = self
            .immediate
            .take()
            .into_iter()
            .chain(self.deferred.pop_due(f64::INFINITY))
            .collect();

        keys.into_iter()
            .filter_map(|key| self.carts.remove(key))
            .filter(|cart| cart.active)
            .map(|cart| cart.eval)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::evaluation::Kind;

    fn eval(id: u64) -> Rc<EvalCore> {
        Rc::new(EvalCore::new(
            EvalId(id),
            Kind::Task { keeps_result: true },
            None,
        ))
    }

    fn queue() -> RunQueue {
        RunQueue::new(Clock::new(), 4)
    }

    fn drain(queue: &mut RunQueue) -> Vec<EvalId> {
        queue
            .take_pending()
            .into_iter()
            .filter_map(|key| queue.claim(key))
            .map(|(eval, _)| eval.id)
            .collect()
    }

    #[test]
    fn empty_queue_waits_forever() {
        let mut queue = queue();

        assert_eq!(queue.waiting_time(), f64::INFINITY);
    }

    #[test]
    fn immediate_carts_run_in_order() {
        let mut queue = queue();
        let (a, b) = (eval(1), eval(2));

        queue.schedule_immediate(&a, Resumption::Ready, true);
        queue.schedule_immediate(&b, Resumption::Ready, true);

        assert_eq!(queue.waiting_time(), 0.0);
        assert_eq!(drain(&mut queue), vec![EvalId(1), EvalId(2)]);
        assert_eq!(queue.waiting_time(), f64::INFINITY);
    }

    #[test]
    fn deferred_carts_fire_in_time_order_and_skip_cancelled() {
        let mut queue = queue();
        let (a, b, c) = (eval(1), eval(2), eval(3));

        queue.schedule_at(&c, 0.0003, Resumption::Ready);
        queue.schedule_at(&a, 0.0001, Resumption::Ready);
        queue.schedule_at(&b, 0.0002, Resumption::Ready);

        assert_eq!(queue.cancel(b.id, false), 1);
        assert_eq!(queue.cancel(b.id, false), 0);

        std::thread::sleep(Duration::from_millis(1));

        assert_eq!(drain(&mut queue), vec![EvalId(1), EvalId(3)]);
        assert_eq!(queue.stored(), 0);
    }

    #[test]
    fn waiting_time_skips_inactive_head() {
        let mut queue = queue();
        let (a, b) = (eval(1), eval(2));

        queue.schedule_at(&a, 1.0, Resumption::Ready);
        queue.schedule_at(&b, 3600.0, Resumption::Ready);
        queue.cancel(a.id, false);

        let wait = queue.waiting_time();

        assert!(wait > 3000.0 && wait <= 3600.0);
        assert_eq!(queue.stored(), 1);
    }

    #[test]
    fn only_if_deferred_keeps_immediate_cart() {
        let mut queue = queue();
        let a = eval(1);

        queue.schedule_immediate(&a, Resumption::Ready, true);
        queue.schedule_deferred(&a, Duration::from_secs(60), Resumption::TimedOut);

        assert_eq!(queue.cancel(a.id, true), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(drain(&mut queue), vec![EvalId(1)]);
    }

    #[test]
    fn rescheduling_supersedes_previous_immediate_cart() {
        let mut queue = queue();
        let a = eval(1);

        queue.schedule_immediate(&a, Resumption::Ready, true);
        queue.schedule_immediate(&a, Resumption::TimedOut, true);

        let resumed: Vec<_> = queue
            .take_pending()
            .into_iter()
            .filter_map(|key| queue.claim(key))
            .collect();

        assert_eq!(resumed.len(), 1);
        assert!(matches!(resumed[0].1, Resumption::TimedOut));
    }

    #[test]
    fn non_cancellable_cart_survives_cancel() {
        let mut queue = queue();
        let a = eval(1);

        queue.schedule_immediate(&a, Resumption::Start, false);

        assert_eq!(queue.cancel(a.id, false), 0);
        assert_eq!(drain(&mut queue), vec![EvalId(1)]);
    }

    #[test]
    fn carts_scheduled_during_drain_wait_for_next_pass() {
        let mut queue = queue();
        let a = eval(1);

        queue.schedule_immediate(&a, Resumption::Ready, true);

        let batch = queue.take_pending();
        queue.schedule_immediate(&a, Resumption::Ready, true);

        let first: Vec<_> = batch.into_iter().filter_map(|k| queue.claim(k)).collect();

        // The re-schedule superseded the cart of the running batch.
        assert!(first.is_empty());
        assert_eq!(drain(&mut queue), vec![EvalId(1)]);
    }
}
