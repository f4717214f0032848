//! Deferred-callback queue backing `setTimeout`/`clearTimeout`.
//!
//! The queue only stores callbacks; it never runs them. The evaluator drains
//! it after the synchronous phase, soonest delay first, stable by arrival
//! for equal delays. Ordering between deferred callbacks is host scheduling
//! behavior, not part of the evaluation contract.

use boa_engine::object::JsObject;

/// One scheduled callback.
#[derive(Debug)]
pub struct TimerJob {
    pub(crate) id: u32,
    pub(crate) delay_ms: f64,
    pub(crate) callback: JsObject,
}

impl TimerJob {
    /// Identifier returned to the evaluated code by `setTimeout`.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Requested delay in milliseconds, clamped to a finite non-negative
    /// value at scheduling time.
    pub fn delay_ms(&self) -> f64 {
        self.delay_ms
    }
}

/// Per-run queue of pending deferred callbacks.
#[derive(Debug, Default)]
pub struct TimerQueue {
    pending: Vec<TimerJob>,
    next_id: u32,
}

impl TimerQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            next_id: 1,
        }
    }

    /// Schedules a callback and returns its timer id.
    pub fn schedule(&mut self, callback: JsObject, delay_ms: f64) -> u32 {
        let delay_ms = if delay_ms.is_finite() && delay_ms > 0.0 {
            delay_ms
        } else {
            0.0
        };
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push(TimerJob {
            id,
            delay_ms,
            callback,
        });
        id
    }

    /// Cancels a pending callback. Returns whether one was removed.
    pub fn cancel(&mut self, id: u32) -> bool {
        match self.pending.iter().position(|job| job.id == id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the next callback to run: the soonest delay,
    /// first-scheduled on ties.
    pub fn take_next(&mut self) -> Option<TimerJob> {
        let mut best: Option<usize> = None;
        for (index, job) in self.pending.iter().enumerate() {
            match best {
                Some(current) if job.delay_ms >= self.pending[current].delay_ms => {}
                _ => best = Some(index),
            }
        }
        best.map(|index| self.pending.remove(index))
    }

    /// Pending callbacks, in arrival order.
    pub fn pending(&self) -> &[TimerJob] {
        &self.pending
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no callbacks are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops all pending callbacks.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{Context, Source};

    fn dummy_callback(context: &mut Context) -> JsObject {
        let value = context
            .eval(Source::from_bytes("(function () {})"))
            .expect("function literal evaluates");
        value.as_callable().expect("function is callable").clone()
    }

    #[test]
    fn schedule_assigns_increasing_ids() {
        let mut context = Context::default();
        let mut queue = TimerQueue::new();

        let first = queue.schedule(dummy_callback(&mut context), 0.0);
        let second = queue.schedule(dummy_callback(&mut context), 0.0);

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn take_next_prefers_soonest_delay() {
        let mut context = Context::default();
        let mut queue = TimerQueue::new();

        let slow = queue.schedule(dummy_callback(&mut context), 50.0);
        let fast = queue.schedule(dummy_callback(&mut context), 0.0);

        assert_eq!(queue.take_next().unwrap().id(), fast);
        assert_eq!(queue.take_next().unwrap().id(), slow);
        assert!(queue.take_next().is_none());
    }

    #[test]
    fn take_next_is_stable_for_equal_delays() {
        let mut context = Context::default();
        let mut queue = TimerQueue::new();

        let first = queue.schedule(dummy_callback(&mut context), 5.0);
        let second = queue.schedule(dummy_callback(&mut context), 5.0);

        assert_eq!(queue.take_next().unwrap().id(), first);
        assert_eq!(queue.take_next().unwrap().id(), second);
    }

    #[test]
    fn negative_and_nan_delays_clamp_to_zero() {
        let mut context = Context::default();
        let mut queue = TimerQueue::new();

        queue.schedule(dummy_callback(&mut context), -10.0);
        queue.schedule(dummy_callback(&mut context), f64::NAN);

        assert!(queue.pending().iter().all(|job| job.delay_ms() == 0.0));
    }

    #[test]
    fn cancel_removes_pending_job() {
        let mut context = Context::default();
        let mut queue = TimerQueue::new();

        let id = queue.schedule(dummy_callback(&mut context), 0.0);

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.is_empty());
    }
}
