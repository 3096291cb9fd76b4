use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::bucket::Bucket;

const NEW: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// The observable lifecycle state of a scheduled task.
///
/// A handle starts at `New` and transitions to exactly one of `Cancelled` or
/// `Expired`, never both, and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not yet cancelled or expired.
    New,
    /// [`TimerHandle::cancel`] won the race; the task body never runs.
    Cancelled,
    /// The worker won the race and ran (or is running) the task body.
    Expired,
}

fn decode(raw: u8) -> TimerState {
    match raw {
        NEW => TimerState::New,
        CANCELLED => TimerState::Cancelled,
        EXPIRED => TimerState::Expired,
        _ => unreachable!("timer state is only ever written as NEW/CANCELLED/EXPIRED"),
    }
}

/// The user-supplied action run at most once, at expiration.
///
/// Modeled as a single-method capability rather than an inheritance chain:
/// the worker needs only `run`, called once per expiring handle.
pub trait Task: Send {
    /// Runs the scheduled action. Any panic is caught by the worker and
    /// routed to the uncaught-task-error hook; it must never propagate into
    /// the worker loop nor stop subsequent bucket entries from running.
    fn run(self: Box<Self>);
}

impl<F> Task for F
where
    F: FnOnce() + Send,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Shared state between the submitter-visible [`TimerHandle`] and the bucket
/// that currently holds it.
///
/// Ownership is split in the style spec.md §9 describes: the submitter holds
/// a `TimerHandle` (an `Arc` clone), and while linked, the owning `Bucket`
/// holds a second `Arc` clone in its intrusive list. The handle is dropped
/// only once both sides have released it. `prev`/`next`/`bucket`/
/// `remaining_rounds` are touched only by the worker thread, per spec.md
/// §3's ownership rule, and so need no synchronization of their own — only
/// `state` is contended and therefore atomic.
pub(crate) struct TimerHandleInner {
    pub(crate) deadline_ns: u64,
    task: Cell<Option<Box<dyn Task>>>,
    state: AtomicU8,
    pub(crate) remaining_rounds: Cell<i64>,
    // `next` holds a strong reference (the bucket owns its members), `prev`
    // a weak one, so a bucket's list is never a reference cycle.
    pub(crate) next: Cell<Option<Arc<TimerHandleInner>>>,
    pub(crate) prev: Cell<Option<Weak<TimerHandleInner>>>,
    pub(crate) bucket: Cell<Option<std::sync::Weak<Bucket>>>,
}

// `Cell`s here are only ever touched from the single worker thread; `Task`
// and `state` are the only fields a submitter thread reads or writes, and
// both are safe to share (state is atomic, task is moved out exactly once
// by the worker under the CAS that grants it the expiration).
unsafe impl Send for TimerHandleInner {}
unsafe impl Sync for TimerHandleInner {}

impl TimerHandleInner {
    pub(crate) fn new(deadline_ns: u64, task: Box<dyn Task>) -> Self {
        Self {
            deadline_ns,
            task: Cell::new(Some(task)),
            state: AtomicU8::new(NEW),
            remaining_rounds: Cell::new(0),
            next: Cell::new(None),
            prev: Cell::new(None),
            bucket: Cell::new(None),
        }
    }

    pub(crate) fn state(&self) -> TimerState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Submitter-side cancellation: NEW -> CANCELLED. Never touches bucket
    /// structure; that is left to the worker draining the cancellation
    /// queue.
    pub(crate) fn try_cancel(&self) -> bool {
        self.state
            .compare_exchange(NEW, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Worker-side expiration attempt: NEW -> EXPIRED. Runs the task body if
    /// (and only if) this call wins the race, reporting any panic to
    /// `on_error` instead of letting it unwind into the worker loop.
    pub(crate) fn expire(&self, on_error: &(dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync)) {
        if self
            .state
            .compare_exchange(NEW, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(task) = self.task.take() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                on_error(payload);
            }
        }
    }
}

impl fmt::Debug for TimerHandleInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandleInner")
            .field("deadline_ns", &self.deadline_ns)
            .field("state", &self.state())
            .finish()
    }
}

/// Submitter-visible handle to a single scheduled task, returned by
/// [`WheelController::submit`](crate::WheelController::submit).
///
/// Cloning a `TimerHandle` is cheap (it is backed by an `Arc`) and every
/// clone observes the same state.
#[derive(Clone)]
pub struct TimerHandle {
    pub(crate) inner: Arc<TimerHandleInner>,
    // Cloned from the controller's own sender so `cancel` can push onto the
    // cancellation queue without going through `WheelController`, per
    // spec.md §4.2: cancel's CAS win and its enqueue onto the cancellation
    // queue are both the handle's own responsibility.
    pub(crate) cancel_tx: flume::Sender<Arc<TimerHandleInner>>,
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").field("inner", &self.inner).finish()
    }
}

impl TimerHandle {
    /// Attempts to cancel this task before it expires.
    ///
    /// Returns `true` if this call won the race against the worker's
    /// expiration attempt — in that case the task body is guaranteed never
    /// to run. Returns `false` if the task had already been cancelled or had
    /// already begun expiring; in the latter case the task may already be
    /// running or finished.
    ///
    /// A winning call pushes this handle onto the wheel's cancellation
    /// queue, so the worker unlinks it from its bucket within a couple of
    /// ticks rather than waiting for that bucket's round counter to reach
    /// zero on its own.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.try_cancel();
        if cancelled {
            let _ = self.cancel_tx.send(self.inner.clone());
        }
        cancelled
    }

    /// The current lifecycle state of this task. This is a volatile read and
    /// may be stale by the time the caller observes it.
    pub fn state(&self) -> TimerState {
        self.inner.state()
    }

    /// The deadline this task was scheduled for, as a nanosecond offset from
    /// the wheel's start instant. Immutable after construction.
    pub fn deadline(&self) -> u64 {
        self.inner.deadline_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop_on_error() -> impl Fn(Box<dyn std::any::Any + Send>) + Send + Sync {
        |_| {}
    }

    #[test]
    fn cancel_before_expire_wins_exclusively() {
        let inner = Arc::new(TimerHandleInner::new(0, Box::new(|| {}) as Box<dyn Task>));
        assert!(inner.try_cancel());
        assert_eq!(inner.state(), TimerState::Cancelled);

        // A subsequent expire attempt must not run the task or flip state.
        inner.expire(&noop_on_error());
        assert_eq!(inner.state(), TimerState::Cancelled);
    }

    #[test]
    fn expire_runs_task_exactly_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        let inner = Arc::new(TimerHandleInner::new(
            0,
            Box::new(move || {
                runs2.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn Task>,
        ));

        inner.expire(&noop_on_error());
        inner.expire(&noop_on_error());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(inner.state(), TimerState::Expired);
    }

    #[test]
    fn cancel_after_expire_loses() {
        let inner = Arc::new(TimerHandleInner::new(0, Box::new(|| {}) as Box<dyn Task>));
        inner.expire(&noop_on_error());
        assert_eq!(inner.state(), TimerState::Expired);
        assert!(!inner.try_cancel());
        assert_eq!(inner.state(), TimerState::Expired);
    }

    #[test]
    fn panicking_task_is_caught_and_reported() {
        let reported = Arc::new(AtomicUsize::new(0));
        let reported2 = reported.clone();
        let inner = Arc::new(TimerHandleInner::new(
            0,
            Box::new(|| panic!("boom")) as Box<dyn Task>,
        ));
        inner.expire(&move |_payload| {
            reported2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert_eq!(inner.state(), TimerState::Expired);
    }
}
