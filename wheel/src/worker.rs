use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::handle::TimerHandleInner;
use crate::wheel::Wheel;

/// Upper bound on how many freshly-submitted timers are admitted into the
/// wheel during a single tick, so that a submission burst cannot delay the
/// expiry sweep of the current slot indefinitely.
pub(crate) const DEFAULT_MAX_INGRESS_PER_TICK: usize = 100_000;

pub(crate) const LIFECYCLE_INIT: u8 = 0;
pub(crate) const LIFECYCLE_STARTED: u8 = 1;
pub(crate) const LIFECYCLE_SHUTDOWN: u8 = 2;

/// A freshly submitted timer, as handed from a submitter thread to the
/// worker over the ingress queue.
pub(crate) struct Submission {
    pub(crate) entry: Arc<TimerHandleInner>,
}

pub(crate) struct Worker {
    pub(crate) clock: Arc<dyn Clock>,
    /// `clock.now_ns()` reading taken by the controller before this worker
    /// was spawned. Every deadline carried by a [`Submission`] is a
    /// nanosecond offset from this same instant, so the controller and the
    /// worker must agree on it exactly rather than each capturing their own.
    pub(crate) start_ns: u64,
    pub(crate) tick_duration_ns: u64,
    pub(crate) wheel: Wheel,
    pub(crate) ingress_rx: flume::Receiver<Submission>,
    pub(crate) cancel_rx: flume::Receiver<Arc<TimerHandleInner>>,
    pub(crate) lifecycle: Arc<AtomicU8>,
    pub(crate) on_task_panic: Arc<dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync>,
    pub(crate) max_ingress_per_tick: usize,
}

impl Worker {
    /// Runs the tick-advance loop until [`LIFECYCLE_SHUTDOWN`] is observed.
    /// This is the body of the single dedicated worker thread; it must never
    /// be called from more than one thread at a time.
    pub(crate) fn run(self) {
        let start = self.start_ns;
        let mut current_tick: u64 = 0;

        loop {
            if self.lifecycle.load(Ordering::Acquire) == LIFECYCLE_SHUTDOWN {
                tracing::debug!("worker observed shutdown, stopping");
                return;
            }

            self.wait_for_tick(start, current_tick);

            if self.lifecycle.load(Ordering::Acquire) == LIFECYCLE_SHUTDOWN {
                return;
            }

            self.drain_cancellations();
            self.drain_ingress(current_tick);

            let now_offset = self.clock.now_ns().saturating_sub(start);
            let slot = self.wheel.slot_for(current_tick);
            let due = self.wheel.bucket(slot).expire_due(now_offset);
            tracing::trace!(tick = current_tick, slot, due = due.len(), "tick advance");
            for entry in due {
                self.run_entry(entry);
            }

            current_tick = current_tick.wrapping_add(1);
        }
    }

    fn run_entry(&self, entry: Arc<TimerHandleInner>) {
        let on_error = self.on_task_panic.clone();
        entry.expire(&move |payload| on_error(payload));
    }

    /// Blocks (in bounded slices) until `clock.now_ns() - start` reaches the
    /// deadline of `tick`, or shutdown is requested. Re-checks after every
    /// wake since OS sleeps may return early.
    fn wait_for_tick(&self, start: u64, tick: u64) {
        let target_ns = tick.saturating_add(1).saturating_mul(self.tick_duration_ns);
        loop {
            if self.lifecycle.load(Ordering::Acquire) == LIFECYCLE_SHUTDOWN {
                return;
            }
            let elapsed = self.clock.now_ns().saturating_sub(start);
            if elapsed >= target_ns {
                return;
            }
            let remaining_ns = target_ns - elapsed;
            // Round up to whole milliseconds; a short sleep is cheap to
            // repeat, but sleeping for 0ms would spin the CPU.
            let remaining_ms = (remaining_ns + 999_999) / 1_000_000;
            std::thread::sleep(Duration::from_millis(remaining_ms.max(1)));
        }
    }

    fn drain_cancellations(&self) {
        let mut unlinked = 0u32;
        for entry in self.cancel_rx.try_iter() {
            if let Some(bucket) = entry.bucket.take().and_then(|weak| weak.upgrade()) {
                bucket.remove(&entry);
                unlinked += 1;
            }
        }
        if unlinked > 0 {
            tracing::debug!(unlinked, "drained cancellations");
        }
    }

    fn drain_ingress(&self, current_tick: u64) {
        let width = self.wheel.width() as u64;
        let mut admitted = 0usize;
        for submission in self.ingress_rx.try_iter().take(self.max_ingress_per_tick) {
            admitted += 1;
            let entry = submission.entry;
            if entry.state() != crate::handle::TimerState::New {
                // Cancelled between submission and ingestion; drop it
                // without ever linking it into a bucket.
                continue;
            }
            let calculated_tick = entry.deadline_ns / self.tick_duration_ns;
            let placement_tick = calculated_tick.max(current_tick);
            let remaining_rounds = placement_tick.saturating_sub(current_tick) / width;
            entry.remaining_rounds.set(remaining_rounds as i64);

            let slot = self.wheel.slot_for(placement_tick);
            let bucket = self.wheel.bucket(slot);
            tracing::trace!(slot, remaining_rounds, "placed timer");
            bucket.add(Arc::downgrade(bucket), entry);
        }
        if admitted >= self.max_ingress_per_tick {
            tracing::warn!(
                max = self.max_ingress_per_tick,
                "ingestion batch bound reached this tick; remaining submissions deferred to next tick"
            );
        }
    }
}

/// Default panic hook: logs the panic payload via `tracing` and otherwise
/// swallows it. Installed unless the caller supplies their own via
/// [`crate::WheelBuilder::on_task_panic`].
pub(crate) fn log_task_panic(payload: Box<dyn std::any::Any + Send>) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked with a non-string payload".to_string());
    tracing::error!(message, "scheduled task panicked");
}
