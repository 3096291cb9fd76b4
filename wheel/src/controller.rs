use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::handle::{Task, TimerHandle, TimerHandleInner};
use crate::wheel::Wheel;
use crate::worker::{log_task_panic, Submission, Worker, LIFECYCLE_INIT, LIFECYCLE_SHUTDOWN, LIFECYCLE_STARTED};
use crate::Result;

/// A duration unit, used both for a wheel's tick resolution and for a
/// [`WheelController::submit`] delay. Mirrors the granularities the
/// original Java `AsTimeWheel` exposed, since callers porting from it expect
/// to pick the same units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Whole seconds.
    Seconds,
}

impl TimeUnit {
    fn to_nanos(self, amount: u64) -> u64 {
        match self {
            TimeUnit::Nanoseconds => amount,
            TimeUnit::Microseconds => amount.saturating_mul(1_000),
            TimeUnit::Milliseconds => amount.saturating_mul(1_000_000),
            TimeUnit::Seconds => amount.saturating_mul(1_000_000_000),
        }
    }
}

/// Builds a [`WheelController`].
///
/// Defaults to a 512-slot wheel ticking every 100ms (matching Netty's
/// `HashedWheelTimer` defaults), a [`SystemClock`], and a panic hook that
/// logs via `tracing` and otherwise discards the panic.
pub struct WheelBuilder {
    tick_duration_ns: u64,
    wheel_size: usize,
    clock: Arc<dyn Clock>,
    on_task_panic: Arc<dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync>,
    thread_name: String,
    worker_cpu: Option<Vec<usize>>,
    max_ingress_per_tick: usize,
    worker_span: Option<tracing::Span>,
}

impl Default for WheelBuilder {
    fn default() -> Self {
        Self {
            tick_duration_ns: TimeUnit::Milliseconds.to_nanos(100),
            wheel_size: 512,
            clock: Arc::new(SystemClock::new()),
            on_task_panic: Arc::new(log_task_panic),
            thread_name: "wheel-worker".to_string(),
            worker_cpu: None,
            max_ingress_per_tick: crate::worker::DEFAULT_MAX_INGRESS_PER_TICK,
            worker_span: None,
        }
    }
}

impl WheelBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the duration of a single tick. Must be greater than zero; a zero
    /// value is rejected by [`WheelBuilder::build`], not silently clamped.
    pub fn tick_duration(mut self, amount: u64, unit: TimeUnit) -> Self {
        self.tick_duration_ns = unit.to_nanos(amount);
        self
    }

    /// Sets the number of slots in the wheel's backing array. Rounded up to
    /// the next power of two.
    pub fn wheel_size(mut self, size: usize) -> Self {
        self.wheel_size = size;
        self
    }

    /// Supplies a custom [`Clock`], e.g. a deterministic fake for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Names the dedicated worker thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Installs a hook invoked whenever a scheduled task panics, instead of
    /// the default `tracing`-based logger. Must not panic itself; a panic
    /// here would unwind into the worker loop.
    pub fn on_task_panic<F>(mut self, hook: F) -> Self
    where
        F: Fn(Box<dyn std::any::Any + Send>) + Send + Sync + 'static,
    {
        self.on_task_panic = Arc::new(hook);
        self
    }

    /// Pins the worker thread to the given CPU set before it enters its run
    /// loop. Only has an effect on unix targets built with the `utils`
    /// feature (enabled by default); elsewhere the option is accepted and
    /// ignored, with a one-time warning logged when the wheel starts.
    pub fn cpu_affinity(mut self, cpus: Vec<usize>) -> Self {
        self.worker_cpu = Some(cpus);
        self
    }

    /// Overrides the per-tick ingestion batch bound (default 100,000). Lower
    /// values make tests that assert on ingestion-vs-expiry ordering under a
    /// submission burst deterministic without needing hundreds of thousands
    /// of submissions to trigger the bound.
    pub fn max_ingress_per_tick(mut self, max: usize) -> Self {
        self.max_ingress_per_tick = max.max(1);
        self
    }

    /// A span entered on the worker thread for the lifetime of the run loop,
    /// so every log line the worker emits carries it. Defaults to the
    /// current span at the time [`WheelBuilder::build`] is called.
    pub fn worker_span(mut self, span: tracing::Span) -> Self {
        self.worker_span = Some(span);
        self
    }

    /// Builds and starts the [`WheelController`], spawning its dedicated
    /// worker thread.
    pub fn build(self) -> Result<WheelController> {
        if self.tick_duration_ns == 0 {
            return Err(Error::InvalidArgument {
                reason: "tick_duration must be greater than zero",
            });
        }
        if self.wheel_size == 0 {
            return Err(Error::InvalidArgument {
                reason: "wheel_size must be greater than zero",
            });
        }

        let (ingress_tx, ingress_rx) = flume::unbounded();
        let (cancel_tx, cancel_rx) = flume::unbounded();
        let lifecycle = Arc::new(AtomicU8::new(LIFECYCLE_INIT));
        let clock = self.clock.clone();
        let start_ns = clock.now_ns();

        let worker = Worker {
            clock: clock.clone(),
            start_ns,
            tick_duration_ns: self.tick_duration_ns,
            wheel: Wheel::new(self.wheel_size),
            ingress_rx,
            cancel_rx,
            lifecycle: lifecycle.clone(),
            on_task_panic: self.on_task_panic,
            max_ingress_per_tick: self.max_ingress_per_tick,
        };

        let worker_cpu = self.worker_cpu;
        let worker_span = self.worker_span.unwrap_or_else(tracing::Span::current);

        lifecycle.store(LIFECYCLE_STARTED, Ordering::Release);
        let thread_lifecycle = lifecycle.clone();
        // The `JoinHandle` is deliberately dropped rather than stored: per
        // spec.md §4.1, `shutdown` signals the worker to stop at its next
        // safe point but never waits for it, including whatever task body it
        // may currently be running. Dropping a `JoinHandle` detaches the
        // thread instead of joining it, so it keeps running to completion on
        // its own; the process (or, in tests, the test harness) reaps it on
        // exit.
        std::thread::Builder::new()
            .name(self.thread_name)
            .spawn(move || {
                let _entered = worker_span.enter();
                if let Some(cpus) = worker_cpu {
                    #[cfg(all(unix, feature = "utils"))]
                    if let Err(err) = crate::utils::bind_to_cpu_set(cpus) {
                        tracing::warn!(?err, "failed to pin wheel worker thread to CPU set");
                    }
                    #[cfg(not(all(unix, feature = "utils")))]
                    {
                        let _ = cpus;
                        tracing::warn!(
                            "worker CPU affinity was requested but is not supported on this target/feature set"
                        );
                    }
                }
                worker.run();
                thread_lifecycle.store(LIFECYCLE_SHUTDOWN, Ordering::Release);
            })
            .map_err(|_| Error::InvalidArgument {
                reason: "failed to spawn wheel worker thread",
            })?;

        Ok(WheelController {
            inner: Arc::new(ControllerInner {
                clock,
                start_ns,
                tick_duration_ns: self.tick_duration_ns,
                ingress_tx,
                cancel_tx,
                lifecycle,
            }),
        })
    }
}

struct ControllerInner {
    clock: Arc<dyn Clock>,
    start_ns: u64,
    tick_duration_ns: u64,
    ingress_tx: flume::Sender<Submission>,
    cancel_tx: flume::Sender<Arc<TimerHandleInner>>,
    lifecycle: Arc<AtomicU8>,
}

/// Owns a hashed timing wheel and its dedicated worker thread.
///
/// Cheap to clone (it is `Arc`-backed) and safe to share across threads;
/// every clone submits to and shuts down the same underlying wheel.
/// Dropping the last clone signals the worker thread to stop, without
/// waiting for it to do so.
#[derive(Clone)]
pub struct WheelController {
    inner: Arc<ControllerInner>,
}

impl WheelController {
    /// Starts a [`WheelController`] with default settings. Use
    /// [`WheelBuilder`] to customize tick duration, wheel size, clock, or
    /// the task panic hook.
    pub fn new() -> Result<Self> {
        WheelBuilder::new().build()
    }

    /// Schedules `task` to run once, after `delay` has elapsed.
    ///
    /// A non-positive `delay` is clamped to one tick's duration from now,
    /// per the reference behavior: it is not treated as "expire
    /// immediately", but as the earliest deadline the wheel can actually
    /// observe.
    ///
    /// Returns a [`TimerHandle`] that can be used to query the task's state
    /// or cancel it before it runs. Returns [`Error::ShutDown`] if this
    /// controller has already been shut down.
    pub fn submit<F>(&self, delay: i64, unit: TimeUnit, task: F) -> Result<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.lifecycle.load(Ordering::Acquire) == LIFECYCLE_SHUTDOWN {
            return Err(Error::ShutDown);
        }

        let elapsed = self.inner.clock.now_ns().saturating_sub(self.inner.start_ns);
        let deadline_ns = if delay <= 0 {
            elapsed.saturating_add(self.inner.tick_duration_ns)
        } else {
            elapsed.saturating_add(unit.to_nanos(delay as u64))
        };

        let entry = Arc::new(TimerHandleInner::new(deadline_ns, Box::new(task) as Box<dyn Task>));
        let handle = TimerHandle {
            inner: entry.clone(),
            cancel_tx: self.inner.cancel_tx.clone(),
        };

        if self
            .inner
            .ingress_tx
            .send(Submission { entry })
            .is_err()
        {
            return Err(Error::ShutDown);
        }

        Ok(handle)
    }

    /// Requests cancellation of `handle`'s task. Equivalent to calling
    /// [`TimerHandle::cancel`] directly; provided so callers that only hold
    /// a `&WheelController` (and a handle borrowed from elsewhere) don't
    /// need to route through the handle's own method.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        handle.cancel()
    }

    /// Whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.load(Ordering::Acquire) != LIFECYCLE_SHUTDOWN
    }

    /// The configured tick duration, in nanoseconds.
    pub fn tick_duration_ns(&self) -> u64 {
        self.inner.tick_duration_ns
    }

    /// Shuts down the wheel: no further tasks will run, and pending tasks
    /// are dropped without running. Idempotent.
    ///
    /// Per spec.md §4.1, this does not wait for the worker thread to exit,
    /// nor for any task body it is currently running to complete — only for
    /// the lifecycle flag to be set, which the worker observes and acts on
    /// at its next safe point. This makes it safe to call from inside a task
    /// running on this same wheel, e.g. a "run N times then stop" pattern
    /// that calls `shutdown` from its own last occurrence.
    pub fn shutdown(&self) {
        self.inner.lifecycle.store(LIFECYCLE_SHUTDOWN, Ordering::Release);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.lifecycle.store(LIFECYCLE_SHUTDOWN, Ordering::Release);
    }
}
