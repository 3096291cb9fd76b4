#![doc = include_str!("../../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, unreachable_pub)]

//! A hashed timing wheel.
//!
//! This crate contains the types needed to run a timing wheel.
//!
//! The [`WheelController`] type owns the wheel and its background worker. It
//! is the entry point: construct one with [`WheelController::new`], then call
//! [`WheelController::submit`] to schedule a task. This type is `Clone`,
//! `Send`, and `Sync`, so it can be shared across threads.
//!
//! [`TimerHandle`] is a reference to a single scheduled task, returned by
//! `submit`. It can be polled for its [`TimerState`] or cancelled.
//!
//! The [`Clock`] trait describes how to get the current moment in time, as a
//! nanosecond offset. [`SystemClock`] is the default implementation, backed
//! by [`std::time::Instant`]. The clock is pluggable so tests can drive the
//! wheel deterministically.
//!
//! Note that, unlike an async timer, this wheel invokes tasks by calling a
//! plain closure on a dedicated worker thread — there is no reactor to poll.
//!
//! # Implementation
//!
//! The wheel is based on the classic [hashed timing wheel][paper] structure
//! used by Netty's `HashedWheelTimer` and the Kafka purgatory: a single array
//! of buckets, each holding an intrusive doubly-linked list of timers. A
//! dedicated worker thread advances one slot per tick, processing every timer
//! in that slot. Timers whose deadline is more than one revolution away carry
//! a `remaining_rounds` counter that is decremented each time the worker
//! passes over their bucket, instead of being re-distributed across multiple
//! wheel levels.
//!
//! [paper]: http://www.cs.columbia.edu/~nahum/w6998/papers/ton97-timing-wheels.pdf
//! [`WheelController`]: struct.WheelController.html
//! [`TimerHandle`]: struct.TimerHandle.html
//! [`Clock`]: clock/trait.Clock.html
//! [`SystemClock`]: clock/struct.SystemClock.html

mod bucket;
mod clock;
mod controller;
mod error;
mod handle;
pub mod utils;
mod wheel;
mod worker;

pub use clock::{Clock, SystemClock};
pub use controller::{TimeUnit, WheelBuilder, WheelController};
pub use error::Error;
pub use handle::{TimerHandle, TimerState};

/// A specialized `Result` type used throughout this crate's public API.
pub type Result<T> = std::result::Result<T, Error>;
