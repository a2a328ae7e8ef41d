//! `localsvc-scheduler`: in-process periodic job runner.
//!
//! # Overview
//!
//! Jobs are registered by unique name with a fixed period. A single
//! [`engine::Scheduler::run`] loop ticks at a coarse granularity (1 s by
//! default) and dispatches every job whose period has elapsed onto its own
//! Tokio task. Dispatch is fire-and-forget: the loop never waits for an
//! action, so a slow action can overlap with its own next firing. Job bodies
//! must tolerate running concurrently with themselves.
//!
//! A job's first `last_run` is placed a random distance (up to one period)
//! in the past so that jobs registered together do not all fire on the same
//! tick.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use types::{JobInfo, SchedulerConfig};
