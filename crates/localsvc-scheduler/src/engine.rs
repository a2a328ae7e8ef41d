use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    types::{JobInfo, SchedulerConfig},
};

type JobAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Job {
    period: Duration,
    last_run: Instant,
    action: JobAction,
}

/// Process-wide periodic job runner.
///
/// The registry is a `DashMap` so registration and removal from job bodies
/// or API calls never race with the tick scan. Share it as `Arc<Scheduler>`.
pub struct Scheduler {
    jobs: DashMap<String, Job>,
    config: SchedulerConfig,
    running: AtomicBool,
}

impl Scheduler {
    /// Scheduler with a 1 s tick and jittered first runs.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Register `action` to run every `period` under the unique `name`.
    ///
    /// Returns [`SchedulerError::JobAlreadyExists`] when the name is taken;
    /// the existing registration (and its period) is left untouched.
    pub fn add_job<F, Fut>(&self, name: impl Into<String>, period: Duration, action: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod { name });
        }

        match self.jobs.entry(name) {
            Entry::Occupied(entry) => Err(SchedulerError::JobAlreadyExists {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let last_run = self.initial_last_run(period);
                debug!(job = %entry.key(), period_ms = period.as_millis() as u64, "job added");
                entry.insert(Job {
                    period,
                    last_run,
                    action: Arc::new(move || action().boxed()),
                });
                Ok(())
            }
        }
    }

    /// Unregister `name`. Returns `false` when no such job existed.
    ///
    /// Actions already dispatched keep running to completion.
    pub fn remove_job(&self, name: &str) -> bool {
        let removed = self.jobs.remove(name).is_some();
        if removed {
            debug!(job = %name, "job removed");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Snapshot of all registered jobs, sorted by name.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let now = Instant::now();
        let mut jobs: Vec<JobInfo> = self
            .jobs
            .iter()
            .map(|entry| JobInfo {
                name: entry.key().clone(),
                period: entry.period,
                since_last_run: now.saturating_duration_since(entry.last_run),
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true` (or its sender is
    /// dropped). Only one loop may be active per scheduler.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("scheduler loop already running");
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(tick_ms = self.config.tick.as_millis() as u64, "scheduler started");
        let mut interval = tokio::time::interval(self.config.tick);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!("scheduler shutting down");
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    fn initial_last_run(&self, period: Duration) -> Instant {
        let now = Instant::now();
        if !self.config.jitter {
            return now;
        }
        let max_nanos = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        let offset = Duration::from_nanos(rand::rng().random_range(0..max_nanos));
        now.checked_sub(offset).unwrap_or(now)
    }

    /// Dispatch every due job onto its own task and advance its `last_run`.
    /// Returns the number of dispatched jobs.
    fn tick(&self, now: Instant) -> usize {
        // Collect first so no shard lock is held while tasks are spawned.
        let due: Vec<(String, JobAction)> = self
            .jobs
            .iter_mut()
            .filter_map(|mut entry| {
                if now.saturating_duration_since(entry.last_run) >= entry.period {
                    entry.last_run = now;
                    Some((entry.key().clone(), Arc::clone(&entry.action)))
                } else {
                    None
                }
            })
            .collect();

        for (name, action) in &due {
            debug!(job = %name, "dispatching job");
            tokio::spawn(action());
        }
        due.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
