use std::time::Duration;

/// Tuning knobs for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the loop checks for due jobs.
    pub tick: Duration,
    /// Randomise each job's initial `last_run` within one period.
    pub jitter: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            jitter: true,
        }
    }
}

/// Read-only snapshot of a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub period: Duration,
    /// Time elapsed since the job last fired (or since its jittered start).
    pub since_last_run: Duration,
}
