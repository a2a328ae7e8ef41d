use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with this name is already registered. Callers that only want
    /// "ensure registered" treat this as success.
    #[error("Job already exists: {name}")]
    JobAlreadyExists { name: String },

    /// Periods must be non-zero.
    #[error("Invalid period for job {name}: period must be greater than zero")]
    InvalidPeriod { name: String },

    /// `run` was called while another loop is active.
    #[error("Scheduler loop is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
