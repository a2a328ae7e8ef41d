use std::path::PathBuf;

use localsvc_scheduler::SchedulerError;
use thiserror::Error;

/// Errors raised while discovering, inspecting, starting or stopping services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No service with this name is in the catalog.
    #[error("Service not found: {name}")]
    ServiceNotFound { name: String },

    /// The container runtime failed or returned something unparseable.
    #[error("Container runtime error: {0}")]
    Container(String),

    /// An external build-tool command could not be spawned or exited non-zero.
    #[error("Command failed: {0}")]
    Command(String),

    /// The OS process table could not be queried.
    #[error("Process lookup failed: {0}")]
    ProcessLookup(String),

    /// The discovery root could not be listed.
    #[error("Failed to list services in {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A data directory, log file or repository file operation failed.
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid service pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Short error code string for machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            ServiceError::Container(_) => "CONTAINER_ERROR",
            ServiceError::Command(_) => "COMMAND_FAILED",
            ServiceError::ProcessLookup(_) => "PROCESS_LOOKUP_FAILED",
            ServiceError::Discovery { .. } => "DISCOVERY_FAILED",
            ServiceError::Filesystem { .. } => "FILESYSTEM_ERROR",
            ServiceError::Scheduler(_) => "SCHEDULER_ERROR",
            ServiceError::Pattern(_) => "INVALID_PATTERN",
            ServiceError::Io(_) => "IO_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::ServiceNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
