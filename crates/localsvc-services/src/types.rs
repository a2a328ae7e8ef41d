//! Shared data types for localsvc-services.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Observed run state of a service, recomputed on every status query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing has been observed yet.
    #[default]
    Unknown,
    /// A process was launched locally but no container is visible yet.
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Unknown => "unknown",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// The snapshot published to subscribers; compared by value to detect change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub state: RunState,
}

impl ServiceStatus {
    pub fn new(state: RunState) -> Self {
        Self { state }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// What a classifier recognised a checkout as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// A containerised API service driven by `mage run`.
    Api,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Api => write!(f, "api"),
        }
    }
}

/// Immutable identity of a discovered checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Directory name; also the container name.
    pub name: String,
    pub path: PathBuf,
    /// Directory modification time captured at discovery.
    pub modified: Option<DateTime<Utc>>,
}

/// Basic, display-oriented description of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDetails {
    pub name: String,
    pub path: PathBuf,
    pub kind: ServiceKind,
    /// Topic under which status changes are published.
    pub status_channel: String,
}

/// A published status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub topic: String,
    pub status: ServiceStatus,
}
