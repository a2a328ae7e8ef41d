//! Container runtime access.
//!
//! [`DockerCli`] shells out to the `docker` binary instead of linking a
//! client library; only two facts are needed per container (does it exist,
//! is it running) plus a forceful stop.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, ServiceError};

/// What the container runtime reports for a container name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No live container with that exact name. Exited containers count as
    /// missing. Not an error.
    Missing,
    Running,
    /// Listed by the runtime but not running (e.g. paused).
    Stopped,
}

impl ContainerState {
    pub fn is_running(self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

/// Reports and controls named containers.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Look up a container by exact name.
    async fn container_state(&self, name: &str) -> Result<ContainerState>;

    /// Forcefully stop a container. Stopping a missing container is a no-op.
    async fn stop_container(&self, name: &str) -> Result<()>;
}

/// [`ContainerInspector`] backed by the `docker` CLI.
pub struct DockerCli {
    binary: String,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ServiceError::Container(format!(
                        "docker CLI not found at '{}'",
                        self.binary
                    ))
                } else {
                    ServiceError::Container(format!("failed to run docker: {e}"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::Container(format!(
                "docker {} exited with code {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve a live container name to its id. Exited containers are not
    /// listed, so a killed service reads as missing. The `name` filter
    /// matches substrings, so the exact name is checked afterwards.
    async fn find_container(&self, name: &str) -> Result<Option<String>> {
        let filter = format!("name={name}");
        let output = self
            .docker(&[
                "ps",
                "--no-trunc",
                "--filter",
                &filter,
                "--format",
                "{{.ID}}\t{{.Names}}",
            ])
            .await?;
        Ok(find_exact_container(&output, name))
    }
}

#[async_trait]
impl ContainerInspector for DockerCli {
    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        let Some(id) = self.find_container(name).await? else {
            debug!(container = %name, "no container found");
            return Ok(ContainerState::Missing);
        };

        let raw = self
            .docker(&["inspect", "--format", "{{json .State}}", &id])
            .await?;
        let state: InspectState = serde_json::from_str(raw.trim()).map_err(|e| {
            ServiceError::Container(format!("failed to parse state of container {name}: {e}"))
        })?;

        Ok(if state.running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        })
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let Some(id) = self.find_container(name).await? else {
            info!(container = %name, "no container found, nothing to stop");
            return Ok(());
        };
        self.docker(&["kill", &id]).await?;
        info!(container = %name, "container killed");
        Ok(())
    }
}

/// Pick the id of the container named exactly `name` from
/// `docker ps --format '{{.ID}}\t{{.Names}}'` output.
fn find_exact_container(ps_output: &str, name: &str) -> Option<String> {
    ps_output.lines().find_map(|line| {
        let (id, names) = line.split_once('\t')?;
        names
            .split(',')
            .any(|n| n.trim().trim_start_matches('/') == name)
            .then(|| id.trim().to_string())
    })
}
