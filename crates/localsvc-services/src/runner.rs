//! External build-tool invocation (`mage` through the user's shell).

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use localsvc_core::config::{EnvParam, DISABLE_INTERACTIVE_ENV};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};

/// Default build tool; every command line is `<tool> <args...>`.
pub const DEFAULT_TOOL: &str = "mage";

/// Runs build-tool targets inside a service checkout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Spawn failure or a non-zero exit is an error.
    async fn run_sync(&self, dir: &Path, args: &[&str], env: &[(String, String)]) -> Result<()>;

    /// Spawn without waiting, sending stdout and stderr to `log`.
    /// Returns the child's pid when the platform reports one.
    async fn run_async(
        &self,
        dir: &Path,
        args: &[&str],
        env: &[(String, String)],
        log: std::fs::File,
    ) -> Result<Option<u32>>;
}

/// Environment for every build-tool invocation: the non-interactive flag
/// followed by `PHAAS_OVERRIDE_*` entries for enabled params only.
pub fn launch_env(params: &[EnvParam]) -> Vec<(String, String)> {
    let (key, value) = DISABLE_INTERACTIVE_ENV;
    std::iter::once((key.to_string(), value.to_string()))
        .chain(params.iter().filter_map(EnvParam::env_entry))
        .collect()
}

/// [`CommandRunner`] that runs `<shell> -c "<tool> <args>"`, so the tool
/// sees the same PATH the user's shell would.
pub struct ShellRunner {
    shell: String,
    tool: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            tool: DEFAULT_TOOL.to_string(),
        }
    }

    /// Replace the build tool (the first word of every command line).
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Source `init_file` once to verify the shell environment loads.
    pub async fn init(&self, init_file: Option<&str>) -> Result<()> {
        let Some(init_file) = init_file else {
            return Ok(());
        };
        info!(shell = %self.shell, init_file = %init_file, "initialising shell");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(format!(". {init_file}"))
            .output()
            .await
            .map_err(|e| ServiceError::Command(format!("failed to spawn {}: {e}", self.shell)))?;
        if !output.status.success() {
            return Err(ServiceError::Command(format!(
                "failed to init shell: {}",
                combined_output(&output.stdout, &output.stderr)
            )));
        }
        debug!("shell initialised");
        Ok(())
    }

    fn command_line(&self, args: &[&str]) -> String {
        std::iter::once(self.tool.as_str())
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self, dir: &Path, line: &str, env: &[(String, String)]) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(line)
            .current_dir(dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run_sync(&self, dir: &Path, args: &[&str], env: &[(String, String)]) -> Result<()> {
        let line = self.command_line(args);
        debug!(dir = %dir.display(), command = %line, "running command");
        let output = self
            .command(dir, &line, env)
            .output()
            .await
            .map_err(|e| ServiceError::Command(format!("failed to spawn `{line}`: {e}")))?;

        if !output.status.success() {
            return Err(ServiceError::Command(format!(
                "`{line}` exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                combined_output(&output.stdout, &output.stderr)
            )));
        }
        Ok(())
    }

    async fn run_async(
        &self,
        dir: &Path,
        args: &[&str],
        env: &[(String, String)],
        log: std::fs::File,
    ) -> Result<Option<u32>> {
        let line = self.command_line(args);
        let stderr = log.try_clone()?;
        let mut child = self
            .command(dir, &line, env)
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| ServiceError::Command(format!("failed to start `{line}`: {e}")))?;

        let pid = child.id();
        info!(dir = %dir.display(), command = %line, pid = ?pid, "command started");

        // Reap the child so it never lingers as a zombie.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(command = %line, %status, "command exited"),
                Err(e) => warn!(command = %line, error = %e, "failed to wait for command"),
            }
        });
        Ok(pid)
    }
}

fn combined_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(stdout).trim().to_string();
    let err = String::from_utf8_lossy(stderr);
    let err = err.trim();
    if !err.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(err);
    }
    out
}
