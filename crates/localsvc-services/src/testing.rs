//! In-memory collaborators for driving controllers in tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use localsvc_core::config::EnvParam;
use localsvc_scheduler::{Scheduler, SchedulerConfig};

use crate::controller::{Collaborators, ControllerSettings, ServiceController};
use crate::error::{Result, ServiceError};
use crate::inspector::{ContainerInspector, ContainerState};
use crate::process::ProcessTable;
use crate::publish::StatusPublisher;
use crate::runner::CommandRunner;
use crate::types::{ServiceIdentity, ServiceKind, ServiceStatus, StatusEvent};

#[derive(Default)]
pub struct FakeInspector {
    states: Mutex<HashMap<String, ContainerState>>,
    fail: AtomicBool,
    stopped: Mutex<Vec<String>>,
}

impl FakeInspector {
    pub fn set(&self, name: &str, state: ContainerState) {
        self.states.lock().unwrap().insert(name.to_string(), state);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerInspector for FakeInspector {
    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Container("daemon unreachable".to_string()));
        }
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(ContainerState::Missing))
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Container("daemon unreachable".to_string()));
        }
        self.stopped.lock().unwrap().push(name.to_string());
        // A killed container exits and drops out of the live listing.
        self.states.lock().unwrap().remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProcesses {
    live: Mutex<HashSet<u32>>,
    fail: AtomicBool,
}

impl FakeProcesses {
    pub fn spawn(&self, pid: u32) {
        self.live.lock().unwrap().insert(pid);
    }

    pub fn kill(&self, pid: u32) {
        self.live.lock().unwrap().remove(&pid);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ProcessTable for FakeProcesses {
    fn exists(&self, pid: u32) -> Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ProcessLookup(format!("pid {pid}: boom")));
        }
        Ok(self.live.lock().unwrap().contains(&pid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCall {
    pub dir: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub background: bool,
}

/// Records every invocation. `run_async` marks its pid live in `processes`.
pub struct FakeRunner {
    calls: Mutex<Vec<RunCall>>,
    next_pid: Mutex<Option<u32>>,
    fail_sync: AtomicBool,
    processes: Arc<FakeProcesses>,
}

impl FakeRunner {
    pub fn new(processes: Arc<FakeProcesses>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_pid: Mutex::new(Some(4242)),
            fail_sync: AtomicBool::new(false),
            processes,
        }
    }

    pub fn calls(&self) -> Vec<RunCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn background_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.background).count()
    }

    pub fn set_next_pid(&self, pid: Option<u32>) {
        *self.next_pid.lock().unwrap() = pid;
    }

    pub fn fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    fn record(&self, dir: &Path, args: &[&str], env: &[(String, String)], background: bool) {
        self.calls.lock().unwrap().push(RunCall {
            dir: dir.to_path_buf(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: env.to_vec(),
            background,
        });
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run_sync(&self, dir: &Path, args: &[&str], env: &[(String, String)]) -> Result<()> {
        self.record(dir, args, env, false);
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(ServiceError::Command("`mage mysqlup` exited with code 1".to_string()));
        }
        Ok(())
    }

    async fn run_async(
        &self,
        dir: &Path,
        args: &[&str],
        env: &[(String, String)],
        _log: std::fs::File,
    ) -> Result<Option<u32>> {
        self.record(dir, args, env, true);
        let pid = *self.next_pid.lock().unwrap();
        if let Some(pid) = pid {
            self.processes.spawn(pid);
        }
        Ok(pid)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StatusPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, status: ServiceStatus) {
        self.events.lock().unwrap().push(StatusEvent {
            topic: topic.to_string(),
            status,
        });
    }
}

/// Fakes plus a scratch data directory, wired into [`Collaborators`].
pub struct Harness {
    pub inspector: Arc<FakeInspector>,
    pub processes: Arc<FakeProcesses>,
    pub runner: Arc<FakeRunner>,
    pub publisher: Arc<RecordingPublisher>,
    pub scheduler: Arc<Scheduler>,
    pub settings: Arc<ControllerSettings>,
    pub data_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(Vec::new())
    }

    pub fn with_params(env_params: Vec<EnvParam>) -> Self {
        Self::build(env_params, Duration::from_secs(1))
    }

    pub fn with_low_latency_interval(interval: Duration) -> Self {
        Self::build(Vec::new(), interval)
    }

    fn build(env_params: Vec<EnvParam>, low_latency_interval: Duration) -> Self {
        let processes = Arc::new(FakeProcesses::default());
        let data_dir = tempfile::tempdir().unwrap();
        Self {
            inspector: Arc::new(FakeInspector::default()),
            runner: Arc::new(FakeRunner::new(Arc::clone(&processes))),
            processes,
            publisher: Arc::new(RecordingPublisher::default()),
            scheduler: Arc::new(Scheduler::with_config(SchedulerConfig {
                tick: Duration::from_secs(1),
                jitter: false,
            })),
            settings: Arc::new(ControllerSettings {
                data_dir: data_dir.path().to_path_buf(),
                env_params,
                status_interval: Duration::from_secs(30),
                low_latency_interval,
            }),
            data_dir,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            inspector: self.inspector.clone(),
            processes: self.processes.clone(),
            runner: self.runner.clone(),
            publisher: self.publisher.clone(),
        }
    }

    pub fn controller(&self, name: &str) -> Arc<ServiceController> {
        let identity = ServiceIdentity {
            name: name.to_string(),
            path: PathBuf::from("/repos").join(name),
            modified: None,
        };
        ServiceController::new(
            identity,
            ServiceKind::Api,
            Arc::clone(&self.settings),
            Arc::clone(&self.scheduler),
            self.collaborators(),
        )
    }
}
