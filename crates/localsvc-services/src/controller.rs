//! Per-service lifecycle reconciler.
//!
//! A [`ServiceController`] never stores a run state of its own. Every
//! [`ServiceController::status`] call derives one from scratch out of the
//! pid it launched (if any) and the container runtime's answer. The only
//! remembered snapshot is the last published status, kept for change
//! detection.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use localsvc_core::config::{EnvParam, LocalSvcConfig};
use localsvc_scheduler::{Scheduler, SchedulerError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::git;
use crate::inspector::{ContainerInspector, ContainerState};
use crate::process::ProcessTable;
use crate::publish::StatusPublisher;
use crate::runner::{launch_env, CommandRunner};
use crate::types::{RunState, ServiceDetails, ServiceIdentity, ServiceKind, ServiceStatus};

const LOG_FILE_NAME: &str = "service.log";
const DEPENDENCY_SUFFIX: &str = "-mysql";
const DEPENDENCY_TARGET: &str = "mysqlup";
const RUN_TARGET: &str = "run";

/// External systems a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub inspector: Arc<dyn ContainerInspector>,
    pub processes: Arc<dyn ProcessTable>,
    pub runner: Arc<dyn CommandRunner>,
    pub publisher: Arc<dyn StatusPublisher>,
}

/// Settings shared by every controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Root of the per-service data directories.
    pub data_dir: PathBuf,
    pub env_params: Vec<EnvParam>,
    /// Cadence of the steady status watcher.
    pub status_interval: Duration,
    /// Cadence of the watcher registered by [`ServiceController::start`].
    pub low_latency_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &LocalSvcConfig) -> Self {
        Self {
            data_dir: config.data_dir(),
            env_params: config.env_params.clone(),
            status_interval: Duration::from_secs(config.watch.status_interval_secs),
            low_latency_interval: Duration::from_millis(config.watch.low_latency_interval_ms),
        }
    }
}

pub struct ServiceController {
    identity: ServiceIdentity,
    kind: ServiceKind,
    settings: Arc<ControllerSettings>,
    scheduler: Arc<Scheduler>,
    deps: Collaborators,
    /// Pid of the last process launched by `start`, until it disappears.
    started_pid: Mutex<Option<u32>>,
    latest_status: Mutex<ServiceStatus>,
}

impl ServiceController {
    pub fn new(
        identity: ServiceIdentity,
        kind: ServiceKind,
        settings: Arc<ControllerSettings>,
        scheduler: Arc<Scheduler>,
        deps: Collaborators,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            kind,
            settings,
            scheduler,
            deps,
            started_pid: Mutex::new(None),
            latest_status: Mutex::new(ServiceStatus::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn details(&self) -> ServiceDetails {
        ServiceDetails {
            name: self.identity.name.clone(),
            path: self.identity.path.clone(),
            kind: self.kind,
            status_channel: self.notification_channel(),
        }
    }

    /// Topic under which status changes of this service are published.
    pub fn notification_channel(&self) -> String {
        format!("events-{}-status", self.identity.name)
    }

    /// Container that must be up before the service itself can run.
    pub fn dependency_container(&self) -> String {
        format!("{}{DEPENDENCY_SUFFIX}", self.identity.name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.settings
            .data_dir
            .join(&self.identity.name)
            .join(LOG_FILE_NAME)
    }

    pub fn last_modified(&self) -> Result<DateTime<Utc>> {
        self.identity.modified.ok_or_else(|| ServiceError::Filesystem {
            path: self.identity.path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "modification time not available",
            ),
        })
    }

    pub fn active_branch(&self) -> Result<String> {
        git::active_branch(&self.identity.path)
    }

    /// Last published snapshot; `Unknown` until the first refresh.
    pub async fn latest_status(&self) -> ServiceStatus {
        *self.latest_status.lock().await
    }

    pub async fn started_pid(&self) -> Option<u32> {
        *self.started_pid.lock().await
    }

    /// Derive the current run state. Container errors propagate; process
    /// lookup problems only forget the remembered pid.
    pub async fn status(&self) -> Result<RunState> {
        let found_process = self.probe_started_process().await;
        let container = self.deps.inspector.container_state(self.name()).await?;
        Ok(derive_state(container, found_process))
    }

    /// Recompute the state, store it, and publish it if it differs from the
    /// previous snapshot. On error the stored snapshot is left as it was.
    pub async fn refresh_status(&self) -> Result<RunState> {
        let state = self.status().await?;
        let status = ServiceStatus::new(state);

        let mut latest = self.latest_status.lock().await;
        let changed = *latest != status;
        *latest = status;
        if changed {
            debug!(service = %self.name(), state = %state, "status changed");
            self.deps
                .publisher
                .publish(&self.notification_channel(), status);
        }
        Ok(state)
    }

    /// Ensure the steady status watcher is registered. Registering twice is
    /// not an error.
    pub fn register_status_watcher(self: &Arc<Self>) -> Result<()> {
        let controller = Arc::downgrade(self);
        let registered = self.scheduler.add_job(
            self.steady_watcher_name(),
            self.settings.status_interval,
            move || refresh_job(controller.clone()),
        );
        ignore_duplicate(registered)
    }

    /// Bring up the dependency container, then launch the service in the
    /// background unless its container is already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let env = launch_env(&self.settings.env_params);
        self.ensure_dependency(&env).await?;

        if self
            .deps
            .inspector
            .container_state(self.name())
            .await?
            .is_running()
        {
            info!(service = %self.name(), "service already running");
            return Ok(());
        }

        let log = self.open_log().await?;
        let pid = self
            .deps
            .runner
            .run_async(&self.identity.path, &[RUN_TARGET], &env, log)
            .await?;
        if let Some(pid) = pid {
            *self.started_pid.lock().await = Some(pid);
        }
        info!(service = %self.name(), pid = ?pid, log = %self.log_path().display(), "service launched");

        if let Err(e) = self.refresh_status().await {
            warn!(service = %self.name(), error = %e, "status refresh after start failed");
        }
        // The service is already running at this point; a missing fast poll
        // only delays status feedback until the steady watcher fires.
        if let Err(e) = self.register_low_latency_watcher() {
            warn!(service = %self.name(), error = %e, "failed to register startup watcher");
        }
        Ok(())
    }

    /// Forcefully stop the service container. Already stopped is success.
    pub async fn stop(&self) -> Result<()> {
        let container = self.deps.inspector.container_state(self.name()).await?;
        if container.is_running() {
            self.deps.inspector.stop_container(self.name()).await?;
            info!(service = %self.name(), "service stopped");
        } else {
            debug!(service = %self.name(), "service already stopped");
        }
        *self.started_pid.lock().await = None;
        Ok(())
    }

    /// Whether the fast startup poll registered by `start` is still active.
    pub fn startup_watcher_active(&self) -> bool {
        self.scheduler.contains(&self.low_latency_watcher_name())
    }

    // --- private helpers ---------------------------------------------------

    fn steady_watcher_name(&self) -> String {
        format!("{}-status-watcher", self.identity.name)
    }

    fn low_latency_watcher_name(&self) -> String {
        format!("{}-status-watcher-low-latency", self.identity.name)
    }

    async fn probe_started_process(&self) -> bool {
        let mut started = self.started_pid.lock().await;
        let Some(pid) = *started else {
            return false;
        };
        match self.deps.processes.exists(pid) {
            Ok(true) => true,
            Ok(false) => {
                debug!(service = %self.name(), pid, "launched process is gone");
                *started = None;
                false
            }
            Err(e) => {
                warn!(service = %self.name(), pid, error = %e, "process lookup failed, forgetting pid");
                *started = None;
                false
            }
        }
    }

    async fn ensure_dependency(&self, env: &[(String, String)]) -> Result<()> {
        let dependency = self.dependency_container();
        if self
            .deps
            .inspector
            .container_state(&dependency)
            .await?
            .is_running()
        {
            debug!(service = %self.name(), dependency = %dependency, "dependency already running");
            return Ok(());
        }

        info!(service = %self.name(), dependency = %dependency, "bringing up dependency");
        self.deps
            .runner
            .run_sync(&self.identity.path, &[DEPENDENCY_TARGET], env)
            .await
    }

    /// Create (or truncate) the service log. Returned as a std handle since
    /// it becomes the child's stdout.
    async fn open_log(&self) -> Result<std::fs::File> {
        let path = self.log_path();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ServiceError::Filesystem {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| ServiceError::Filesystem { path, source })?;
        Ok(file.into_std().await)
    }

    /// Fast poll for the startup transient. Removes itself once the service
    /// is observed stopped.
    fn register_low_latency_watcher(self: &Arc<Self>) -> Result<()> {
        let controller = Arc::downgrade(self);
        let job = self.low_latency_watcher_name();
        let registered = self.scheduler.add_job(
            job.clone(),
            self.settings.low_latency_interval,
            move || low_latency_job(controller.clone(), job.clone()),
        );
        ignore_duplicate(registered)
    }
}

/// The decision table behind [`ServiceController::status`].
pub fn derive_state(container: ContainerState, found_process: bool) -> RunState {
    match container {
        ContainerState::Running => RunState::Running,
        ContainerState::Stopped => RunState::Stopped,
        ContainerState::Missing if found_process => RunState::Starting,
        ContainerState::Missing => RunState::Stopped,
    }
}

async fn refresh_job(controller: Weak<ServiceController>) {
    let Some(controller) = controller.upgrade() else {
        return;
    };
    if let Err(e) = controller.refresh_status().await {
        warn!(service = %controller.name(), error = %e, "status refresh failed");
    }
}

async fn low_latency_job(controller: Weak<ServiceController>, job: String) {
    let Some(controller) = controller.upgrade() else {
        return;
    };
    if let Err(e) = controller.refresh_status().await {
        warn!(service = %controller.name(), error = %e, "status refresh failed");
    }
    if controller.latest_status().await.state == RunState::Stopped {
        controller.scheduler.remove_job(&job);
        debug!(service = %controller.name(), "startup watcher finished");
    }
}

fn ignore_duplicate(registered: localsvc_scheduler::Result<()>) -> Result<()> {
    match registered {
        Ok(()) | Err(SchedulerError::JobAlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use tokio::sync::watch;
    use tokio::time::sleep;

    const SVC: &str = "phaas-users-api";

    fn spawn_loop(h: &Harness) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        let scheduler = Arc::clone(&h.scheduler);
        tokio::spawn(async move { scheduler.run(rx).await });
        tx
    }

    #[test]
    fn decision_table() {
        assert_eq!(derive_state(ContainerState::Missing, false), RunState::Stopped);
        assert_eq!(derive_state(ContainerState::Missing, true), RunState::Starting);
        assert_eq!(derive_state(ContainerState::Running, false), RunState::Running);
        assert_eq!(derive_state(ContainerState::Running, true), RunState::Running);
        assert_eq!(derive_state(ContainerState::Stopped, false), RunState::Stopped);
        assert_eq!(derive_state(ContainerState::Stopped, true), RunState::Stopped);
    }

    #[test]
    fn names_derive_from_service_name() {
        let h = Harness::new();
        let c = h.controller(SVC);
        assert_eq!(c.notification_channel(), "events-phaas-users-api-status");
        assert_eq!(c.dependency_container(), "phaas-users-api-mysql");
        assert_eq!(c.log_path(), h.data_dir.path().join(SVC).join("service.log"));

        let details = c.details();
        assert_eq!(details.kind, ServiceKind::Api);
        assert_eq!(details.status_channel, c.notification_channel());
    }

    #[test]
    fn missing_modification_time_is_an_error() {
        let h = Harness::new();
        assert!(h.controller(SVC).last_modified().is_err());
    }

    #[tokio::test]
    async fn launched_process_without_container_is_starting() {
        let h = Harness::new();
        let c = h.controller(SVC);
        c.start().await.unwrap();

        assert_eq!(c.started_pid().await, Some(4242));
        assert_eq!(c.status().await.unwrap(), RunState::Starting);

        h.processes.kill(4242);
        assert_eq!(c.status().await.unwrap(), RunState::Stopped);
        assert_eq!(c.started_pid().await, None);
    }

    #[tokio::test]
    async fn process_lookup_failure_is_swallowed() {
        let h = Harness::new();
        let c = h.controller(SVC);
        c.start().await.unwrap();

        h.processes.fail(true);
        assert_eq!(c.status().await.unwrap(), RunState::Stopped);
        assert_eq!(c.started_pid().await, None);
    }

    #[tokio::test]
    async fn container_errors_propagate_and_keep_snapshot() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set(SVC, ContainerState::Running);
        c.refresh_status().await.unwrap();

        h.inspector.fail(true);
        assert!(matches!(c.status().await, Err(ServiceError::Container(_))));
        assert!(c.refresh_status().await.is_err());
        assert_eq!(c.latest_status().await.state, RunState::Running);
        assert_eq!(h.publisher.events().len(), 1);
    }

    #[tokio::test]
    async fn refresh_publishes_only_on_change() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set(SVC, ContainerState::Running);

        assert_eq!(c.refresh_status().await.unwrap(), RunState::Running);
        assert_eq!(c.refresh_status().await.unwrap(), RunState::Running);
        let events = h.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, "events-phaas-users-api-status");
        assert_eq!(events[0].status.state, RunState::Running);

        h.inspector.set(SVC, ContainerState::Stopped);
        c.refresh_status().await.unwrap();
        assert_eq!(h.publisher.events().len(), 2);
        assert_eq!(c.latest_status().await.state, RunState::Stopped);
    }

    #[tokio::test]
    async fn start_brings_up_dependency_then_launches_with_overrides() {
        let h = Harness::with_params(vec![
            EnvParam {
                key: "FOO".to_string(),
                value: "bar".to_string(),
                enabled: true,
            },
            EnvParam {
                key: "OFF".to_string(),
                value: "x".to_string(),
                enabled: false,
            },
        ]);
        let c = h.controller(SVC);
        c.start().await.unwrap();

        let calls = h.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["mysqlup"]);
        assert!(!calls[0].background);
        assert_eq!(calls[1].args, vec!["run"]);
        assert!(calls[1].background);
        assert_eq!(calls[1].dir, PathBuf::from("/repos").join(SVC));

        let env = &calls[1].env;
        assert!(env.contains(&("PHAAS_DOCKER_DISABLE_INTERACTIVE".to_string(), "1".to_string())));
        assert!(env.contains(&("PHAAS_OVERRIDE_FOO".to_string(), "bar".to_string())));
        assert!(!env.iter().any(|(k, _)| k == "PHAAS_OVERRIDE_OFF"));

        assert!(c.log_path().is_file());
        assert_eq!(c.latest_status().await.state, RunState::Starting);
    }

    #[tokio::test]
    async fn running_dependency_is_not_brought_up_again() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set("phaas-users-api-mysql", ContainerState::Running);
        c.start().await.unwrap();

        let calls = h.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["run"]);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set("phaas-users-api-mysql", ContainerState::Running);
        h.inspector.set(SVC, ContainerState::Running);

        c.start().await.unwrap();
        assert_eq!(h.runner.background_calls(), 0);
        assert!(h.scheduler.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn dependency_failure_aborts_start() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.runner.fail_sync(true);

        assert!(matches!(c.start().await, Err(ServiceError::Command(_))));
        assert_eq!(h.runner.background_calls(), 0);
        assert_eq!(c.started_pid().await, None);
    }

    #[tokio::test]
    async fn missing_pid_leaves_remembered_pid_unset() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.runner.set_next_pid(None);

        c.start().await.unwrap();
        assert_eq!(c.started_pid().await, None);
        assert_eq!(c.latest_status().await.state, RunState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_already_stopped() {
        let h = Harness::new();
        let c = h.controller(SVC);
        c.stop().await.unwrap();
        h.inspector.set(SVC, ContainerState::Stopped);
        c.stop().await.unwrap();
        assert!(h.inspector.stopped().is_empty());
    }

    #[tokio::test]
    async fn stop_kills_running_container_and_forgets_pid() {
        let h = Harness::new();
        let c = h.controller(SVC);
        c.start().await.unwrap();
        h.inspector.set(SVC, ContainerState::Running);

        c.stop().await.unwrap();
        assert_eq!(h.inspector.stopped(), vec![SVC.to_string()]);
        assert_eq!(c.started_pid().await, None);
        assert_eq!(c.status().await.unwrap(), RunState::Stopped);
    }

    #[tokio::test]
    async fn stop_propagates_inspector_errors() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.fail(true);
        assert!(c.stop().await.is_err());
    }

    #[tokio::test]
    async fn status_watcher_registration_is_idempotent() {
        let h = Harness::new();
        let c = h.controller(SVC);
        c.register_status_watcher().unwrap();
        c.register_status_watcher().unwrap();

        let jobs = h.scheduler.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "phaas-users-api-status-watcher");
        assert_eq!(jobs[0].period, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn status_watcher_refreshes_periodically() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set(SVC, ContainerState::Running);
        c.register_status_watcher().unwrap();

        let _shutdown = spawn_loop(&h);
        sleep(Duration::from_millis(30_500)).await;
        assert_eq!(c.latest_status().await.state, RunState::Running);

        h.inspector.set(SVC, ContainerState::Stopped);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(c.latest_status().await.state, RunState::Stopped);
        assert_eq!(h.publisher.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn low_latency_watcher_removes_itself_once_stopped() {
        let h = Harness::new();
        let c = h.controller(SVC);
        c.start().await.unwrap();
        let job = "phaas-users-api-status-watcher-low-latency";
        assert!(h.scheduler.contains(job));

        let _shutdown = spawn_loop(&h);
        sleep(Duration::from_millis(1_500)).await;
        assert!(h.scheduler.contains(job));
        assert_eq!(c.latest_status().await.state, RunState::Starting);

        h.inspector.set(SVC, ContainerState::Running);
        sleep(Duration::from_secs(1)).await;
        assert!(h.scheduler.contains(job));
        assert_eq!(c.latest_status().await.state, RunState::Running);

        h.inspector.set(SVC, ContainerState::Stopped);
        sleep(Duration::from_secs(1)).await;
        assert!(!h.scheduler.contains(job));
        assert!(!c.startup_watcher_active());

        sleep(Duration::from_secs(5)).await;
        assert!(!h.scheduler.contains(job));
        let states: Vec<RunState> = h.publisher.events().iter().map(|e| e.status.state).collect();
        assert_eq!(
            states,
            vec![RunState::Starting, RunState::Running, RunState::Stopped]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_reports_starting() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set("phaas-users-api-mysql", ContainerState::Running);
        h.inspector.set(SVC, ContainerState::Running);

        c.stop().await.unwrap();
        c.start().await.unwrap();
        assert_eq!(c.started_pid().await, Some(4242));
        assert_eq!(c.latest_status().await.state, RunState::Starting);
        assert!(c.startup_watcher_active());

        let _shutdown = spawn_loop(&h);
        sleep(Duration::from_millis(1_500)).await;
        assert!(c.startup_watcher_active());
        assert_eq!(c.latest_status().await.state, RunState::Starting);
    }

    #[tokio::test]
    async fn startup_watcher_failure_does_not_fail_start() {
        let h = Harness::with_low_latency_interval(Duration::ZERO);
        let c = h.controller(SVC);

        c.start().await.unwrap();
        assert_eq!(h.runner.background_calls(), 1);
        assert_eq!(c.started_pid().await, Some(4242));
        assert!(!c.startup_watcher_active());
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_of_dropped_controller_do_nothing() {
        let h = Harness::new();
        let c = h.controller(SVC);
        h.inspector.set(SVC, ContainerState::Running);
        c.register_status_watcher().unwrap();
        drop(c);

        let _shutdown = spawn_loop(&h);
        sleep(Duration::from_millis(30_500)).await;
        assert!(h.publisher.events().is_empty());
    }
}
