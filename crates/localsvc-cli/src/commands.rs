use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use localsvc_core::config::LocalSvcConfig;
use localsvc_scheduler::{Scheduler, SchedulerConfig};
use localsvc_services::inspector::DockerCli;
use localsvc_services::process::OsProcessTable;
use localsvc_services::publish::EventBroadcaster;
use localsvc_services::runner::ShellRunner;
use localsvc_services::{
    Collaborators, ControllerFactory, ControllerSettings, PatternClassifier, ServiceCatalog,
    StatusEvent,
};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "localsvc", version, about = "Local service orchestrator")]
pub struct Cli {
    /// Config file (default: $LOCALSVC_CONFIG, then ~/.localsvc/localsvc.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List discovered services
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the current run state of a service
    Status { name: String },
    /// Start a service and its dependency container
    Start {
        name: String,
        /// Keep polling and print status changes until the service is
        /// observed stopped (or Ctrl-C)
        #[arg(long)]
        follow: bool,
    },
    /// Stop a service container
    Stop { name: String },
    /// Print the checked-out git branch of a service
    Branch { name: String },
    /// Poll services and print status changes as JSON lines until Ctrl-C
    Watch {
        /// Services to watch (default: all)
        names: Vec<String>,
    },
}

/// Everything a command needs, wired from the config.
struct Runtime {
    catalog: ServiceCatalog,
    scheduler: Arc<Scheduler>,
    events: Arc<EventBroadcaster>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Command::List { json } => list(&bootstrap(&config, false).await?, json),
            Command::Status { name } => {
                let rt = bootstrap(&config, false).await?;
                let state = rt
                    .catalog
                    .status(&name)
                    .await
                    .with_context(|| format!("failed to get status of {name}"))?;
                println!("{name}: {state}");
                Ok(())
            }
            Command::Start { name, follow } => {
                let rt = bootstrap(&config, true).await?;
                rt.catalog
                    .start(&name)
                    .await
                    .with_context(|| format!("failed to start {name}"))?;
                let controller = rt.catalog.get(&name)?;
                println!(
                    "{name}: {} (log: {})",
                    controller.latest_status().await.state,
                    controller.log_path().display()
                );
                if follow {
                    follow_startup(&rt, &name).await?;
                }
                Ok(())
            }
            Command::Stop { name } => {
                let rt = bootstrap(&config, false).await?;
                rt.catalog
                    .stop(&name)
                    .await
                    .with_context(|| format!("failed to stop {name}"))?;
                println!("{name}: stopped");
                Ok(())
            }
            Command::Branch { name } => {
                let rt = bootstrap(&config, false).await?;
                let branch = rt
                    .catalog
                    .get(&name)?
                    .active_branch()
                    .with_context(|| format!("failed to read branch of {name}"))?;
                println!("{branch}");
                Ok(())
            }
            Command::Watch { names } => watch_services(bootstrap(&config, false).await?, names).await,
        }
    }
}

/// An explicit `--config` must load; the implicit default falls back to
/// built-in settings.
fn load_config(explicit: Option<&str>) -> Result<LocalSvcConfig> {
    let Some(path) = explicit else {
        return Ok(LocalSvcConfig::load(None).unwrap_or_else(|e| {
            warn!("Config load failed ({}), using defaults", e);
            LocalSvcConfig::default()
        }));
    };
    ensure!(Path::new(path).is_file(), "config file not found: {path}");
    LocalSvcConfig::load(Some(path)).with_context(|| format!("failed to load config from {path}"))
}

async fn bootstrap(config: &LocalSvcConfig, init_shell: bool) -> Result<Runtime> {
    config.validate().context("invalid configuration")?;

    let runner = ShellRunner::new(&config.shell.executable);
    if init_shell {
        runner
            .init(config.shell.init_file.as_deref())
            .await
            .context("failed to initialise shell")?;
    }

    let events = Arc::new(EventBroadcaster::new());
    let scheduler = Arc::new(Scheduler::with_config(SchedulerConfig {
        tick: Duration::from_millis(config.watch.tick_ms),
        jitter: true,
    }));
    let deps = Collaborators {
        inspector: Arc::new(DockerCli::new(&config.docker.binary)),
        processes: Arc::new(OsProcessTable),
        runner: Arc::new(runner),
        publisher: events.clone(),
    };

    let factory = ControllerFactory::new(
        ControllerSettings::from_config(config),
        Arc::clone(&scheduler),
        deps,
    );
    let classifier = PatternClassifier::from_config(&config.discovery)?;
    let root = config.repos_dir();
    let catalog = ServiceCatalog::discover(&root, &classifier, &factory)
        .with_context(|| format!("cannot build service catalog from {}", root.display()))?;

    Ok(Runtime {
        catalog,
        scheduler,
        events,
    })
}

fn list(rt: &Runtime, json: bool) -> Result<()> {
    let services = rt.catalog.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }
    for svc in services {
        println!("{}\t{}\t{}", svc.name, svc.kind, svc.path.display());
    }
    Ok(())
}

async fn watch_services(rt: Runtime, names: Vec<String>) -> Result<()> {
    let mut events = rt.events.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::clone(&rt.scheduler);
    let engine = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let watched = if names.is_empty() {
        rt.catalog.watch_all()?
    } else {
        for name in &names {
            rt.catalog.register_status_watcher(name)?;
        }
        names.len()
    };
    info!(services = watched, "watching service status");

    // Report the current state right away instead of after the first period.
    for controller in rt.catalog.controllers() {
        if names.is_empty() || names.iter().any(|n| n == controller.name()) {
            if let Err(e) = controller.refresh_status().await {
                warn!(service = %controller.name(), error = %e, "initial status refresh failed");
            }
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => {
                if !print_event(event)? {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    engine.await??;
    Ok(())
}

/// Drive the scheduler until the startup watcher of `name` removes itself.
async fn follow_startup(rt: &Runtime, name: &str) -> Result<()> {
    let controller = rt.catalog.get(name)?;
    if !controller.startup_watcher_active() {
        return Ok(());
    }

    let mut events = rt.events.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::clone(&rt.scheduler);
    let engine = tokio::spawn(async move { scheduler.run(shutdown_rx).await });
    info!(service = %name, "following startup");

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => {
                if !print_event(event)? {
                    break;
                }
            }
            _ = poll.tick() => {
                if !controller.startup_watcher_active() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    engine.await??;
    Ok(())
}

/// Print one status event as a JSON line. `false` once the channel closed.
fn print_event(event: Result<StatusEvent, broadcast::error::RecvError>) -> Result<bool> {
    match event {
        Ok(event) => println!("{}", serde_json::to_string(&event)?),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "status events dropped");
        }
        Err(broadcast::error::RecvError::Closed) => return Ok(false),
    }
    Ok(true)
}
