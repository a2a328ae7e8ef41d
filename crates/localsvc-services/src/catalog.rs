//! Discovery of service checkouts and the immutable catalog built from it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use localsvc_scheduler::Scheduler;
use tracing::{debug, info, warn};

use crate::classify::{Classification, Classifier};
use crate::controller::{Collaborators, ControllerSettings, ServiceController};
use crate::error::{Result, ServiceError};
use crate::types::{RunState, ServiceDetails, ServiceIdentity, ServiceKind};

/// Builds controllers that share one scheduler and one set of collaborators.
pub struct ControllerFactory {
    settings: Arc<ControllerSettings>,
    scheduler: Arc<Scheduler>,
    deps: Collaborators,
}

impl ControllerFactory {
    pub fn new(settings: ControllerSettings, scheduler: Arc<Scheduler>, deps: Collaborators) -> Self {
        Self {
            settings: Arc::new(settings),
            scheduler,
            deps,
        }
    }

    pub fn build(&self, identity: ServiceIdentity, kind: ServiceKind) -> Arc<ServiceController> {
        ServiceController::new(
            identity,
            kind,
            Arc::clone(&self.settings),
            Arc::clone(&self.scheduler),
            self.deps.clone(),
        )
    }
}

/// Every recognised service, keyed by directory name. Built once by
/// [`ServiceCatalog::discover`] and never mutated afterwards.
pub struct ServiceCatalog {
    services: HashMap<String, Arc<ServiceController>>,
}

impl ServiceCatalog {
    /// Scan the immediate subdirectories of `root`. Entries that are not
    /// directories or that the classifier does not recognise are skipped.
    /// Failing to list `root` is an error.
    pub fn discover(
        root: &Path,
        classifier: &dyn Classifier,
        factory: &ControllerFactory,
    ) -> Result<Self> {
        let discovery_error = |source| ServiceError::Discovery {
            path: root.to_path_buf(),
            source,
        };

        let mut services = HashMap::new();
        for entry in std::fs::read_dir(root).map_err(discovery_error)? {
            let entry = entry.map_err(discovery_error)?;
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Classification::Recognized(kind) = classifier.classify(&name) else {
                debug!(name = %name, "skipping unrecognised directory");
                continue;
            };

            let identity = ServiceIdentity {
                name: name.clone(),
                path: entry.path(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            };
            debug!(name = %name, kind = %kind, "service discovered");
            services.insert(name, factory.build(identity, kind));
        }

        info!(root = %root.display(), count = services.len(), "service discovery complete");
        Ok(Self { services })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Details of every service, sorted case-insensitively by name.
    pub fn list(&self) -> Vec<ServiceDetails> {
        let mut details: Vec<ServiceDetails> =
            self.services.values().map(|c| c.details()).collect();
        details.sort_by_cached_key(|d| (d.name.to_lowercase(), d.name.clone()));
        details
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ServiceController>> {
        self.services
            .get(name)
            .ok_or_else(|| ServiceError::ServiceNotFound {
                name: name.to_string(),
            })
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Arc<ServiceController>> {
        self.services.values()
    }

    pub async fn status(&self, name: &str) -> Result<RunState> {
        self.get(name)?.status().await
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.get(name)?.start().await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.get(name)?.stop().await
    }

    pub fn notification_channel(&self, name: &str) -> Result<String> {
        Ok(self.get(name)?.notification_channel())
    }

    pub fn register_status_watcher(&self, name: &str) -> Result<()> {
        self.get(name)?.register_status_watcher()
    }

    /// Register the steady status watcher of every service. Returns how many
    /// services are being watched.
    pub fn watch_all(&self) -> Result<usize> {
        for controller in self.services.values() {
            controller.register_status_watcher()?;
        }
        Ok(self.services.len())
    }
}
