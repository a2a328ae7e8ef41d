//! `localsvc-services`: discovery and lifecycle control of local service
//! checkouts.
//!
//! Each recognised checkout gets a [`controller::ServiceController`] that
//! derives its [`types::RunState`] from two signals: the pid of a process it
//! launched itself (advisory, bridges the gap until a container shows up)
//! and the container runtime's view of the service container
//! (authoritative). Status changes are pushed to a [`publish::StatusPublisher`]
//! under a per-service topic.
//!
//! External systems sit behind traits so controllers can be driven by fakes:
//!
//! | Trait                          | Production implementation       |
//! |--------------------------------|---------------------------------|
//! | [`inspector::ContainerInspector`] | [`inspector::DockerCli`]     |
//! | [`process::ProcessTable`]      | [`process::OsProcessTable`]     |
//! | [`runner::CommandRunner`]      | [`runner::ShellRunner`]         |
//! | [`publish::StatusPublisher`]   | [`publish::EventBroadcaster`]   |

pub mod catalog;
pub mod classify;
pub mod controller;
pub mod error;
pub mod git;
pub mod inspector;
pub mod process;
pub mod publish;
pub mod runner;
pub mod types;

#[cfg(test)]
mod testing;

pub use catalog::{ControllerFactory, ServiceCatalog};
pub use classify::{Classification, Classifier, PatternClassifier};
pub use controller::{Collaborators, ControllerSettings, ServiceController};
pub use error::{Result, ServiceError};
pub use types::{RunState, ServiceDetails, ServiceIdentity, ServiceKind, ServiceStatus, StatusEvent};
