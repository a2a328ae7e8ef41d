//! `localsvc-core`: configuration and shared error types for localsvc.

pub mod config;
pub mod error;

pub use config::{EnvParam, LocalSvcConfig};
pub use error::{CoreError, Result};
