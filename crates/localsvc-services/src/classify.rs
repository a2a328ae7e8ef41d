//! Deciding which checkouts are managed services.

use localsvc_core::config::DiscoveryConfig;
use regex::Regex;

use crate::error::Result;
use crate::types::ServiceKind;

/// Outcome of classifying a directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Recognized(ServiceKind),
    Unrecognized,
}

pub trait Classifier: Send + Sync {
    fn classify(&self, name: &str) -> Classification;
}

/// Ordered `(pattern, kind)` rules; the first pattern found anywhere in the
/// name decides the kind.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    rules: Vec<(Regex, ServiceKind)>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, pattern: &str, kind: ServiceKind) -> Result<Self> {
        self.rules.push((Regex::new(pattern)?, kind));
        Ok(self)
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        Self::new().with_rule(&config.api_pattern, ServiceKind::Api)
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, name: &str) -> Classification {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(name))
            .map_or(Classification::Unrecognized, |(_, kind)| {
                Classification::Recognized(*kind)
            })
    }
}
