//! Registry replication configuration.
//!
//! A configuration is always put as a whole: the service replaces the
//! previous configuration, it never merges rules.

use serde::{Deserialize, Serialize};

/// A registry (account) in a region which receives replicated images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestination {
    /// Destination region, e.g. `us-west-2`.
    pub region: String,

    /// Destination registry id (the AWS account id).
    pub registry_id: String,
}

impl ReplicationDestination {
    /// Create a destination from a region and registry id.
    pub fn new(region: impl Into<String>, registry_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            registry_id: registry_id.into(),
        }
    }
}

/// Kinds of repository filter. The service only supports prefix matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryFilterType {
    /// Match repositories whose name starts with the filter.
    #[default]
    PrefixMatch,
}

/// Limits a replication rule to some repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryFilter {
    /// The repository name prefix.
    pub filter: String,

    /// How the filter is applied.
    #[serde(default)]
    pub filter_type: RepositoryFilterType,
}

impl RepositoryFilter {
    /// Match repositories whose name starts with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            filter: prefix.into(),
            filter_type: RepositoryFilterType::PrefixMatch,
        }
    }
}

/// Replicate (some) repositories to a set of destinations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRule {
    /// Where images are copied to.
    pub destinations: Vec<ReplicationDestination>,

    /// Which repositories are copied. Empty means every repository.
    #[serde(default)]
    pub repository_filters: Vec<RepositoryFilter>,
}

impl ReplicationRule {
    /// A rule replicating every repository to `destinations`.
    pub fn new(destinations: Vec<ReplicationDestination>) -> Self {
        Self {
            destinations,
            repository_filters: Vec::new(),
        }
    }

    /// Restrict this rule to repositories matching `filter`.
    pub fn with_filter(mut self, filter: RepositoryFilter) -> Self {
        self.repository_filters.push(filter);
        self
    }
}

/// The full replication configuration of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationConfiguration {
    /// Replication rules, applied independently.
    pub rules: Vec<ReplicationRule>,
}

impl From<Vec<ReplicationRule>> for ReplicationConfiguration {
    fn from(rules: Vec<ReplicationRule>) -> Self {
        Self { rules }
    }
}
