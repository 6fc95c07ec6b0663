//! Registry node configuration.

use infrasim_core::units::deserialize_bytes;
use serde::{Deserialize, Serialize};

use crate::scan::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagSpec {
    pub name: String,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub size_bytes: u64,
    /// Manifest text the digest is computed from; defaults to the reference.
    pub manifest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySpec {
    pub name: String,
    pub tags: Vec<TagSpec>,
}

/// A project and the content it starts with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSpec {
    pub name: String,
    pub public: bool,
    /// Storage limit in bytes; 0 means unlimited.
    #[serde(deserialize_with = "deserialize_bytes")]
    pub storage_quota: u64,
    /// Scan every pushed artifact.
    pub auto_scan: bool,
    /// Refuse pulls of artifacts whose last scan found this severity or worse.
    pub prevent_vulnerable: Option<Severity>,
    pub repositories: Vec<RepositorySpec>,
}

impl ProjectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub projects: Vec<ProjectSpec>,
    /// Time a requested scan waits before it starts running.
    pub scan_queue_secs: u64,
    /// Time a scan spends running.
    pub scan_duration_secs: u64,
    /// Artifacts larger than this fail their scan.
    #[serde(deserialize_with = "deserialize_bytes")]
    pub max_scan_size_bytes: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            scan_queue_secs: 2,
            scan_duration_secs: 10,
            max_scan_size_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}
