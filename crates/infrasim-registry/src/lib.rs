//! infrasim-registry: a Harbor-like image registry engine.
//!
//! Projects own repositories, repositories own tags. Each tag points at a
//! sha256 digest and may carry a vulnerability scan whose status moves from
//! `pending` to `running` to `completed` (or `error`) as simulated time
//! passes. A project that still owns repositories cannot be deleted, and a
//! second scan request while one is pending or running is refused with
//! "scan already in progress".

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod scan;

pub use catalog::{ArtifactRef, Project, RepoPath, Repository, Selector, Tag};
pub use config::{ProjectSpec, RegistryConfig, RepositorySpec, TagSpec};
pub use engine::{
    ProjectSummary, PullOutcome, PushOutcome, RegistryCounters, RegistryEngine, RegistryMetrics,
    RepositorySummary, ScanTally, TagSummary,
};
pub use error::{RegistryError, RegistryResult};
pub use scan::{ScanRecord, ScanReport, ScanStatus, Severity, VulnerabilityCounts};
