//! The registry engine: project, repository and tag catalog, image
//! push/pull, and vulnerability scans.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use infrasim_core::{
    decode_config, CommandResult, ComponentKind, CoreError, CoreResult, EngineContext,
    Reconfigure, RoutingEngine, SimClock,
};
use infrasim_metrics::{MetricsAccumulator, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::catalog::{
    validate_project_name, validate_repository_name, validate_tag_name, ArtifactRef, Project,
    RepoPath, Repository, Selector, Tag,
};
use crate::config::{ProjectSpec, RegistryConfig};
use crate::error::{RegistryError, RegistryResult};
use crate::scan::{ScanRecord, ScanReport, ScanStatus, Severity, VulnerabilityCounts};

const PUSH_COST_US: u64 = 40_000;
const PULL_COST_US: u64 = 15_000;
const PUSH_PER_MIB_US: u64 = 8_000;
const PULL_PER_MIB_US: u64 = 4_000;
const SCAN_COST_US: u64 = 2_000;
const ADMIN_COST_US: u64 = 5_000;
const LIST_COST_US: u64 = 1_000;
const REJECT_COST_US: u64 = 500;

const MIB: u64 = 1024 * 1024;

fn digest_of(manifest: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(manifest.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub reference: String,
    pub digest: String,
    pub size_bytes: u64,
    pub repository_created: bool,
    /// Digest the tag pointed at before this push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
    /// Status of the scan started by the project's auto-scan setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub reference: String,
    pub digest: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub public: bool,
    pub repository_count: usize,
    pub tag_count: usize,
    pub storage_bytes: u64,
    pub storage_quota: u64,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    /// Full name, `project/repository`.
    pub name: String,
    pub tag_count: usize,
    pub pull_count: u64,
    pub size_bytes: u64,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub name: String,
    pub digest: String,
    pub size_bytes: u64,
    pub pushed_at_ms: u64,
    pub pull_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanReport>,
}

/// Traffic counters, zeroed by `reset_stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounters {
    pub pushes: u64,
    pub pulls: u64,
    pub bytes_pushed: u64,
    pub bytes_pulled: u64,
    pub scans_requested: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTally {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub error: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetrics {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub project_count: usize,
    pub repository_count: usize,
    pub tag_count: usize,
    pub storage_bytes: u64,
    #[serde(flatten)]
    pub counters: RegistryCounters,
    pub scans: ScanTally,
    /// Findings of every completed scan.
    pub vulnerabilities: VulnerabilityCounts,
}

/// A simulated Harbor instance.
pub struct RegistryEngine {
    component_id: String,
    clock: SimClock,
    config: RegistryConfig,
    projects: BTreeMap<String, Project>,
    /// Projects that came from node config rather than runtime commands.
    declared: BTreeSet<String>,
    counters: RegistryCounters,
    metrics: MetricsAccumulator,
}

impl RegistryEngine {
    pub fn new(ctx: EngineContext, config: RegistryConfig) -> RegistryResult<Self> {
        let now = ctx.clock.now_ms();
        let mut engine = Self {
            component_id: ctx.component_id,
            clock: ctx.clock,
            projects: BTreeMap::new(),
            declared: BTreeSet::new(),
            counters: RegistryCounters::default(),
            metrics: MetricsAccumulator::new(now),
            config: config.clone(),
        };
        engine.apply_declared(&config.projects)?;
        debug!(
            component = %engine.component_id,
            projects = engine.projects.len(),
            "registry engine created"
        );
        Ok(engine)
    }

    pub fn from_node(ctx: EngineContext, config: &serde_json::Value) -> CoreResult<Self> {
        let component_id = ctx.component_id.clone();
        let config: RegistryConfig = decode_config(&component_id, config)?;
        Self::new(ctx, config).map_err(|e| CoreError::invalid_config(&component_id, e))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Check every name in `specs` before anything is created.
    fn validate_specs(specs: &[ProjectSpec]) -> RegistryResult<()> {
        let mut seen = BTreeSet::new();
        for spec in specs {
            validate_project_name(&spec.name)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(RegistryError::ProjectExists(spec.name.clone()));
            }
            for repo in &spec.repositories {
                validate_repository_name(&repo.name)?;
                for tag in &repo.tags {
                    validate_tag_name(&tag.name)?;
                }
            }
        }
        Ok(())
    }

    /// Create declared projects and any declared content they are missing.
    /// Existing tags are left alone so their scans and pull counts survive.
    fn apply_declared(&mut self, specs: &[ProjectSpec]) -> RegistryResult<()> {
        Self::validate_specs(specs)?;
        let now = self.clock.now_ms();
        for spec in specs {
            let project = self
                .projects
                .entry(spec.name.clone())
                .or_insert_with(|| Project::from_spec(spec, now));
            project.apply_settings(spec);
            for repo_spec in &spec.repositories {
                let repo = project
                    .repositories
                    .entry(repo_spec.name.clone())
                    .or_insert_with(|| Repository::new(&repo_spec.name, now));
                for tag_spec in &repo_spec.tags {
                    if repo.tags.contains_key(&tag_spec.name) {
                        continue;
                    }
                    let manifest = tag_spec.manifest.clone().unwrap_or_else(|| {
                        format!("{}/{}:{}", spec.name, repo_spec.name, tag_spec.name)
                    });
                    repo.tags.insert(
                        tag_spec.name.clone(),
                        Tag {
                            name: tag_spec.name.clone(),
                            digest: digest_of(&manifest),
                            size_bytes: tag_spec.size_bytes,
                            pushed_at_ms: now,
                            pull_count: 0,
                            scan: None,
                        },
                    );
                }
            }
            self.declared.insert(spec.name.clone());
        }
        Ok(())
    }

    fn account<T>(&mut self, op: &str, cost_us: u64, result: RegistryResult<T>) -> RegistryResult<T> {
        match &result {
            Ok(_) => self.metrics.record(op, cost_us, true),
            Err(e) => {
                self.metrics.record(op, REJECT_COST_US, false);
                debug!(component = %self.component_id, op, error = %e, "registry operation rejected");
            }
        }
        result
    }

    fn project(&self, name: &str) -> RegistryResult<&Project> {
        self.projects
            .get(name)
            .ok_or_else(|| RegistryError::ProjectNotFound(name.to_string()))
    }

    fn project_mut(&mut self, name: &str) -> RegistryResult<&mut Project> {
        self.projects
            .get_mut(name)
            .ok_or_else(|| RegistryError::ProjectNotFound(name.to_string()))
    }

    fn repository(&self, path: &RepoPath) -> RegistryResult<&Repository> {
        self.project(&path.project)?
            .repositories
            .get(&path.repository)
            .ok_or_else(|| RegistryError::RepositoryNotFound(path.to_string()))
    }

    fn tag(&self, reference: &ArtifactRef) -> RegistryResult<&Tag> {
        let repo = self.repository(&reference.repo)?;
        let found = match &reference.selector {
            Selector::Tag(name) => repo.tags.get(name),
            Selector::Digest(digest) => repo.tag_by_digest(digest),
        };
        found.ok_or_else(|| RegistryError::ArtifactNotFound(reference.to_string()))
    }

    fn tag_mut(&mut self, reference: &ArtifactRef) -> RegistryResult<&mut Tag> {
        let repo = self
            .project_mut(&reference.repo.project)?
            .repositories
            .get_mut(&reference.repo.repository)
            .ok_or_else(|| RegistryError::RepositoryNotFound(reference.repo.to_string()))?;
        let found = match &reference.selector {
            Selector::Tag(name) => repo.tags.get_mut(name),
            Selector::Digest(digest) => repo.tags.values_mut().find(|t| &t.digest == digest),
        };
        found.ok_or_else(|| RegistryError::ArtifactNotFound(reference.to_string()))
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub fn create_project(&mut self, spec: ProjectSpec) -> RegistryResult<()> {
        let result = self.try_create_project(spec);
        self.account("create_project", ADMIN_COST_US, result)
    }

    fn try_create_project(&mut self, spec: ProjectSpec) -> RegistryResult<()> {
        Self::validate_specs(std::slice::from_ref(&spec))?;
        if self.projects.contains_key(&spec.name) {
            return Err(RegistryError::ProjectExists(spec.name));
        }
        let name = spec.name.clone();
        self.apply_declared(std::slice::from_ref(&spec))?;
        self.declared.remove(&name);
        debug!(component = %self.component_id, project = %name, "project created");
        Ok(())
    }

    /// Refused while the project owns any repository.
    pub fn delete_project(&mut self, name: &str) -> RegistryResult<()> {
        let result = self.project(name).and_then(|project| {
            if project.repositories.is_empty() {
                Ok(())
            } else {
                Err(RegistryError::ProjectNotEmpty {
                    project: name.to_string(),
                    repositories: project.repositories.len(),
                })
            }
        });
        if result.is_ok() {
            self.projects.remove(name);
            self.declared.remove(name);
            debug!(component = %self.component_id, project = %name, "project deleted");
        }
        self.account("delete_project", ADMIN_COST_US, result)
    }

    pub fn list_projects(&mut self) -> Vec<ProjectSummary> {
        self.metrics.record("list", LIST_COST_US, true);
        self.projects
            .values()
            .map(|p| ProjectSummary {
                name: p.name.clone(),
                public: p.public,
                repository_count: p.repositories.len(),
                tag_count: p.tag_count(),
                storage_bytes: p.used_bytes(),
                storage_quota: p.storage_quota,
                created_at_ms: p.created_at_ms,
            })
            .collect()
    }

    // ── Repositories ─────────────────────────────────────────────────

    pub fn create_repository(&mut self, path: &str) -> RegistryResult<()> {
        let now = self.clock.now_ms();
        let result = RepoPath::parse(path).and_then(|path| {
            validate_repository_name(&path.repository)?;
            let project = self.project_mut(&path.project)?;
            if project.repositories.contains_key(&path.repository) {
                return Err(RegistryError::RepositoryExists(path.to_string()));
            }
            project
                .repositories
                .insert(path.repository.clone(), Repository::new(&path.repository, now));
            Ok(())
        });
        self.account("create_repository", ADMIN_COST_US, result)
    }

    /// Delete a repository and every tag in it. Returns the number of tags
    /// removed.
    pub fn delete_repository(&mut self, path: &str) -> RegistryResult<usize> {
        let result = RepoPath::parse(path).and_then(|path| {
            let removed = self
                .project_mut(&path.project)?
                .repositories
                .remove(&path.repository)
                .ok_or_else(|| RegistryError::RepositoryNotFound(path.to_string()))?;
            Ok(removed.tags.len())
        });
        if let Ok(tags) = &result {
            debug!(component = %self.component_id, repository = %path, tags, "repository deleted");
        }
        self.account("delete_repository", ADMIN_COST_US, result)
    }

    pub fn list_repositories(&mut self, project: &str) -> RegistryResult<Vec<RepositorySummary>> {
        let result = self.project(project).map(|p| {
            p.repositories
                .values()
                .map(|r| RepositorySummary {
                    name: format!("{}/{}", p.name, r.name),
                    tag_count: r.tags.len(),
                    pull_count: r.pull_count,
                    size_bytes: r.size_bytes(),
                    updated_at_ms: r.updated_at_ms,
                })
                .collect()
        });
        self.account("list", LIST_COST_US, result)
    }

    pub fn list_tags(&mut self, path: &str) -> RegistryResult<Vec<TagSummary>> {
        let now = self.clock.now_ms();
        let result = RepoPath::parse(path).and_then(|path| {
            Ok(self
                .repository(&path)?
                .tags
                .values()
                .map(|t| TagSummary {
                    name: t.name.clone(),
                    digest: t.digest.clone(),
                    size_bytes: t.size_bytes,
                    pushed_at_ms: t.pushed_at_ms,
                    pull_count: t.pull_count,
                    scan: t.scan.as_ref().map(|s| s.report(now)),
                })
                .collect::<Vec<_>>())
        });
        self.account("list", LIST_COST_US, result)
    }

    // ── Artifacts ────────────────────────────────────────────────────

    /// Push `size_bytes` under a tag reference. The repository is created on
    /// first push; the digest is the sha256 of `manifest` (or of the
    /// reference and size when none is given).
    pub fn push_image(
        &mut self,
        reference: &str,
        size_bytes: u64,
        manifest: Option<&str>,
    ) -> RegistryResult<PushOutcome> {
        let result = self.try_push(reference, size_bytes, manifest);
        if let Ok(outcome) = &result {
            self.counters.pushes += 1;
            self.counters.bytes_pushed += size_bytes;
            self.metrics.record_bytes(size_bytes, 0);
            debug!(
                component = %self.component_id,
                reference = %outcome.reference,
                digest = %outcome.digest,
                size_bytes,
                "image pushed"
            );
        }
        let cost = PUSH_COST_US + size_bytes / MIB * PUSH_PER_MIB_US;
        self.account("push", cost, result)
    }

    fn try_push(&mut self, reference: &str, size_bytes: u64, manifest: Option<&str>) -> RegistryResult<PushOutcome> {
        let reference = ArtifactRef::parse(reference)?;
        let Selector::Tag(tag_name) = &reference.selector else {
            return Err(RegistryError::InvalidArgument(
                "push needs a tag, not a digest".to_string(),
            ));
        };
        validate_repository_name(&reference.repo.repository)?;
        validate_tag_name(tag_name)?;
        let now = self.clock.now_ms();
        let digest = match manifest {
            Some(m) => digest_of(m),
            None => digest_of(&format!("{reference}:{size_bytes}")),
        };
        let scan_timing = (
            self.config.scan_queue_secs * 1000,
            self.config.scan_duration_secs * 1000,
            self.config.max_scan_size_bytes,
        );

        let project = self.project_mut(&reference.repo.project)?;
        if project.storage_quota > 0 {
            let known = project
                .repositories
                .values()
                .any(|r| r.tag_by_digest(&digest).is_some());
            let requested = if known { 0 } else { size_bytes };
            let used = project.used_bytes();
            if used + requested > project.storage_quota {
                return Err(RegistryError::QuotaExceeded {
                    project: project.name.clone(),
                    used,
                    requested,
                    limit: project.storage_quota,
                });
            }
        }
        let auto_scan = project.auto_scan;
        let repository_created = !project.repositories.contains_key(&reference.repo.repository);
        let repo = project
            .repositories
            .entry(reference.repo.repository.clone())
            .or_insert_with(|| Repository::new(&reference.repo.repository, now));
        repo.updated_at_ms = now;

        let previous = repo.tags.remove(tag_name);
        let replaced = previous
            .as_ref()
            .filter(|t| t.digest != digest)
            .map(|t| t.digest.clone());
        // Re-pushing identical content keeps the tag's history.
        let mut tag = match previous {
            Some(t) if t.digest == digest => t,
            _ => Tag {
                name: tag_name.clone(),
                digest: digest.clone(),
                size_bytes,
                pushed_at_ms: now,
                pull_count: 0,
                scan: None,
            },
        };
        let (queued_ms, duration_ms, max_scan) = scan_timing;
        let mut scan = None;
        if auto_scan && tag.scan.as_ref().is_none_or(|s| !s.status(now).in_progress()) {
            let mut record = ScanRecord::new(now, queued_ms, duration_ms, &digest);
            if size_bytes > max_scan {
                record = record.failing(format!("artifact of {size_bytes} bytes exceeds the scanner limit"));
            }
            scan = Some(record.status(now));
            tag.scan = Some(record);
        }
        repo.tags.insert(tag_name.clone(), tag);
        if scan.is_some() {
            self.counters.scans_requested += 1;
        }

        Ok(PushOutcome {
            reference: reference.to_string(),
            digest,
            size_bytes,
            repository_created,
            replaced,
            scan,
        })
    }

    pub fn pull_image(&mut self, reference: &str) -> RegistryResult<PullOutcome> {
        let result = self.try_pull(reference);
        match &result {
            Ok(outcome) => {
                self.metrics.record_hit();
                self.metrics.record_bytes(0, outcome.size_bytes);
                self.counters.pulls += 1;
                self.counters.bytes_pulled += outcome.size_bytes;
            }
            Err(RegistryError::PullBlocked { .. }) => {}
            Err(_) => self.metrics.record_miss(),
        }
        let cost = match &result {
            Ok(outcome) => PULL_COST_US + outcome.size_bytes / MIB * PULL_PER_MIB_US,
            Err(_) => REJECT_COST_US,
        };
        self.account("pull", cost, result)
    }

    fn try_pull(&mut self, reference: &str) -> RegistryResult<PullOutcome> {
        let reference = ArtifactRef::parse(reference)?;
        let now = self.clock.now_ms();
        let project = self.project_mut(&reference.repo.project)?;
        let threshold = project.prevent_vulnerable;
        let project_name = project.name.clone();
        let repo = project
            .repositories
            .get_mut(&reference.repo.repository)
            .ok_or_else(|| RegistryError::RepositoryNotFound(reference.repo.to_string()))?;
        let tag = match &reference.selector {
            Selector::Tag(name) => repo.tags.get_mut(name),
            Selector::Digest(digest) => repo.tags.values_mut().find(|t| &t.digest == digest),
        }
        .ok_or_else(|| RegistryError::ArtifactNotFound(reference.to_string()))?;

        if let (Some(threshold), Some(scan)) = (threshold, &tag.scan) {
            if scan.status(now) == ScanStatus::Completed {
                let severity = scan.counts.severity();
                if severity != Severity::None && severity >= threshold {
                    return Err(RegistryError::PullBlocked {
                        project: project_name,
                        severity,
                    });
                }
            }
        }
        tag.pull_count += 1;
        let outcome = PullOutcome {
            reference: reference.to_string(),
            digest: tag.digest.clone(),
            size_bytes: tag.size_bytes,
        };
        repo.pull_count += 1;
        Ok(outcome)
    }

    pub fn delete_tag(&mut self, reference: &str) -> RegistryResult<()> {
        let now = self.clock.now_ms();
        let result = ArtifactRef::parse(reference).and_then(|reference| {
            let name = self.tag(&reference)?.name.clone();
            let repo = self
                .project_mut(&reference.repo.project)?
                .repositories
                .get_mut(&reference.repo.repository)
                .ok_or_else(|| RegistryError::RepositoryNotFound(reference.repo.to_string()))?;
            repo.tags.remove(&name);
            repo.updated_at_ms = now;
            Ok(())
        });
        self.account("delete_tag", ADMIN_COST_US, result)
    }

    // ── Scans ────────────────────────────────────────────────────────

    /// Request a scan. Fails with "scan already in progress" while a
    /// previous scan of the same artifact is pending or running.
    pub fn scan_vulnerability(&mut self, reference: &str) -> RegistryResult<ScanReport> {
        let now = self.clock.now_ms();
        let queued_ms = self.config.scan_queue_secs * 1000;
        let duration_ms = self.config.scan_duration_secs * 1000;
        let max_scan = self.config.max_scan_size_bytes;
        let result = ArtifactRef::parse(reference).and_then(|reference| {
            let tag = self.tag_mut(&reference)?;
            if tag.scan.as_ref().is_some_and(|s| s.status(now).in_progress()) {
                return Err(RegistryError::ScanInProgress {
                    reference: reference.to_string(),
                });
            }
            let mut record = ScanRecord::new(now, queued_ms, duration_ms, &tag.digest);
            if tag.size_bytes > max_scan {
                record = record.failing(format!(
                    "artifact of {} bytes exceeds the scanner limit of {max_scan}",
                    tag.size_bytes
                ));
            }
            let report = record.report(now);
            tag.scan = Some(record);
            Ok(report)
        });
        if result.is_ok() {
            self.counters.scans_requested += 1;
            debug!(component = %self.component_id, reference, "scan requested");
        }
        self.account("scan", SCAN_COST_US, result)
    }

    pub fn scan_report(&self, reference: &str) -> RegistryResult<ScanReport> {
        let now = self.clock.now_ms();
        let reference = ArtifactRef::parse(reference)?;
        self.tag(&reference)?
            .scan
            .as_ref()
            .map(|s| s.report(now))
            .ok_or_else(|| RegistryError::NotScanned(reference.to_string()))
    }

    /// Log scans that finished since the last call.
    fn announce_finished_scans(&mut self) {
        let now = self.clock.now_ms();
        for project in self.projects.values_mut() {
            for repo in project.repositories.values_mut() {
                for tag in repo.tags.values_mut() {
                    let Some(scan) = tag.scan.as_mut() else {
                        continue;
                    };
                    if scan.announced || scan.status(now).in_progress() {
                        continue;
                    }
                    scan.announced = true;
                    debug!(
                        component = %self.component_id,
                        repository = %format!("{}/{}", project.name, repo.name),
                        tag = %tag.name,
                        status = ?scan.status(now),
                        severity = %scan.counts.severity(),
                        "scan finished"
                    );
                }
            }
        }
    }

    // ── Metrics ──────────────────────────────────────────────────────

    pub fn get_metrics(&self) -> RegistryMetrics {
        let now = self.clock.now_ms();
        let mut scans = ScanTally::default();
        let mut vulnerabilities = VulnerabilityCounts::default();
        let mut repository_count = 0;
        let mut tag_count = 0;
        let mut storage_bytes = 0;
        for project in self.projects.values() {
            repository_count += project.repositories.len();
            tag_count += project.tag_count();
            storage_bytes += project.used_bytes();
            for tag in project.repositories.values().flat_map(|r| r.tags.values()) {
                let Some(scan) = &tag.scan else { continue };
                match scan.status(now) {
                    ScanStatus::Pending => scans.pending += 1,
                    ScanStatus::Running => scans.running += 1,
                    ScanStatus::Error => scans.error += 1,
                    ScanStatus::Completed => {
                        scans.completed += 1;
                        vulnerabilities.add(&scan.counts);
                    }
                }
            }
        }
        RegistryMetrics {
            snapshot: self.metrics.snapshot(now),
            project_count: self.projects.len(),
            repository_count,
            tag_count,
            storage_bytes,
            counters: self.counters.clone(),
            scans,
            vulnerabilities,
        }
    }
}

impl RoutingEngine for RegistryEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::ImageRegistry
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn execute(&mut self, command: &str, args: &[String]) -> CommandResult {
        let command = command.to_ascii_uppercase();
        let arity = |min: usize, max: usize| {
            if args.len() < min || args.len() > max {
                Err(RegistryError::WrongArity(command.to_ascii_lowercase()))
            } else {
                Ok(())
            }
        };
        match command.as_str() {
            "PROJECTS" => CommandResult::from_serialize(
                arity(0, 0).map(|_| self.list_projects()),
            ),
            "CREATE_PROJECT" => CommandResult::from_result(arity(1, 2).and_then(|_| {
                let mut spec = ProjectSpec::new(args[0].clone());
                spec.public = args.get(1).is_some_and(|a| a.eq_ignore_ascii_case("public"));
                self.create_project(spec).map(|_| "OK")
            })),
            "DELETE_PROJECT" => CommandResult::from_result(
                arity(1, 1).and_then(|_| self.delete_project(&args[0]).map(|_| "OK")),
            ),
            "REPOS" => CommandResult::from_serialize(
                arity(1, 1).and_then(|_| self.list_repositories(&args[0])),
            ),
            "CREATE_REPO" => CommandResult::from_result(
                arity(1, 1).and_then(|_| self.create_repository(&args[0]).map(|_| "OK")),
            ),
            "DELETE_REPO" => CommandResult::from_result(
                arity(1, 1).and_then(|_| self.delete_repository(&args[0]).map(|n| n as u64)),
            ),
            "TAGS" => CommandResult::from_serialize(
                arity(1, 1).and_then(|_| self.list_tags(&args[0])),
            ),
            "PUSH" => CommandResult::from_serialize(arity(2, 3).and_then(|_| {
                let size = infrasim_core::units::parse_bytes(&args[1])
                    .ok_or_else(|| RegistryError::InvalidArgument(format!("size '{}'", args[1])))?;
                self.push_image(&args[0], size, args.get(2).map(String::as_str))
            })),
            "PULL" => CommandResult::from_serialize(
                arity(1, 1).and_then(|_| self.pull_image(&args[0])),
            ),
            "DELETE_TAG" | "UNTAG" => CommandResult::from_result(
                arity(1, 1).and_then(|_| self.delete_tag(&args[0]).map(|_| "OK")),
            ),
            "SCAN" => CommandResult::from_serialize(
                arity(1, 1).and_then(|_| self.scan_vulnerability(&args[0])),
            ),
            "SCAN_STATUS" => CommandResult::from_serialize(
                arity(1, 1).and_then(|_| self.scan_report(&args[0])),
            ),
            "METRICS" => CommandResult::from_serialize(
                arity(0, 0).map(|_| self.get_metrics()),
            ),
            _ => CommandResult::err(RegistryError::UnknownCommand(command.to_ascii_lowercase())),
        }
    }

    fn tick(&mut self) {
        self.announce_finished_scans();
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now_ms())
    }

    fn reset_stats(&mut self) {
        self.metrics.reset(self.clock.now_ms());
        self.counters = RegistryCounters::default();
    }

    /// Scan settings apply to scans requested from now on. Declared projects
    /// that disappear from the config are deleted when empty and kept (as
    /// runtime projects) otherwise.
    fn reconfigure(&mut self, config: &serde_json::Value) -> CoreResult<Reconfigure> {
        let new: RegistryConfig = decode_config(&self.component_id, config)?;
        Self::validate_specs(&new.projects)
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;

        let wanted: BTreeSet<&str> = new.projects.iter().map(|p| p.name.as_str()).collect();
        let stale: Vec<String> = self
            .declared
            .iter()
            .filter(|name| !wanted.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            self.declared.remove(&name);
            let empty = self
                .projects
                .get(&name)
                .is_some_and(|p| p.repositories.is_empty());
            if empty {
                self.projects.remove(&name);
            } else {
                warn!(
                    component = %self.component_id,
                    project = %name,
                    "project removed from config still has repositories; keeping it"
                );
            }
        }

        self.apply_declared(&new.projects)
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;
        self.config = new;
        info!(
            component = %self.component_id,
            projects = self.projects.len(),
            "registry reconfigured"
        );
        Ok(Reconfigure::Applied)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RepositorySpec, TagSpec};

    fn engine_with(config: RegistryConfig) -> (RegistryEngine, SimClock) {
        let clock = SimClock::new(0);
        let engine = RegistryEngine::new(EngineContext::new("harbor-1", clock.clone()), config).unwrap();
        (engine, clock)
    }

    fn engine() -> (RegistryEngine, SimClock) {
        let mut config = RegistryConfig::default();
        config.projects.push(ProjectSpec::new("library"));
        engine_with(config)
    }

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    // ── Projects ─────────────────────────────────────────────────────

    #[test]
    fn project_lifecycle() {
        let (mut e, _) = engine();
        e.create_project(ProjectSpec::new("team-a")).unwrap();
        assert_eq!(
            e.create_project(ProjectSpec::new("team-a")),
            Err(RegistryError::ProjectExists("team-a".into()))
        );
        assert!(e.create_project(ProjectSpec::new("Bad Name")).is_err());
        assert_eq!(e.list_projects().len(), 2);
        e.delete_project("team-a").unwrap();
        assert_eq!(
            e.delete_project("team-a"),
            Err(RegistryError::ProjectNotFound("team-a".into()))
        );
    }

    #[test]
    fn project_with_repositories_cannot_be_deleted() {
        let (mut e, _) = engine();
        e.create_repository("library/nginx").unwrap();
        let err = e.delete_project("library").unwrap_err();
        assert_eq!(
            err,
            RegistryError::ProjectNotEmpty {
                project: "library".into(),
                repositories: 1
            }
        );
        assert_eq!(e.list_repositories("library").unwrap().len(), 1);

        e.delete_repository("library/nginx").unwrap();
        e.delete_project("library").unwrap();
    }

    // ── Repositories & tags ──────────────────────────────────────────

    #[test]
    fn push_creates_repository_and_digest() {
        let (mut e, _) = engine();
        let out = e.push_image("library/nginx:1.25", 10 * MIB, None).unwrap();
        assert!(out.repository_created);
        assert!(out.digest.starts_with("sha256:"));
        assert_eq!(out.digest.len(), "sha256:".len() + 64);

        let again = e.push_image("library/nginx:latest", 10 * MIB, Some("manifest-b")).unwrap();
        assert!(!again.repository_created);
        assert_eq!(again.digest, digest_of("manifest-b"));

        let tags = e.list_tags("library/nginx").unwrap();
        assert_eq!(tags.len(), 2);
        assert!(e.push_image("missing/nginx:1", 1, None).is_err());
        assert!(e.push_image("library/nginx@sha256:abc", 1, None).is_err());
    }

    #[test]
    fn repush_reports_replaced_digest() {
        let (mut e, _) = engine();
        let first = e.push_image("library/app:v1", 100, Some("a")).unwrap();
        let same = e.push_image("library/app:v1", 100, Some("a")).unwrap();
        assert_eq!(same.replaced, None);
        let changed = e.push_image("library/app:v1", 100, Some("b")).unwrap();
        assert_eq!(changed.replaced, Some(first.digest));
    }

    #[test]
    fn delete_repository_cascades_tags() {
        let (mut e, _) = engine();
        e.push_image("library/nginx:1", 100, None).unwrap();
        e.push_image("library/nginx:2", 100, None).unwrap();
        assert_eq!(e.delete_repository("library/nginx"), Ok(2));
        assert_eq!(e.get_metrics().tag_count, 0);
        assert!(e.list_tags("library/nginx").is_err());
    }

    #[test]
    fn pull_by_tag_and_digest() {
        let (mut e, _) = engine();
        let pushed = e.push_image("library/redis:7", 2 * MIB, None).unwrap();
        let by_tag = e.pull_image("library/redis:7").unwrap();
        assert_eq!(by_tag.digest, pushed.digest);
        let by_digest = e
            .pull_image(&format!("library/redis@{}", pushed.digest))
            .unwrap();
        assert_eq!(by_digest.size_bytes, 2 * MIB);
        assert!(e.pull_image("library/redis:8").is_err());

        let m = e.get_metrics();
        assert_eq!(m.counters.pulls, 2);
        assert_eq!(m.snapshot.hit_count, 2);
        assert_eq!(m.snapshot.miss_count, 1);
        assert_eq!(e.list_repositories("library").unwrap()[0].pull_count, 2);
    }

    #[test]
    fn delete_tag() {
        let (mut e, _) = engine();
        e.push_image("library/redis:7", 1, None).unwrap();
        e.delete_tag("library/redis:7").unwrap();
        assert!(e.delete_tag("library/redis:7").is_err());
        assert_eq!(e.list_repositories("library").unwrap()[0].tag_count, 0);
    }

    #[test]
    fn quota_limits_new_content() {
        let mut spec = ProjectSpec::new("small");
        spec.storage_quota = 100;
        let (mut e, _) = engine_with(RegistryConfig {
            projects: vec![spec],
            ..RegistryConfig::default()
        });
        e.push_image("small/app:v1", 80, Some("a")).unwrap();
        // Same content under a second tag costs nothing.
        e.push_image("small/app:v2", 80, Some("a")).unwrap();
        let err = e.push_image("small/app:v3", 30, Some("b")).unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { used: 80, .. }));
    }

    // ── Scans ────────────────────────────────────────────────────────

    #[test]
    fn scan_twice_is_rejected_then_completes() {
        let (mut e, clock) = engine();
        e.push_image("library/nginx:1.25", MIB, None).unwrap();

        let first = e.scan_vulnerability("library/nginx:1.25").unwrap();
        assert_eq!(first.status, ScanStatus::Pending);
        let second = e.scan_vulnerability("library/nginx:1.25").unwrap_err();
        assert_eq!(second.to_string(), "scan already in progress");

        clock.advance_ms(2_000);
        assert_eq!(e.scan_report("library/nginx:1.25").unwrap().status, ScanStatus::Running);
        assert!(e.scan_vulnerability("library/nginx:1.25").is_err());

        clock.advance_ms(10_000);
        let done = e.scan_report("library/nginx:1.25").unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert!(done.counts.is_some());

        // A finished scan can be repeated.
        assert!(e.scan_vulnerability("library/nginx:1.25").is_ok());
    }

    #[test]
    fn oversized_artifact_scan_errors() {
        let (mut e, clock) = engine_with(RegistryConfig {
            projects: vec![ProjectSpec::new("library")],
            max_scan_size_bytes: 1024,
            ..RegistryConfig::default()
        });
        e.push_image("library/huge:1", 4096, None).unwrap();
        e.scan_vulnerability("library/huge:1").unwrap();
        clock.advance_ms(12_000);
        let report = e.scan_report("library/huge:1").unwrap();
        assert_eq!(report.status, ScanStatus::Error);
        assert_eq!(e.get_metrics().scans.error, 1);
    }

    #[test]
    fn auto_scan_and_vulnerable_pull_policy() {
        let mut spec = ProjectSpec::new("secure");
        spec.auto_scan = true;
        spec.prevent_vulnerable = Some(Severity::Low);
        let (mut e, clock) = engine_with(RegistryConfig {
            projects: vec![spec],
            scan_queue_secs: 0,
            scan_duration_secs: 1,
            ..RegistryConfig::default()
        });
        let pushed = e.push_image("secure/app:v1", 10, Some("vulnerable")).unwrap();
        assert_eq!(pushed.scan, Some(ScanStatus::Running));
        // Allowed while the scan has not finished.
        e.pull_image("secure/app:v1").unwrap();

        clock.advance_ms(1_000);
        let counts = VulnerabilityCounts::for_digest(&pushed.digest);
        let pulled = e.pull_image("secure/app:v1");
        if counts.severity() == Severity::None {
            assert!(pulled.is_ok());
        } else {
            assert!(matches!(pulled, Err(RegistryError::PullBlocked { .. })));
        }
    }

    #[test]
    fn scan_unknown_artifact() {
        let (mut e, _) = engine();
        assert!(matches!(
            e.scan_vulnerability("library/none:1"),
            Err(RegistryError::RepositoryNotFound(_))
        ));
        e.push_image("library/app:1", 1, None).unwrap();
        assert!(matches!(
            e.scan_report("library/app:1"),
            Err(RegistryError::NotScanned(_))
        ));
    }

    // ── Metrics & config ─────────────────────────────────────────────

    #[test]
    fn metrics_and_reset() {
        let (mut e, clock) = engine();
        e.push_image("library/a:1", MIB, Some("a")).unwrap();
        e.push_image("library/b:1", MIB, Some("b")).unwrap();
        e.scan_vulnerability("library/a:1").unwrap();
        clock.advance_ms(12_000);

        let m = e.get_metrics();
        assert_eq!(m.project_count, 1);
        assert_eq!(m.repository_count, 2);
        assert_eq!(m.storage_bytes, 2 * MIB);
        assert_eq!(m.counters.pushes, 2);
        assert_eq!(m.scans.completed, 1);
        assert_eq!(m.vulnerabilities, VulnerabilityCounts::for_digest(&digest_of("a")));
        assert_eq!(m.snapshot.network_bytes_in, 2 * MIB);

        e.reset_stats();
        let first = e.get_metrics();
        e.reset_stats();
        assert_eq!(first, e.get_metrics());
        assert_eq!(first.counters, RegistryCounters::default());
        assert_eq!(first.tag_count, 2);
        assert_eq!(first.scans.completed, 1);
    }

    #[test]
    fn declared_content_is_seeded() {
        let config = RegistryConfig {
            projects: vec![ProjectSpec {
                repositories: vec![RepositorySpec {
                    name: "nginx".into(),
                    tags: vec![TagSpec {
                        name: "1.25".into(),
                        size_bytes: 100,
                        manifest: None,
                    }],
                }],
                ..ProjectSpec::new("library")
            }],
            ..RegistryConfig::default()
        };
        let (mut e, _) = engine_with(config);
        assert_eq!(e.pull_image("library/nginx:1.25").unwrap().size_bytes, 100);
    }

    #[test]
    fn reconfigure_keeps_content() {
        let (mut e, _) = engine();
        e.push_image("library/app:1", 1, None).unwrap();
        let applied = e
            .reconfigure(&serde_json::json!({
                "projects": [{"name": "mirror"}],
                "scan_duration_secs": 5
            }))
            .unwrap();
        assert_eq!(applied, Reconfigure::Applied);
        // "library" lost its declaration but still holds a repository.
        let names: Vec<String> = e.list_projects().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["library".to_string(), "mirror".to_string()]);
        assert_eq!(e.config().scan_duration_secs, 5);

        assert!(e
            .reconfigure(&serde_json::json!({"projects": [{"name": "Not Valid"}]}))
            .is_err());
        assert_eq!(e.list_projects().len(), 2);
    }

    #[test]
    fn command_surface() {
        let (mut e, clock) = engine();
        assert!(e.execute("push", &args(&["library/nginx:1.25", "64mb"])).success);
        let pull = e.execute("PULL", &args(&["library/nginx:1.25"]));
        assert_eq!(pull.value.unwrap()["size_bytes"], 64 * MIB);
        assert!(e.execute("SCAN", &args(&["library/nginx:1.25"])).success);
        let again = e.execute("SCAN", &args(&["library/nginx:1.25"]));
        assert_eq!(again.error.as_deref(), Some("scan already in progress"));
        clock.advance_ms(12_000);
        let status = e.execute("SCAN_STATUS", &args(&["library/nginx:1.25"]));
        assert_eq!(status.value.unwrap()["status"], "completed");
        let refused = e.execute("DELETE_PROJECT", &args(&["library"]));
        assert!(!refused.success);
        assert_eq!(e.execute("DELETE_REPO", &args(&["library/nginx"])).as_i64(), Some(1));
        assert!(e.execute("DELETE_PROJECT", &args(&["library"])).success);
        assert!(!e.execute("PUSH", &args(&["library/nginx:1"])).success);
        assert!(!e.execute("FLY", &[]).success);
    }
}
