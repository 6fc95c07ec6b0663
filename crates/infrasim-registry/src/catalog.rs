//! Projects, repositories and tags, plus the name rules and reference
//! syntax used to address them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ProjectSpec;
use crate::error::{RegistryError, RegistryResult};
use crate::scan::{ScanRecord, Severity};

const MAX_PROJECT_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

fn invalid(kind: &'static str, name: &str, reason: &str) -> RegistryError {
    RegistryError::InvalidName {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// `[a-z0-9]` runs joined by single `.`, `_` or `-`.
fn is_path_component(s: &str) -> bool {
    let mut prev_sep = true;
    for c in s.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_sep = false;
        } else if matches!(c, '.' | '_' | '-') && !prev_sep {
            prev_sep = true;
        } else {
            return false;
        }
    }
    !s.is_empty() && !prev_sep
}

pub fn validate_project_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() || name.len() > MAX_PROJECT_NAME_LEN {
        return Err(invalid("project", name, "must be 1-255 characters"));
    }
    if !is_path_component(name) {
        return Err(invalid(
            "project",
            name,
            "use lowercase letters, digits and single separators (. _ -)",
        ));
    }
    Ok(())
}

/// Repository names may be nested (`team/app`).
pub fn validate_repository_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() || !name.split('/').all(is_path_component) {
        return Err(invalid(
            "repository",
            name,
            "use '/'-separated lowercase components",
        ));
    }
    Ok(())
}

pub fn validate_tag_name(name: &str) -> RegistryResult<()> {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok
        || name.len() > MAX_TAG_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid("tag", name, "must match [A-Za-z0-9_][A-Za-z0-9_.-]{0,127}"));
    }
    Ok(())
}

/// `project/repository`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoPath {
    pub project: String,
    pub repository: String,
}

impl RepoPath {
    pub fn parse(s: &str) -> RegistryResult<Self> {
        let (project, repository) = s
            .split_once('/')
            .ok_or_else(|| RegistryError::InvalidReference(s.to_string()))?;
        if project.is_empty() || repository.is_empty() {
            return Err(RegistryError::InvalidReference(s.to_string()));
        }
        Ok(Self {
            project: project.to_string(),
            repository: repository.to_string(),
        })
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.repository)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Tag(String),
    Digest(String),
}

/// `project/repository:tag` or `project/repository@sha256:...`. A missing
/// tag means `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub repo: RepoPath,
    pub selector: Selector,
}

impl ArtifactRef {
    pub fn parse(s: &str) -> RegistryResult<Self> {
        if let Some((path, digest)) = s.split_once('@') {
            if !digest.starts_with("sha256:") {
                return Err(RegistryError::InvalidReference(s.to_string()));
            }
            return Ok(Self {
                repo: RepoPath::parse(path)?,
                selector: Selector::Digest(digest.to_string()),
            });
        }
        // A ':' before the last '/' would be a registry port, which a
        // reference here never carries.
        let (path, tag) = match s.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (s, "latest"),
        };
        Ok(Self {
            repo: RepoPath::parse(path)?,
            selector: Selector::Tag(tag.to_string()),
        })
    }

    pub fn tag(repo: RepoPath, tag: impl Into<String>) -> Self {
        Self {
            repo,
            selector: Selector::Tag(tag.into()),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Selector::Tag(tag) => write!(f, "{}:{}", self.repo, tag),
            Selector::Digest(digest) => write!(f, "{}@{}", self.repo, digest),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub digest: String,
    pub size_bytes: u64,
    pub pushed_at_ms: u64,
    pub pull_count: u64,
    pub scan: Option<ScanRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub pull_count: u64,
    pub tags: BTreeMap<String, Tag>,
}

impl Repository {
    pub fn new(name: impl Into<String>, now_ms: u64) -> Self {
        Self {
            name: name.into(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            pull_count: 0,
            tags: BTreeMap::new(),
        }
    }

    pub fn tag_by_digest(&self, digest: &str) -> Option<&Tag> {
        self.tags.values().find(|t| t.digest == digest)
    }

    pub fn size_bytes(&self) -> u64 {
        unique_sizes(self.tags.values())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub public: bool,
    pub storage_quota: u64,
    pub auto_scan: bool,
    pub prevent_vulnerable: Option<Severity>,
    pub created_at_ms: u64,
    pub repositories: BTreeMap<String, Repository>,
}

impl Project {
    pub fn from_spec(spec: &ProjectSpec, now_ms: u64) -> Self {
        Self {
            name: spec.name.clone(),
            public: spec.public,
            storage_quota: spec.storage_quota,
            auto_scan: spec.auto_scan,
            prevent_vulnerable: spec.prevent_vulnerable,
            created_at_ms: now_ms,
            repositories: BTreeMap::new(),
        }
    }

    /// Apply settings from a spec, keeping content.
    pub fn apply_settings(&mut self, spec: &ProjectSpec) {
        self.public = spec.public;
        self.storage_quota = spec.storage_quota;
        self.auto_scan = spec.auto_scan;
        self.prevent_vulnerable = spec.prevent_vulnerable;
    }

    /// Storage used, counting each distinct digest once.
    pub fn used_bytes(&self) -> u64 {
        unique_sizes(self.repositories.values().flat_map(|r| r.tags.values()))
    }

    pub fn tag_count(&self) -> usize {
        self.repositories.values().map(|r| r.tags.len()).sum()
    }
}

fn unique_sizes<'a>(tags: impl Iterator<Item = &'a Tag>) -> u64 {
    let mut by_digest = BTreeMap::new();
    for tag in tags {
        by_digest.insert(tag.digest.as_str(), tag.size_bytes);
    }
    by_digest.values().sum()
}
