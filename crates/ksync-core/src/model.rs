use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Ready,
    Indexing,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Ready => "ready",
            RepoStatus::Indexing => "indexing",
            RepoStatus::Error => "error",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub timestamp: u64,
    pub previous_revision: String,
    pub new_revision: String,
    pub files_added: u32,
    pub files_modified: u32,
    pub files_deleted: u32,
    pub chunks_upserted: u32,
    pub chunks_deleted: u32,
    pub duration_ms: u64,
    pub error_count: u32,
    pub outcome: UpdateOutcome,
}

/// Persisted state of one indexed repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub url: String,
    pub branch: String,
    pub local_path: PathBuf,
    pub status: RepoStatus,
    /// Set while an update runs; its presence is the in-progress flag.
    #[serde(default)]
    pub update_started_at: Option<u64>,
    #[serde(default)]
    pub last_indexed_revision: Option<String>,
    #[serde(default)]
    pub last_indexed_at: Option<u64>,
    #[serde(default)]
    pub incremental_update_count: u32,
    #[serde(default)]
    pub last_incremental_update_at: Option<u64>,
    #[serde(default)]
    pub update_history: Vec<UpdateHistoryEntry>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RepositoryRecord {
    pub fn new(name: String, url: String, branch: String, local_path: PathBuf) -> Self {
        Self {
            name,
            url,
            branch,
            local_path,
            status: RepoStatus::Ready,
            update_started_at: None,
            last_indexed_revision: None,
            last_indexed_at: None,
            incremental_update_count: 0,
            last_incremental_update_at: None,
            update_history: Vec::new(),
            error_message: None,
        }
    }

    pub fn update_in_progress(&self) -> bool {
        self.update_started_at.is_some()
    }

    /// Durability checkpoint: flag the record as being updated since `now`.
    pub fn begin_update(&mut self, now: u64) {
        self.update_started_at = Some(now);
        self.status = RepoStatus::Indexing;
    }

    /// Clears the in-progress flag. A record left in `Indexing` falls back to
    /// `Ready`; callers that know better set the status afterwards.
    pub fn clear_update_flag(&mut self) {
        self.update_started_at = None;
        if self.status == RepoStatus::Indexing {
            self.status = RepoStatus::Ready;
        }
    }

    pub fn record_update(&mut self, entry: UpdateHistoryEntry) {
        self.last_indexed_revision = Some(entry.new_revision.clone());
        self.last_indexed_at = Some(entry.timestamp);
        self.last_incremental_update_at = Some(entry.timestamp);
        self.incremental_update_count = self.incremental_update_count.saturating_add(1);
        self.update_history.push(entry);
    }
}

/// GitHub-style `owner/repo` coordinates of a repository.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RepoCoordinates {
    pub owner: String,
    pub repo: String,
}

impl RepoCoordinates {
    /// Parses `https://host/owner/repo(.git)`, `git@host:owner/repo(.git)` or
    /// a bare `owner/repo`.
    pub fn from_url(url: &str) -> Option<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let path = if let Some((_, rest)) = trimmed.split_once("://") {
            rest.split_once('/').map(|(_, path)| path)?
        } else if let Some((prefix, rest)) = trimmed.split_once(':') {
            if prefix.contains('/') {
                return None;
            }
            rest
        } else {
            trimmed
        };
        let mut segments = path.rsplit('/');
        let repo = segments.next()?.to_string();
        let owner = segments.next()?.to_string();
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self { owner, repo })
    }
}

impl fmt::Display for RepoCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadRevision {
    pub sha: String,
    /// First line of the commit message.
    pub message: String,
    pub author: String,
    /// Commit time in epoch seconds, when the remote reported a parsable one.
    pub committed_at: Option<u64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangedPath {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

impl ChangedPath {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Added,
            previous_path: None,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Modified,
            previous_path: None,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Deleted,
            previous_path: None,
        }
    }

    pub fn renamed(previous_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Renamed,
            previous_path: Some(previous_path.into()),
        }
    }
}

/// Ancestry of the compared base relative to head, as reported by the remote.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RevisionRelation {
    Ahead,
    Identical,
    Behind,
    Diverged,
    Unknown,
}

impl RevisionRelation {
    /// True when head descends from base, i.e. a diff is a linear history.
    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            RevisionRelation::Ahead | RevisionRelation::Identical | RevisionRelation::Unknown
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionComparison {
    pub base: String,
    pub head: String,
    pub relation: RevisionRelation,
    pub total_commits: u32,
    pub files: Vec<ChangedPath>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub rate_limit_remaining: Option<u32>,
    pub rate_limit_reset: Option<u64>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoAuth {
    pub username: String,
    pub token: String,
}
