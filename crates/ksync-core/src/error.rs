use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Number of characters of a revision id shown in messages.
pub const SHORT_REVISION_LEN: usize = 7;

pub fn short_revision(revision: &str) -> &str {
    match revision.char_indices().nth(SHORT_REVISION_LEN) {
        Some((idx, _)) => &revision[..idx],
        None => revision,
    }
}

/// What a `NotFound` error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundTarget {
    /// A repository record in the local store.
    Record(String),
    /// A repository on the remote.
    Repository(String),
    Branch(String),
    Revision(String),
}

impl fmt::Display for NotFoundTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundTarget::Record(name) => write!(f, "repository record {name}"),
            NotFoundTarget::Repository(name) => write!(f, "remote repository {name}"),
            NotFoundTarget::Branch(name) => write!(f, "branch {name}"),
            NotFoundTarget::Revision(rev) => write!(f, "revision {}", short_revision(rev)),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("read repository store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write repository store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("lock repository store {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decode repository store {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode repository store: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unsupported repository store version {0}")]
    UnsupportedVersion(u64),
    #[error("repository store poisoned")]
    Poisoned,
}

/// Discriminant of [`SyncError`], stable for upstream mapping to messages or
/// exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authentication,
    RateLimit,
    Network,
    Api,
    ForcePushDetected,
    ChangeThresholdExceeded,
    MissingBaseline,
    Materialization,
    UpdateInProgress,
    Pipeline,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::ForcePushDetected => "force_push_detected",
            ErrorKind::ChangeThresholdExceeded => "change_threshold_exceeded",
            ErrorKind::MissingBaseline => "missing_baseline",
            ErrorKind::Materialization => "materialization",
            ErrorKind::UpdateInProgress => "update_in_progress",
            ErrorKind::Pipeline => "pipeline",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller should do after an update failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Run a full reindex; retrying the incremental update cannot succeed.
    FullReindex,
    /// The same operation may be retried unchanged.
    Retry,
    /// Retry once the reported rate limit resets.
    WaitForRateLimit,
    /// Fix credentials, identifiers or configuration first.
    FixConfiguration,
    /// Wait for the running update to finish, or recover it if it crashed.
    WaitOrRecover,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0} not found")]
    NotFound(NotFoundTarget),
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        /// Epoch seconds at which the limit resets, when the remote says so.
        reset_at: Option<u64>,
    },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("remote API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },
    #[error(
        "force push detected for {repository}: last indexed revision {} is not an ancestor of {}; run a full reindex",
        short_revision(stale_revision),
        short_revision(current_revision)
    )]
    ForcePushDetected {
        repository: String,
        stale_revision: String,
        current_revision: String,
    },
    #[error(
        "{changed} changed files in {repository} exceed the incremental update limit of {limit}; run a full reindex"
    )]
    ChangeThresholdExceeded {
        repository: String,
        changed: usize,
        limit: usize,
    },
    #[error("{repository} has no indexed revision to diff against; run a full reindex")]
    MissingBaseline { repository: String },
    #[error("materialize working copy for {repository}: {message}")]
    Materialization {
        repository: String,
        message: String,
        retryable: bool,
    },
    #[error("an update for {repository} is already in progress (started at {started_at})")]
    UpdateInProgress { repository: String, started_at: u64 },
    #[error("processing pipeline failed for {repository}: {message}")]
    Pipeline { repository: String, message: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        SyncError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation { .. } => ErrorKind::Validation,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Authentication { .. } => ErrorKind::Authentication,
            SyncError::RateLimited { .. } => ErrorKind::RateLimit,
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Api { .. } => ErrorKind::Api,
            SyncError::ForcePushDetected { .. } => ErrorKind::ForcePushDetected,
            SyncError::ChangeThresholdExceeded { .. } => ErrorKind::ChangeThresholdExceeded,
            SyncError::MissingBaseline { .. } => ErrorKind::MissingBaseline,
            SyncError::Materialization { .. } => ErrorKind::Materialization,
            SyncError::UpdateInProgress { .. } => ErrorKind::UpdateInProgress,
            SyncError::Pipeline { .. } => ErrorKind::Pipeline,
            SyncError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the change-source client retries this error internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RateLimited { .. } | SyncError::Network { .. } => true,
            SyncError::Api { retryable, .. } => *retryable,
            SyncError::Materialization { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn recommended_action(&self) -> Option<RecommendedAction> {
        match self {
            SyncError::ForcePushDetected { .. }
            | SyncError::ChangeThresholdExceeded { .. }
            | SyncError::MissingBaseline { .. } => Some(RecommendedAction::FullReindex),
            SyncError::Materialization { .. }
            | SyncError::Network { .. }
            | SyncError::Pipeline { .. } => Some(RecommendedAction::Retry),
            SyncError::Api { retryable: true, .. } => Some(RecommendedAction::Retry),
            SyncError::RateLimited { .. } => Some(RecommendedAction::WaitForRateLimit),
            SyncError::Validation { .. }
            | SyncError::Authentication { .. }
            | SyncError::NotFound(_) => Some(RecommendedAction::FixConfiguration),
            SyncError::UpdateInProgress { .. } => Some(RecommendedAction::WaitOrRecover),
            SyncError::Api { .. } | SyncError::Storage(_) => None,
        }
    }

    pub fn requires_full_reindex(&self) -> bool {
        self.recommended_action() == Some(RecommendedAction::FullReindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_revision_truncates_long_ids() {
        assert_eq!(short_revision("0123456789abcdef"), "0123456");
        assert_eq!(short_revision("abc"), "abc");
    }

    #[test]
    fn force_push_message_carries_both_revisions() {
        let err = SyncError::ForcePushDetected {
            repository: "docs".into(),
            stale_revision: "aaaaaaaaaaaaaaaa".into(),
            current_revision: "bbbbbbbbbbbbbbbb".into(),
        };
        let message = err.to_string();
        assert!(message.contains("aaaaaaa"));
        assert!(message.contains("bbbbbbb"));
        assert!(!message.contains("aaaaaaaa"));
        assert!(err.requires_full_reindex());
        assert!(!err.is_retryable());
    }

    #[test]
    fn retry_classification_follows_kind() {
        assert!(
            SyncError::Network {
                message: "reset".into()
            }
            .is_retryable()
        );
        assert!(
            SyncError::RateLimited {
                message: "slow down".into(),
                reset_at: Some(10)
            }
            .is_retryable()
        );
        assert!(
            !SyncError::Authentication {
                message: "bad".into()
            }
            .is_retryable()
        );
        assert!(!SyncError::NotFound(NotFoundTarget::Repository("o/r".into())).is_retryable());
        let server = SyncError::Api {
            status: 502,
            message: "bad gateway".into(),
            retryable: true,
        };
        assert!(server.is_retryable());
        assert_eq!(server.recommended_action(), Some(RecommendedAction::Retry));
    }

    #[test]
    fn domain_signals_recommend_full_reindex() {
        let threshold = SyncError::ChangeThresholdExceeded {
            repository: "docs".into(),
            changed: 501,
            limit: 500,
        };
        assert_eq!(threshold.kind(), ErrorKind::ChangeThresholdExceeded);
        assert!(threshold.requires_full_reindex());
        let baseline = SyncError::MissingBaseline {
            repository: "docs".into(),
        };
        assert!(baseline.requires_full_reindex());
        let materialize = SyncError::Materialization {
            repository: "docs".into(),
            message: "fetch failed".into(),
            retryable: true,
        };
        assert_eq!(
            materialize.recommended_action(),
            Some(RecommendedAction::Retry)
        );
    }
}
