use crate::clock::format_elapsed;
use crate::config::RecoveryConfig;
use crate::coordinator::{UpdateCoordinator, UpdateStatus};
use crate::error::short_revision;
use crate::interrupted::InterruptedUpdate;
use crate::model::RepoStatus;
use crate::pipeline::{FullReindexer, ReindexOptions, ReindexStatus};
use crate::store::{Mutation, RepositoryStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Resume,
    FullReindex,
    ManualRequired,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Resume => "resume",
            StrategyKind::FullReindex => "full_reindex",
            StrategyKind::ManualRequired => "manual_required",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecoveryStrategy {
    pub kind: StrategyKind,
    pub reason: String,
    pub auto_recoverable: bool,
    pub estimate: Option<String>,
}

/// Picks how to repair an interrupted update. The first matching rule wins:
/// stale start, missing baseline, missing working copy, then resume.
pub fn evaluate_strategy(snapshot: &InterruptedUpdate, config: &RecoveryConfig) -> RecoveryStrategy {
    let elapsed = format_elapsed(snapshot.elapsed_secs);
    let full_reindex = |reason: String| RecoveryStrategy {
        kind: StrategyKind::FullReindex,
        reason,
        auto_recoverable: true,
        estimate: Some(format!("full reindex of {}", snapshot.record.url)),
    };

    if snapshot.elapsed_secs > config.stale_after_secs {
        return full_reindex(format!(
            "update was interrupted {elapsed} ago; repository state may be stale"
        ));
    }
    let Some(revision) = snapshot.last_known_revision.as_deref() else {
        return full_reindex("no indexed revision is recorded to resume from".to_string());
    };
    if !snapshot.record.local_path.is_dir() {
        return RecoveryStrategy {
            kind: StrategyKind::ManualRequired,
            reason: format!(
                "working copy {} is missing",
                snapshot.record.local_path.display()
            ),
            auto_recoverable: false,
            estimate: None,
        };
    }
    RecoveryStrategy {
        kind: StrategyKind::Resume,
        reason: format!(
            "update was interrupted {elapsed} ago; resuming from {}",
            short_revision(revision)
        ),
        auto_recoverable: true,
        estimate: Some(format!(
            "incremental update from {}",
            short_revision(revision)
        )),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub repository: String,
    pub planned: StrategyKind,
    /// Differs from `planned` when a failed resume fell back to a reindex.
    pub executed: StrategyKind,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub successful: usize,
    pub failed: usize,
    pub manual_required: usize,
    pub total: usize,
    pub results: Vec<RecoveryResult>,
}

impl BatchSummary {
    fn push(&mut self, result: RecoveryResult) {
        self.total += 1;
        if result.executed == StrategyKind::ManualRequired {
            self.manual_required += 1;
        } else if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }
}

/// Executes recovery strategies. Never returns an error: every failure ends
/// up in [`RecoveryResult::error`].
pub struct RecoveryExecutor {
    store: Arc<dyn RepositoryStore>,
    coordinator: Arc<UpdateCoordinator>,
    reindexer: Arc<dyn FullReindexer>,
    config: RecoveryConfig,
}

impl RecoveryExecutor {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        coordinator: Arc<UpdateCoordinator>,
        reindexer: Arc<dyn FullReindexer>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            reindexer,
            config,
        }
    }

    pub fn evaluate(&self, snapshot: &InterruptedUpdate) -> RecoveryStrategy {
        evaluate_strategy(snapshot, &self.config)
    }

    pub async fn execute_recovery(
        &self,
        snapshot: &InterruptedUpdate,
        strategy: &RecoveryStrategy,
    ) -> RecoveryResult {
        let started = Instant::now();
        info!(
            repository = %snapshot.name,
            strategy = strategy.kind.as_str(),
            reason = %strategy.reason,
            "recovering interrupted update"
        );
        let (executed, outcome) = match strategy.kind {
            StrategyKind::Resume => self.resume(snapshot).await,
            StrategyKind::FullReindex => (StrategyKind::FullReindex, self.full_reindex(snapshot).await),
            StrategyKind::ManualRequired => {
                (StrategyKind::ManualRequired, self.mark_manual(snapshot, strategy))
            }
        };
        let result = RecoveryResult {
            repository: snapshot.name.clone(),
            planned: strategy.kind,
            executed,
            success: outcome.is_ok(),
            error: outcome.err(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        match &result.error {
            None => info!(
                repository = %result.repository,
                executed = result.executed.as_str(),
                duration_ms = result.duration_ms,
                "recovery finished"
            ),
            Some(error) => warn!(
                repository = %result.repository,
                executed = result.executed.as_str(),
                error = %error,
                "recovery failed"
            ),
        }
        result
    }

    /// Evaluates and executes each snapshot in turn.
    pub async fn recover_multiple(&self, snapshots: &[InterruptedUpdate]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for snapshot in snapshots {
            let strategy = self.evaluate(snapshot);
            summary.push(self.execute_recovery(snapshot, &strategy).await);
        }
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            manual_required = summary.manual_required,
            "recovery batch finished"
        );
        summary
    }

    async fn resume(&self, snapshot: &InterruptedUpdate) -> (StrategyKind, Result<(), String>) {
        if let Err(err) = self.clear_flag(&snapshot.name) {
            return (StrategyKind::Resume, Err(err));
        }
        let failure = match self.coordinator.update_repository(&snapshot.name).await {
            Ok(report) if report.status != UpdateStatus::Failed => {
                return (StrategyKind::Resume, Ok(()));
            }
            Ok(report) => format!(
                "resumed update processed no files ({} errors)",
                report.errors.len()
            ),
            Err(err) => err.to_string(),
        };
        warn!(
            repository = %snapshot.name,
            error = %failure,
            "resume failed; falling back to full reindex"
        );
        let outcome = self
            .full_reindex(snapshot)
            .await
            .map_err(|reindex_err| format!("resume failed: {failure}; {reindex_err}"));
        (StrategyKind::FullReindex, outcome)
    }

    async fn full_reindex(&self, snapshot: &InterruptedUpdate) -> Result<(), String> {
        self.clear_flag(&snapshot.name)?;
        let options = ReindexOptions {
            branch: snapshot.record.branch.clone(),
            force: true,
        };
        match self
            .reindexer
            .index_repository(&snapshot.record.url, options)
            .await
        {
            Ok(result) if result.status == ReindexStatus::Ready => Ok(()),
            Ok(result) => Err(format!(
                "full reindex failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            )),
            Err(err) => Err(format!("full reindex failed: {err}")),
        }
    }

    fn mark_manual(
        &self,
        snapshot: &InterruptedUpdate,
        strategy: &RecoveryStrategy,
    ) -> Result<(), String> {
        let message = format!(
            "manual recovery required: {}; restore it or remove and re-index the repository",
            strategy.reason
        );
        let mutation = self
            .store
            .mutate(&snapshot.name, &mut |record| {
                record.clear_update_flag();
                record.status = RepoStatus::Error;
                record.error_message = Some(message.clone());
                true
            })
            .map_err(|err| err.to_string())?;
        expect_present(&snapshot.name, mutation)
    }

    fn clear_flag(&self, name: &str) -> Result<(), String> {
        let mutation = self
            .store
            .mutate(name, &mut |record| {
                record.clear_update_flag();
                true
            })
            .map_err(|err| err.to_string())?;
        expect_present(name, mutation)
    }
}

fn expect_present(name: &str, mutation: Mutation) -> Result<(), String> {
    match mutation {
        Mutation::Missing => Err(format!("repository record {name} no longer exists")),
        _ => Ok(()),
    }
}
