use crate::clock::now_secs;
use crate::config::CoordinatorConfig;
use crate::error::{NotFoundTarget, SyncError, short_revision};
use crate::model::{
    ChangedPath, RepoCoordinates, RepoStatus, RepositoryRecord, RevisionComparison,
    UpdateHistoryEntry, UpdateOutcome,
};
use crate::pipeline::{Materializer, PipelineFileError, PipelineStats, ProcessingPipeline};
use crate::provider::ChangeSource;
use crate::store::{Mutation, RepositoryStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Updated,
    NoChanges,
    Partial,
    Failed,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Updated => "updated",
            UpdateStatus::NoChanges => "no_changes",
            UpdateStatus::Partial => "partial",
            UpdateStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UpdateReport {
    pub repository: String,
    pub status: UpdateStatus,
    pub previous_revision: Option<String>,
    pub new_revision: String,
    pub changed_files: usize,
    pub stats: PipelineStats,
    pub errors: Vec<PipelineFileError>,
    pub duration_ms: u64,
}

/// Applies the diff between a repository's last indexed revision and the
/// remote head.
///
/// The persisted in-progress flag is the per-repository mutex: it is set
/// before any network traffic and cleared on every exit path except a crash,
/// which [`crate::recovery`] repairs.
pub struct UpdateCoordinator {
    store: Arc<dyn RepositoryStore>,
    source: Arc<dyn ChangeSource>,
    pipeline: Arc<dyn ProcessingPipeline>,
    materializer: Option<Arc<dyn Materializer>>,
    config: CoordinatorConfig,
}

impl UpdateCoordinator {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        source: Arc<dyn ChangeSource>,
        pipeline: Arc<dyn ProcessingPipeline>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            source,
            pipeline,
            materializer: None,
            config,
        }
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub async fn update_repository(&self, name: &str) -> Result<UpdateReport, SyncError> {
        let started = Instant::now();
        let record = self.checkpoint(name)?;
        info!(
            repository = %name,
            branch = %record.branch,
            last_revision = record.last_indexed_revision.as_deref().map(short_revision).unwrap_or("none"),
            "starting incremental update"
        );
        match self.apply_update(&record, started).await {
            Ok(report) => {
                info!(
                    repository = %name,
                    status = report.status.as_str(),
                    revision = %short_revision(&report.new_revision),
                    changed = report.changed_files,
                    duration_ms = report.duration_ms,
                    "incremental update finished"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(repository = %name, kind = %err.kind(), error = %err, "incremental update failed");
                self.release_after_failure(name, &err);
                Err(err)
            }
        }
    }

    /// Load, single-writer check and durability checkpoint in one store write.
    fn checkpoint(&self, name: &str) -> Result<RepositoryRecord, SyncError> {
        let now = now_secs();
        let mutation = self.store.mutate(name, &mut |record| {
            if record.update_in_progress() {
                return false;
            }
            record.begin_update(now);
            true
        })?;
        match mutation {
            Mutation::Applied(record) => Ok(record),
            Mutation::Rejected(record) => Err(SyncError::UpdateInProgress {
                repository: name.to_string(),
                started_at: record.update_started_at.unwrap_or_default(),
            }),
            Mutation::Missing => Err(SyncError::NotFound(NotFoundTarget::Record(
                name.to_string(),
            ))),
        }
    }

    async fn apply_update(
        &self,
        record: &RepositoryRecord,
        started: Instant,
    ) -> Result<UpdateReport, SyncError> {
        let coords = RepoCoordinates::from_url(&record.url).ok_or_else(|| {
            SyncError::validation("url", format!("cannot derive owner/repo from {}", record.url))
        })?;
        let head = self
            .source
            .head_revision(&coords.owner, &coords.repo, Some(&record.branch))
            .await?;

        if record.last_indexed_revision.as_deref() == Some(head.sha.as_str()) {
            self.finish_without_changes(&record.name)?;
            return Ok(UpdateReport {
                repository: record.name.clone(),
                status: UpdateStatus::NoChanges,
                previous_revision: record.last_indexed_revision.clone(),
                new_revision: head.sha,
                changed_files: 0,
                stats: PipelineStats::default(),
                errors: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let Some(baseline) = record.last_indexed_revision.clone() else {
            return Err(SyncError::MissingBaseline {
                repository: record.name.clone(),
            });
        };

        let comparison = self
            .compare(record, &coords, &baseline, &head.sha)
            .await?;
        let changed = comparison.files.len();
        if changed > self.config.change_threshold {
            return Err(SyncError::ChangeThresholdExceeded {
                repository: record.name.clone(),
                changed,
                limit: self.config.change_threshold,
            });
        }
        let summary = summarize_changes(&comparison.files);
        info!(
            repository = %record.name,
            from = %short_revision(&baseline),
            to = %short_revision(&head.sha),
            commits = comparison.total_commits,
            added = summary.files_added,
            modified = summary.files_modified,
            deleted = summary.files_deleted,
            "diff computed"
        );

        if self.config.materialize
            && let Some(materializer) = &self.materializer
        {
            materializer.materialize(record, &head.sha).await?;
        }

        let result = if comparison.files.is_empty() {
            Default::default()
        } else {
            self.pipeline
                .process_changes(record, &head.sha, &comparison.files)
                .await?
        };

        let outcome = classify_outcome(&result.stats, result.errors.len());
        let entry = UpdateHistoryEntry {
            timestamp: now_secs(),
            previous_revision: baseline.clone(),
            new_revision: head.sha.clone(),
            files_added: result.stats.files_added,
            files_modified: result.stats.files_modified,
            files_deleted: result.stats.files_deleted,
            chunks_upserted: result.stats.chunks_upserted,
            chunks_deleted: result.stats.chunks_deleted,
            duration_ms: started.elapsed().as_millis() as u64,
            error_count: result.errors.len() as u32,
            outcome,
        };
        self.record_outcome(&record.name, entry)?;

        for error in &result.errors {
            warn!(repository = %record.name, path = %error.path, error = %error.message, "file failed to process");
        }
        Ok(UpdateReport {
            repository: record.name.clone(),
            status: match outcome {
                UpdateOutcome::Success => UpdateStatus::Updated,
                UpdateOutcome::Partial => UpdateStatus::Partial,
                UpdateOutcome::Failed => UpdateStatus::Failed,
            },
            previous_revision: Some(baseline),
            new_revision: head.sha,
            changed_files: changed,
            stats: result.stats,
            errors: result.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Diff, treating an unknown or non-ancestor baseline as rewritten history.
    async fn compare(
        &self,
        record: &RepositoryRecord,
        coords: &RepoCoordinates,
        baseline: &str,
        head: &str,
    ) -> Result<RevisionComparison, SyncError> {
        let force_push = || SyncError::ForcePushDetected {
            repository: record.name.clone(),
            stale_revision: baseline.to_string(),
            current_revision: head.to_string(),
        };
        match self
            .source
            .compare_revisions(&coords.owner, &coords.repo, baseline, head)
            .await
        {
            Ok(comparison) if comparison.relation.is_linear() => Ok(comparison),
            Ok(comparison) => {
                warn!(repository = %record.name, relation = ?comparison.relation, "baseline is not an ancestor of head");
                Err(force_push())
            }
            Err(SyncError::NotFound(NotFoundTarget::Revision(_))) => Err(force_push()),
            Err(err) => Err(err),
        }
    }

    fn finish_without_changes(&self, name: &str) -> Result<(), SyncError> {
        self.expect_applied(
            name,
            self.store.mutate(name, &mut |record| {
                record.clear_update_flag();
                record.status = RepoStatus::Ready;
                record.error_message = None;
                true
            })?,
        )
    }

    fn record_outcome(&self, name: &str, entry: UpdateHistoryEntry) -> Result<(), SyncError> {
        let outcome = entry.outcome;
        let error_count = entry.error_count;
        let mut entry = Some(entry);
        let mutation = self.store.mutate(name, &mut |record| {
            if let Some(entry) = entry.take() {
                record.record_update(entry);
            }
            record.clear_update_flag();
            match outcome {
                UpdateOutcome::Success => {
                    record.status = RepoStatus::Ready;
                    record.error_message = None;
                }
                UpdateOutcome::Partial => {
                    record.status = RepoStatus::Ready;
                    record.error_message =
                        Some(format!("{error_count} files failed during the last update"));
                }
                UpdateOutcome::Failed => {
                    record.status = RepoStatus::Error;
                    record.error_message =
                        Some(format!("all {error_count} changed files failed to process"));
                }
            }
            true
        })?;
        self.expect_applied(name, mutation)
    }

    fn expect_applied(&self, name: &str, mutation: Mutation) -> Result<(), SyncError> {
        match mutation {
            Mutation::Applied(_) | Mutation::Rejected(_) => Ok(()),
            Mutation::Missing => Err(SyncError::NotFound(NotFoundTarget::Record(
                name.to_string(),
            ))),
        }
    }

    /// Clears the in-progress flag after a failed update. Errors here are only
    /// logged; the original failure is what the caller needs to see.
    fn release_after_failure(&self, name: &str, err: &SyncError) {
        if matches!(
            err,
            SyncError::UpdateInProgress { .. } | SyncError::NotFound(NotFoundTarget::Record(_))
        ) {
            return;
        }
        let needs_reindex = err.requires_full_reindex();
        let message = err.to_string();
        let result = self.store.mutate(name, &mut |record| {
            record.clear_update_flag();
            record.status = if needs_reindex {
                RepoStatus::Error
            } else {
                RepoStatus::Ready
            };
            record.error_message = Some(message.clone());
            true
        });
        if let Err(store_err) = result {
            warn!(repository = %name, error = %store_err, "failed to clear in-progress flag");
        }
    }
}

fn classify_outcome(stats: &PipelineStats, error_count: usize) -> UpdateOutcome {
    if error_count == 0 {
        UpdateOutcome::Success
    } else if stats.files_processed() > 0 {
        UpdateOutcome::Partial
    } else {
        UpdateOutcome::Failed
    }
}

/// Counts per change kind, used in reports and logs.
pub fn summarize_changes(files: &[ChangedPath]) -> PipelineStats {
    let mut stats = PipelineStats::default();
    for file in files {
        stats.record(file.kind);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{HealthStatus, HeadRevision, RevisionRelation};
    use crate::pipeline::PipelineResult;
    use crate::provider::{HealthFuture, SyncFuture};
    use crate::store::MemoryRepositoryStore;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REV1: &str = "1111111111111111111111111111111111111111";
    const REV4: &str = "4444444444444444444444444444444444444444";

    #[derive(Clone)]
    enum CompareBehavior {
        Files(Vec<ChangedPath>),
        BaseMissing,
        Diverged,
    }

    struct FakeSource {
        head: Option<String>,
        compare: CompareBehavior,
        head_calls: AtomicUsize,
        compare_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(head: &str, compare: CompareBehavior) -> Self {
            Self {
                head: Some(head.to_string()),
                compare,
                head_calls: AtomicUsize::new(0),
                compare_calls: AtomicUsize::new(0),
            }
        }

        fn unreachable() -> Self {
            Self {
                head: None,
                compare: CompareBehavior::Files(Vec::new()),
                head_calls: AtomicUsize::new(0),
                compare_calls: AtomicUsize::new(0),
            }
        }

        fn network_calls(&self) -> usize {
            self.head_calls.load(Ordering::SeqCst) + self.compare_calls.load(Ordering::SeqCst)
        }
    }

    impl ChangeSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn head_revision<'a>(
            &'a self,
            _owner: &'a str,
            _repo: &'a str,
            _branch: Option<&'a str>,
        ) -> SyncFuture<'a, HeadRevision> {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            let head = self.head.clone();
            Box::pin(async move {
                match head {
                    Some(sha) => Ok(HeadRevision {
                        sha,
                        message: "update docs".into(),
                        author: "tester".into(),
                        committed_at: None,
                    }),
                    None => Err(SyncError::Network {
                        message: "connection refused".into(),
                    }),
                }
            })
        }

        fn compare_revisions<'a>(
            &'a self,
            _owner: &'a str,
            _repo: &'a str,
            base: &'a str,
            head: &'a str,
        ) -> SyncFuture<'a, RevisionComparison> {
            self.compare_calls.fetch_add(1, Ordering::SeqCst);
            let behavior = self.compare.clone();
            Box::pin(async move {
                let relation = match behavior {
                    CompareBehavior::BaseMissing => {
                        return Err(SyncError::NotFound(NotFoundTarget::Revision(
                            base.to_string(),
                        )));
                    }
                    CompareBehavior::Diverged => RevisionRelation::Diverged,
                    CompareBehavior::Files(_) => RevisionRelation::Ahead,
                };
                let files = match behavior {
                    CompareBehavior::Files(files) => files,
                    _ => Vec::new(),
                };
                Ok(RevisionComparison {
                    base: base.to_string(),
                    head: head.to_string(),
                    relation,
                    total_commits: 3,
                    files,
                })
            })
        }

        fn health_check<'a>(&'a self) -> HealthFuture<'a> {
            Box::pin(async { HealthStatus::default() })
        }
    }

    #[derive(Default)]
    struct RecordingPipeline {
        calls: Mutex<Vec<Vec<ChangedPath>>>,
        fail_paths: Vec<String>,
    }

    impl RecordingPipeline {
        fn calls(&self) -> Vec<Vec<ChangedPath>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessingPipeline for RecordingPipeline {
        fn process_changes<'a>(
            &'a self,
            _repository: &'a RepositoryRecord,
            _revision: &'a str,
            changes: &'a [ChangedPath],
        ) -> SyncFuture<'a, PipelineResult> {
            self.calls.lock().unwrap().push(changes.to_vec());
            Box::pin(async move {
                let mut result = PipelineResult::default();
                for change in changes {
                    if self.fail_paths.contains(&change.path) {
                        result.errors.push(PipelineFileError {
                            path: change.path.clone(),
                            message: "extraction failed".into(),
                        });
                        continue;
                    }
                    result.stats.record(change.kind);
                    match change.kind {
                        crate::model::ChangeKind::Deleted => result.stats.chunks_deleted += 2,
                        _ => result.stats.chunks_upserted += 3,
                    }
                }
                Ok(result)
            })
        }
    }

    struct FailingMaterializer;

    impl Materializer for FailingMaterializer {
        fn materialize<'a>(
            &'a self,
            repository: &'a RepositoryRecord,
            _revision: &'a str,
        ) -> SyncFuture<'a, ()> {
            Box::pin(async move {
                Err(SyncError::Materialization {
                    repository: repository.name.clone(),
                    message: "fetch origin: timed out".into(),
                    retryable: true,
                })
            })
        }
    }

    fn record(last: Option<&str>) -> RepositoryRecord {
        let mut record = RepositoryRecord::new(
            "docs".into(),
            "https://github.com/acme/docs.git".into(),
            "main".into(),
            PathBuf::from("/srv/docs"),
        );
        record.last_indexed_revision = last.map(str::to_string);
        record
    }

    fn three_changes() -> Vec<ChangedPath> {
        vec![
            ChangedPath::added("guide/new.md"),
            ChangedPath::modified("README.md"),
            ChangedPath::deleted("old.md"),
        ]
    }

    fn many_changes(count: usize) -> Vec<ChangedPath> {
        (0..count)
            .map(|idx| ChangedPath::modified(format!("docs/{idx}.md")))
            .collect()
    }

    struct Harness {
        store: Arc<MemoryRepositoryStore>,
        source: Arc<FakeSource>,
        pipeline: Arc<RecordingPipeline>,
        coordinator: UpdateCoordinator,
    }

    fn harness(record: RepositoryRecord, source: FakeSource) -> Harness {
        harness_with(record, source, RecordingPipeline::default(), 500)
    }

    fn harness_with(
        record: RepositoryRecord,
        source: FakeSource,
        pipeline: RecordingPipeline,
        threshold: usize,
    ) -> Harness {
        let store = Arc::new(MemoryRepositoryStore::with_records([record]));
        let source = Arc::new(source);
        let pipeline = Arc::new(pipeline);
        let coordinator = UpdateCoordinator::new(
            store.clone(),
            source.clone(),
            pipeline.clone(),
            CoordinatorConfig {
                change_threshold: threshold,
                materialize: true,
            },
        );
        Harness {
            store,
            source,
            pipeline,
            coordinator,
        }
    }

    fn stored(h: &Harness) -> RepositoryRecord {
        h.store.get("docs").unwrap().unwrap()
    }

    #[tokio::test]
    async fn applies_diff_end_to_end() {
        let h = harness(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
        );
        let report = h.coordinator.update_repository("docs").await.unwrap();
        assert_eq!(report.status, UpdateStatus::Updated);
        assert_eq!(report.new_revision, REV4);

        let calls = h.pipeline.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], three_changes());

        let record = stored(&h);
        assert_eq!(record.last_indexed_revision.as_deref(), Some(REV4));
        assert_eq!(record.status, RepoStatus::Ready);
        assert!(!record.update_in_progress());
        assert_eq!(record.incremental_update_count, 1);
        assert_eq!(record.update_history.len(), 1);
        let entry = &record.update_history[0];
        assert_eq!(entry.previous_revision, REV1);
        assert_eq!(entry.new_revision, REV4);
        assert_eq!(
            (entry.files_added, entry.files_modified, entry.files_deleted),
            (1, 1, 1)
        );
        assert_eq!(entry.chunks_upserted, 6);
        assert_eq!(entry.chunks_deleted, 2);
        assert_eq!(entry.outcome, UpdateOutcome::Success);
    }

    #[tokio::test]
    async fn same_head_reports_no_changes_without_pipeline() {
        let h = harness(
            record(Some(REV4)),
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
        );
        for _ in 0..2 {
            let report = h.coordinator.update_repository("docs").await.unwrap();
            assert_eq!(report.status, UpdateStatus::NoChanges);
        }
        assert!(h.pipeline.calls().is_empty());
        assert_eq!(h.source.compare_calls.load(Ordering::SeqCst), 0);
        let record = stored(&h);
        assert!(!record.update_in_progress());
        assert!(record.update_history.is_empty());
    }

    #[tokio::test]
    async fn threshold_boundary() {
        let at_limit = harness_with(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Files(many_changes(500))),
            RecordingPipeline::default(),
            500,
        );
        let report = at_limit.coordinator.update_repository("docs").await.unwrap();
        assert_eq!(report.changed_files, 500);

        let over = harness_with(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Files(many_changes(501))),
            RecordingPipeline::default(),
            500,
        );
        let err = over.coordinator.update_repository("docs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChangeThresholdExceeded);
        let message = err.to_string();
        assert!(message.contains("501"));
        assert!(message.contains("500"));
        assert!(over.pipeline.calls().is_empty());
        let record = stored(&over);
        assert!(!record.update_in_progress());
        assert_eq!(record.last_indexed_revision.as_deref(), Some(REV1));
    }

    #[tokio::test]
    async fn unreachable_baseline_is_force_push() {
        let h = harness(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::BaseMissing),
        );
        let err = h.coordinator.update_repository("docs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForcePushDetected);
        let message = err.to_string();
        assert!(message.contains("1111111"));
        assert!(message.contains("4444444"));
        assert!(err.requires_full_reindex());
        let record = stored(&h);
        assert!(!record.update_in_progress());
        assert_eq!(record.status, RepoStatus::Error);
        assert!(record.error_message.unwrap().contains("force push"));
    }

    #[tokio::test]
    async fn diverged_history_is_force_push() {
        let h = harness(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Diverged),
        );
        let err = h.coordinator.update_repository("docs").await.unwrap_err();
        assert!(matches!(err, SyncError::ForcePushDetected { .. }));
        assert!(h.pipeline.calls().is_empty());
    }

    #[tokio::test]
    async fn second_update_fails_without_network() {
        let mut busy = record(Some(REV1));
        busy.begin_update(1_000);
        let h = harness(
            busy,
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
        );
        let err = h.coordinator.update_repository("docs").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::UpdateInProgress {
                started_at: 1_000,
                ..
            }
        ));
        assert_eq!(h.source.network_calls(), 0);
        assert!(stored(&h).update_in_progress());
    }

    #[tokio::test]
    async fn unknown_repository_fails_immediately() {
        let h = harness(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
        );
        let err = h.coordinator.update_repository("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.source.network_calls(), 0);
    }

    #[tokio::test]
    async fn missing_baseline_requires_reindex() {
        let h = harness(
            record(None),
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
        );
        let err = h.coordinator.update_repository("docs").await.unwrap_err();
        assert!(matches!(err, SyncError::MissingBaseline { .. }));
        assert!(err.requires_full_reindex());
        assert!(!stored(&h).update_in_progress());
    }

    #[tokio::test]
    async fn head_failure_clears_flag() {
        let h = harness(record(Some(REV1)), FakeSource::unreachable());
        let err = h.coordinator.update_repository("docs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        let record = stored(&h);
        assert!(!record.update_in_progress());
        assert_eq!(record.status, RepoStatus::Ready);
        assert!(record.error_message.is_some());
    }

    #[tokio::test]
    async fn per_file_errors_produce_partial_outcome() {
        let pipeline = RecordingPipeline {
            fail_paths: vec!["README.md".to_string()],
            ..RecordingPipeline::default()
        };
        let h = harness_with(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
            pipeline,
            500,
        );
        let report = h.coordinator.update_repository("docs").await.unwrap();
        assert_eq!(report.status, UpdateStatus::Partial);
        assert_eq!(report.errors.len(), 1);
        let record = stored(&h);
        assert_eq!(record.update_history[0].outcome, UpdateOutcome::Partial);
        assert_eq!(record.update_history[0].error_count, 1);
        assert_eq!(record.last_indexed_revision.as_deref(), Some(REV4));
        assert!(!record.update_in_progress());
    }

    #[tokio::test]
    async fn materialization_failure_is_distinct_and_retryable() {
        let h = harness(
            record(Some(REV1)),
            FakeSource::new(REV4, CompareBehavior::Files(three_changes())),
        );
        let coordinator = UpdateCoordinator::new(
            h.store.clone(),
            h.source.clone(),
            h.pipeline.clone(),
            CoordinatorConfig::default(),
        )
        .with_materializer(Arc::new(FailingMaterializer));
        let err = coordinator.update_repository("docs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Materialization);
        assert!(err.is_retryable());
        assert!(h.pipeline.calls().is_empty());
        let record = stored(&h);
        assert!(!record.update_in_progress());
        assert_eq!(record.last_indexed_revision.as_deref(), Some(REV1));
    }

    #[test]
    fn summarize_counts_kinds() {
        let stats = summarize_changes(&three_changes());
        assert_eq!(stats.files_processed(), 3);
    }
}
