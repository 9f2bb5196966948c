use crate::clock::now_secs;
use crate::error::{SyncError, short_revision};
use crate::model::{ChangedPath, RepoAuth, RepoCoordinates, RepoStatus, RepositoryRecord};
use crate::paths::working_copy_path;
use crate::pipeline::{
    FullReindexer, PipelineStats, ProcessingPipeline, ReindexOptions, ReindexResult, ReindexStatus,
};
use crate::provider::SyncFuture;
use crate::store::RepositoryStore;
use crate::working_copy::{CheckoutMode, checkout_revision, tracked_files};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Full-reindex entry point: resets the working copy to the remote branch and
/// feeds every tracked file through the pipeline as added.
pub struct LocalReindexer {
    store: Arc<dyn RepositoryStore>,
    pipeline: Arc<dyn ProcessingPipeline>,
    working_root: PathBuf,
    auth: Option<RepoAuth>,
}

impl LocalReindexer {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        pipeline: Arc<dyn ProcessingPipeline>,
        working_root: PathBuf,
        auth: Option<RepoAuth>,
    ) -> Self {
        Self {
            store,
            pipeline,
            working_root,
            auth,
        }
    }

    /// Existing record for `url`, or a fresh one named after the repository.
    fn resolve_record(
        &self,
        url: &str,
        options: &ReindexOptions,
    ) -> Result<RepositoryRecord, SyncError> {
        let coords = RepoCoordinates::from_url(url)
            .ok_or_else(|| SyncError::validation("url", format!("cannot derive owner/repo from {url}")))?;
        let records = self.store.list()?;
        if let Some(existing) = records.iter().find(|record| record.url == url) {
            return Ok(existing.clone());
        }
        let name = if records.iter().any(|record| record.name == coords.repo) {
            format!("{}-{}", coords.owner, coords.repo)
        } else {
            coords.repo.clone()
        };
        let local_path = working_copy_path(&self.working_root, &name, url);
        Ok(RepositoryRecord::new(
            name,
            url.to_string(),
            options.branch.clone(),
            local_path,
        ))
    }

    async fn reindex(&self, url: &str, options: ReindexOptions) -> Result<ReindexResult, SyncError> {
        let mut record = self.resolve_record(url, &options)?;
        if let Some(started_at) = record.update_started_at
            && !options.force
        {
            return Err(SyncError::UpdateInProgress {
                repository: record.name,
                started_at,
            });
        }
        record.branch = options.branch.clone();
        record.begin_update(now_secs());
        record.error_message = None;
        self.store.upsert(&record)?;
        info!(repository = %record.name, branch = %record.branch, "starting full reindex");

        let path = record.local_path.clone();
        let remote = record.url.clone();
        let branch = record.branch.clone();
        let auth = self.auth.clone();
        let checkout = tokio::task::spawn_blocking(move || {
            let (_, head) =
                checkout_revision(&path, &remote, &branch, None, auth.as_ref(), CheckoutMode::ForceReset)?;
            let files = tracked_files(&path)?;
            Ok::<_, anyhow::Error>((head, files))
        })
        .await;
        let (head, files) = match checkout {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => return self.fail(record, format!("{err:#}")),
            Err(join_err) => return self.fail(record, join_err.to_string()),
        };

        let changes: Vec<ChangedPath> = files.into_iter().map(ChangedPath::added).collect();
        let result = match self.pipeline.process_changes(&record, &head, &changes).await {
            Ok(result) => result,
            Err(err) => return self.fail(record, err.to_string()),
        };

        for error in &result.errors {
            warn!(repository = %record.name, path = %error.path, error = %error.message, "file failed to index");
        }
        record.clear_update_flag();
        record.last_indexed_revision = Some(head.clone());
        record.last_indexed_at = Some(now_secs());
        record.status = RepoStatus::Ready;
        record.error_message = (!result.errors.is_empty())
            .then(|| format!("{} files failed during the last full reindex", result.errors.len()));
        self.store.upsert(&record)?;
        info!(
            repository = %record.name,
            revision = %short_revision(&head),
            files = changes.len(),
            errors = result.errors.len(),
            "full reindex finished"
        );
        Ok(ReindexResult {
            status: ReindexStatus::Ready,
            stats: result.stats,
            revision: Some(head),
            error: None,
        })
    }

    fn fail(&self, mut record: RepositoryRecord, message: String) -> Result<ReindexResult, SyncError> {
        warn!(repository = %record.name, error = %message, "full reindex failed");
        record.clear_update_flag();
        record.status = RepoStatus::Error;
        record.error_message = Some(message.clone());
        self.store.upsert(&record)?;
        Ok(ReindexResult {
            status: ReindexStatus::Error,
            stats: PipelineStats::default(),
            revision: None,
            error: Some(message),
        })
    }
}

impl FullReindexer for LocalReindexer {
    fn index_repository<'a>(
        &'a self,
        url: &'a str,
        options: ReindexOptions,
    ) -> SyncFuture<'a, ReindexResult> {
        Box::pin(self.reindex(url, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalPipeline;
    use crate::pipeline::PipelineResult;
    use crate::store::MemoryRepositoryStore;
    use git2::{Repository, Signature};
    use std::path::Path;
    use tempfile::TempDir;

    fn upstream() -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let workdir = repo.workdir().unwrap().to_path_buf();
        std::fs::create_dir_all(workdir.join("guide")).unwrap();
        std::fs::write(workdir.join("README.md"), "hello").unwrap();
        std::fs::write(workdir.join("guide/intro.md"), "intro").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.add_path(Path::new("guide/intro.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();
        let head = repo
            .commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        (tmp, head.to_string())
    }

    fn reindexer(store: Arc<MemoryRepositoryStore>, root: &Path, journal: &Path) -> LocalReindexer {
        LocalReindexer::new(
            store,
            Arc::new(JournalPipeline::new(journal.to_path_buf()).unwrap()),
            root.to_path_buf(),
            None,
        )
    }

    fn options() -> ReindexOptions {
        ReindexOptions {
            branch: "main".into(),
            force: true,
        }
    }

    #[tokio::test]
    async fn indexes_every_tracked_file_and_records_revision() {
        let (up, head) = upstream();
        let url = format!("file://{}", up.path().display());
        let root = TempDir::new().unwrap();
        let journal = TempDir::new().unwrap();
        let store = Arc::new(MemoryRepositoryStore::new());
        let reindexer = reindexer(store.clone(), root.path(), journal.path());

        let result = reindexer.index_repository(&url, options()).await.unwrap();
        assert_eq!(result.status, ReindexStatus::Ready);
        assert_eq!(result.revision.as_deref(), Some(head.as_str()));
        assert_eq!(result.stats.files_added, 2);

        let records = store.list().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.url, url);
        assert_eq!(record.status, RepoStatus::Ready);
        assert_eq!(record.last_indexed_revision.as_deref(), Some(head.as_str()));
        assert!(record.local_path.join("guide/intro.md").exists());
        assert!(record.local_path.starts_with(root.path()));
    }

    #[tokio::test]
    async fn forced_reindex_clears_interrupted_flag() {
        let (up, head) = upstream();
        let url = format!("file://{}", up.path().display());
        let root = TempDir::new().unwrap();
        let journal = TempDir::new().unwrap();
        let mut existing = RepositoryRecord::new(
            "docs".into(),
            url.clone(),
            "main".into(),
            root.path().join("docs"),
        );
        existing.begin_update(10);
        let store = Arc::new(MemoryRepositoryStore::with_records([existing]));
        let reindexer = reindexer(store.clone(), root.path(), journal.path());

        let not_forced = reindexer
            .index_repository(
                &url,
                ReindexOptions {
                    branch: "main".into(),
                    force: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(not_forced, SyncError::UpdateInProgress { .. }));

        reindexer.index_repository(&url, options()).await.unwrap();
        let record = store.get("docs").unwrap().unwrap();
        assert!(!record.update_in_progress());
        assert_eq!(record.last_indexed_revision, Some(head));
    }

    /// Records whether the store showed the in-progress flag mid-reindex.
    struct FlagObserver {
        store: Arc<MemoryRepositoryStore>,
        seen: std::sync::Mutex<Vec<bool>>,
    }

    impl ProcessingPipeline for FlagObserver {
        fn process_changes<'a>(
            &'a self,
            repository: &'a RepositoryRecord,
            _revision: &'a str,
            _changes: &'a [ChangedPath],
        ) -> SyncFuture<'a, PipelineResult> {
            Box::pin(async move {
                let stored = self.store.get(&repository.name)?;
                self.seen
                    .lock()
                    .unwrap()
                    .push(stored.is_some_and(|record| record.update_in_progress()));
                Ok(PipelineResult::default())
            })
        }
    }

    #[tokio::test]
    async fn reindex_holds_in_progress_flag_until_done() {
        let (up, _) = upstream();
        let url = format!("file://{}", up.path().display());
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryRepositoryStore::new());
        let observer = Arc::new(FlagObserver {
            store: store.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let reindexer = LocalReindexer::new(
            store.clone(),
            observer.clone(),
            root.path().to_path_buf(),
            None,
        );

        let result = reindexer.index_repository(&url, options()).await.unwrap();
        assert_eq!(result.status, ReindexStatus::Ready);
        assert_eq!(*observer.seen.lock().unwrap(), vec![true]);
        let record = &store.list().unwrap()[0];
        assert!(!record.update_in_progress());
        assert_eq!(record.status, RepoStatus::Ready);
    }

    #[tokio::test]
    async fn unreachable_remote_reports_error_status() {
        let root = TempDir::new().unwrap();
        let journal = TempDir::new().unwrap();
        let missing = root.path().join("no-such-upstream");
        let url = format!("file://{}", missing.display());
        let store = Arc::new(MemoryRepositoryStore::new());
        let reindexer = reindexer(store.clone(), root.path(), journal.path());

        let result = reindexer.index_repository(&url, options()).await.unwrap();
        assert_eq!(result.status, ReindexStatus::Error);
        assert!(result.error.is_some());
        let record = &store.list().unwrap()[0];
        assert_eq!(record.status, RepoStatus::Error);
        assert!(!record.update_in_progress());
        assert!(record.last_indexed_revision.is_none());
    }

    #[tokio::test]
    async fn invalid_url_is_a_validation_error() {
        let root = TempDir::new().unwrap();
        let journal = TempDir::new().unwrap();
        let reindexer = reindexer(Arc::new(MemoryRepositoryStore::new()), root.path(), journal.path());
        let err = reindexer
            .index_repository("not-a-url", options())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation { field: "url", .. }));
    }
}
