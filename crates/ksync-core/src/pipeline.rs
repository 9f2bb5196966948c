use crate::model::{ChangeKind, ChangedPath, RepositoryRecord};
use crate::provider::SyncFuture;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub files_added: u32,
    pub files_modified: u32,
    pub files_deleted: u32,
    pub chunks_upserted: u32,
    pub chunks_deleted: u32,
}

impl PipelineStats {
    pub fn files_processed(&self) -> u32 {
        self.files_added + self.files_modified + self.files_deleted
    }

    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Added => self.files_added += 1,
            ChangeKind::Modified => self.files_modified += 1,
            ChangeKind::Deleted => self.files_deleted += 1,
            ChangeKind::Renamed => {
                self.files_added += 1;
                self.files_deleted += 1;
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFileError {
    pub path: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub stats: PipelineStats,
    pub errors: Vec<PipelineFileError>,
}

/// Turns changed paths into index content. Per-file failures are reported in
/// the result; an `Err` means the batch as a whole could not be handled.
pub trait ProcessingPipeline: Send + Sync {
    fn process_changes<'a>(
        &'a self,
        repository: &'a RepositoryRecord,
        revision: &'a str,
        changes: &'a [ChangedPath],
    ) -> SyncFuture<'a, PipelineResult>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReindexOptions {
    pub branch: String,
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexStatus {
    Ready,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexResult {
    pub status: ReindexStatus,
    pub stats: PipelineStats,
    pub revision: Option<String>,
    pub error: Option<String>,
}

/// Entry point that rebuilds a repository's index from scratch.
pub trait FullReindexer: Send + Sync {
    fn index_repository<'a>(
        &'a self,
        url: &'a str,
        options: ReindexOptions,
    ) -> SyncFuture<'a, ReindexResult>;
}

/// Brings the local working copy of a repository to a revision.
pub trait Materializer: Send + Sync {
    fn materialize<'a>(
        &'a self,
        repository: &'a RepositoryRecord,
        revision: &'a str,
    ) -> SyncFuture<'a, ()>;
}
