use crate::error::SyncError;
use crate::model::{ChangeKind, ChangedPath, RepositoryRecord};
use crate::pipeline::{PipelineFileError, PipelineResult, ProcessingPipeline};
use crate::provider::SyncFuture;
use anyhow::Context;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use uuid::Uuid;

const MAX_BYTES: u64 = 10 * 1024 * 1024;
/// Size of one content chunk as seen by downstream embedders.
pub const CHUNK_BYTES: u64 = 4 * 1024;

/// Default [`ProcessingPipeline`]: appends one JSON line per changed path to a
/// size-rotated journal that downstream consumers tail.
#[derive(Clone, Debug)]
pub struct JournalPipeline {
    base_dir: PathBuf,
    max_bytes: u64,
}

impl JournalPipeline {
    pub fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        Self::new_with_limit(base_dir, MAX_BYTES)
    }

    pub fn new_with_limit(base_dir: PathBuf, max_bytes: u64) -> anyhow::Result<Self> {
        fs::create_dir_all(&base_dir).context("create journal dir")?;
        Ok(Self {
            base_dir,
            max_bytes,
        })
    }

    fn write_batch(
        &self,
        repository: &RepositoryRecord,
        revision: &str,
        changes: &[ChangedPath],
    ) -> anyhow::Result<PipelineResult> {
        let batch_id = Uuid::new_v4().to_string();
        let ts = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("format timestamp")?;
        let has_working_copy = repository.local_path.is_dir();
        let mut result = PipelineResult::default();
        let mut lines = Vec::with_capacity(changes.len());

        for change in changes {
            let mut entry = JournalEntry {
                ts: ts.clone(),
                batch_id: batch_id.clone(),
                repository: repository.name.clone(),
                revision: revision.to_string(),
                kind: change.kind,
                path: change.path.clone(),
                previous_path: change.previous_path.clone(),
                size: None,
                chunks: 0,
            };
            if change.kind != ChangeKind::Deleted && has_working_copy {
                match fs::metadata(repository.local_path.join(&change.path)) {
                    Ok(metadata) => {
                        entry.size = Some(metadata.len());
                        entry.chunks = chunk_count(metadata.len());
                    }
                    Err(err) => {
                        result.errors.push(PipelineFileError {
                            path: change.path.clone(),
                            message: format!("read working copy: {err}"),
                        });
                        continue;
                    }
                }
            }
            result.stats.record(change.kind);
            result.stats.chunks_upserted += entry.chunks;
            if matches!(change.kind, ChangeKind::Deleted | ChangeKind::Renamed) {
                result.stats.chunks_deleted += 1;
            }
            lines.push(serde_json::to_string(&entry).context("serialize journal entry")?);
        }

        if !lines.is_empty() {
            let path = next_journal_path(&self.base_dir, self.max_bytes)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open journal {}", path.display()))?;
            for line in &lines {
                writeln!(file, "{line}").context("write journal entry")?;
            }
            debug!(
                repository = %repository.name,
                batch_id = %batch_id,
                entries = lines.len(),
                journal = %path.display(),
                "journal batch written"
            );
        }
        Ok(result)
    }
}

impl ProcessingPipeline for JournalPipeline {
    fn process_changes<'a>(
        &'a self,
        repository: &'a RepositoryRecord,
        revision: &'a str,
        changes: &'a [ChangedPath],
    ) -> SyncFuture<'a, PipelineResult> {
        Box::pin(async move {
            self.write_batch(repository, revision, changes)
                .map_err(|err| SyncError::Pipeline {
                    repository: repository.name.clone(),
                    message: format!("{err:#}"),
                })
        })
    }
}

#[derive(Serialize)]
struct JournalEntry {
    ts: String,
    batch_id: String,
    repository: String,
    revision: String,
    kind: ChangeKind,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    chunks: u32,
}

fn chunk_count(size: u64) -> u32 {
    size.div_ceil(CHUNK_BYTES).max(1) as u32
}

fn next_journal_path(base_dir: &Path, max_bytes: u64) -> anyhow::Result<PathBuf> {
    let date = OffsetDateTime::now_utc()
        .format(&time::format_description::parse("[year][month][day]")?)
        .context("format date")?;
    let mut suffix = 0;
    loop {
        let name = if suffix == 0 {
            format!("journal-{date}.jsonl")
        } else {
            format!("journal-{date}-{suffix}.jsonl")
        };
        let path = base_dir.join(name);
        if let Ok(metadata) = fs::metadata(&path)
            && metadata.len() >= max_bytes
        {
            suffix += 1;
            continue;
        }
        return Ok(path);
    }
}
