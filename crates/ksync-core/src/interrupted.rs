use crate::error::StorageError;
use crate::model::RepositoryRecord;
use crate::store::RepositoryStore;
use std::time::Duration;
use tracing::{debug, warn};

/// A repository whose update started but never recorded completion.
/// Computed on every scan, never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct InterruptedUpdate {
    pub name: String,
    pub elapsed_secs: u64,
    pub last_known_revision: Option<String>,
    pub record: RepositoryRecord,
}

impl InterruptedUpdate {
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs(self.elapsed_secs)
    }
}

/// Scans the store for records with the in-progress flag set. Read only.
pub fn detect_interrupted(
    store: &dyn RepositoryStore,
    now: u64,
) -> Result<Vec<InterruptedUpdate>, StorageError> {
    let records = store.list()?;
    let interrupted: Vec<_> = records
        .into_iter()
        .filter_map(|record| {
            let started_at = record.update_started_at?;
            Some(InterruptedUpdate {
                name: record.name.clone(),
                elapsed_secs: now.saturating_sub(started_at),
                last_known_revision: record.last_indexed_revision.clone(),
                record,
            })
        })
        .collect();
    if interrupted.is_empty() {
        debug!("no interrupted updates found");
    }
    for snapshot in &interrupted {
        warn!(
            repository = %snapshot.name,
            elapsed_secs = snapshot.elapsed_secs,
            "found interrupted update"
        );
    }
    Ok(interrupted)
}
