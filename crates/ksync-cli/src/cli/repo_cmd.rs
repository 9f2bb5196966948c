use super::*;

pub(super) async fn handle_index(runtime: &Runtime, args: IndexArgs) -> anyhow::Result<()> {
    let result = runtime
        .reindexer
        .index_repository(
            &args.url,
            ReindexOptions {
                branch: args.branch,
                force: args.force,
            },
        )
        .await?;
    print_json(&result)?;
    match result.status {
        ReindexStatus::Ready => Ok(()),
        ReindexStatus::Error => anyhow::bail!(
            "full reindex of {} failed: {}",
            args.url,
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Machine-readable failure line for `update`.
#[derive(Serialize)]
pub(super) struct UpdateFailure<'a> {
    pub(super) repository: &'a str,
    pub(super) kind: &'static str,
    pub(super) error: String,
    pub(super) retryable: bool,
    pub(super) recommended_action: Option<ksync_core::error::RecommendedAction>,
}

impl<'a> UpdateFailure<'a> {
    pub(super) fn new(repository: &'a str, err: &SyncError) -> Self {
        Self {
            repository,
            kind: err.kind().as_str(),
            error: err.to_string(),
            retryable: err.is_retryable(),
            recommended_action: err.recommended_action(),
        }
    }
}

pub(super) async fn handle_update(runtime: &Runtime, args: UpdateArgs) -> anyhow::Result<()> {
    let names: Vec<String> = match args.name {
        Some(name) => vec![name],
        None => runtime
            .store
            .list()?
            .into_iter()
            .map(|record| record.name)
            .collect(),
    };
    if names.is_empty() {
        println!("No repositories indexed yet; run `ksync index <url>` first.");
        return Ok(());
    }

    let mut failed = 0usize;
    for name in &names {
        match runtime.coordinator.update_repository(name).await {
            Ok(report) => print_json(&report)?,
            Err(err) => {
                failed += 1;
                warn!(repository = %name, error = %err, "update failed");
                print_json(&UpdateFailure::new(name, &err))?;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} updates failed", names.len());
    }
    Ok(())
}

/// Flattened view of a record for `status`.
#[derive(Serialize)]
pub(super) struct StatusView {
    pub(super) name: String,
    pub(super) url: String,
    pub(super) branch: String,
    pub(super) status: String,
    pub(super) update_in_progress: bool,
    pub(super) update_started_at: Option<String>,
    pub(super) last_indexed_revision: Option<String>,
    pub(super) last_indexed_at: Option<String>,
    pub(super) incremental_update_count: u32,
    pub(super) last_update: Option<ksync_core::model::UpdateHistoryEntry>,
    pub(super) error_message: Option<String>,
    pub(super) local_path: PathBuf,
}

impl From<RepositoryRecord> for StatusView {
    fn from(record: RepositoryRecord) -> Self {
        Self {
            update_in_progress: record.update_in_progress(),
            update_started_at: record.update_started_at.map(format_epoch_secs),
            last_indexed_at: record.last_indexed_at.map(format_epoch_secs),
            status: record.status.to_string(),
            last_update: record.update_history.last().cloned(),
            name: record.name,
            url: record.url,
            branch: record.branch,
            last_indexed_revision: record.last_indexed_revision,
            incremental_update_count: record.incremental_update_count,
            error_message: record.error_message,
            local_path: record.local_path,
        }
    }
}

pub(super) fn handle_status(runtime: &Runtime, args: StatusArgs) -> anyhow::Result<()> {
    match args.name {
        Some(name) => print_json(&StatusView::from(runtime.record(&name)?)),
        None => {
            let views: Vec<StatusView> = runtime
                .store
                .list()?
                .into_iter()
                .map(StatusView::from)
                .collect();
            print_json(&views)
        }
    }
}

pub(super) fn handle_remove(runtime: &Runtime, args: RemoveArgs) -> anyhow::Result<()> {
    let record = runtime.record(&args.name)?;
    if let Some(started_at) = record.update_started_at {
        return Err(SyncError::UpdateInProgress {
            repository: record.name,
            started_at,
        }
        .into());
    }
    runtime.store.remove(&record.name)?;
    info!(repository = %record.name, "repository removed");

    if args.purge && record.local_path.exists() {
        let working_root = runtime.config.working_root()?;
        if !record.local_path.starts_with(&working_root) {
            anyhow::bail!(
                "refusing to delete {} outside the working root {}",
                record.local_path.display(),
                working_root.display()
            );
        }
        std::fs::remove_dir_all(&record.local_path)
            .with_context(|| format!("delete working copy {}", record.local_path.display()))?;
        info!(path = %record.local_path.display(), "working copy deleted");
    }
    println!("Removed {}", record.name);
    Ok(())
}

pub(super) async fn handle_health(runtime: &Runtime) -> anyhow::Result<()> {
    let status = runtime.source.health_check().await;
    print_json(&status)?;
    if !status.healthy {
        anyhow::bail!(
            "{} API is unhealthy: {}",
            runtime.source.name(),
            status.message.as_deref().unwrap_or("no details")
        );
    }
    Ok(())
}
