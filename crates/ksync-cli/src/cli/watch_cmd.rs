use super::*;
use ksync_core::changes::ChangeDetector;
use ksync_core::config::WatchedFolderConfig;
use ksync_core::watcher::{FolderWatcher, WatchError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

pub(super) fn select_folders(
    folders: &[WatchedFolderConfig],
    id: Option<&str>,
) -> anyhow::Result<Vec<WatchedFolderConfig>> {
    if folders.is_empty() {
        anyhow::bail!("no watched_folders configured");
    }
    match id {
        None => Ok(folders.to_vec()),
        Some(id) => match folders.iter().find(|folder| folder.id == id) {
            Some(folder) => Ok(vec![folder.clone()]),
            None => anyhow::bail!("unknown watched folder {id}"),
        },
    }
}

/// Prints one JSON change record per line until Ctrl-C.
pub(super) async fn handle_watch(runtime: &Runtime, args: WatchArgs) -> anyhow::Result<()> {
    let folders = select_folders(&runtime.config.watched_folders, args.folder.as_deref())?;
    let settings = &runtime.config.watch;
    let detector = Arc::new(ChangeDetector::new(
        Duration::from_millis(settings.rename_window_ms),
        settings.track_state,
    ));
    detector.subscribe(|change| print_json(change));

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks: JoinSet<(String, Result<(), WatchError>)> = JoinSet::new();
    for folder in folders {
        let watcher = FolderWatcher::new(folder.clone())
            .with_context(|| format!("watch folder {}", folder.id))?;
        info!(folder = %watcher.id(), root = %watcher.root().display(), "watching folder");
        let detector = detector.clone();
        let mut stop = stop_rx.clone();
        tasks.spawn(async move {
            let id = watcher.id().to_string();
            let shutdown = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            (id, watcher.run(detector, shutdown).await)
        });
    }

    let mut failed = 0usize;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.context("listen for Ctrl-C")?,
        Some(joined) = tasks.join_next() => {
            failed += report(joined);
        }
    }
    info!("stopping watchers");
    let _ = stop_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        failed += report(joined);
    }
    detector.flush();

    if failed > 0 {
        anyhow::bail!("{failed} watcher(s) stopped with an error");
    }
    Ok(())
}

fn report(joined: Result<(String, Result<(), WatchError>), tokio::task::JoinError>) -> usize {
    match joined {
        Ok((_, Ok(()))) => 0,
        Ok((id, Err(err))) => {
            warn!(folder = %id, error = %err, "watcher stopped");
            1
        }
        Err(err) => {
            warn!(error = %err, "watcher task aborted");
            1
        }
    }
}
