use crate::logging;
use anyhow::Context;
use clap::Parser;
use ksync_core::clock::{format_epoch_secs, now_secs};
use ksync_core::config::{AppConfig, default_config_path};
use ksync_core::error::{NotFoundTarget, SyncError};
use ksync_core::interrupted::{InterruptedUpdate, detect_interrupted};
use ksync_core::model::{RepoAuth, RepositoryRecord};
use ksync_core::pipeline::{FullReindexer, ProcessingPipeline, ReindexOptions, ReindexStatus};
use ksync_core::provider::ChangeSource;
use ksync_core::recovery::RecoveryExecutor;
use ksync_core::store::{JsonRepositoryStore, RepositoryStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod app;
mod args;
mod context;
mod recover_cmd;
mod repo_cmd;
#[cfg(test)]
mod tests;
mod watch_cmd;

use args::*;
use context::Runtime;
use recover_cmd::{handle_recover, startup_scan};
use repo_cmd::{handle_health, handle_index, handle_remove, handle_status, handle_update};
use watch_cmd::handle_watch;

pub async fn run() -> anyhow::Result<()> {
    app::run().await
}

/// Writes `value` to stdout as one line of JSON.
fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(value).context("serialize output")?;
    println!("{line}");
    Ok(())
}
