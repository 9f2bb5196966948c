use super::*;
use ksync_core::clock::format_elapsed;
use ksync_core::recovery::RecoveryStrategy;

#[derive(Serialize)]
pub(super) struct PlannedRecovery<'a> {
    pub(super) repository: &'a str,
    pub(super) interrupted_for: String,
    pub(super) last_known_revision: Option<&'a str>,
    #[serde(flatten)]
    pub(super) strategy: RecoveryStrategy,
}

pub(super) fn plan<'a>(runtime: &Runtime, snapshot: &'a InterruptedUpdate) -> PlannedRecovery<'a> {
    PlannedRecovery {
        repository: &snapshot.name,
        interrupted_for: format_elapsed(snapshot.elapsed_secs),
        last_known_revision: snapshot.last_known_revision.as_deref(),
        strategy: runtime.recovery.evaluate(snapshot),
    }
}

/// Reports interrupted updates found at startup and, when configured,
/// recovers them before the command runs.
pub(super) async fn startup_scan(runtime: &Runtime) -> anyhow::Result<()> {
    let interrupted = detect_interrupted(runtime.store.as_ref(), now_secs())?;
    if interrupted.is_empty() {
        return Ok(());
    }
    for snapshot in &interrupted {
        let planned = plan(runtime, snapshot);
        warn!(
            repository = %planned.repository,
            interrupted_for = %planned.interrupted_for,
            strategy = planned.strategy.kind.as_str(),
            "found interrupted update"
        );
    }
    if !runtime.config.recovery.auto_recover_on_startup {
        eprintln!(
            "{} interrupted update(s) found; run `ksync recover` to repair them.",
            interrupted.len()
        );
        return Ok(());
    }
    let summary = runtime.recovery.recover_multiple(&interrupted).await;
    info!(
        successful = summary.successful,
        failed = summary.failed,
        manual_required = summary.manual_required,
        "startup recovery finished"
    );
    Ok(())
}

pub(super) async fn handle_recover(runtime: &Runtime, args: RecoverArgs) -> anyhow::Result<()> {
    let interrupted = detect_interrupted(runtime.store.as_ref(), now_secs())?;
    if interrupted.is_empty() {
        println!("No interrupted updates.");
        return Ok(());
    }
    if args.dry_run {
        for snapshot in &interrupted {
            print_json(&plan(runtime, snapshot))?;
        }
        return Ok(());
    }

    let summary = runtime.recovery.recover_multiple(&interrupted).await;
    print_json(&summary)?;
    if summary.failed > 0 {
        anyhow::bail!("{} of {} recoveries failed", summary.failed, summary.total);
    }
    Ok(())
}
