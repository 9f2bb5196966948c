use super::app::{command_label, runs_startup_scan};
use super::repo_cmd::{StatusView, UpdateFailure};
use super::watch_cmd::select_folders;
use super::*;
use ksync_core::config::WatchedFolderConfig;
use tempfile::TempDir;

fn temp_runtime(tmp: &TempDir) -> Runtime {
    let config = AppConfig {
        store_path: Some(tmp.path().join("repositories.json")),
        working_root: Some(tmp.path().join("repos")),
        journal_dir: Some(tmp.path().join("journal")),
        ..AppConfig::default()
    };
    Runtime::build(config).unwrap()
}

fn seeded_record(runtime: &Runtime, name: &str) -> RepositoryRecord {
    let local_path = runtime.config.working_root().unwrap().join(name);
    std::fs::create_dir_all(&local_path).unwrap();
    let mut record = RepositoryRecord::new(
        name.to_string(),
        format!("https://github.com/acme/{name}"),
        "main".into(),
        local_path,
    );
    record.last_indexed_revision = Some("1111111111111111111111111111111111111111".into());
    record.last_indexed_at = Some(1_700_000_000);
    runtime.store.upsert(&record).unwrap();
    record
}

#[test]
fn update_requires_name_or_all() {
    assert!(Cli::try_parse_from(["ksync", "update"]).is_err());
    assert!(Cli::try_parse_from(["ksync", "update", "docs", "--all"]).is_err());
    let cli = Cli::try_parse_from(["ksync", "update", "--all"]).unwrap();
    match cli.command {
        Commands::Update(args) => {
            assert!(args.all);
            assert!(args.name.is_none());
        }
        _ => panic!("expected update command"),
    }
}

#[test]
fn index_defaults_to_main_branch() {
    let cli = Cli::try_parse_from(["ksync", "index", "https://github.com/acme/docs"]).unwrap();
    match cli.command {
        Commands::Index(args) => {
            assert_eq!(args.branch, "main");
            assert!(!args.force);
        }
        _ => panic!("expected index command"),
    }
}

#[test]
fn global_flags_parse_after_subcommand() {
    let cli = Cli::try_parse_from([
        "ksync",
        "recover",
        "--dry-run",
        "-vv",
        "--config",
        "/tmp/ksync.json",
    ])
    .unwrap();
    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/ksync.json")));
    assert_eq!(command_label(&cli.command), "recover");
    assert!(!runs_startup_scan(&cli.command));
}

#[test]
fn mutating_commands_run_startup_scan() {
    for argv in [
        vec!["ksync", "update", "--all"],
        vec!["ksync", "index", "https://github.com/acme/docs"],
        vec!["ksync", "watch"],
    ] {
        let cli = Cli::try_parse_from(argv).unwrap();
        assert!(runs_startup_scan(&cli.command));
    }
    let cli = Cli::try_parse_from(["ksync", "status"]).unwrap();
    assert!(!runs_startup_scan(&cli.command));
}

#[test]
fn select_folders_by_id() {
    let folders = vec![
        WatchedFolderConfig {
            id: "notes".into(),
            root: PathBuf::from("/tmp/notes"),
            include: vec![],
            exclude: vec![],
            debounce_ms: 300,
        },
        WatchedFolderConfig {
            id: "docs".into(),
            root: PathBuf::from("/tmp/docs"),
            include: vec!["**/*.md".into()],
            exclude: vec![],
            debounce_ms: 300,
        },
    ];
    assert_eq!(select_folders(&folders, None).unwrap().len(), 2);
    let picked = select_folders(&folders, Some("docs")).unwrap();
    assert_eq!(picked[0].root, PathBuf::from("/tmp/docs"));
    assert!(select_folders(&folders, Some("missing")).is_err());
    assert!(select_folders(&[], None).is_err());
}

#[test]
fn update_failure_carries_recommended_action() {
    let err = SyncError::ChangeThresholdExceeded {
        repository: "docs".into(),
        changed: 501,
        limit: 500,
    };
    let value = serde_json::to_value(UpdateFailure::new("docs", &err)).unwrap();
    assert_eq!(value["kind"], "change_threshold_exceeded");
    assert_eq!(value["recommended_action"], "full_reindex");
    assert_eq!(value["retryable"], false);
    assert!(value["error"].as_str().unwrap().contains("501"));
}

#[test]
fn status_view_formats_timestamps() {
    let mut record = RepositoryRecord::new(
        "docs".into(),
        "https://github.com/acme/docs".into(),
        "main".into(),
        PathBuf::from("/tmp/docs"),
    );
    record.last_indexed_at = Some(0);
    record.begin_update(60);
    let value = serde_json::to_value(StatusView::from(record)).unwrap();
    assert_eq!(value["status"], "indexing");
    assert_eq!(value["update_in_progress"], true);
    assert_eq!(value["last_indexed_at"], "1970-01-01T00:00:00Z");
    assert_eq!(value["update_started_at"], "1970-01-01T00:01:00Z");
}

#[test]
fn remove_purges_working_copy() {
    let tmp = TempDir::new().unwrap();
    let runtime = temp_runtime(&tmp);
    let record = seeded_record(&runtime, "docs");

    handle_remove(
        &runtime,
        RemoveArgs {
            name: "docs".into(),
            purge: true,
        },
    )
    .unwrap();
    assert!(runtime.store.get("docs").unwrap().is_none());
    assert!(!record.local_path.exists());
}

#[test]
fn remove_refuses_running_update() {
    let tmp = TempDir::new().unwrap();
    let runtime = temp_runtime(&tmp);
    let mut record = seeded_record(&runtime, "docs");
    record.begin_update(now_secs());
    runtime.store.upsert(&record).unwrap();

    let err = handle_remove(
        &runtime,
        RemoveArgs {
            name: "docs".into(),
            purge: false,
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("already in progress"));
    assert!(runtime.store.get("docs").unwrap().is_some());
}

#[test]
fn unknown_repository_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let runtime = temp_runtime(&tmp);
    let err = handle_status(
        &runtime,
        StatusArgs {
            name: Some("ghost".into()),
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn recover_resolves_manual_cases_without_network() {
    let tmp = TempDir::new().unwrap();
    let runtime = temp_runtime(&tmp);
    let mut record = seeded_record(&runtime, "docs");
    std::fs::remove_dir_all(&record.local_path).unwrap();
    record.begin_update(now_secs());
    runtime.store.upsert(&record).unwrap();

    handle_recover(&runtime, RecoverArgs { dry_run: true })
        .await
        .unwrap();
    assert!(runtime.store.get("docs").unwrap().unwrap().update_in_progress());

    handle_recover(&runtime, RecoverArgs { dry_run: false })
        .await
        .unwrap();
    let record = runtime.store.get("docs").unwrap().unwrap();
    assert!(!record.update_in_progress());
    assert_eq!(record.status, ksync_core::model::RepoStatus::Error);
    assert!(
        record
            .error_message
            .unwrap()
            .contains("manual recovery required")
    );
}
