use super::*;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    info!(command = command_label(&cli.command), "running command");

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let runtime = Runtime::build(config)?;

    if !cli.skip_startup_scan && runs_startup_scan(&cli.command) {
        startup_scan(&runtime).await?;
    }

    match cli.command {
        Commands::Index(args) => handle_index(&runtime, args).await,
        Commands::Update(args) => handle_update(&runtime, args).await,
        Commands::Status(args) => handle_status(&runtime, args),
        Commands::Remove(args) => handle_remove(&runtime, args),
        Commands::Recover(args) => handle_recover(&runtime, args).await,
        Commands::Health => handle_health(&runtime).await,
        Commands::Watch(args) => handle_watch(&runtime, args).await,
    }
}

/// `recover` handles interrupted updates itself; `status` and `health` only
/// read.
pub(super) fn runs_startup_scan(command: &Commands) -> bool {
    !matches!(
        command,
        Commands::Recover(_) | Commands::Status(_) | Commands::Health
    )
}

pub(super) fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Index(_) => "index",
        Commands::Update(_) => "update",
        Commands::Status(_) => "status",
        Commands::Remove(_) => "remove",
        Commands::Recover(_) => "recover",
        Commands::Health => "health",
        Commands::Watch(_) => "watch",
    }
}
