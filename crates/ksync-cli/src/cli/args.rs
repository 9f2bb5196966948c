use super::*;
use clap::ArgGroup;

#[derive(Parser)]
#[command(
    name = "ksync",
    author,
    version,
    about = "Keep indexed Git repositories and watched folders in sync"
)]
pub(super) struct Cli {
    #[arg(long, global = true, help = "Path to the config file")]
    pub(super) config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase log verbosity (repeatable)"
    )]
    pub(super) verbose: u8,
    #[arg(
        long,
        global = true,
        help = "Skip the interrupted-update scan at startup"
    )]
    pub(super) skip_startup_scan: bool,
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(clap::Subcommand)]
pub(super) enum Commands {
    #[command(about = "Clone and fully index a repository")]
    Index(IndexArgs),
    #[command(about = "Apply remote changes to indexed repositories")]
    Update(UpdateArgs),
    #[command(about = "Show repository state as JSON")]
    Status(StatusArgs),
    #[command(about = "Forget a repository")]
    Remove(RemoveArgs),
    #[command(about = "Recover updates interrupted by a crash")]
    Recover(RecoverArgs),
    #[command(about = "Probe the remote API and report rate limits")]
    Health,
    #[command(about = "Stream change records for watched folders")]
    Watch(WatchArgs),
}

#[derive(Parser)]
pub(super) struct IndexArgs {
    #[arg(help = "Repository URL, e.g. https://github.com/owner/repo")]
    pub(super) url: String,
    #[arg(long, default_value = "main")]
    pub(super) branch: String,
    #[arg(long, help = "Reindex even if an update is marked in progress")]
    pub(super) force: bool,
}

#[derive(Parser)]
#[command(group(ArgGroup::new("selection").required(true).args(["name", "all"])))]
pub(super) struct UpdateArgs {
    pub(super) name: Option<String>,
    #[arg(long, help = "Update every known repository")]
    pub(super) all: bool,
}

#[derive(Parser)]
pub(super) struct StatusArgs {
    pub(super) name: Option<String>,
}

#[derive(Parser)]
pub(super) struct RemoveArgs {
    pub(super) name: String,
    #[arg(long, help = "Also delete the local working copy")]
    pub(super) purge: bool,
}

#[derive(Parser)]
pub(super) struct RecoverArgs {
    #[arg(long, help = "Print the planned strategies without executing them")]
    pub(super) dry_run: bool,
}

#[derive(Parser)]
pub(super) struct WatchArgs {
    #[arg(help = "Watched folder id; all configured folders when omitted")]
    pub(super) folder: Option<String>,
}
