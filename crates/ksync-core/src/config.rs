use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHANGE_THRESHOLD: usize = 500;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_RENAME_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Parent directory of repository working copies.
    #[serde(default)]
    pub working_root: Option<PathBuf>,
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub watched_folders: Vec<WatchedFolderConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).context("read config")?;
        let config = serde_json::from_str(&data).context("parse config")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create config directory")?;
        }
        let data = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, data).context("write config")?;
        Ok(())
    }

    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => default_store_path(),
        }
    }

    pub fn working_root(&self) -> anyhow::Result<PathBuf> {
        match &self.working_root {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_local_dir().join("repos")),
        }
    }

    pub fn journal_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.journal_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_local_dir().join("journal")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Largest diff applied incrementally; anything bigger needs a full reindex.
    #[serde(default = "default_change_threshold")]
    pub change_threshold: usize,
    /// Pull new content into the local working copy before processing.
    #[serde(default = "default_true")]
    pub materialize: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            materialize: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Interrupted updates older than this are reindexed rather than resumed.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub auto_recover_on_startup: bool,
}

impl RecoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            auto_recover_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_rename_window_ms")]
    pub rename_window_ms: u64,
    #[serde(default = "default_true")]
    pub track_state: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            rename_window_ms: DEFAULT_RENAME_WINDOW_MS,
            track_state: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedFolderConfig {
    pub id: String,
    pub root: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl WatchedFolderConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_change_threshold() -> usize {
    DEFAULT_CHANGE_THRESHOLD
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

fn default_rename_window_ms() -> u64 {
    DEFAULT_RENAME_WINDOW_MS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_true() -> bool {
    true
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", "ksync", "ksync").context("resolve project dirs")
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.json"))
}

pub fn default_store_path() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().join("repositories.json"))
}
