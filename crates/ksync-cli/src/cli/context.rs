use super::*;
use ksync_core::coordinator::UpdateCoordinator;
use ksync_core::journal::JournalPipeline;
use ksync_core::reindex::LocalReindexer;
use ksync_core::working_copy::GitMaterializer;
use ksync_providers::github::GitHubChangeSource;

/// Username libgit2 presents alongside a GitHub token over HTTPS.
const TOKEN_USERNAME: &str = "x-access-token";

/// Every long-lived component, built once per process.
pub(super) struct Runtime {
    pub(super) config: AppConfig,
    pub(super) store: Arc<dyn RepositoryStore>,
    pub(super) source: Arc<dyn ChangeSource>,
    pub(super) coordinator: Arc<UpdateCoordinator>,
    pub(super) reindexer: Arc<dyn FullReindexer>,
    pub(super) recovery: RecoveryExecutor,
}

impl Runtime {
    pub(super) fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store_path = config.store_path()?;
        let store: Arc<dyn RepositoryStore> = Arc::new(
            JsonRepositoryStore::open(store_path.clone())
                .with_context(|| format!("open repository store {}", store_path.display()))?,
        );
        let token = read_token(&config.github.token_env);
        if token.is_none() {
            warn!(
                env = %config.github.token_env,
                "no API token set; requests are unauthenticated"
            );
        }
        let source: Arc<dyn ChangeSource> =
            Arc::new(GitHubChangeSource::new(&config.github, token.clone())?);
        let pipeline: Arc<dyn ProcessingPipeline> =
            Arc::new(JournalPipeline::new(config.journal_dir()?)?);
        let auth = token.map(|token| RepoAuth {
            username: TOKEN_USERNAME.to_string(),
            token,
        });

        let coordinator = Arc::new(
            UpdateCoordinator::new(
                store.clone(),
                source.clone(),
                pipeline.clone(),
                config.coordinator,
            )
            .with_materializer(Arc::new(GitMaterializer::new(auth.clone()))),
        );
        let reindexer: Arc<dyn FullReindexer> = Arc::new(LocalReindexer::new(
            store.clone(),
            pipeline,
            config.working_root()?,
            auth,
        ));
        let recovery = RecoveryExecutor::new(
            store.clone(),
            coordinator.clone(),
            reindexer.clone(),
            config.recovery,
        );
        Ok(Self {
            config,
            store,
            source,
            coordinator,
            reindexer,
            recovery,
        })
    }

    pub(super) fn record(&self, name: &str) -> anyhow::Result<RepositoryRecord> {
        match self.store.get(name)? {
            Some(record) => Ok(record),
            None => Err(SyncError::NotFound(NotFoundTarget::Record(name.to_string())).into()),
        }
    }
}

fn read_token(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
