use crate::github_models::{CommitItem, CompareItem, RateLimitItem};
use crate::http::{RetryPolicy, send_with_retry};
use crate::redact::Scrubber;
use crate::validate::{normalize_branch, validate_name, validate_ref};
use anyhow::Context;
use ksync_core::config::GitHubConfig;
use ksync_core::error::{NotFoundTarget, SyncError};
use ksync_core::model::{HealthStatus, HeadRevision, RevisionComparison};
use ksync_core::provider::{ChangeSource, HealthFuture, SyncFuture};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "ksync";
const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// [`ChangeSource`] backed by the GitHub REST API.
pub struct GitHubChangeSource {
    client: Client,
    api_base: String,
    token: Option<String>,
    scrubber: Scrubber,
    policy: RetryPolicy,
}

impl GitHubChangeSource {
    pub fn new(config: &GitHubConfig, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build HTTP client")?;
        let token = token.filter(|token| !token.trim().is_empty());
        let scrubber = Scrubber::new(token.as_deref()).context("compile scrub patterns")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            scrubber,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        not_found: NotFoundTarget,
    ) -> Result<T, SyncError> {
        debug!(url = %url, "GitHub request");
        let response =
            send_with_retry(|| self.request(url), &self.policy, &self.scrubber, &not_found)
                .await?;
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|err| SyncError::Api {
            status,
            message: self.scrubber.scrub(&format!("decode response: {err}")),
            retryable: false,
        })
    }

    async fn fetch_head(
        &self,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
    ) -> Result<HeadRevision, SyncError> {
        validate_name("owner", owner)?;
        validate_name("repo", repo)?;
        let branch = branch.map(normalize_branch);
        if let Some(branch) = branch {
            validate_ref("branch", branch)?;
        }
        let reference = branch.unwrap_or("HEAD");
        let url = format!("{}/repos/{owner}/{repo}/commits/{reference}", self.api_base);
        let not_found = match branch {
            Some(branch) => NotFoundTarget::Branch(branch.to_string()),
            None => NotFoundTarget::Repository(format!("{owner}/{repo}")),
        };
        let item: CommitItem = self.get_json(&url, not_found).await?;
        Ok(item.into_head())
    }

    async fn fetch_comparison(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<RevisionComparison, SyncError> {
        validate_name("owner", owner)?;
        validate_name("repo", repo)?;
        validate_ref("base", base)?;
        validate_ref("head", head)?;
        let url = format!(
            "{}/repos/{owner}/{repo}/compare/{base}...{head}",
            self.api_base
        );
        let item: CompareItem = self
            .get_json(&url, NotFoundTarget::Revision(base.to_string()))
            .await?;
        Ok(item.into_comparison(base, head))
    }

    async fn probe(&self) -> HealthStatus {
        let url = format!("{}/rate_limit", self.api_base);
        match self
            .get_json::<RateLimitItem>(&url, NotFoundTarget::Repository("rate_limit".into()))
            .await
        {
            Ok(item) => HealthStatus {
                healthy: true,
                rate_limit_remaining: Some(item.rate.remaining),
                rate_limit_reset: Some(item.rate.reset),
                message: None,
            },
            Err(err) => {
                let reset = match &err {
                    SyncError::RateLimited { reset_at, .. } => *reset_at,
                    _ => None,
                };
                HealthStatus {
                    healthy: false,
                    rate_limit_remaining: reset.map(|_| 0),
                    rate_limit_reset: reset,
                    message: Some(self.scrubber.scrub(&err.to_string())),
                }
            }
        }
    }
}

impl ChangeSource for GitHubChangeSource {
    fn name(&self) -> &'static str {
        "github"
    }

    fn head_revision<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        branch: Option<&'a str>,
    ) -> SyncFuture<'a, HeadRevision> {
        Box::pin(self.fetch_head(owner, repo, branch))
    }

    fn compare_revisions<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        base: &'a str,
        head: &'a str,
    ) -> SyncFuture<'a, RevisionComparison> {
        Box::pin(self.fetch_comparison(owner, repo, base, head))
    }

    fn health_check<'a>(&'a self) -> HealthFuture<'a> {
        Box::pin(self.probe())
    }
}
