use crate::error::{SyncError, short_revision};
use crate::model::{RepoAuth, RepositoryRecord};
use crate::pipeline::Materializer;
use crate::provider::SyncFuture;
use anyhow::Context;
use git2::{
    Cred, FetchOptions, ObjectType, Oid, RemoteCallbacks, Repository, ResetType, StatusOptions,
    TreeWalkMode, TreeWalkResult,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CheckoutOutcome {
    Cloned,
    FastForwarded,
    UpToDate,
    Reset,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CheckoutMode {
    /// Move the branch forward only; refuse dirty trees and local commits.
    FastForward,
    /// Discard local state and match the remote branch exactly.
    ForceReset,
}

/// Brings the working copy at `path` to `target` (a revision id), or to the
/// remote branch head when `target` is `None`. Returns the resulting HEAD id.
pub fn checkout_revision(
    path: &Path,
    remote_url: &str,
    branch: &str,
    target: Option<&str>,
    auth: Option<&RepoAuth>,
    mode: CheckoutMode,
) -> anyhow::Result<(CheckoutOutcome, String)> {
    let mut cloned = false;
    if !path.join(".git").exists() {
        clone_repo(path, remote_url, branch, auth)?;
        cloned = true;
    }

    let repo = Repository::open(path).context("open repo")?;
    if mode == CheckoutMode::FastForward && !cloned && !is_working_tree_clean(&repo)? {
        anyhow::bail!("working tree at {} has local modifications", path.display());
    }
    ensure_origin_remote(&repo, remote_url)?;
    if !cloned {
        fetch_origin(&repo, branch, auth)?;
    }

    let remote_ref = format!("refs/remotes/origin/{branch}");
    let target_oid = match target {
        Some(revision) => {
            let oid = Oid::from_str(revision)
                .with_context(|| format!("parse revision {}", short_revision(revision)))?;
            repo.find_commit(oid).with_context(|| {
                format!("revision {} missing after fetch", short_revision(revision))
            })?;
            oid
        }
        None => repo
            .refname_to_id(&remote_ref)
            .with_context(|| format!("remote branch {branch} missing"))?,
    };

    let outcome = match mode {
        CheckoutMode::FastForward => fast_forward_branch(&repo, branch, target_oid)?,
        CheckoutMode::ForceReset => {
            reset_branch(&repo, branch, target_oid)?;
            CheckoutOutcome::Reset
        }
    };
    let outcome = if cloned {
        CheckoutOutcome::Cloned
    } else {
        outcome
    };
    Ok((outcome, target_oid.to_string()))
}

/// Paths of every blob in the HEAD tree, `/`-separated and sorted.
pub fn tracked_files(path: &Path) -> anyhow::Result<Vec<String>> {
    let repo = Repository::open(path).context("open repo")?;
    let tree = repo
        .head()
        .context("resolve HEAD")?
        .peel_to_tree()
        .context("peel HEAD to tree")?;
    let mut files = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob)
            && let Some(name) = entry.name()
        {
            files.push(format!("{root}{name}"));
        }
        TreeWalkResult::Ok
    })
    .context("walk HEAD tree")?;
    files.sort();
    Ok(files)
}

fn clone_repo(
    repo_path: &Path,
    remote_url: &str,
    branch: &str,
    auth: Option<&RepoAuth>,
) -> anyhow::Result<()> {
    let mut fo = FetchOptions::new();
    fo.remote_callbacks(remote_callbacks(auth));
    info!(path = %repo_path.display(), branch = %branch, "cloning repo");
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fo);
    builder.branch(branch);
    builder.clone(remote_url, repo_path).context("clone repo")?;
    Ok(())
}

fn is_working_tree_clean(repo: &Repository) -> anyhow::Result<bool> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo.statuses(Some(&mut options)).context("status repo")?;
    Ok(statuses.is_empty())
}

fn ensure_origin_remote(repo: &Repository, remote_url: &str) -> anyhow::Result<()> {
    match repo.find_remote("origin") {
        Ok(remote) => {
            let current = remote.url().unwrap_or_default();
            if current != remote_url {
                repo.remote_set_url("origin", remote_url)
                    .context("update origin remote url")?;
            }
        }
        Err(_) => {
            repo.remote("origin", remote_url)
                .context("create origin remote")?;
        }
    }
    Ok(())
}

fn fetch_origin(repo: &Repository, branch: &str, auth: Option<&RepoAuth>) -> anyhow::Result<()> {
    let mut remote = repo.find_remote("origin").context("find origin remote")?;
    let mut fo = FetchOptions::new();
    fo.remote_callbacks(remote_callbacks(auth));
    let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
    info!(branch = %branch, "fetching origin");
    remote
        .fetch(&[refspec.as_str()], Some(&mut fo), None)
        .context("fetch origin")?;
    Ok(())
}

fn fast_forward_branch(
    repo: &Repository,
    branch: &str,
    target: Oid,
) -> anyhow::Result<CheckoutOutcome> {
    let local_ref = format!("refs/heads/{branch}");
    let local_oid = match repo.refname_to_id(&local_ref) {
        Ok(oid) => oid,
        Err(_) => {
            warn!(branch = %branch, "branch missing locally; creating local branch");
            create_local_branch(repo, branch, target)?;
            repo.set_head(&local_ref).context("set HEAD")?;
            checkout_head(repo)?;
            return Ok(CheckoutOutcome::FastForwarded);
        }
    };
    if local_oid == target {
        return Ok(CheckoutOutcome::UpToDate);
    }
    if !repo
        .graph_descendant_of(target, local_oid)
        .context("compare local and target")?
    {
        anyhow::bail!(
            "local branch {branch} at {} cannot fast-forward to {}",
            short_revision(&local_oid.to_string()),
            short_revision(&target.to_string())
        );
    }
    update_branch_ref(repo, &local_ref, target)?;
    if is_head_on_branch(repo, branch)? {
        checkout_head(repo)?;
    }
    Ok(CheckoutOutcome::FastForwarded)
}

fn reset_branch(repo: &Repository, branch: &str, target: Oid) -> anyhow::Result<()> {
    let local_ref = format!("refs/heads/{branch}");
    let commit = repo.find_commit(target).context("find target commit")?;
    repo.reference(&local_ref, target, true, "force reset")
        .context("point local branch at target")?;
    repo.set_head(&local_ref).context("set HEAD")?;
    repo.reset(commit.as_object(), ResetType::Hard, None)
        .context("hard reset working copy")?;
    Ok(())
}

fn create_local_branch(repo: &Repository, branch: &str, target: Oid) -> anyhow::Result<()> {
    let commit = repo.find_commit(target).context("find target commit")?;
    repo.branch(branch, &commit, false)
        .context("create local branch")?;
    Ok(())
}

fn update_branch_ref(repo: &Repository, local_ref: &str, target: Oid) -> anyhow::Result<()> {
    let mut reference = repo
        .find_reference(local_ref)
        .with_context(|| format!("find local ref {local_ref}"))?;
    reference
        .set_target(target, "fast-forward")
        .context("set local ref target")?;
    Ok(())
}

fn is_head_on_branch(repo: &Repository, branch: &str) -> anyhow::Result<bool> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(_) => return Ok(false),
    };
    Ok(head.is_branch() && head.shorthand() == Some(branch))
}

fn checkout_head(repo: &Repository) -> anyhow::Result<()> {
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_head(Some(&mut checkout))
        .context("checkout head")?;
    Ok(())
}

fn remote_callbacks(auth: Option<&RepoAuth>) -> RemoteCallbacks<'static> {
    let auth = auth.cloned();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        if let Some(auth) = auth.as_ref() {
            let username = if auth.username.is_empty() {
                username_from_url.unwrap_or("x-access-token")
            } else {
                auth.username.as_str()
            };
            Cred::userpass_plaintext(username, &auth.token)
        } else {
            Cred::default()
        }
    });
    callbacks
}

/// Pull-equivalent step of an incremental update, backed by `git2`.
#[derive(Clone, Default)]
pub struct GitMaterializer {
    auth: Option<RepoAuth>,
}

impl GitMaterializer {
    pub fn new(auth: Option<RepoAuth>) -> Self {
        Self { auth }
    }
}

impl Materializer for GitMaterializer {
    fn materialize<'a>(
        &'a self,
        repository: &'a RepositoryRecord,
        revision: &'a str,
    ) -> SyncFuture<'a, ()> {
        let path: PathBuf = repository.local_path.clone();
        let url = repository.url.clone();
        let branch = repository.branch.clone();
        let target = revision.to_string();
        let auth = self.auth.clone();
        let name = repository.name.clone();
        Box::pin(async move {
            let result = tokio::task::spawn_blocking(move || {
                checkout_revision(
                    &path,
                    &url,
                    &branch,
                    Some(&target),
                    auth.as_ref(),
                    CheckoutMode::FastForward,
                )
            })
            .await;
            match result {
                Ok(Ok((outcome, head))) => {
                    info!(repository = %name, ?outcome, head = %short_revision(&head), "working copy materialized");
                    Ok(())
                }
                Ok(Err(err)) => Err(SyncError::Materialization {
                    repository: name,
                    message: format!("{err:#}"),
                    retryable: true,
                }),
                Err(join_err) => Err(SyncError::Materialization {
                    repository: name,
                    message: join_err.to_string(),
                    retryable: true,
                }),
            }
        })
    }
}
