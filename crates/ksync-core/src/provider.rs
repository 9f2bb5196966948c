use crate::error::SyncError;
use crate::model::{HealthStatus, HeadRevision, RevisionComparison};
use std::future::Future;
use std::pin::Pin;

pub type SyncFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send + 'a>>;
pub type HealthFuture<'a> = Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>>;

/// Remote API that knows the revisions of a repository.
///
/// Implementations validate identifiers before any network call, retry
/// transient failures internally and scrub credentials from error messages.
pub trait ChangeSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn head_revision<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        branch: Option<&'a str>,
    ) -> SyncFuture<'a, HeadRevision>;

    fn compare_revisions<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        base: &'a str,
        head: &'a str,
    ) -> SyncFuture<'a, RevisionComparison>;

    /// Liveness and rate-limit probe. Never fails; problems are reported in
    /// the returned status.
    fn health_check<'a>(&'a self) -> HealthFuture<'a>;
}
