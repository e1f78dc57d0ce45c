use crate::cancel::CancelToken;
use crate::config::RepoId;
use crate::error::FetchError;
use crate::metrics::{self, MetricsWindow, RepositoryMetrics};
use crate::types::RepositoryActivity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Where repository activity comes from.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// Fetches the issues and pull requests of `repo_id` created since `since` (a source may
    /// return somewhat older records as well). Fails with `FetchError::Cancelled` once `cancel`
    /// fires.
    async fn fetch(
        &self,
        repo_id: &RepoId,
        since: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RepositoryActivity, FetchError>;
}

/// Fetches repository activity and calculates the dashboard metrics for `window`.
///
/// This function separates the logic of data retrieval and processing
/// from the HTTP layer.
pub async fn fetch_and_calculate_metrics(
    source: &dyn RepositorySource,
    repo_id: &RepoId,
    window: &MetricsWindow,
    cancel: &CancelToken,
) -> Result<RepositoryMetrics, FetchError> {
    let activity = source.fetch(repo_id, window.lower_bound(), cancel).await?;

    // A search cancelled while its last response was being decoded still counts as cancelled.
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }

    Ok(metrics::compute_repository_metrics(&activity, window))
}
