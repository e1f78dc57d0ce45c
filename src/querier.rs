//! Service layer for repository searches.
//!
//! This module implements `MetricsQuerier`, which acts as the main entry point for retrieving
//! repository metrics. It handles:
//! 1. Picking the repository source (GraphQL or REST) from the configuration.
//! 2. Tracking search sessions, so a new search from the same dashboard cancels the old one.
//! 3. Fetching activity from GitHub and calculating metrics for the requested window.
//! 4. Owner lookups for the search box.

use crate::cancel::CancelToken;
use crate::config::{AppConfig, FetchMode, RepoId};
use crate::error::FetchError;
use crate::fetcher::{self, RepositorySource};
use crate::github::{self, GraphqlClient, GraphqlSource, OctocrabClient, OwnerSuggestion};
use crate::metrics::{MetricsWindow, RepositoryMetrics};
use crate::rest::RestSource;
use crate::session::{SearchSession, SearchState};
use moka::future::Cache;
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsQuerier {
    client: Arc<dyn GraphqlClient>,
    source: Arc<dyn RepositorySource>,
    sessions: Cache<String, Arc<SearchSession>>,
}

impl MetricsQuerier {
    /// Initializes a new MetricsQuerier talking to GitHub through octocrab.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let octocrab_client = OctocrabClient::new(config)?;

        let source: Arc<dyn RepositorySource> = match config.fetch_mode {
            FetchMode::Graphql => Arc::new(GraphqlSource::new(
                Arc::new(octocrab_client.clone()),
                config,
            )),
            FetchMode::Rest => Arc::new(RestSource::new(
                octocrab_client.octocrab().clone(),
                config,
            )),
        };
        tracing::info!(
            fetch_mode = ?config.fetch_mode,
            api = %config.github_api_url,
            "GitHub source ready"
        );

        Ok(Self::with_parts(Arc::new(octocrab_client), source, config))
    }

    /// Builds a querier from explicit parts, e.g. fakes in tests.
    pub fn with_parts(
        client: Arc<dyn GraphqlClient>,
        source: Arc<dyn RepositorySource>,
        config: &AppConfig,
    ) -> Self {
        let sessions = Cache::builder()
            .max_capacity(config.session_max_capacity)
            .time_to_idle(config.session_ttl())
            .build();

        Self {
            client,
            source,
            sessions,
        }
    }

    /// Runs a search for `repo_id` over `window`.
    ///
    /// With a `session_id`, any search still running for that session is cancelled first and
    /// the outcome is recorded as the session's state, unless this search gets superseded in
    /// turn. Dropping the returned future cancels the search.
    pub async fn search(
        &self,
        session_id: Option<&str>,
        repo_id: RepoId,
        window: MetricsWindow,
    ) -> Result<RepositoryMetrics, FetchError> {
        let Some(session_id) = session_id else {
            let cancel = CancelToken::new();
            let _guard = cancel.drop_guard();
            return fetcher::fetch_and_calculate_metrics(
                self.source.as_ref(),
                &repo_id,
                &window,
                &cancel,
            )
            .await;
        };

        let session = self
            .sessions
            .get_with(session_id.to_string(), async { Arc::new(SearchSession::new()) })
            .await;

        // Dropping the ticket, e.g. when this future is dropped, abandons the search.
        let ticket = session.begin(repo_id);

        let result = fetcher::fetch_and_calculate_metrics(
            self.source.as_ref(),
            ticket.repo(),
            &window,
            ticket.token(),
        )
        .await;

        if !session.complete(&ticket, &result) {
            tracing::debug!(session_id, repo_id = %ticket.repo(), "Search superseded");
            return Err(FetchError::Cancelled);
        }

        result
    }

    /// The state of a known session, or `None` if it never searched or has expired.
    pub async fn session_state(&self, session_id: &str) -> Option<SearchState> {
        let session = self.sessions.get(session_id).await?;
        Some(session.state())
    }

    pub async fn search_owners(&self, partial: &str) -> Result<Vec<OwnerSuggestion>, FetchError> {
        let cancel = CancelToken::new();
        let _guard = cancel.drop_guard();
        github::search_owners(self.client.as_ref(), partial, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PullRequest, RepositoryActivity};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use serde_json::Value;
    use tokio::sync::Notify;

    struct NoGraphql;

    #[async_trait]
    impl GraphqlClient for NoGraphql {
        async fn execute(
            &self,
            _request: &github::GraphqlRequest,
        ) -> Result<Value, FetchError> {
            Err(FetchError::transport(anyhow::anyhow!("offline")))
        }
    }

    /// Blocks fetches of the repository named "slow" until cancelled; others answer at once.
    #[derive(Default)]
    struct StallingSource {
        slow_started: Notify,
    }

    #[async_trait]
    impl RepositorySource for StallingSource {
        async fn fetch(
            &self,
            repo_id: &RepoId,
            _since: DateTime<Utc>,
            cancel: &CancelToken,
        ) -> Result<RepositoryActivity, FetchError> {
            if repo_id.repo == "slow" {
                self.slow_started.notify_one();
                return cancel.run(std::future::pending()).await;
            }
            Ok(RepositoryActivity {
                issues: vec![],
                pull_requests: vec![PullRequest {
                    created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                    closed_at: None,
                    merged_at: None,
                    changed_files: Some(1),
                    commit_count: Some(1),
                }],
            })
        }
    }

    fn repo(name: &str) -> RepoId {
        RepoId {
            owner: "octo".to_string(),
            repo: name.to_string(),
        }
    }

    fn window() -> MetricsWindow {
        MetricsWindow::ending_at(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(), 30).unwrap()
    }

    fn querier(source: Arc<StallingSource>) -> MetricsQuerier {
        MetricsQuerier::with_parts(Arc::new(NoGraphql), source, &AppConfig::default())
    }

    fn shows(state: Option<SearchState>, name: &str) -> bool {
        matches!(state, Some(SearchState::Ready { repo: shown, .. }) if shown == repo(name))
    }

    #[tokio::test]
    async fn test_newer_search_supersedes_older_one() {
        let source = Arc::new(StallingSource::default());
        let querier = querier(source.clone());

        let (first, second) = tokio::join!(
            querier.search(Some("tab"), repo("slow"), window()),
            async {
                source.slow_started.notified().await;
                querier.search(Some("tab"), repo("fast"), window()).await
            }
        );

        assert!(matches!(first, Err(FetchError::Cancelled)));
        assert_eq!(second.unwrap().created_pull_requests, 1);
        assert!(shows(querier.session_state("tab").await, "fast"));
    }

    #[tokio::test]
    async fn test_dropped_search_leaves_previous_results() {
        let source = Arc::new(StallingSource::default());
        let querier = querier(source.clone());

        querier
            .search(Some("tab"), repo("fast"), window())
            .await
            .unwrap();

        // The client goes away while the second search is still waiting on GitHub.
        tokio::select! {
            _ = querier.search(Some("tab"), repo("slow"), window()) => {
                panic!("the slow search never finishes on its own")
            }
            _ = source.slow_started.notified() => {}
        }

        assert!(shows(querier.session_state("tab").await, "fast"));
    }

    #[tokio::test]
    async fn test_unknown_session_has_no_state() {
        let querier = querier(Arc::new(StallingSource::default()));

        assert!(querier.session_state("nobody").await.is_none());

        let metrics = querier.search(None, repo("a"), window()).await.unwrap();
        assert_eq!(metrics.created_pull_requests, 1);
        assert!(querier.session_state("nobody").await.is_none());
    }

    #[tokio::test]
    async fn test_owner_search_surfaces_transport_errors() {
        let querier = querier(Arc::new(StallingSource::default()));

        let result = querier.search_owners("octo").await;
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
