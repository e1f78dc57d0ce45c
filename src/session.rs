//! Search sessions: one live search per dashboard tab.
//!
//! Starting a search cancels whatever search the session was still running, and only the most
//! recent search may publish its outcome. A slow, superseded search therefore can never
//! overwrite the results of a newer one.

use crate::cancel::CancelToken;
use crate::config::RepoId;
use crate::error::FetchError;
use crate::metrics::RepositoryMetrics;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What the dashboard currently shows for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchState {
    Idle,
    Loading {
        repo: RepoId,
    },
    Ready {
        repo: RepoId,
        metrics: Box<RepositoryMetrics>,
    },
    Failed {
        repo: RepoId,
        message: String,
    },
}

/// Handle for one search started through `SearchSession::begin`.
///
/// Dropping a ticket before its outcome is published abandons the search: its token is
/// cancelled and, if it is still the session's latest search, the session goes back to what
/// it showed before the search began.
#[derive(Debug)]
pub struct SearchTicket {
    session: Arc<SearchSession>,
    generation: u64,
    repo: RepoId,
    token: CancelToken,
}

impl SearchTicket {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }
}

impl Drop for SearchTicket {
    fn drop(&mut self) {
        self.token.cancel();
        self.session.abandon(self.generation);
    }
}

#[derive(Debug)]
struct SessionInner {
    generation: u64,
    active: Option<CancelToken>,
    state: SearchState,
    /// The last state no search was pending on; restored when a pending search is abandoned.
    settled: SearchState,
}

#[derive(Debug)]
pub struct SearchSession {
    inner: Mutex<SessionInner>,
}

impl SearchSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                generation: 0,
                active: None,
                state: SearchState::Idle,
                settled: SearchState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // The inner state is replaced wholesale, so a poisoned lock still holds a valid value.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels the outstanding search, if any, and starts a new one.
    pub fn begin(self: &Arc<Self>, repo: RepoId) -> SearchTicket {
        let mut inner = self.lock();

        if let Some(previous) = inner.active.take() {
            tracing::debug!(generation = inner.generation, "Cancelling superseded search");
            previous.cancel();
        }

        inner.generation += 1;
        let token = CancelToken::new();
        inner.active = Some(token.clone());

        let shown = std::mem::replace(
            &mut inner.state,
            SearchState::Loading { repo: repo.clone() },
        );
        if !matches!(shown, SearchState::Loading { .. }) {
            inner.settled = shown;
        }

        SearchTicket {
            session: Arc::clone(self),
            generation: inner.generation,
            repo,
            token,
        }
    }

    /// Publishes the outcome of `ticket`'s search. Returns `false` when the search was
    /// cancelled or a newer search has started since; a cancelled latest search restores the
    /// state shown before it began.
    pub fn complete(
        &self,
        ticket: &SearchTicket,
        result: &Result<RepositoryMetrics, FetchError>,
    ) -> bool {
        let mut inner = self.lock();

        if inner.generation != ticket.generation {
            return false;
        }
        if matches!(result, Err(FetchError::Cancelled)) {
            Self::restore(&mut inner);
            return false;
        }

        inner.active = None;
        inner.state = match result {
            Ok(metrics) => SearchState::Ready {
                repo: ticket.repo.clone(),
                metrics: Box::new(metrics.clone()),
            },
            Err(err) => SearchState::Failed {
                repo: ticket.repo.clone(),
                message: err.user_message(),
            },
        };
        true
    }

    pub fn state(&self) -> SearchState {
        self.lock().state.clone()
    }

    fn abandon(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.active.is_some() {
            tracing::debug!(generation, "Search abandoned before completing");
            Self::restore(&mut inner);
        }
    }

    fn restore(inner: &mut SessionInner) {
        if let Some(token) = inner.active.take() {
            token.cancel();
        }
        inner.state = inner.settled.clone();
    }
}

impl Default for SearchSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphqlError;
    use crate::metrics::{compute_repository_metrics, MetricsWindow};
    use crate::types::RepositoryActivity;
    use chrono::NaiveDate;

    fn repo(name: &str) -> RepoId {
        RepoId {
            owner: "octo".to_string(),
            repo: name.to_string(),
        }
    }

    fn empty_metrics() -> RepositoryMetrics {
        let window =
            MetricsWindow::ending_at(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(), 30).unwrap();
        compute_repository_metrics(&RepositoryActivity::default(), &window)
    }

    fn session() -> Arc<SearchSession> {
        Arc::new(SearchSession::new())
    }

    fn is_ready_for(state: SearchState, name: &str) -> bool {
        matches!(state, SearchState::Ready { repo: shown, .. } if shown == repo(name))
    }

    #[test]
    fn test_new_search_cancels_previous() {
        let session = session();

        let first = session.begin(repo("a"));
        assert!(!first.token().is_cancelled());

        let second = session.begin(repo("b"));
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert_eq!(session.state(), SearchState::Loading { repo: repo("b") });
    }

    #[test]
    fn test_superseded_result_is_ignored() {
        let session = session();
        let first = session.begin(repo("a"));
        let second = session.begin(repo("b"));

        assert!(session.complete(&second, &Ok(empty_metrics())));
        // The older search finishes late, with a result that would otherwise be published.
        assert!(!session.complete(&first, &Ok(empty_metrics())));
        drop(first);
        drop(second);

        assert!(is_ready_for(session.state(), "b"));
    }

    #[test]
    fn test_cancelled_search_restores_previous_state() {
        let session = session();
        let shown = session.begin(repo("a"));
        assert!(session.complete(&shown, &Ok(empty_metrics())));
        drop(shown);

        let ticket = session.begin(repo("b"));
        assert!(!session.complete(&ticket, &Err(FetchError::Cancelled)));

        assert!(is_ready_for(session.state(), "a"));
    }

    #[test]
    fn test_dropped_ticket_restores_previous_state() {
        let session = session();
        let shown = session.begin(repo("a"));
        assert!(session.complete(&shown, &Ok(empty_metrics())));
        drop(shown);

        let abandoned = session.begin(repo("b"));
        let token = abandoned.token().clone();
        assert_eq!(session.state(), SearchState::Loading { repo: repo("b") });

        drop(abandoned);

        assert!(token.is_cancelled());
        assert!(is_ready_for(session.state(), "a"));
    }

    #[test]
    fn test_abandoning_a_chain_of_searches_keeps_last_result() {
        let session = session();
        let shown = session.begin(repo("a"));
        assert!(session.complete(&shown, &Ok(empty_metrics())));
        drop(shown);

        let superseded = session.begin(repo("b"));
        let latest = session.begin(repo("c"));
        drop(superseded);
        assert_eq!(session.state(), SearchState::Loading { repo: repo("c") });

        drop(latest);
        assert!(is_ready_for(session.state(), "a"));
    }

    #[test]
    fn test_first_search_abandoned_goes_back_to_idle() {
        let session = session();
        drop(session.begin(repo("a")));
        assert_eq!(session.state(), SearchState::Idle);
    }

    #[test]
    fn test_failure_keeps_api_message() {
        let session = session();
        let ticket = session.begin(repo("missing"));
        let err = FetchError::Api(vec![GraphqlError::new("Could not resolve to a Repository")]);

        assert!(session.complete(&ticket, &Err(err)));
        drop(ticket);

        assert_eq!(
            session.state(),
            SearchState::Failed {
                repo: repo("missing"),
                message: "Could not resolve to a Repository".to_string(),
            }
        );
    }

    #[test]
    fn test_state_serialization() {
        let session = session();
        let json = serde_json::to_value(session.state()).unwrap();
        assert_eq!(json["status"], "idle");

        let _ticket = session.begin(repo("a"));
        let json = serde_json::to_value(session.state()).unwrap();
        assert_eq!(json["status"], "loading");
        assert_eq!(json["repo"]["repo"], "a");
    }
}
