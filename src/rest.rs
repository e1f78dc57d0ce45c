//! REST variant of the repository source.
//!
//! The REST issues listing returns issues and pull requests together. Rather than walking every
//! page, a fixed number of pages is requested in parallel, which trades completeness on very
//! busy repositories for latency and rate limit usage.

use crate::cancel::CancelToken;
use crate::config::{AppConfig, RepoId};
use crate::error::FetchError;
use crate::fetcher::RepositorySource;
use crate::github::{classify_octocrab_error, normalize};
use crate::types::{Issue, PullRequest, RepositoryActivity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use octocrab::models::issues::Issue as RestIssue;
use octocrab::Octocrab;

const PER_PAGE: u8 = 100;

/// Maximum number of page requests in flight at once.
const CONCURRENCY_LIMIT: usize = 8;

/// The parts of a REST issue listing entry the dashboard uses.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RestItem {
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    is_pull_request: bool,
}

impl From<RestIssue> for RestItem {
    fn from(issue: RestIssue) -> Self {
        Self {
            created_at: issue.created_at,
            closed_at: issue.closed_at,
            is_pull_request: issue.pull_request.is_some(),
        }
    }
}

pub struct RestSource {
    octocrab: Octocrab,
    page_count: u32,
}

impl RestSource {
    pub fn new(octocrab: Octocrab, config: &AppConfig) -> Self {
        Self {
            octocrab,
            page_count: config.rest_page_count,
        }
    }

    async fn fetch_page(&self, repo_id: &RepoId, page: u32) -> Result<Vec<RestItem>, FetchError> {
        let page = self
            .octocrab
            .issues(&repo_id.owner, &repo_id.repo)
            .list()
            .state(octocrab::params::State::All)
            .sort(octocrab::params::issues::Sort::Created)
            .direction(octocrab::params::Direction::Descending)
            .per_page(PER_PAGE)
            .page(page)
            .send()
            .await
            .map_err(classify_octocrab_error)?;
        Ok(page.items.into_iter().map(RestItem::from).collect())
    }
}

#[async_trait]
impl RepositorySource for RestSource {
    async fn fetch(
        &self,
        repo_id: &RepoId,
        since: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RepositoryActivity, FetchError> {
        let pages = stream::iter(1..=self.page_count)
            .map(|page| cancel.run(self.fetch_page(repo_id, page)))
            .buffered(CONCURRENCY_LIMIT);

        let (items, hit_page_limit) = collect_pages(pages, since).await?;

        if hit_page_limit {
            tracing::warn!(
                repo_id = %repo_id,
                "Hit rest_page_count ({}) before reaching the lower bound. Data may be incomplete.",
                self.page_count
            );
        }

        Ok(split_items(items))
    }
}

/// Gathers pages in order until one comes back empty or reaches back past `since`.
///
/// Also reports whether every page was used up without either happening, in which case older
/// activity may be missing. The first failing page fails the whole collection.
async fn collect_pages<S>(
    mut pages: S,
    since: DateTime<Utc>,
) -> Result<(Vec<RestItem>, bool), FetchError>
where
    S: Stream<Item = Result<Vec<RestItem>, FetchError>> + Unpin,
{
    let mut items = Vec::new();

    while let Some(result) = pages.next().await {
        let page = result?;
        if page.is_empty() {
            return Ok((items, false));
        }

        items.extend(page);

        if items.last().is_some_and(|item| item.created_at < since) {
            return Ok((items, false));
        }
    }

    Ok((items, true))
}

/// Separates plain issues from pull requests. The listing carries no merge or size data, so
/// pull requests come back with those fields unset.
fn split_items(items: Vec<RestItem>) -> RepositoryActivity {
    let (pull_requests, issues): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|item| item.is_pull_request);

    RepositoryActivity {
        issues: normalize(
            "issues",
            issues.into_iter().map(|item| Issue {
                created_at: item.created_at,
                closed_at: item.closed_at,
            }),
        ),
        pull_requests: normalize(
            "pull_requests",
            pull_requests.into_iter().map(|item| PullRequest {
                created_at: item.created_at,
                closed_at: item.closed_at,
                merged_at: None,
                changed_files: None,
                commit_count: None,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphqlError;
    use chrono::TimeZone;

    fn day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn issue(created: u32, closed: Option<u32>) -> RestItem {
        RestItem {
            created_at: day(created),
            closed_at: closed.map(day),
            is_pull_request: false,
        }
    }

    fn pull_request(created: u32, closed: Option<u32>) -> RestItem {
        RestItem {
            is_pull_request: true,
            ..issue(created, closed)
        }
    }

    fn pages(
        pages: Vec<Result<Vec<RestItem>, FetchError>>,
    ) -> impl Stream<Item = Result<Vec<RestItem>, FetchError>> + Unpin {
        stream::iter(pages)
    }

    #[tokio::test]
    async fn test_stops_at_lower_bound() {
        let (items, hit_page_limit) = collect_pages(
            pages(vec![
                Ok(vec![issue(20, None), pull_request(15, None)]),
                Ok(vec![issue(12, None), issue(5, None)]),
                Ok(vec![issue(3, None)]),
            ]),
            day(10),
        )
        .await
        .unwrap();

        assert!(!hit_page_limit);
        assert_eq!(items.len(), 4);
        assert_eq!(items.last().unwrap().created_at, day(5));
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let (items, hit_page_limit) = collect_pages(
            pages(vec![
                Ok(vec![issue(20, None)]),
                Ok(vec![]),
                Ok(vec![issue(3, None)]),
            ]),
            day(1),
        )
        .await
        .unwrap();

        assert!(!hit_page_limit);
        assert_eq!(items, vec![issue(20, None)]);
    }

    #[tokio::test]
    async fn test_reports_exhausted_page_count() {
        let (items, hit_page_limit) = collect_pages(
            pages(vec![Ok(vec![issue(20, None)]), Ok(vec![issue(15, None)])]),
            day(1),
        )
        .await
        .unwrap();

        assert!(hit_page_limit);
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_page_fails_the_collection() {
        let result = collect_pages(
            pages(vec![
                Ok(vec![issue(20, None)]),
                Err(FetchError::Api(vec![GraphqlError::new("Not Found")])),
                Ok(vec![issue(3, None)]),
            ]),
            day(1),
        )
        .await;

        assert!(matches!(result, Err(FetchError::Api(errors)) if errors[0].message == "Not Found"));
    }

    #[test]
    fn test_split_separates_pull_requests() {
        let activity = split_items(vec![
            pull_request(4, Some(6)),
            issue(3, Some(5)),
            pull_request(2, None),
            // Closed before it was created; dropped during normalization.
            issue(2, Some(1)),
        ]);

        assert_eq!(
            activity.issues,
            vec![Issue {
                created_at: day(3),
                closed_at: Some(day(5)),
            }]
        );
        assert_eq!(activity.pull_requests.len(), 2);
        assert!(activity.pull_requests.iter().all(|pr| pr.merged_at.is_none()
            && pr.changed_files.is_none()
            && pr.commit_count.is_none()));
        assert_eq!(activity.pull_requests[0].closed_at, Some(day(6)));
    }
}
