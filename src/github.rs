//! GitHub GraphQL access: the transport seam, query documents, response types and the
//! cursor-paginated repository source.

use crate::cancel::CancelToken;
use crate::config::{AppConfig, RepoId};
use crate::error::{FetchError, GraphqlError};
use crate::fetcher::RepositorySource;
use crate::pagination::{CollectionFetcher, PageInfo, Paged};
use crate::types::{check_timeline, Issue, PullRequest, RepositoryActivity, Timeline};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Maximum number of owners returned by a search.
const OWNER_SEARCH_LIMIT: u32 = 20;

const ISSUES_QUERY: &str = r#"
query RepositoryIssues($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issues(first: $first, after: $after, orderBy: { field: CREATED_AT, direction: DESC }) {
      nodes {
        createdAt
        closedAt
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
}
"#;

const PULL_REQUESTS_QUERY: &str = r#"
query RepositoryPullRequests($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(first: $first, after: $after, orderBy: { field: CREATED_AT, direction: DESC }) {
      nodes {
        createdAt
        closedAt
        mergedAt
        changedFiles
        commits { totalCount }
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
}
"#;

const OWNER_SEARCH_QUERY: &str = r#"
query OwnerSearch($query: String!, $first: Int!) {
  search(type: USER, query: $query, first: $first) {
    nodes {
      __typename
      ... on Organization { login }
      ... on User { login }
    }
  }
}
"#;

/// A GraphQL request body.
#[derive(Debug, Clone, Serialize)]
pub struct GraphqlRequest {
    pub query: &'static str,
    pub variables: Value,
}

impl GraphqlRequest {
    pub fn new(query: &'static str, variables: Value) -> Self {
        Self { query, variables }
    }
}

/// Sends GraphQL requests and returns the raw JSON envelope.
#[async_trait]
pub trait GraphqlClient: Send + Sync {
    async fn execute(&self, request: &GraphqlRequest) -> Result<Value, FetchError>;
}

/// `GraphqlClient` backed by octocrab, pointed at the configured API base URL.
#[derive(Clone)]
pub struct OctocrabClient {
    octocrab: Octocrab,
}

impl OctocrabClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut builder = Octocrab::builder().base_uri(config.github_api_url.as_str())?;
        if let Some(token) = &config.github_token {
            builder = builder.personal_token(token.clone());
        }

        Ok(Self {
            octocrab: builder.build()?,
        })
    }

    pub fn octocrab(&self) -> &Octocrab {
        &self.octocrab
    }
}

#[async_trait]
impl GraphqlClient for OctocrabClient {
    async fn execute(&self, request: &GraphqlRequest) -> Result<Value, FetchError> {
        self.octocrab
            .graphql::<Value>(request)
            .await
            .map_err(classify_octocrab_error)
    }
}

/// Splits octocrab failures into API errors (GitHub answered with an error body) and
/// transport errors (everything else).
pub(crate) fn classify_octocrab_error(err: octocrab::Error) -> FetchError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            // REST error bodies carry no error type; rate limiting is recognised by its wording.
            let kind = source
                .message
                .to_lowercase()
                .contains("rate limit")
                .then(|| "RATE_LIMITED".to_string());
            FetchError::Api(vec![GraphqlError {
                message: source.message,
                kind,
            }])
        }
        other => FetchError::transport(other),
    }
}

/// Executes `request` and decodes its `data` member, failing with `FetchError::Api` when the
/// envelope carries errors.
pub async fn execute_query<T: DeserializeOwned>(
    client: &dyn GraphqlClient,
    request: &GraphqlRequest,
) -> Result<T, FetchError> {
    let mut envelope = client.execute(request).await?;

    if let Some(errors) = envelope.get("errors").filter(|errors| !errors.is_null()) {
        let errors: Vec<GraphqlError> = serde_json::from_value(errors.clone())?;
        if !errors.is_empty() {
            return Err(FetchError::Api(errors));
        }
    }

    let data = envelope
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(data)?)
}

#[derive(Debug, Deserialize)]
struct RepositoryData<W> {
    repository: Option<W>,
}

#[derive(Debug, Deserialize)]
struct IssuesField {
    issues: Connection<IssueNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestsField {
    pull_requests: Connection<PullRequestNode>,
}

/// One page of a GraphQL connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "N: Deserialize<'de>"))]
pub struct Connection<N> {
    #[serde(default)]
    pub nodes: Vec<N>,
    pub page_info: PageInfo,
}

impl<N> Connection<N> {
    fn map<M>(self, f: impl FnMut(N) -> M) -> Connection<M> {
        Connection {
            nodes: self.nodes.into_iter().map(f).collect(),
            page_info: self.page_info,
        }
    }
}

impl<N> Paged for Connection<N> {
    fn page_info(&self) -> &PageInfo {
        &self.page_info
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    changed_files: Option<u32>,
    commits: Option<TotalCount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotalCount {
    total_count: u32,
}

impl IssueNode {
    fn into_issue(self) -> Issue {
        Issue {
            created_at: self.created_at,
            closed_at: self.closed_at,
        }
    }
}

impl PullRequestNode {
    fn into_pull_request(self) -> PullRequest {
        PullRequest {
            created_at: self.created_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
            changed_files: self.changed_files,
            commit_count: self.commits.map(|commits| commits.total_count),
        }
    }
}

/// Flattens fetched pages into records, dropping any whose timestamps are out of order.
pub(crate) fn normalize<R, I>(collection: &'static str, records: I) -> Vec<R>
where
    R: Timeline,
    I: IntoIterator<Item = R>,
{
    records
        .into_iter()
        .filter(|record| match check_timeline(record) {
            Ok(()) => true,
            Err(violation) => {
                tracing::warn!(collection, %violation, "Dropping inconsistent record");
                false
            }
        })
        .collect()
}

/// Fetches issues and pull requests through cursor-paginated GraphQL queries, newest first,
/// until the oldest record of a page predates the lower bound.
pub struct GraphqlSource {
    client: Arc<dyn GraphqlClient>,
    page_size: u32,
    max_pages: u32,
}

impl GraphqlSource {
    pub fn new(client: Arc<dyn GraphqlClient>, config: &AppConfig) -> Self {
        Self {
            client,
            page_size: config.page_size,
            max_pages: config.max_github_api_pages,
        }
    }

    async fn repository_query<W: DeserializeOwned>(
        &self,
        request: &GraphqlRequest,
        repo_id: &RepoId,
    ) -> Result<W, FetchError> {
        let data: RepositoryData<W> = execute_query(self.client.as_ref(), request).await?;
        data.repository.ok_or_else(|| {
            FetchError::Api(vec![GraphqlError::with_kind(
                format!("Could not resolve to a Repository with the name '{}'.", repo_id),
                "NOT_FOUND",
            )])
        })
    }

    /// `connection` picks the paginated field out of the repository object and converts its
    /// nodes into records.
    async fn fetch_collection<W, R>(
        &self,
        collection: &'static str,
        query: &'static str,
        repo_id: &RepoId,
        since: DateTime<Utc>,
        cancel: &CancelToken,
        connection: fn(W) -> Connection<R>,
    ) -> Result<Vec<R>, FetchError>
    where
        W: DeserializeOwned + Send,
        R: Timeline + Send,
    {
        let fetcher = CollectionFetcher::new(collection, self.max_pages, cancel);

        let pages = fetcher
            .fetch_all(
                |cursor| {
                    let request = GraphqlRequest::new(
                        query,
                        json!({
                            "owner": repo_id.owner,
                            "name": repo_id.repo,
                            "first": self.page_size,
                            "after": cursor,
                        }),
                    );
                    async move {
                        let field: W = self.repository_query(&request, repo_id).await?;
                        Ok(connection(field))
                    }
                },
                |page: &Connection<R>| {
                    page.nodes
                        .last()
                        .is_some_and(|oldest| oldest.created_at() < since)
                },
            )
            .await?;

        Ok(normalize(
            collection,
            pages.into_iter().flat_map(|page| page.nodes),
        ))
    }
}

#[async_trait]
impl RepositorySource for GraphqlSource {
    async fn fetch(
        &self,
        repo_id: &RepoId,
        since: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RepositoryActivity, FetchError> {
        let (issues, pull_requests) = tokio::try_join!(
            self.fetch_collection::<IssuesField, Issue>(
                "issues",
                ISSUES_QUERY,
                repo_id,
                since,
                cancel,
                |field| field.issues.map(IssueNode::into_issue),
            ),
            self.fetch_collection::<PullRequestsField, PullRequest>(
                "pull_requests",
                PULL_REQUESTS_QUERY,
                repo_id,
                since,
                cancel,
                |field| field.pull_requests.map(PullRequestNode::into_pull_request),
            ),
        )?;

        tracing::info!(
            repo_id = %repo_id,
            issues = issues.len(),
            pull_requests = pull_requests.len(),
            "Fetched repository activity"
        );

        Ok(RepositoryActivity {
            issues,
            pull_requests,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    User,
    Organization,
}

/// A user or organization matching a partial login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerSuggestion {
    pub login: String,
    pub kind: OwnerKind,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(default)]
    nodes: Vec<Option<SearchNode>>,
}

#[derive(Debug, Deserialize)]
struct SearchNode {
    #[serde(rename = "__typename")]
    typename: String,
    login: Option<String>,
}

/// Looks up users and organizations whose login resembles `partial`.
pub async fn search_owners(
    client: &dyn GraphqlClient,
    partial: &str,
    cancel: &CancelToken,
) -> Result<Vec<OwnerSuggestion>, FetchError> {
    let request = GraphqlRequest::new(
        OWNER_SEARCH_QUERY,
        json!({ "query": partial, "first": OWNER_SEARCH_LIMIT }),
    );
    let data: SearchData = cancel.run(execute_query(client, &request)).await?;

    Ok(data
        .search
        .nodes
        .into_iter()
        .flatten()
        .filter_map(|node| {
            let kind = match node.typename.as_str() {
                "User" => OwnerKind::User,
                "Organization" => OwnerKind::Organization,
                _ => return None,
            };
            Some(OwnerSuggestion {
                login: node.login?,
                kind,
            })
        })
        .collect())
}
