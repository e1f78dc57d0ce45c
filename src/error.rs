use serde::{Deserialize, Serialize};

/// One entry of a GraphQL `errors` array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    /// GitHub's error classification, e.g. `NOT_FOUND` or `RATE_LIMITED`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind.into()),
        }
    }
}

/// Failure of a repository fetch.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// The request never produced a usable HTTP response.
    #[error("github request failed: {0}")]
    Transport(#[source] anyhow::Error),
    /// GitHub answered, but the payload carries an `errors` array.
    #[error("github api error: {}", join_messages(.0))]
    Api(Vec<GraphqlError>),
    /// GitHub answered with a payload that does not match the expected shape.
    #[error("unexpected github response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The search was superseded or abandoned before it finished.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether any API error carries the given GitHub error type.
    pub fn has_api_kind(&self, kind: &str) -> bool {
        match self {
            Self::Api(errors) => errors.iter().any(|e| e.kind.as_deref() == Some(kind)),
            _ => false,
        }
    }

    /// The message shown to a dashboard user: GitHub's own wording for API errors,
    /// a generic sentence otherwise.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(errors) if !errors.is_empty() => join_messages(errors),
            _ => "Failed to load repository data from GitHub".to_string(),
        }
    }
}

fn join_messages(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
