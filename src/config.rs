//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs where GitHub is reached, how collections are
//! paginated, the default dashboard window and how long search sessions are kept around.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration as StdDuration;

/// GraphQL caps `first` at 100 nodes per page.
const MAX_PAGE_SIZE: u32 = 100;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "facebook").
    pub owner: String,
    /// The name of the repository (e.g., "react").
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Which GitHub API is used to collect issues and pull requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Cursor pagination over the GraphQL API, followed until the lower bound is reached.
    #[default]
    Graphql,
    /// A fixed number of REST issue pages fetched in parallel.
    Rest,
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the GitHub API. GraphQL requests go to `{github_api_url}/graphql`.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Optional GitHub Personal Access Token, sent as the bearer credential.
    pub github_token: Option<String>,

    #[serde(default)]
    pub fetch_mode: FetchMode,

    /// Number of nodes requested per GraphQL page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Hard limit on the number of paginated requests per collection.
    #[serde(default = "default_max_pages")]
    pub max_github_api_pages: u32,

    /// Number of REST pages fetched in parallel when `fetch_mode` is `rest`.
    #[serde(default = "default_rest_page_count")]
    pub rest_page_count: u32,

    /// Length of the default dashboard window, in days, ending today.
    #[serde(default = "default_summary_days")]
    pub summary_days: u32,

    /// Longest window, in days with both ends included, a metrics request may ask for.
    #[serde(default = "default_max_window_days")]
    pub max_window_days: u32,

    /// Idle time after which a search session is forgotten.
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,

    /// Maximum number of search sessions tracked at once.
    #[serde(default = "default_session_max_capacity")]
    pub session_max_capacity: u64,

    /// Emit logs as JSON lines instead of the human readable format.
    #[serde(default)]
    pub log_json: bool,
}

fn default_port() -> u16 {
    3000
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    100
}

fn default_rest_page_count() -> u32 {
    5
}

fn default_summary_days() -> u32 {
    30
}

fn default_max_window_days() -> u32 {
    366
}

fn default_session_ttl_seconds() -> u64 {
    900
}

fn default_session_max_capacity() -> u64 {
    10_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Rejects values GitHub or the dashboard cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            anyhow::bail!(
                "PAGE_SIZE must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                self.page_size
            );
        }
        if self.max_github_api_pages == 0 {
            anyhow::bail!("MAX_GITHUB_API_PAGES must be at least 1");
        }
        if self.rest_page_count == 0 {
            anyhow::bail!("REST_PAGE_COUNT must be at least 1");
        }
        if self.max_window_days == 0 {
            anyhow::bail!("MAX_WINDOW_DAYS must be at least 1");
        }
        // The default window covers `summary_days` days before today, plus today.
        if self.summary_days >= self.max_window_days {
            anyhow::bail!(
                "SUMMARY_DAYS ({}) must be below MAX_WINDOW_DAYS ({})",
                self.summary_days,
                self.max_window_days
            );
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.session_ttl_seconds)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            github_api_url: default_github_api_url(),
            github_token: None,
            fetch_mode: FetchMode::default(),
            page_size: default_page_size(),
            max_github_api_pages: default_max_pages(),
            rest_page_count: default_rest_page_count(),
            summary_days: default_summary_days(),
            max_window_days: default_max_window_days(),
            session_ttl_seconds: default_session_ttl_seconds(),
            session_max_capacity: default_session_max_capacity(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "PORT",
        "GITHUB_API_URL",
        "GITHUB_TOKEN",
        "FETCH_MODE",
        "PAGE_SIZE",
        "MAX_GITHUB_API_PAGES",
        "REST_PAGE_COUNT",
        "SUMMARY_DAYS",
        "MAX_WINDOW_DAYS",
        "SESSION_TTL_SECONDS",
        "SESSION_MAX_CAPACITY",
        "LOG_JSON",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_vars();
        env::set_var("PORT", "8080");
        env::set_var("GITHUB_API_URL", "http://localhost:9999");
        env::set_var("GITHUB_TOKEN", "secret");
        env::set_var("FETCH_MODE", "rest");
        env::set_var("PAGE_SIZE", "25");
        env::set_var("MAX_GITHUB_API_PAGES", "5");
        env::set_var("REST_PAGE_COUNT", "3");
        env::set_var("SUMMARY_DAYS", "14");
        env::set_var("MAX_WINDOW_DAYS", "90");
        env::set_var("SESSION_TTL_SECONDS", "60");
        env::set_var("SESSION_MAX_CAPACITY", "10");
        env::set_var("LOG_JSON", "true");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.port, 8080);
        assert_eq!(config.github_api_url, "http://localhost:9999");
        assert_eq!(config.github_token.as_deref(), Some("secret"));
        assert_eq!(config.fetch_mode, FetchMode::Rest);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.max_github_api_pages, 5);
        assert_eq!(config.rest_page_count, 3);
        assert_eq!(config.summary_days, 14);
        assert_eq!(config.max_window_days, 90);
        assert_eq!(config.session_ttl(), StdDuration::from_secs(60));
        assert_eq!(config.session_max_capacity, 10);
        assert!(config.log_json);
        assert!(config.validate().is_ok());

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_vars();

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.port, 3000);
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert!(config.github_token.is_none());
        assert_eq!(config.fetch_mode, FetchMode::Graphql);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.summary_days, 30);
        assert_eq!(config.max_window_days, 366);
        assert!(!config.log_json);
    }

    #[test]
    #[serial]
    fn test_config_invalid_number() {
        clear_vars();
        env::set_var("PAGE_SIZE", "lots");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_vars();
    }

    #[test]
    fn test_validate_rejects_oversized_pages() {
        let config = AppConfig {
            page_size: 101,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            page_size: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_default_window_beyond_limit() {
        let config = AppConfig {
            summary_days: 30,
            max_window_days: 30,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            summary_days: 30,
            max_window_days: 31,
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = AppConfig {
            max_window_days: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repo_id_display() {
        let repo_id = RepoId {
            owner: "rust-lang".to_string(),
            repo: "rust".to_string(),
        };
        assert_eq!(repo_id.to_string(), "rust-lang/rust");
    }
}
