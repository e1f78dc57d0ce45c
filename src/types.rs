//! Normalized issue and pull request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamps shared by issues and pull requests.
pub trait Timeline {
    fn created_at(&self) -> DateTime<Utc>;
    fn closed_at(&self) -> Option<DateTime<Utc>>;
    /// Only pull requests can be merged.
    fn merged_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub changed_files: Option<u32>,
    pub commit_count: Option<u32>,
}

impl Timeline for Issue {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }
}

impl Timeline for PullRequest {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    fn merged_at(&self) -> Option<DateTime<Utc>> {
        self.merged_at
    }
}

/// A record whose terminal timestamp precedes its creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineViolation {
    pub field: &'static str,
    pub created_at: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

impl fmt::Display for TimelineViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} precedes created_at {}",
            self.field, self.at, self.created_at
        )
    }
}

impl std::error::Error for TimelineViolation {}

/// Checks that `closed_at` and `merged_at` never precede `created_at`.
pub fn check_timeline(record: &impl Timeline) -> Result<(), TimelineViolation> {
    let created_at = record.created_at();
    for (field, at) in [
        ("closed_at", record.closed_at()),
        ("merged_at", record.merged_at()),
    ] {
        if let Some(at) = at.filter(|at| *at < created_at) {
            return Err(TimelineViolation {
                field,
                created_at,
                at,
            });
        }
    }
    Ok(())
}

/// Everything fetched for one repository search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryActivity {
    pub issues: Vec<Issue>,
    pub pull_requests: Vec<PullRequest>,
}
