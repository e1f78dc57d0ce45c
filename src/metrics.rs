//! Dashboard metrics computed from fetched issues and pull requests.

use crate::types::{Issue, PullRequest, RepositoryActivity, Timeline};
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

const SMALL_MAX_CHANGED_FILES: u32 = 2;
const MEDIUM_MAX_CHANGED_FILES: u32 = 10;

const CREATED_COLOR: &str = "#4c9bff";
const CLOSED_COLOR: &str = "#e5534b";
const MERGED_COLOR: &str = "#8957e5";

/// Inclusive bounds on `created_at`. A missing bound leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateFilter {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// The dashboard's reporting period, as whole UTC days with both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Why a requested window cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("`from` ({from}) is after `to` ({to})")]
    Inverted { from: NaiveDate, to: NaiveDate },
    #[error("the window ending {to} falls outside the supported date range")]
    OutOfRange { to: NaiveDate },
    #[error("the window spans {days} days, at most {max} are allowed")]
    TooLong { days: i64, max: u32 },
}

impl MetricsWindow {
    /// The days from `from` through `to`. The day after `to` must be representable, since
    /// daily series run up to it.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, WindowError> {
        if from > to {
            return Err(WindowError::Inverted { from, to });
        }
        if to.succ_opt().is_none() {
            return Err(WindowError::OutOfRange { to });
        }
        Ok(Self { from, to })
    }

    /// The window of `days` days before `to`, plus `to` itself.
    pub fn ending_at(to: NaiveDate, days: u32) -> Result<Self, WindowError> {
        let from = to
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or(WindowError::OutOfRange { to })?;
        Self::new(from, to)
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// Rejects windows longer than `max_days`.
    pub fn limited_to(self, max_days: u32) -> Result<Self, WindowError> {
        let days = self.days();
        if days > i64::from(max_days) {
            return Err(WindowError::TooLong {
                days,
                max: max_days,
            });
        }
        Ok(self)
    }

    /// Midnight at the start of the first day.
    pub fn lower_bound(&self) -> DateTime<Utc> {
        start_of_day(self.from)
    }

    /// The last millisecond of the final day.
    pub fn upper_bound(&self) -> DateTime<Utc> {
        start_of_day(self.end_exclusive()) - Duration::milliseconds(1)
    }

    /// The day after `to`, saturating at the last representable date.
    pub fn end_exclusive(&self) -> NaiveDate {
        self.to.succ_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn filter(&self) -> DateFilter {
        DateFilter::between(self.lower_bound(), self.upper_bound())
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Mean time from creation to `terminal` over the records created inside `filter`
/// that have reached their terminal state.
///
/// Returns `None` when no record qualifies; an empty set has no meaningful average.
pub fn average_duration<R, T>(
    records: &[R],
    filter: &DateFilter,
    terminal: T,
) -> Option<Duration>
where
    R: Timeline,
    T: Fn(&R) -> Option<DateTime<Utc>>,
{
    let (total_ms, count) = records
        .iter()
        .filter(|record| filter.contains(record.created_at()))
        .filter_map(|record| terminal(record).map(|end| end - record.created_at()))
        .fold((0i128, 0i128), |(total, count), elapsed| {
            (total + i128::from(elapsed.num_milliseconds()), count + 1)
        });

    if count == 0 {
        return None;
    }
    Some(Duration::milliseconds((total_ms / count) as i64))
}

pub fn average_merge_time(pull_requests: &[PullRequest], filter: &DateFilter) -> Option<Duration> {
    average_duration(pull_requests, filter, |pr| pr.merged_at)
}

pub fn average_close_time(issues: &[Issue], filter: &DateFilter) -> Option<Duration> {
    average_duration(issues, filter, |issue| issue.closed_at)
}

pub fn count_in_range<R: Timeline>(records: &[R], filter: &DateFilter) -> usize {
    records
        .iter()
        .filter(|record| filter.contains(record.created_at()))
        .count()
}

/// Pull request size class by number of changed files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
}

impl SizeBucket {
    pub const ALL: [SizeBucket; 3] = [SizeBucket::Small, SizeBucket::Medium, SizeBucket::Large];

    pub fn classify(changed_files: u32) -> Self {
        if changed_files <= SMALL_MAX_CHANGED_FILES {
            Self::Small
        } else if changed_files <= MEDIUM_MAX_CHANGED_FILES {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Large => "Large",
        }
    }
}

/// Pull requests split by `SizeBucket`. Pull requests without a known file count are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeBuckets {
    pub small: Vec<PullRequest>,
    pub medium: Vec<PullRequest>,
    pub large: Vec<PullRequest>,
}

impl SizeBuckets {
    pub fn get(&self, bucket: SizeBucket) -> &[PullRequest] {
        match bucket {
            SizeBucket::Small => &self.small,
            SizeBucket::Medium => &self.medium,
            SizeBucket::Large => &self.large,
        }
    }
}

pub fn partition_by_size(pull_requests: &[PullRequest]) -> SizeBuckets {
    let mut buckets = SizeBuckets::default();
    for pr in pull_requests {
        let Some(changed_files) = pr.changed_files else {
            continue;
        };
        let target = match SizeBucket::classify(changed_files) {
            SizeBucket::Small => &mut buckets.small,
            SizeBucket::Medium => &mut buckets.medium,
            SizeBucket::Large => &mut buckets.large,
        };
        target.push(pr.clone());
    }
    buckets
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeBucketMetrics {
    pub bucket: SizeBucket,
    pub label: &'static str,
    /// Pull requests of this size created inside the filter.
    pub pull_requests: usize,
    #[serde(rename = "average_merge_time_ms", serialize_with = "serialize_millis")]
    pub average_merge_time: Option<Duration>,
}

/// Average merge time per size bucket, always in Small, Medium, Large order.
pub fn merge_time_by_size(
    pull_requests: &[PullRequest],
    filter: &DateFilter,
) -> Vec<SizeBucketMetrics> {
    let buckets = partition_by_size(pull_requests);
    SizeBucket::ALL
        .iter()
        .map(|&bucket| {
            let members = buckets.get(bucket);
            SizeBucketMetrics {
                bucket,
                label: bucket.label(),
                pull_requests: count_in_range(members, filter),
                average_merge_time: average_merge_time(members, filter),
            }
        })
        .collect()
}

/// One chart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub label: &'static str,
    pub color: &'static str,
    pub data: Vec<u32>,
}

impl Series {
    fn zeroed(label: &'static str, color: &'static str, len: usize) -> Self {
        Self {
            label,
            color,
            data: vec![0; len],
        }
    }

    pub fn total(&self) -> u64 {
        self.data.iter().map(|&n| u64::from(n)).sum()
    }
}

/// Per-day event counts over a half-open range of UTC days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySeries {
    pub labels: Vec<NaiveDate>,
    pub created: Series,
    pub closed: Series,
    pub merged: Series,
}

/// Counts, for every UTC day in `[start, end)`, how many records were created, closed and
/// merged on that day. Events outside the range are ignored.
pub fn daily_summary<R: Timeline>(records: &[R], start: NaiveDate, end: NaiveDate) -> DailySeries {
    let days = (end - start).num_days().max(0) as usize;
    let labels: Vec<NaiveDate> = start.iter_days().take(days).collect();

    let mut series = DailySeries {
        labels,
        created: Series::zeroed("Created", CREATED_COLOR, days),
        closed: Series::zeroed("Closed", CLOSED_COLOR, days),
        merged: Series::zeroed("Merged", MERGED_COLOR, days),
    };

    let day_index = |at: DateTime<Utc>| -> Option<usize> {
        let offset = (at.date_naive() - start).num_days();
        (0..days as i64).contains(&offset).then_some(offset as usize)
    };

    for record in records {
        if let Some(i) = day_index(record.created_at()) {
            series.created.data[i] += 1;
        }
        if let Some(i) = record.closed_at().and_then(day_index) {
            series.closed.data[i] += 1;
        }
        if let Some(i) = record.merged_at().and_then(day_index) {
            series.merged.data[i] += 1;
        }
    }

    series
}

/// The full set of numbers the dashboard renders for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryMetrics {
    pub window: MetricsWindow,
    #[serde(rename = "average_merge_time_ms", serialize_with = "serialize_millis")]
    pub average_merge_time: Option<Duration>,
    #[serde(rename = "average_close_time_ms", serialize_with = "serialize_millis")]
    pub average_close_time: Option<Duration>,
    pub created_pull_requests: usize,
    pub created_issues: usize,
    pub merge_time_by_size: Vec<SizeBucketMetrics>,
    pub pull_request_summary: DailySeries,
    pub issue_summary: DailySeries,
}

pub fn compute_repository_metrics(
    activity: &RepositoryActivity,
    window: &MetricsWindow,
) -> RepositoryMetrics {
    let filter = window.filter();
    let end = window.end_exclusive();

    RepositoryMetrics {
        window: *window,
        average_merge_time: average_merge_time(&activity.pull_requests, &filter),
        average_close_time: average_close_time(&activity.issues, &filter),
        created_pull_requests: count_in_range(&activity.pull_requests, &filter),
        created_issues: count_in_range(&activity.issues, &filter),
        merge_time_by_size: merge_time_by_size(&activity.pull_requests, &filter),
        pull_request_summary: daily_summary(&activity.pull_requests, window.from, end),
        issue_summary: daily_summary(&activity.issues, window.from, end),
    }
}

/// Durations travel as whole milliseconds; `null` means there was nothing to average.
fn serialize_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_some(&duration.num_milliseconds()),
        None => serializer.serialize_none(),
    }
}
