//! Harvest job records and the request shape that creates them.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::targets::is_valid_handle;
use crate::ConfigError;

/// Which relationship between a post and the target handles a job searches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Posts authored by the targets.
    From,
    /// Replies addressed to the targets.
    To,
    /// Posts mentioning the targets anywhere.
    Mentioning,
}

impl QueryMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::From => "from",
            QueryMode::To => "to",
            QueryMode::Mentioning => "mentioning",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "from" => Ok(QueryMode::From),
            "to" => Ok(QueryMode::To),
            "mentioning" => Ok(QueryMode::Mentioning),
            other => Err(ConfigError::Validation(format!(
                "unknown query mode \"{other}\"; expected from, to, or mentioning"
            ))),
        }
    }
}

/// Lifecycle state of a job: `pending → running → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ConfigError::Validation(format!(
                "unknown job status \"{other}\""
            ))),
        }
    }
}

/// Half-open calendar range `[since, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    #[must_use]
    pub fn span(&self) -> TimeDelta {
        self.until - self.since
    }
}

/// A validated request to create a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub name: String,
    pub account_id: i64,
    pub targets: Vec<String>,
    pub query_mode: QueryMode,
    pub range: DateRange,
}

impl NewJob {
    /// Normalizes target handles and checks the request is runnable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if no usable target remains after
    /// normalization, a target is not a plain handle, or the range is empty
    /// or inverted.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.targets = normalize_handles(&self.targets);
        if self.targets.is_empty() {
            return Err(ConfigError::Validation(
                "at least one target handle is required".to_string(),
            ));
        }
        if let Some(bad) = self.targets.iter().find(|t| !is_valid_handle(t)) {
            return Err(ConfigError::Validation(format!(
                "target '{bad}' is not a valid handle (letters, digits, underscore; max 15)"
            )));
        }
        if self.range.since >= self.range.until {
            return Err(ConfigError::Validation(format!(
                "since ({}) must be earlier than until ({})",
                self.range.since, self.range.until
            )));
        }
        self.name = self.name.trim().to_string();
        Ok(self)
    }
}

/// One job execution record as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub public_id: Uuid,
    pub name: String,
    pub account_id: i64,
    pub targets: Vec<String>,
    pub query_mode: QueryMode,
    pub range: DateRange,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub result_count: i64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    /// Wall-clock time between start and completion, when both are known.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Date stamped into export filenames: completion day, or creation day
    /// for jobs that have not finished.
    #[must_use]
    pub fn export_date(&self) -> NaiveDate {
        self.completed_at.unwrap_or(self.created_at).date_naive()
    }
}

/// A status change applied atomically by the store.
///
/// Each variant carries its own precondition on the current status; the store
/// reports a conflict instead of applying a transition whose precondition
/// does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    /// `pending → running`.
    Start { at: DateTime<Utc> },
    /// `running → completed`.
    Complete {
        at: DateTime<Utc>,
        result_count: i64,
    },
    /// `running → failed`. `result_count` is what was durably saved.
    Fail {
        at: DateTime<Utc>,
        detail: String,
        result_count: i64,
    },
}

impl JobTransition {
    #[must_use]
    pub fn required_status(&self) -> JobStatus {
        match self {
            JobTransition::Start { .. } => JobStatus::Pending,
            JobTransition::Complete { .. } | JobTransition::Fail { .. } => JobStatus::Running,
        }
    }

    #[must_use]
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobTransition::Start { .. } => JobStatus::Running,
            JobTransition::Complete { .. } => JobStatus::Completed,
            JobTransition::Fail { .. } => JobStatus::Failed,
        }
    }
}

/// Strips whitespace and leading `@` characters from a handle.
///
/// Returns `None` when nothing usable remains.
#[must_use]
pub fn normalize_handle(raw: &str) -> Option<String> {
    let handle = raw.trim().trim_start_matches('@').trim();
    if handle.is_empty() {
        None
    } else {
        Some(handle.to_string())
    }
}

/// Normalizes every handle, drops empties, and collapses case-insensitive
/// duplicates while keeping first-seen order.
#[must_use]
pub fn normalize_handles(raw: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .filter_map(|h| normalize_handle(h))
        .filter(|h| seen.insert(h.to_ascii_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_job(targets: &[&str], since: NaiveDate, until: NaiveDate) -> NewJob {
        NewJob {
            name: "  weekly sweep ".to_string(),
            account_id: 1,
            targets: targets.iter().map(|s| (*s).to_string()).collect(),
            query_mode: QueryMode::From,
            range: DateRange { since, until },
        }
    }

    #[test]
    fn query_mode_parses_case_insensitively() {
        assert_eq!("FROM".parse::<QueryMode>().unwrap(), QueryMode::From);
        assert_eq!(" to ".parse::<QueryMode>().unwrap(), QueryMode::To);
        assert_eq!(
            "mentioning".parse::<QueryMode>().unwrap(),
            QueryMode::Mentioning
        );
        assert!("replies".parse::<QueryMode>().is_err());
    }

    #[test]
    fn query_mode_serializes_lowercase() {
        let json = serde_json::to_string(&QueryMode::Mentioning).unwrap();
        assert_eq!(json, "\"mentioning\"");
    }

    #[test]
    fn job_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn normalize_handle_strips_at_and_whitespace() {
        assert_eq!(normalize_handle(" @alice "), Some("alice".to_string()));
        assert_eq!(normalize_handle("@@bob"), Some("bob".to_string()));
        assert_eq!(normalize_handle(" @ "), None);
        assert_eq!(normalize_handle(""), None);
    }

    #[test]
    fn normalize_handles_dedups_case_insensitively() {
        let raw = vec![
            "@Alice".to_string(),
            "alice".to_string(),
            String::new(),
            "bob".to_string(),
        ];
        assert_eq!(normalize_handles(&raw), vec!["Alice", "bob"]);
    }

    #[test]
    fn validate_rejects_empty_targets() {
        let err = new_job(&["@", "  "], date(2024, 1, 1), date(2024, 1, 2))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn validate_rejects_inverted_or_empty_range() {
        assert!(new_job(&["alice"], date(2024, 1, 2), date(2024, 1, 1))
            .validate()
            .is_err());
        assert!(new_job(&["alice"], date(2024, 1, 1), date(2024, 1, 1))
            .validate()
            .is_err());
    }

    #[test]
    fn validate_rejects_targets_that_are_not_plain_handles() {
        for bad in ["alice) OR (from:bob", "two words", "name_longer_than_15", "a-b"] {
            let err = new_job(&["alice", bad], date(2024, 1, 1), date(2024, 1, 2))
                .validate()
                .unwrap_err();
            assert!(
                matches!(&err, ConfigError::Validation(msg) if msg.contains("not a valid handle")),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn validate_normalizes_targets_and_name() {
        let job = new_job(&["@alice", "ALICE", "bob"], date(2024, 11, 20), date(2024, 11, 22))
            .validate()
            .unwrap();
        assert_eq!(job.targets, vec!["alice", "bob"]);
        assert_eq!(job.name, "weekly sweep");
    }

    #[test]
    fn transition_preconditions() {
        let at = Utc::now();
        let start = JobTransition::Start { at };
        assert_eq!(start.required_status(), JobStatus::Pending);
        assert_eq!(start.target_status(), JobStatus::Running);

        let fail = JobTransition::Fail {
            at,
            detail: "boom".to_string(),
            result_count: 3,
        };
        assert_eq!(fail.required_status(), JobStatus::Running);
        assert_eq!(fail.target_status(), JobStatus::Failed);
    }

    #[test]
    fn export_date_prefers_completion() {
        let created = Utc.with_ymd_and_hms(2024, 11, 20, 23, 0, 0).unwrap();
        let mut job = JobRun {
            id: 1,
            public_id: Uuid::new_v4(),
            name: String::new(),
            account_id: 1,
            targets: vec!["alice".to_string()],
            query_mode: QueryMode::From,
            range: DateRange {
                since: date(2024, 11, 1),
                until: date(2024, 11, 2),
            },
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error_detail: None,
            result_count: 0,
            cancel_requested: false,
            created_at: created,
        };
        assert_eq!(job.export_date(), date(2024, 11, 20));

        job.completed_at = Some(created + TimeDelta::hours(2));
        assert_eq!(job.export_date(), date(2024, 11, 21));
    }

    #[test]
    fn date_range_span_in_days() {
        let range = DateRange {
            since: date(2024, 11, 20),
            until: date(2024, 11, 22),
        };
        assert_eq!(range.span().num_days(), 2);
    }
}
