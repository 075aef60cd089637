//! Job runtime database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Job state values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed.
    Available,
    /// Waiting for `scheduled_at`.
    Scheduled,
    /// Claimed by a worker.
    Running,
    /// Failed an attempt; will be claimed again after `scheduled_at`.
    Retryable,
    Completed,
    Cancelled,
    /// Attempts exhausted.
    Discarded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Retryable => "retryable",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Discarded => "discarded",
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Discarded)
    }

    /// States a worker may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Available | Self::Scheduled | Self::Retryable)
    }
}

/// One failed attempt, appended to the job's `errors` JSON array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobErrorRecord {
    pub attempt: i64,
    pub at: i64,
    pub error: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub state: String,
    /// JSON array of tags.
    pub tags: String,
    pub max_attempts: i64,
    /// Number of attempts claimed so far.
    pub attempt: i64,
    /// JSON arguments.
    pub args: String,
    /// JSON array of [`JobErrorRecord`].
    pub errors: String,
    pub scheduled_at: i64,
    pub attempted_at: Option<i64>,
    pub finalized_at: Option<i64>,
    pub created_at: i64,
}

impl JobDbModel {
    pub fn new(
        kind: impl Into<String>,
        queue: impl Into<String>,
        args: impl Into<String>,
        tags: &[&str],
        max_attempts: i64,
        scheduled_at: Option<i64>,
    ) -> Self {
        let now = now_ms();
        let (state, scheduled_at) = match scheduled_at {
            Some(at) if at > now => (JobState::Scheduled, at),
            _ => (JobState::Available, now),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            queue: queue.into(),
            state: state.as_str().to_string(),
            tags: serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
            max_attempts,
            attempt: 0,
            args: args.into(),
            errors: "[]".to_string(),
            scheduled_at,
            attempted_at: None,
            finalized_at: None,
            created_at: now,
        }
    }

    pub fn state(&self) -> Option<JobState> {
        self.state.parse().ok()
    }

    pub fn tags(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }

    pub fn errors(&self) -> Vec<JobErrorRecord> {
        serde_json::from_str(&self.errors).unwrap_or_default()
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_state() {
        let now = now_ms();
        let available = JobDbModel::new("k", "default", "{}", &["archive"], 5, None);
        assert_eq!(available.state(), Some(JobState::Available));
        assert!(available.has_tag("archive"));
        assert!(!available.has_tag("allow_fail"));

        let scheduled =
            JobDbModel::new("k", "default", "{}", &[], 5, Some(now + 60_000));
        assert_eq!(scheduled.state(), Some(JobState::Scheduled));

        let past = JobDbModel::new("k", "default", "{}", &[], 5, Some(now - 60_000));
        assert_eq!(past.state(), Some(JobState::Available));
    }

    #[test]
    fn test_state_classification() {
        assert!(JobState::Retryable.is_claimable());
        assert!(!JobState::Running.is_claimable());
        assert!(JobState::Discarded.is_finalized());
        assert_eq!("retryable".parse::<JobState>().unwrap(), JobState::Retryable);
    }
}
