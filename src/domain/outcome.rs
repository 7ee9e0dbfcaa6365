//! Job execution outcome types.
//!
//! Outcomes never gate the queue: a failed job still advances it. They are
//! collected and surfaced with the drained notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::Job;
use crate::id::JobId;

/// Outcome of a job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Side effect attempted and reported done
    Completed,
    /// A collaborator call failed; the job still counts as finished
    Failed(String),
    /// The completion handle was dropped without being signalled
    Abandoned,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

/// What happened to one job, reported once it leaves the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub job: Job,
    pub outcome: JobOutcome,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn new(id: JobId, job: Job, outcome: JobOutcome) -> Self {
        Self {
            id,
            job,
            outcome,
            finished_at: Utc::now(),
        }
    }
}
