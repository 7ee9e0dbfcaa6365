//! Scheduler state and the notifications it broadcasts

use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobReport, QueuedJob};
use crate::id::JobId;

/// `Idle` when the queue is empty, `Busy` while its head is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Idle,
    Busy,
}

impl SchedulerState {
    pub fn is_busy(&self) -> bool {
        matches!(self, SchedulerState::Busy)
    }
}

/// Notification broadcast to observers of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A job became the running head
    JobStarted { id: JobId, job: Job },
    /// A job left the queue
    JobFinished(JobReport),
    /// The queue emptied; carries every job report since it was last idle
    AllJobsDrained { reports: Vec<JobReport> },
}

impl EngineEvent {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::JobStarted { .. } => "job_started",
            EngineEvent::JobFinished(_) => "job_finished",
            EngineEvent::AllJobsDrained { .. } => "all_jobs_drained",
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: SchedulerState,
    /// Head first
    pub queued: Vec<QueuedJob>,
    pub last_accepted: Option<u64>,
}
