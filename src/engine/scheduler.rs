//! Scheduler - the single worker that owns the job queue
//!
//! All queue mutation happens on one tokio task:
//! - submissions arrive as messages and pass through the admission gate
//! - completions arrive through the completion inbox, from whatever context
//!   finished the job
//!
//! The head is started when the queue goes from empty to non-empty and again
//! every time a completion matching the head removes it.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::domain::{Job, JobOutcome, JobReport, QueuedJob, Request};
use crate::engine::admission::{AdmissionGate, DEFAULT_TRUSTED_CALLERS, Rejection};
use crate::engine::completion::{self, CompletionEvent, CompletionHandle, CompletionInbox, CompletionSender};
use crate::engine::events::{EngineEvent, EngineStatus, SchedulerState};
use crate::engine::queue::JobQueue;
use crate::error::{OverlaydError, Result};
use crate::id::{JobId, JobIdSequence};

/// Runs a job's side effect.
///
/// Synchronous jobs signal `completion` before returning. Asynchronous jobs
/// hand it to whatever will observe the external callback.
pub trait JobExecutor: Send + Sync {
    fn run(&self, id: JobId, job: &Job, completion: CompletionHandle);
}

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Creator identities allowed to submit requests
    pub trusted_callers: Vec<String>,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trusted_callers: DEFAULT_TRUSTED_CALLERS.iter().map(|c| c.to_string()).collect(),
            event_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_trusted_callers<I, S>(mut self, callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_callers = callers.into_iter().map(Into::into).collect();
        self
    }
}

/// Message sent from an `Engine` handle to the scheduler task
#[derive(Debug)]
enum SchedulerMessage {
    Submit {
        request: Request,
        reply: oneshot::Sender<std::result::Result<Vec<JobId>, Rejection>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown,
}

/// The scheduling context. Owns the gate, the queue and both inboxes.
struct Scheduler {
    gate: AdmissionGate,
    queue: JobQueue,
    ids: JobIdSequence,
    executor: Arc<dyn JobExecutor>,
    completion_tx: CompletionSender,
    completion_rx: CompletionInbox,
    /// Reports collected since the queue was last idle
    reports: Vec<JobReport>,
    state_tx: watch::Sender<SchedulerState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Scheduler {
    fn new(
        config: &EngineConfig,
        executor: Arc<dyn JobExecutor>,
        state_tx: watch::Sender<SchedulerState>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let (completion_tx, completion_rx) = completion::channel();
        Self {
            gate: AdmissionGate::new(config.trusted_callers.iter().cloned()),
            queue: JobQueue::new(),
            ids: JobIdSequence::new(),
            executor,
            completion_tx,
            completion_rx,
            reports: Vec::new(),
            state_tx,
            event_tx,
        }
    }

    fn state(&self) -> SchedulerState {
        if self.queue.is_empty() {
            SchedulerState::Idle
        } else {
            SchedulerState::Busy
        }
    }

    async fn run(mut self, mut messages: mpsc::UnboundedReceiver<SchedulerMessage>) {
        tracing::info!("Scheduler started");
        loop {
            tokio::select! {
                biased;
                Some(event) = self.completion_rx.recv() => {
                    self.handle_completion(event);
                }
                message = messages.recv() => match message {
                    Some(SchedulerMessage::Submit { request, reply }) => {
                        let result = self.handle_submit(request);
                        let _ = reply.send(result);
                    }
                    Some(SchedulerMessage::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Some(SchedulerMessage::Shutdown) | None => break,
                },
            }
        }
        if !self.queue.is_empty() {
            tracing::warn!(pending = self.queue.len(), "Scheduler stopping with jobs still queued");
        }
        tracing::info!("Scheduler stopped");
    }

    /// Admit a request and enqueue its jobs, starting the head if we were idle
    fn handle_submit(&mut self, request: Request) -> std::result::Result<Vec<JobId>, Rejection> {
        let busy = self.state().is_busy();
        let jobs = self.gate.admit(&request, busy)?;

        let mut ids = Vec::with_capacity(jobs.len());
        let mut start = false;
        for job in jobs {
            let id = self.ids.next_id();
            tracing::debug!(job_id = %id, job = %job, "Job queued");
            start |= self.queue.enqueue(QueuedJob::new(id, job));
            ids.push(id);
        }

        if start {
            tracing::info!(queued = self.queue.len(), "Starting job queue");
            self.publish_state();
            self.start_head();
        }
        Ok(ids)
    }

    /// Remove the completed head and advance, or ignore a stale completion
    fn handle_completion(&mut self, event: CompletionEvent) {
        let Some(done) = self.queue.remove_head(event.id) else {
            tracing::debug!(job_id = %event.id, "Ignoring stale completion");
            return;
        };

        match &event.outcome {
            JobOutcome::Completed => {
                tracing::info!(job_id = %done.id, job = %done.job, "Job completed");
            }
            JobOutcome::Failed(reason) => {
                tracing::error!(job_id = %done.id, job = %done.job, error = %reason, "Job failed");
            }
            JobOutcome::Abandoned => {
                tracing::warn!(job_id = %done.id, job = %done.job, "Job abandoned");
            }
        }

        let report = JobReport::new(done.id, done.job, event.outcome);
        let _ = self.event_tx.send(EngineEvent::JobFinished(report.clone()));
        self.reports.push(report);

        if self.queue.is_empty() {
            tracing::info!("Job queue empty, all done");
            self.publish_state();
            let reports = std::mem::take(&mut self.reports);
            let _ = self.event_tx.send(EngineEvent::AllJobsDrained { reports });
        } else {
            self.start_head();
        }
    }

    fn start_head(&mut self) {
        let Some(head) = self.queue.peek_head() else {
            return;
        };
        let (id, job) = (head.id, head.job.clone());
        tracing::info!(job_id = %id, kind = job.kind(), mode = ?job.completion_mode(), "Starting job");
        let _ = self.event_tx.send(EngineEvent::JobStarted { id, job: job.clone() });
        self.executor.run(id, &job, self.completion_tx.handle_for(id));
    }

    fn publish_state(&self) {
        let state = self.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            queued: self.queue.iter().cloned().collect(),
            last_accepted: self.gate.last_accepted(),
        }
    }
}

/// Cloneable handle to a running scheduler task
#[derive(Clone)]
pub struct Engine {
    messages: mpsc::UnboundedSender<SchedulerMessage>,
    state_rx: watch::Receiver<SchedulerState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Spawn the scheduler task on the current tokio runtime
    pub fn spawn(config: EngineConfig, executor: Arc<dyn JobExecutor>) -> (Self, JoinHandle<()>) {
        let (messages, messages_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        let scheduler = Scheduler::new(&config, executor, state_tx, event_tx.clone());
        let task = tokio::spawn(scheduler.run(messages_rx));

        (
            Self {
                messages,
                state_rx,
                event_tx,
            },
            task,
        )
    }

    /// Submit a request. Returns the ids of the jobs it enqueued, in order.
    pub async fn submit(&self, request: Request) -> Result<Vec<JobId>> {
        let (reply, rx) = oneshot::channel();
        self.messages
            .send(SchedulerMessage::Submit { request, reply })
            .map_err(|_| OverlaydError::EngineStopped)?;
        let ids = rx.await.map_err(|_| OverlaydError::EngineStopped)??;
        Ok(ids)
    }

    /// Snapshot of the queue as seen by the scheduler
    pub async fn status(&self) -> Result<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.messages
            .send(SchedulerMessage::Status { reply })
            .map_err(|_| OverlaydError::EngineStopped)?;
        rx.await.map_err(|_| OverlaydError::EngineStopped)
    }

    /// Last published scheduler state
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Receive engine notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Wait until the scheduler reports `Idle`
    pub async fn wait_idle(&self) -> Result<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| *state == SchedulerState::Idle)
            .await
            .map_err(|_| OverlaydError::EngineStopped)?;
        Ok(())
    }

    /// Ask the scheduler task to stop after its current message
    pub fn shutdown(&self) {
        let _ = self.messages.send(SchedulerMessage::Shutdown);
    }
}
