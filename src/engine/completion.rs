//! Completion channel
//!
//! Jobs report "done" through a single-use `CompletionHandle`. The handle can
//! be moved to any thread (a process-exit watcher, a timer, a listener
//! callback); signalling it only sends a message into the scheduler's inbox,
//! so the queue itself is only ever touched by the scheduler task.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::domain::JobOutcome;
use crate::id::JobId;

/// Completion event as delivered to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub id: JobId,
    pub outcome: JobOutcome,
}

/// Create a completion channel
pub fn channel() -> (CompletionSender, CompletionInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, CompletionInbox { rx })
}

/// Producer side, cloned into every handle
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl CompletionSender {
    /// Mint the handle for the job that is about to start
    pub fn handle_for(&self, id: JobId) -> CompletionHandle {
        CompletionHandle {
            id,
            tx: Some(self.tx.clone()),
        }
    }

    /// Post a raw completion event. Returns false if the scheduler is gone.
    pub fn post(&self, id: JobId, outcome: JobOutcome) -> bool {
        self.tx.send(CompletionEvent { id, outcome }).is_ok()
    }
}

/// Consumer side, owned by the scheduler
#[derive(Debug)]
pub struct CompletionInbox {
    rx: mpsc::UnboundedReceiver<CompletionEvent>,
}

impl CompletionInbox {
    pub async fn recv(&mut self) -> Option<CompletionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<CompletionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Single-use completion signal for one job.
///
/// Signalling consumes the handle. A handle dropped without being signalled
/// posts `JobOutcome::Abandoned`, so a collaborator that loses its callback
/// does not wedge the queue. A collaborator that keeps the handle alive and
/// never calls back still does.
#[derive(Debug)]
pub struct CompletionHandle {
    id: JobId,
    tx: Option<mpsc::UnboundedSender<CompletionEvent>>,
}

impl CompletionHandle {
    /// Job this handle belongs to
    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Report the job finished with `outcome`
    pub fn complete(mut self, outcome: JobOutcome) {
        self.post(outcome);
    }

    /// Report the job finished cleanly
    pub fn succeed(self) {
        self.complete(JobOutcome::Completed);
    }

    /// Report the job finished after a collaborator failure
    pub fn fail(self, reason: impl Into<String>) {
        self.complete(JobOutcome::Failed(reason.into()));
    }

    /// Turn this handle into one that several callbacks can race on
    pub fn shared(self) -> SharedCompletion {
        SharedCompletion {
            id: self.id,
            inner: Arc::new(Mutex::new(Some(self))),
        }
    }

    fn post(&mut self, outcome: JobOutcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if tx.send(CompletionEvent { id: self.id, outcome }).is_err() {
            tracing::debug!(job_id = %self.id, "Scheduler gone, completion dropped");
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(job_id = %self.id, "Completion handle dropped without signalling");
            self.post(JobOutcome::Abandoned);
        }
    }
}

/// Cloneable wrapper around a `CompletionHandle`; the first `complete` wins.
///
/// Used when a job has more than one path to completion, e.g. a collaborator
/// callback and the error branch of the call that registered it.
#[derive(Debug, Clone)]
pub struct SharedCompletion {
    id: JobId,
    inner: Arc<Mutex<Option<CompletionHandle>>>,
}

impl SharedCompletion {
    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Signal completion. Returns false if another clone already did.
    pub fn complete(&self, outcome: JobOutcome) -> bool {
        let handle = match self.inner.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match handle {
            Some(handle) => {
                handle.complete(outcome);
                true
            }
            None => false,
        }
    }
}
