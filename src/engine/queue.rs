//! Ordered job queue
//!
//! FIFO of pending jobs where index 0 is the only job allowed to be running.
//! The queue is owned by the scheduler task, so every operation on it is
//! serialized by construction.

use std::collections::VecDeque;

use crate::domain::QueuedJob;
use crate::id::JobId;

#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<QueuedJob>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job. Returns true when the queue was empty before, meaning the
    /// new job is the head and has to be started.
    pub fn enqueue(&mut self, job: QueuedJob) -> bool {
        let was_empty = self.jobs.is_empty();
        self.jobs.push_back(job);
        was_empty
    }

    /// The running job, if any
    pub fn peek_head(&self) -> Option<&QueuedJob> {
        self.jobs.front()
    }

    /// Remove the head if it is `id`.
    ///
    /// A completion for anything other than the current head is stale (a
    /// duplicate or late delivery) and leaves the queue untouched.
    pub fn remove_head(&mut self, id: JobId) -> Option<QueuedJob> {
        match self.jobs.front() {
            Some(head) if head.id == id => self.jobs.pop_front(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs in execution order, head first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedJob> {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Job;
    use crate::id::JobIdSequence;

    fn install(seq: &mut JobIdSequence, path: &str) -> QueuedJob {
        QueuedJob::new(seq.next_id(), Job::InstallPackage { path: path.into() })
    }

    #[test]
    fn test_new_queue_is_empty() {
        let queue = JobQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.peek_head().is_none());
    }

    #[test]
    fn test_enqueue_reports_was_empty() {
        let mut seq = JobIdSequence::new();
        let mut queue = JobQueue::new();
        assert!(queue.enqueue(install(&mut seq, "/a.apk")));
        assert!(!queue.enqueue(install(&mut seq, "/b.apk")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let mut seq = JobIdSequence::new();
        let mut queue = JobQueue::new();
        let a = install(&mut seq, "/a.apk");
        let b = install(&mut seq, "/b.apk");
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());

        assert_eq!(queue.peek_head(), Some(&a));
        assert_eq!(queue.remove_head(a.id), Some(a));
        assert_eq!(queue.peek_head(), Some(&b));
        assert_eq!(queue.remove_head(b.id), Some(b));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_non_head_is_noop() {
        let mut seq = JobIdSequence::new();
        let mut queue = JobQueue::new();
        let a = install(&mut seq, "/a.apk");
        let b = install(&mut seq, "/b.apk");
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());

        assert!(queue.remove_head(b.id).is_none());
        assert_eq!(queue.len(), 2);
        let order: Vec<_> = queue.iter().map(|j| j.id).collect();
        assert_eq!(order, vec![a.id, b.id]);
    }

    #[test]
    fn test_remove_twice_is_idempotent() {
        let mut seq = JobIdSequence::new();
        let mut queue = JobQueue::new();
        let a = install(&mut seq, "/a.apk");
        let b = install(&mut seq, "/b.apk");
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());

        assert!(queue.remove_head(a.id).is_some());
        assert!(queue.remove_head(a.id).is_none());
        assert_eq!(queue.peek_head(), Some(&b));
    }

    #[test]
    fn test_remove_on_empty_queue() {
        let mut seq = JobIdSequence::new();
        let mut queue = JobQueue::new();
        assert!(queue.remove_head(seq.next_id()).is_none());
    }
}
