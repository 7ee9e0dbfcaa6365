//! Domain types for overlayd
//!
//! - Request: what a trusted caller submits
//! - Job: one queued side effect, with its completion mode
//! - JobOutcome / JobReport: what happened to a job once it left the queue

pub mod job;
pub mod outcome;
pub mod request;

pub use job::{BootAnimationSource, CompletionMode, Job, QueuedJob};
pub use outcome::{JobOutcome, JobReport};
pub use request::{CallerToken, Command, EMPTY_TIMESTAMP, Payload, Request, UnknownCommandTag};
