//! overlayd - privileged theme customization daemon
//!
//! Trusted callers submit customization requests (install or remove overlay
//! packages, restart the system UI, swap fonts or the boot animation, force a
//! configuration refresh). Each accepted request becomes a batch of jobs that
//! run strictly one at a time, in order, even when a job finishes on an
//! external callback.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod engine;
pub mod error;
pub mod id;
pub mod ipc;
pub mod jobs;
pub mod system;

pub use error::{OverlaydError, Result};
