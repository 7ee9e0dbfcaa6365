//! Job engine - admission, ordered queue and the single-worker scheduler
//!
//! Flow of a request:
//! 1. `Engine::submit` sends it to the scheduler task
//! 2. The admission gate authenticates, deduplicates and decodes it into jobs
//! 3. Jobs are appended to the queue; if it was empty the head starts
//! 4. Each job reports through its `CompletionHandle`, from any thread
//! 5. The scheduler removes the head, starts the next one or goes idle

pub mod admission;
pub mod completion;
pub mod events;
pub mod queue;
pub mod scheduler;

pub use admission::{AdmissionGate, DEFAULT_TRUSTED_CALLERS, Rejection, decode};
pub use completion::{CompletionEvent, CompletionHandle, SharedCompletion};
pub use events::{EngineEvent, EngineStatus, SchedulerState};
pub use queue::JobQueue;
pub use scheduler::{Engine, EngineConfig, JobExecutor};
