//! Job execution -- grid, resume, batched fetching, retry passes, finalization.
//!
//! Split into focused submodules:
//! - [`context`] - Shared per-job state and event emission
//! - [`orchestration`] - Top-level job lifecycle
//! - [`batching`] - Concurrent fetching of one batch and its durable append
//! - [`retry_passes`] - Re-submission of failed points and the failed-points file
//! - [`finalization`] - Promotion, compression and loading of the artifact

mod batching;
mod context;
mod finalization;
mod orchestration;
mod retry_passes;


pub(crate) use context::JobContext;
pub(crate) use orchestration::run_job;
