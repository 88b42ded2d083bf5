//! Hearth Jobs - Generation Job Tracking
//!
//! Long-running generation jobs are submitted once and then polled by id
//! until they report a result. [`GenerationJobTracker`] runs that loop with
//! a configurable [`PollPolicy`], cooperative cancellation, and a `watch`
//! channel of [`GenerationState`] snapshots for UI layers.

pub mod poller;
pub mod policy;
pub mod tracker;
pub mod types;

pub use poller::{HttpStatusPoller, StatusPoller};
pub use policy::PollPolicy;
pub use tracker::GenerationJobTracker;
pub use types::{GenerationEvent, GenerationState, JobStatus, StatusResponse, SubmitResponse};
