//! Wire payloads and observable tracker state.

use serde::{Deserialize, Serialize};

/// Job handle returned by a submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationEvent {
    /// Opaque job id used as the poll handle.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerationEvent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Response of a submit call. A present `result` means the job finished
/// synchronously and no polling is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse<T> {
    pub event: GenerationEvent,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> SubmitResponse<T> {
    /// Job accepted; poll `job_id` for the result.
    pub fn accepted(job_id: impl Into<String>) -> Self {
        Self {
            event: GenerationEvent::new(job_id),
            result: None,
        }
    }

    /// Job finished during the submit call.
    pub fn completed(job_id: impl Into<String>, result: T) -> Self {
        Self {
            event: GenerationEvent::new(job_id),
            result: Some(result),
        }
    }
}

/// One status-poll payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse<T> {
    /// Backend-defined progress step, e.g. `running` or `complete`.
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> StatusResponse<T> {
    pub fn running(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: None,
            result: None,
        }
    }

    pub fn complete(result: T) -> Self {
        Self {
            step: STEP_COMPLETE.to_string(),
            message: None,
            result: Some(result),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            step: STEP_FAILED.to_string(),
            message: Some(message.into()),
            result: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// `#[serde(default)]` on `Option<T>` would require `T: Default`.
fn none<T>() -> Option<T> {
    None
}

pub(crate) const STEP_COMPLETE: &str = "complete";
pub(crate) const STEP_FAILED: &str = "failed";
pub(crate) const STEP_ERROR: &str = "error";

/// Tracker lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Submitting,
    Polling,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Submitting | JobStatus::Polling)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Snapshot of a tracker, published on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationState<T> {
    pub job_id: Option<String>,
    pub status: JobStatus,
    /// Latest human-readable progress string from the job.
    pub progress_message: Option<String>,
    /// Last raw poll payload.
    pub last_status: Option<StatusResponse<T>>,
    pub result: Option<T>,
    /// Failure message. Set only in `Failed`.
    pub error: Option<String>,
    /// Status requests issued by the current run.
    pub poll_count: u32,
}

impl<T> Default for GenerationState<T> {
    fn default() -> Self {
        Self {
            job_id: None,
            status: JobStatus::Idle,
            progress_message: None,
            last_status: None,
            result: None,
            error: None,
            poll_count: 0,
        }
    }
}

impl<T> GenerationState<T> {
    /// True while submitting or polling.
    pub fn is_generating(&self) -> bool {
        self.status.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_response_without_result() {
        let parsed: SubmitResponse<serde_json::Value> =
            serde_json::from_value(json!({"event": {"id": "j1"}})).unwrap();
        assert_eq!(parsed.event.id, "j1");
        assert!(parsed.result.is_none());
    }

    #[test]
    fn test_status_response_parses_backend_payload() {
        let parsed: StatusResponse<serde_json::Value> = serde_json::from_value(json!({
            "step": "complete",
            "message": "Done",
            "result": {"x": 2},
        }))
        .unwrap();
        assert_eq!(parsed.step, "complete");
        assert_eq!(parsed.message.as_deref(), Some("Done"));
        assert_eq!(parsed.result, Some(json!({"x": 2})));
    }

    #[test]
    fn test_default_state_is_idle() {
        let state: GenerationState<u8> = GenerationState::default();
        assert_eq!(state.status, JobStatus::Idle);
        assert!(!state.is_generating());
        assert!(!state.status.is_terminal());
    }

    #[test]
    fn test_active_statuses() {
        assert!(JobStatus::Submitting.is_active());
        assert!(JobStatus::Polling.is_active());
        for status in [JobStatus::Complete, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
    }
}
