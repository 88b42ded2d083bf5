//! Generation tracker scenarios driven by a scripted status poller.

use std::time::Duration;

use hearth_jobs::{GenerationEvent, GenerationJobTracker, PollPolicy};
use hearth_test_utils::assertions::{assert_complete, assert_failed};
use hearth_test_utils::{
    HearthError, JobError, JobStatus, ScriptedStatusPoller, StatusResponse, SubmitResponse,
};
use serde_json::{json, Value};

type Tracker = GenerationJobTracker<Value, ScriptedStatusPoller<Value>>;

fn tracker(responses: Vec<Result<StatusResponse<Value>, HearthError>>) -> Tracker {
    GenerationJobTracker::new(ScriptedStatusPoller::new(responses), PollPolicy::default())
}

#[tokio::test(start_paused = true)]
async fn immediate_result_skips_polling() {
    let tracker = tracker(vec![]);

    let state = tracker
        .run(|| async {
            Ok::<_, HearthError>(SubmitResponse::completed("j1", json!({"x": 1})))
        })
        .await;

    assert_complete(&state, &json!({"x": 1}));
    assert_eq!(state.job_id.as_deref(), Some("j1"));
    assert_eq!(tracker.poller().calls(), 0);
    assert_eq!(state.poll_count, 0);
}

#[tokio::test(start_paused = true)]
async fn polls_until_result() {
    let tracker = tracker(vec![
        Ok(StatusResponse::running("running").with_message("Rolling dice")),
        Ok(StatusResponse::complete(json!({"x": 2}))),
    ]);

    let state = tracker
        .run(|| async { Ok::<_, HearthError>(SubmitResponse::accepted("j2")) })
        .await;

    assert_complete(&state, &json!({"x": 2}));
    assert_eq!(tracker.poller().calls(), 2);
    assert_eq!(tracker.poller().polled_ids(), vec!["j2", "j2"]);
    assert_eq!(state.poll_count, 2);
    assert_eq!(state.progress_message.as_deref(), Some("Rolling dice"));
    assert_eq!(state.last_status.unwrap().step, "complete");
    assert_eq!(tracker.state().status, JobStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn submit_progress_message_is_kept_until_status_replaces_it() {
    let tracker = tracker(vec![
        Ok(StatusResponse::running("queued")),
        Ok(StatusResponse::running("running").with_message("Drawing map")),
        Ok(StatusResponse::complete(json!("map"))),
    ]);
    let mut rx = tracker.subscribe();
    let handle = tracker.start_generation(|| async {
        Ok::<_, HearthError>(SubmitResponse {
            event: GenerationEvent::new("j6").with_message("Queued behind 2 jobs"),
            result: None,
        })
    });

    let polling = rx
        .wait_for(|state| state.status == JobStatus::Polling)
        .await
        .unwrap()
        .clone();
    assert_eq!(
        polling.progress_message.as_deref(),
        Some("Queued behind 2 jobs")
    );

    let state = handle.await.unwrap();
    assert_complete(&state, &json!("map"));
    assert_eq!(state.progress_message.as_deref(), Some("Drawing map"));
}

#[tokio::test(start_paused = true)]
async fn submit_failure_is_terminal() {
    let tracker = tracker(vec![]);

    let state = tracker
        .run(|| async { Err::<SubmitResponse<Value>, _>("boom") })
        .await;

    assert_failed(&state, "boom");
    assert_eq!(tracker.poller().calls(), 0);
    assert!(state.job_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn poll_request_failure_is_terminal() {
    let tracker = tracker(vec![
        Ok(StatusResponse::running("running")),
        Err(JobError::PollFailed {
            job_id: "j3".to_string(),
            reason: "connection reset".to_string(),
        }
        .into()),
        Ok(StatusResponse::complete(json!(3))),
    ]);

    let state = tracker
        .run(|| async { Ok::<_, HearthError>(SubmitResponse::accepted("j3")) })
        .await;

    assert_failed(&state, "Status request for job j3 failed: connection reset");
    assert_eq!(tracker.poller().calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn complete_step_without_result_fails() {
    let tracker = tracker(vec![Ok(StatusResponse::running("complete"))]);

    let state = tracker
        .run(|| async { Ok::<_, HearthError>(SubmitResponse::accepted("j4")) })
        .await;

    assert_failed(&state, "Job j4 reported completion without a result");
}

#[tokio::test(start_paused = true)]
async fn first_poll_waits_one_interval() {
    let tracker = tracker(vec![Ok(StatusResponse::complete(json!(1)))]);
    let handle = tracker.start_generation(|| async {
        Ok::<_, HearthError>(SubmitResponse::accepted("j5"))
    });

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(tracker.poller().calls(), 0);
    assert_eq!(tracker.state().status, JobStatus::Polling);
    assert!(tracker.is_generating());

    let state = handle.await.unwrap();
    assert_complete(&state, &json!(1));
    assert_eq!(tracker.poller().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_submit() {
    let tracker = tracker(vec![]);
    let handle = tracker.start_generation(|| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, HearthError>(SubmitResponse::accepted("never"))
    });
    assert_eq!(tracker.state().status, JobStatus::Submitting);

    tokio::time::sleep(Duration::from_secs(1)).await;
    tracker.cancel();

    let state = handle.await.unwrap();
    assert_eq!(state.status, JobStatus::Cancelled);
    assert_eq!(tracker.state().status, JobStatus::Cancelled);
    assert_eq!(tracker.poller().calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn configured_attempt_cap_from_config() {
    let config = hearth_core::JobConfig {
        poll_interval_ms: 500,
        max_poll_attempts: Some(4),
        ..hearth_core::JobConfig::default()
    };
    let tracker: Tracker = GenerationJobTracker::new(
        ScriptedStatusPoller::always_running(),
        PollPolicy::from_config(&config),
    );

    let started = tokio::time::Instant::now();
    let state = tracker
        .run(|| async { Ok::<_, HearthError>(SubmitResponse::accepted("slow")) })
        .await;

    assert_failed(&state, "Job slow still running after 4 status requests");
    assert_eq!(tracker.poller().calls(), 4);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(2500));
}
