//! Generation job tracker.
//!
//! Drives one generation at a time: submit, then poll the job's status on a
//! fixed interval until it reports a result, fails, hits a policy cap, or is
//! cancelled. Every transition is published on a `watch` channel.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hearth_core::{HearthError, JobError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::poller::StatusPoller;
use crate::policy::PollPolicy;
use crate::types::{
    GenerationState, JobStatus, StatusResponse, SubmitResponse, STEP_COMPLETE, STEP_ERROR,
    STEP_FAILED,
};

/// Handle to a generation tracker. Clones share state.
pub struct GenerationJobTracker<T, P> {
    inner: Arc<TrackerInner<T, P>>,
}

impl<T, P> Clone for GenerationJobTracker<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TrackerInner<T, P> {
    poller: P,
    policy: PollPolicy,
    state: watch::Sender<GenerationState<T>>,
    run: Mutex<RunSlot>,
}

/// Identity and cancel signal of the current run.
#[derive(Default)]
struct RunSlot {
    generation: u64,
    cancel: Option<watch::Sender<bool>>,
}

/// What a poll payload means for the run.
enum StepOutcome<T> {
    Complete(T),
    Failed(JobError),
    Running,
}

impl<T, P> GenerationJobTracker<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: StatusPoller<T> + 'static,
{
    pub fn new(poller: P, policy: PollPolicy) -> Self {
        let (state, _) = watch::channel(GenerationState::default());
        Self {
            inner: Arc::new(TrackerInner {
                poller,
                policy,
                state,
                run: Mutex::new(RunSlot::default()),
            }),
        }
    }

    pub fn poller(&self) -> &P {
        &self.inner.poller
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.inner.policy
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> GenerationState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn is_generating(&self) -> bool {
        self.inner.state.borrow().is_generating()
    }

    /// Receive every published state transition.
    pub fn subscribe(&self) -> watch::Receiver<GenerationState<T>> {
        self.inner.state.subscribe()
    }

    /// Start a generation on a background task.
    ///
    /// Any generation already in flight is cancelled first. The state moves to
    /// `Submitting` before this returns.
    pub fn start_generation<F, Fut, E>(&self, submit_fn: F) -> JoinHandle<GenerationState<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<SubmitResponse<T>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let run = self.begin_run();
        let tracker = self.clone();
        tokio::spawn(async move { tracker.drive(run, submit_fn).await })
    }

    /// Run a generation on the current task and return its final state.
    pub async fn run<F, Fut, E>(&self, submit_fn: F) -> GenerationState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SubmitResponse<T>, E>>,
        E: Display,
    {
        let run = self.begin_run();
        self.drive(run, submit_fn).await
    }

    /// Stop the current generation, if any.
    pub fn cancel(&self) {
        let mut slot = self.lock_run();
        let Some(cancel) = slot.cancel.take() else {
            return;
        };
        slot.generation += 1;
        let _ = cancel.send(true);

        self.inner.state.send_modify(|state| {
            if state.is_generating() {
                state.status = JobStatus::Cancelled;
            }
        });
        tracing::info!(job_id = ?self.inner.state.borrow().job_id, "Generation cancelled");
    }

    fn lock_run(&self) -> MutexGuard<'_, RunSlot> {
        self.inner.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Supersede any current run and publish a fresh `Submitting` state.
    fn begin_run(&self) -> Run<T> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut slot = self.lock_run();
        if let Some(previous) = slot.cancel.replace(cancel_tx) {
            let _ = previous.send(true);
            tracing::debug!("Superseding in-flight generation");
        }
        slot.generation += 1;

        let state = GenerationState {
            status: JobStatus::Submitting,
            ..GenerationState::default()
        };
        self.inner.state.send_replace(state.clone());

        Run {
            generation: slot.generation,
            cancel: cancel_rx,
            state,
        }
    }

    /// Publish the run's state unless a newer run or a cancel superseded it.
    fn publish(&self, run: &Run<T>) {
        let mut slot = self.lock_run();
        if slot.generation != run.generation {
            return;
        }
        if run.state.status.is_terminal() {
            slot.cancel = None;
        }
        self.inner.state.send_replace(run.state.clone());
    }

    async fn drive<F, Fut, E>(&self, mut run: Run<T>, submit_fn: F) -> GenerationState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SubmitResponse<T>, E>>,
        E: Display,
    {
        let submitted = tokio::select! {
            biased;
            _ = cancelled(&mut run.cancel) => return run.cancelled(),
            submitted = submit_fn() => submitted,
        };

        let response = match submitted {
            Ok(response) => response,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "Generation submit failed");
                run.fail(JobError::SubmitFailed { reason });
                self.publish(&run);
                return run.state;
            }
        };

        let job_id = response.event.id;
        run.state.job_id = Some(job_id.clone());
        run.state.progress_message = response.event.message;

        if let Some(result) = response.result {
            tracing::info!(job_id = %job_id, "Generation completed on submit");
            run.complete(result);
            self.publish(&run);
            return run.state;
        }

        run.state.status = JobStatus::Polling;
        self.publish(&run);

        let policy = self.inner.policy;
        tracing::info!(
            job_id = %job_id,
            interval_ms = policy.interval.as_millis() as u64,
            max_attempts = ?policy.max_attempts,
            "Polling generation job"
        );

        let started = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut run.cancel) => return run.cancelled(),
                _ = tokio::time::sleep(policy.interval) => {}
            }

            let elapsed = started.elapsed();
            if policy.deadline_passed(elapsed) {
                tracing::warn!(job_id = %job_id, ?elapsed, "Generation job timed out");
                run.fail(JobError::TimedOut {
                    job_id: job_id.clone(),
                    elapsed,
                });
                self.publish(&run);
                return run.state;
            }

            run.state.poll_count += 1;
            let polled = tokio::select! {
                biased;
                _ = cancelled(&mut run.cancel) => return run.cancelled(),
                polled = self.inner.poller.poll_status(&job_id) => polled,
            };

            let status = match polled {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Status request failed");
                    run.state.error = Some(failure_reason(&e));
                    run.state.status = JobStatus::Failed;
                    self.publish(&run);
                    return run.state;
                }
            };

            tracing::debug!(
                job_id = %job_id,
                step = %status.step,
                attempt = run.state.poll_count,
                "Generation status"
            );
            if status.message.is_some() {
                run.state.progress_message = status.message.clone();
            }
            let outcome = classify(&job_id, &status);
            run.state.last_status = Some(status);

            match outcome {
                StepOutcome::Complete(result) => {
                    tracing::info!(job_id = %job_id, polls = run.state.poll_count, "Generation complete");
                    run.complete(result);
                    self.publish(&run);
                    return run.state;
                }
                StepOutcome::Failed(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "Generation job failed");
                    run.fail(err);
                    self.publish(&run);
                    return run.state;
                }
                StepOutcome::Running => {
                    if policy.attempts_exhausted(run.state.poll_count) {
                        let attempts = run.state.poll_count;
                        tracing::warn!(job_id = %job_id, attempts, "Poll attempts exhausted");
                        run.fail(JobError::AttemptsExhausted {
                            job_id: job_id.clone(),
                            attempts,
                        });
                        self.publish(&run);
                        return run.state;
                    }
                    self.publish(&run);
                }
            }
        }
    }
}

impl<T, P> std::fmt::Debug for GenerationJobTracker<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationJobTracker")
            .field("policy", &self.inner.policy)
            .field("status", &self.inner.state.borrow().status)
            .finish_non_exhaustive()
    }
}

/// Local view of one run.
struct Run<T> {
    generation: u64,
    cancel: watch::Receiver<bool>,
    state: GenerationState<T>,
}

impl<T> Run<T> {
    fn complete(&mut self, result: T) {
        self.state.result = Some(result);
        self.state.error = None;
        self.state.status = JobStatus::Complete;
    }

    fn fail(&mut self, err: JobError) {
        self.state.error = Some(err.to_string());
        self.state.status = JobStatus::Failed;
    }

    fn cancelled(mut self) -> GenerationState<T> {
        self.state.status = JobStatus::Cancelled;
        self.state
    }
}

fn classify<T: Clone>(job_id: &str, status: &StatusResponse<T>) -> StepOutcome<T> {
    if let Some(result) = &status.result {
        return StepOutcome::Complete(result.clone());
    }
    let step = status.step.to_ascii_lowercase();
    if step == STEP_FAILED || step == STEP_ERROR {
        return StepOutcome::Failed(JobError::JobFailed {
            job_id: job_id.to_string(),
            reason: status
                .message
                .clone()
                .unwrap_or_else(|| format!("job reported step '{}'", status.step)),
        });
    }
    if step == STEP_COMPLETE {
        return StepOutcome::Failed(JobError::MissingResult {
            job_id: job_id.to_string(),
        });
    }
    StepOutcome::Running
}

/// Resolves once the run is cancelled or its cancel sender is gone.
/// Job errors are stored bare so poll and submit failures read alike.
fn failure_reason(err: &HearthError) -> String {
    match err {
        HearthError::Job(job) => job.to_string(),
        other => other.to_string(),
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_core::HearthResult;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted responses, then reports `running` forever.
    #[derive(Default)]
    struct Script {
        responses: Mutex<VecDeque<HearthResult<StatusResponse<u32>>>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(responses: Vec<HearthResult<StatusResponse<u32>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusPoller<u32> for Script {
        async fn poll_status(&self, _job_id: &str) -> HearthResult<StatusResponse<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(StatusResponse::running("running")))
        }
    }

    fn tracker(script: Script, policy: PollPolicy) -> GenerationJobTracker<u32, Script> {
        GenerationJobTracker::new(script, policy)
    }

    async fn accepted(id: &str) -> Result<SubmitResponse<u32>, HearthError> {
        Ok(SubmitResponse::accepted(id))
    }

    #[test]
    fn test_classify_steps() {
        let running: StatusResponse<u32> = StatusResponse::running("queued");
        assert!(matches!(classify("j", &running), StepOutcome::Running));

        let done = StatusResponse::complete(5);
        assert!(matches!(classify("j", &done), StepOutcome::Complete(5)));

        let failed: StatusResponse<u32> = StatusResponse::failed("model overloaded");
        match classify("j", &failed) {
            StepOutcome::Failed(JobError::JobFailed { reason, .. }) => {
                assert_eq!(reason, "model overloaded")
            }
            _ => panic!("expected JobFailed"),
        }

        let errored: StatusResponse<u32> = StatusResponse::running("ERROR");
        assert!(matches!(
            classify("j", &errored),
            StepOutcome::Failed(JobError::JobFailed { .. })
        ));

        let empty: StatusResponse<u32> = StatusResponse::running("complete");
        assert!(matches!(
            classify("j", &empty),
            StepOutcome::Failed(JobError::MissingResult { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_step_is_terminal() {
        let tracker = tracker(
            Script::new(vec![Ok(StatusResponse::failed("out of credits"))]),
            PollPolicy::default(),
        );

        let state = tracker.run(|| accepted("j1")).await;

        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(
            state.error.as_deref(),
            Some("Job j1 failed: out of credits")
        );
        assert_eq!(tracker.poller().calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.state(), state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_stores_job_message() {
        let tracker = tracker(
            Script::new(vec![Err(JobError::PollFailed {
                job_id: "j2".to_string(),
                reason: "502 Bad Gateway".to_string(),
            }
            .into())]),
            PollPolicy::default(),
        );

        let state = tracker.run(|| accepted("j2")).await;

        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(
            state.error.as_deref(),
            Some("Status request for job j2 failed: 502 Bad Gateway")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_outside_jobs_keeps_its_message() {
        let tracker = tracker(
            Script::new(vec![Err(HearthError::fetch("socket closed"))]),
            PollPolicy::default(),
        );

        let state = tracker.run(|| accepted("j3")).await;

        assert_eq!(state.error.as_deref(), Some("socket closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_interval_spaces_polls() {
        let policy = PollPolicy::default().with_interval(Duration::from_millis(250));
        let tracker = tracker(
            Script::new(vec![
                Ok(StatusResponse::running("queued")),
                Ok(StatusResponse::complete(4)),
            ]),
            policy,
        );

        let started = tokio::time::Instant::now();
        let state = tracker.run(|| accepted("quick")).await;

        assert_eq!(state.result, Some(4));
        assert_eq!(state.poll_count, 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap() {
        let tracker = tracker(Script::default(), PollPolicy::default().with_max_attempts(3));

        let state = tracker.run(|| accepted("slow")).await;

        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.poll_count, 3);
        assert_eq!(tracker.poller().calls.load(Ordering::SeqCst), 3);
        assert!(state.error.unwrap().contains("3 status requests"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_cap() {
        let policy = PollPolicy::default().with_max_duration(Duration::from_millis(2500));
        let tracker = tracker(Script::default(), policy);

        let state = tracker.run(|| accepted("slow")).await;

        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.poll_count, 2);
        assert!(state.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let tracker = tracker(Script::default(), PollPolicy::default());
        let handle = tracker.start_generation(|| accepted("long"));
        assert!(tracker.is_generating());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        tracker.cancel();
        assert_eq!(tracker.state().status, JobStatus::Cancelled);

        let state = handle.await.unwrap();
        assert_eq!(state.status, JobStatus::Cancelled);
        let calls = tracker.poller().calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.poller().calls.load(Ordering::SeqCst), calls);
        assert!(!tracker.is_generating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_generation_supersedes_old() {
        let tracker = tracker(Script::default(), PollPolicy::default());
        let first = tracker.start_generation(|| accepted("old"));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let second = tracker.start_generation(|| async {
            Ok::<_, HearthError>(SubmitResponse::completed("new", 9))
        });

        assert_eq!(first.await.unwrap().status, JobStatus::Cancelled);
        let state = second.await.unwrap();
        assert_eq!(state.result, Some(9));
        assert_eq!(tracker.state().job_id.as_deref(), Some("new"));
        assert_eq!(tracker.state().status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let tracker = tracker(Script::default(), PollPolicy::default());
        tracker.cancel();
        assert_eq!(tracker.state().status, JobStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_polling() {
        let tracker = tracker(
            Script::new(vec![Ok(StatusResponse::complete(1))]),
            PollPolicy::default(),
        );
        let mut rx = tracker.subscribe();
        let handle = tracker.start_generation(|| accepted("watched"));

        rx.wait_for(|state| state.status == JobStatus::Polling)
            .await
            .unwrap();
        rx.wait_for(|state| state.status == JobStatus::Complete)
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap().result, Some(1));
    }
}
