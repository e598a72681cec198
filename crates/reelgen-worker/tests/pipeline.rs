//! End-to-end pipeline behaviour against in-memory stores and scripted stages.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::assert_ok;

use reelgen_models::{Checkpoint, Job, JobId, JobStatus, ProgressStatus, Stage};
use reelgen_queue::{
    CheckpointStore, Delivery, GenerateVideoJob, JobLease, MemoryStateStore, ProgressStore,
    StateStore,
};
use reelgen_worker::{
    AttemptOutcome, DriverOutcome, JobLogger, JobStore, PipelineDriver, RetryCoordinator,
    RetryPolicy, StageError, StageExecutor, StageRegistry, StageResult, StatusReader,
};

const OWNER: &str = "user-1";
const PROMPT: &str = "a lighthouse at dawn, slow pan";

/// Job records keyed by id.
#[derive(Default)]
struct FakeJobs {
    jobs: Mutex<HashMap<JobId, Job>>,
    failures: Mutex<Vec<String>>,
}

impl FakeJobs {
    fn with_job(job: Job) -> Arc<Self> {
        let jobs = Self::default();
        jobs.jobs.lock().unwrap().insert(job.id.clone(), job);
        Arc::new(jobs)
    }

    fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(job_id).map(|job| job.status)
    }

    fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for FakeJobs {
    async fn get_job(&self, job_id: &JobId) -> StageResult<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn load_captions(&self, _job_id: &JobId) -> StageResult<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn complete(&self, job_id: &JobId, video_url: &str) -> StageResult<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.complete(video_url).map_err(|e| StageError::failed(e.to_string()))?;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> StageResult<()> {
        self.failures.lock().unwrap().push(error.to_string());
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.fail(error).map_err(|e| StageError::failed(e.to_string()))?;
        }
        Ok(())
    }
}

/// Stage that fails with queued messages before succeeding, logging each run.
struct ScriptedStage {
    stage: Stage,
    failures: Mutex<VecDeque<String>>,
    calls: Arc<Mutex<Vec<Stage>>>,
    jobs: Arc<FakeJobs>,
    checkpoints: CheckpointStore,
    /// Another stage a concurrent attempt finishes while this one runs.
    concurrent: Option<Stage>,
}

#[async_trait]
impl StageExecutor for ScriptedStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn run(&self, job_id: &JobId) -> StageResult<()> {
        self.calls.lock().unwrap().push(self.stage);
        if let Some(message) = self.failures.lock().unwrap().pop_front() {
            return Err(StageError::failed(message));
        }
        if let Some(other) = self.concurrent {
            self.checkpoints.mark_completed(job_id, OWNER, other).await;
        }
        if self.stage == Stage::Render {
            self.jobs
                .complete(job_id, &format!("https://cdn.example.com/{}.mp4", job_id))
                .await?;
        }
        Ok(())
    }
}

struct Harness {
    job: Job,
    backend: Arc<MemoryStateStore>,
    checkpoints: CheckpointStore,
    progress: ProgressStore,
    jobs: Arc<FakeJobs>,
    calls: Arc<Mutex<Vec<Stage>>>,
    driver: PipelineDriver,
    coordinator: RetryCoordinator,
}

impl Harness {
    /// `failures` lists error messages each stage returns, in order, before
    /// it starts succeeding.
    fn new(failures: Vec<(Stage, Vec<&str>)>) -> Self {
        Self::build(failures, Duration::ZERO, None)
    }

    /// `retry_step` is the delay per previous attempt. `concurrent` makes
    /// the first stage of the pair also finish the second while it runs.
    fn build(
        failures: Vec<(Stage, Vec<&str>)>,
        retry_step: Duration,
        concurrent: Option<(Stage, Stage)>,
    ) -> Self {
        let job = Job::new(OWNER, PROMPT).unwrap();
        let backend = Arc::new(MemoryStateStore::new());
        let store: Arc<dyn StateStore> = backend.clone();
        let checkpoints = CheckpointStore::new(Arc::clone(&store));
        let progress = ProgressStore::new(Arc::clone(&store));
        let jobs = FakeJobs::with_job(job.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut scripted: HashMap<Stage, Vec<&str>> = failures.into_iter().collect();
        let executors = Stage::ALL.iter().map(|stage| {
            let queued = scripted.remove(stage).unwrap_or_default();
            Arc::new(ScriptedStage {
                stage: *stage,
                failures: Mutex::new(queued.into_iter().map(String::from).collect()),
                calls: Arc::clone(&calls),
                jobs: Arc::clone(&jobs),
                checkpoints: checkpoints.clone(),
                concurrent: concurrent
                    .filter(|(running, _)| running == stage)
                    .map(|(_, other)| other),
            }) as Arc<dyn StageExecutor>
        });
        let registry = Arc::new(StageRegistry::new(executors).unwrap());

        let driver = PipelineDriver::new(registry, checkpoints.clone(), progress.clone());
        let coordinator = RetryCoordinator::new(
            driver.clone(),
            checkpoints.clone(),
            progress.clone(),
            jobs.clone(),
            JobLease::new(store, Duration::from_secs(60)),
            RetryPolicy::new(3).with_step(retry_step),
        );

        Self {
            job,
            backend,
            checkpoints,
            progress,
            jobs,
            calls,
            driver,
            coordinator,
        }
    }

    fn delivery(&self, attempts_made: u32) -> Delivery {
        Delivery {
            message_id: "1700000000000-0".to_string(),
            job: GenerateVideoJob::from(&self.job),
            attempts_made,
        }
    }

    fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn status_reader(&self) -> StatusReader {
        StatusReader::new(self.progress.clone(), self.checkpoints.clone(), self.jobs.clone())
    }
}

#[tokio::test]
async fn test_resume_runs_only_remaining_stages() {
    let h = Harness::new(vec![]);
    h.checkpoints.mark_completed(&h.job.id, OWNER, Stage::Script).await;
    h.checkpoints.mark_completed(&h.job.id, OWNER, Stage::Images).await;

    let logger = JobLogger::new(&h.job.id, 2);
    let outcome = assert_ok!(h.driver.run(&h.job.id, OWNER, &logger).await);

    assert_eq!(outcome, DriverOutcome::Completed);
    assert_eq!(h.calls(), vec![Stage::Audio, Stage::Captions, Stage::Render]);
    assert!(h.checkpoints.get(&h.job.id).await.is_none());
    assert_eq!(
        h.progress.read(&h.job.id).await.unwrap().status,
        ProgressStatus::Completed
    );
}

#[tokio::test]
async fn test_driver_with_finished_checkpoint_runs_nothing() {
    let h = Harness::new(vec![]);
    for stage in Stage::ALL {
        h.checkpoints.mark_completed(&h.job.id, OWNER, stage).await;
    }

    let logger = JobLogger::new(&h.job.id, 1);
    let outcome = h.driver.run(&h.job.id, OWNER, &logger).await.unwrap();

    assert_eq!(outcome, DriverOutcome::AlreadyComplete);
    assert!(h.calls().is_empty());
    assert!(h.checkpoints.get(&h.job.id).await.is_none());
}

#[tokio::test]
async fn test_stage_finished_elsewhere_mid_run_is_skipped() {
    let h = Harness::build(vec![], Duration::ZERO, Some((Stage::Images, Stage::Audio)));

    let logger = JobLogger::new(&h.job.id, 1);
    let outcome = assert_ok!(h.driver.run(&h.job.id, OWNER, &logger).await);

    assert_eq!(outcome, DriverOutcome::Completed);
    assert_eq!(
        h.calls(),
        vec![Stage::Script, Stage::Images, Stage::Captions, Stage::Render]
    );
}

#[tokio::test]
async fn test_audio_failure_then_resume_completes() {
    let h = Harness::new(vec![(Stage::Audio, vec!["connect ETIMEDOUT 10.0.0.7:443"])]);

    let failure = h.coordinator.run_attempt(&h.delivery(0)).await.unwrap_err();
    assert_eq!(failure.stage, Stage::Audio);
    assert_eq!(failure.attempt, 1);
    assert!(failure.will_retry);
    assert_eq!(h.calls(), vec![Stage::Script, Stage::Images, Stage::Audio]);

    let checkpoint = h.checkpoints.get(&h.job.id).await.unwrap();
    assert!(checkpoint.is_completed(Stage::Script));
    assert!(checkpoint.is_completed(Stage::Images));
    assert!(!checkpoint.is_completed(Stage::Audio));
    assert_eq!(checkpoint.last_failed_step, Some(Stage::Audio));

    let record = h.progress.read(&h.job.id).await.unwrap();
    assert_eq!(record.status, ProgressStatus::Error);
    assert_eq!(record.current_step_id, Some(Stage::Audio));
    assert_eq!(record.retry_count, Some(1));
    assert_eq!(record.max_retries, Some(2));
    assert!(!record.last_error.unwrap().contains("10.0.0.7"));

    h.clear_calls();
    let outcome = assert_ok!(h.coordinator.run_attempt(&h.delivery(1)).await);

    assert_eq!(outcome, AttemptOutcome::Completed);
    assert_eq!(h.calls(), vec![Stage::Audio, Stage::Captions, Stage::Render]);
    assert!(h.checkpoints.get(&h.job.id).await.is_none());
    assert_eq!(h.jobs.status(&h.job.id), Some(JobStatus::Complete));
    assert!(h.jobs.failures().is_empty());
}

#[tokio::test]
async fn test_retrying_record_visible_during_delay() {
    let h = Harness::build(
        vec![(Stage::Audio, vec!["connect ETIMEDOUT 10.0.0.7:443"])],
        Duration::from_millis(300),
        None,
    );
    h.coordinator.run_attempt(&h.delivery(0)).await.unwrap_err();

    let delivery = h.delivery(1);
    let (outcome, (record, view)) = tokio::join!(h.coordinator.run_attempt(&delivery), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = h.progress.read(&h.job.id).await;
        let view = h.status_reader().get_status(&h.job.id, OWNER).await;
        (record, view)
    });

    let record = record.unwrap();
    assert_eq!(record.status, ProgressStatus::Retrying);
    assert_eq!(record.current_step_id, Some(Stage::Audio));
    assert_eq!(record.retry_count, Some(1));
    assert_eq!(record.max_retries, Some(2));

    let view = view.unwrap().unwrap();
    assert_eq!(view.status, "retrying");
    assert_eq!(view.retry_count, Some(1));

    assert_eq!(outcome.unwrap(), AttemptOutcome::Completed);
    assert_eq!(h.jobs.status(&h.job.id), Some(JobStatus::Complete));
}

#[tokio::test]
async fn test_retry_ceiling_marks_job_failed_once() {
    let transient = "503 Service Unavailable";
    let h = Harness::new(vec![(Stage::Script, vec![transient, transient, transient])]);

    for attempts_made in 0..2 {
        let failure = h
            .coordinator
            .run_attempt(&h.delivery(attempts_made))
            .await
            .unwrap_err();
        assert!(failure.will_retry, "attempt {} should retry", failure.attempt);
        assert!(h.jobs.failures().is_empty());
    }

    let failure = h.coordinator.run_attempt(&h.delivery(2)).await.unwrap_err();
    assert_eq!(failure.attempt, 3);
    assert!(!failure.will_retry);

    let record = h.progress.read(&h.job.id).await.unwrap();
    assert!(record.is_terminal());
    assert!(record.retry_count.is_none());
    assert_eq!(h.jobs.failures().len(), 1);
    assert_eq!(h.jobs.status(&h.job.id), Some(JobStatus::Failed));
    assert_eq!(h.calls(), vec![Stage::Script; 3]);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let h = Harness::new(vec![(Stage::Images, vec!["Invalid prompt: too short."])]);

    let failure = h.coordinator.run_attempt(&h.delivery(0)).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Images);
    assert!(!failure.will_retry);
    assert_eq!(h.jobs.failures().len(), 1);
    assert_eq!(h.jobs.status(&h.job.id), Some(JobStatus::Failed));
    assert!(h.progress.read(&h.job.id).await.unwrap().is_terminal());
}

#[tokio::test]
async fn test_terminal_job_is_skipped() {
    let h = Harness::new(vec![]);
    h.jobs
        .complete(&h.job.id, "https://cdn.example.com/done.mp4")
        .await
        .unwrap();

    let outcome = h.coordinator.run_attempt(&h.delivery(0)).await.unwrap();

    assert_eq!(outcome, AttemptOutcome::AlreadyTerminal(JobStatus::Complete));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_held_lease_defers_delivery() {
    let h = Harness::new(vec![]);
    h.backend
        .set_ex(&JobLease::key(&h.job.id), "other-worker", Duration::from_secs(60))
        .await
        .unwrap();

    let outcome = h.coordinator.run_attempt(&h.delivery(0)).await.unwrap();

    assert_eq!(outcome, AttemptOutcome::Deferred);
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_store_outage_does_not_block_pipeline() {
    let h = Harness::new(vec![]);
    h.backend.set_offline(true);

    let outcome = h.coordinator.run_attempt(&h.delivery(0)).await.unwrap();

    assert_eq!(outcome, AttemptOutcome::Completed);
    assert_eq!(h.calls(), Stage::ALL.to_vec());
    assert_eq!(h.jobs.status(&h.job.id), Some(JobStatus::Complete));
}

#[tokio::test]
async fn test_lease_released_after_attempt() {
    let h = Harness::new(vec![(Stage::Captions, vec!["socket hang up"])]);

    h.coordinator.run_attempt(&h.delivery(0)).await.unwrap_err();

    assert!(h.backend.get(&JobLease::key(&h.job.id)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_prefers_live_progress() {
    let h = Harness::new(vec![(Stage::Audio, vec!["connection reset by peer"])]);
    h.coordinator.run_attempt(&h.delivery(0)).await.unwrap_err();

    let view = h
        .status_reader()
        .get_status(&h.job.id, OWNER)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, "error");
    assert_eq!(view.current_step_id, Some(Stage::Audio));
    assert_eq!(view.retry_count, Some(1));
    assert_eq!(view.completed_steps.get(&Stage::Images), Some(&true));
    assert_eq!(view.completed_steps.get(&Stage::Audio), Some(&false));
}

#[tokio::test]
async fn test_status_falls_back_to_job_record() {
    let h = Harness::new(vec![]);
    h.coordinator.run_attempt(&h.delivery(0)).await.unwrap();
    h.progress.clear(&h.job.id).await;

    let view = h
        .status_reader()
        .get_status(&h.job.id, OWNER)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, "complete");
    assert!(view.video_url.unwrap().ends_with(".mp4"));
    assert!(view.completed_steps.values().all(|done| *done));
}

#[tokio::test]
async fn test_status_hidden_from_other_owners() {
    let h = Harness::new(vec![]);
    let reader = h.status_reader();

    assert!(reader.get_status(&h.job.id, "someone-else").await.unwrap().is_none());

    h.coordinator.run_attempt(&h.delivery(0)).await.unwrap();
    assert!(reader.get_status(&h.job.id, "someone-else").await.unwrap().is_none());
    assert!(reader
        .get_status(&JobId::from_string("missing"), OWNER)
        .await
        .unwrap()
        .is_none());
}

#[test]
fn test_fresh_checkpoint_resumes_at_script() {
    let checkpoint = Checkpoint::new(JobId::from_string("job-1"), OWNER);
    assert_eq!(checkpoint.next_stage().stage(), Some(Stage::Script));
}
