use super::*;
use crate::error::{JobError, StageError};
use crate::schedule::types::{
    AcquireParams, AcquireResult, TranscodeParams, TranscribeOptions, TranscribeParams,
    TranscribeResult, TranslateParams,
};
use crate::storage::job::{JobStore, SqliteJobStore};
use crate::utils::job_log::JobLog;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// A stage that reports a fixed list of percents and then returns a canned
/// outcome.
struct ScriptedStage {
    job_type: JobType,
    steps: Vec<i64>,
    delay: Duration,
    outcome: Result<JobResult, StageError>,
    runs: AtomicUsize,
    cleanups: AtomicUsize,
}

impl ScriptedStage {
    fn new(job_type: JobType, outcome: Result<JobResult, StageError>) -> Self {
        Self {
            job_type,
            steps: Vec::new(),
            delay: Duration::ZERO,
            outcome,
            runs: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        }
    }

    fn steps(mut self, steps: Vec<i64>, delay: Duration) -> Self {
        self.steps = steps;
        self.delay = delay;
        self
    }
}

#[async_trait]
impl StageProcessor for ScriptedStage {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn validate_params(&self, _params: &JobParams) -> Result<(), JobError> {
        Ok(())
    }

    async fn process(&self, _job: &Job, ctx: &StageContext) -> Result<JobResult, StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for step in &self.steps {
            ctx.check_cancelled()?;
            ctx.report_percent(*step);
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = ctx.cancelled() => return Err(StageError::cancelled()),
                }
            }
        }
        self.outcome.clone()
    }

    async fn cleanup(&self, _job: &Job) -> Result<(), StageError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn transcribed() -> Result<JobResult, StageError> {
    Ok(JobResult::Transcribe(TranscribeResult {
        subtitle_path: PathBuf::from("/media/out.srt"),
        segment_count: 3,
        duration_secs: 1.0,
        language: Some("en".to_string()),
    }))
}

fn transcribe_params(path: &str) -> JobParams {
    JobParams::Transcribe(TranscribeParams {
        input: PathBuf::from(path),
        options: TranscribeOptions::default(),
    })
}

fn acquire_params(chain: bool) -> JobParams {
    JobParams::Acquire(AcquireParams {
        source: "/media/incoming".to_string(),
        output_dir: None,
        chain,
        transcribe: TranscribeOptions {
            language: Some("en".to_string()),
            ..Default::default()
        },
    })
}

/// Holds back the Queued -> Running write, so a cancel can land after the
/// runner decided to start the job but before the row says so.
struct SlowStartStore {
    inner: SqliteJobStore,
    delay: Duration,
}

#[async_trait]
impl JobStore for SlowStartStore {
    async fn create(&self, params: JobParams) -> Result<Job, JobError> {
        self.inner.create(params).await
    }

    async fn create_child(&self, parent_id: &str, params: JobParams) -> Result<Option<Job>, JobError> {
        self.inner.create_child(parent_id, params).await
    }

    async fn get(&self, id: &str) -> Result<Job, JobError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Job>, JobError> {
        self.inner.list().await
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, JobError> {
        self.inner.list_by_status(statuses).await
    }

    async fn find_by_artifact(&self, path: &Path) -> Result<Option<Job>, JobError> {
        self.inner.find_by_artifact(path).await
    }

    async fn update_status_from(
        &self,
        id: &str,
        expected: &[JobStatus],
        update: JobUpdate,
    ) -> Result<(), JobError> {
        if expected == [JobStatus::Queued].as_slice() && update.status == JobStatus::Running {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.update_status_from(id, expected, update).await
    }

    async fn delete(&self, id: &str) -> Result<(), JobError> {
        self.inner.delete(id).await
    }

    async fn delete_by_status(&self, statuses: &[JobStatus]) -> Result<u64, JobError> {
        self.inner.delete_by_status(statuses).await
    }

    async fn count_by_status(&self) -> Result<JobStats, JobError> {
        self.inner.count_by_status().await
    }
}

async fn sqlite_store(dir: &TempDir, broadcaster: &ProgressBroadcaster) -> SqliteJobStore {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
    SqliteJobStore::new(&url, broadcaster.clone()).await.unwrap()
}

async fn setup(dir: &TempDir, stages: Vec<Arc<dyn StageProcessor>>) -> JobManager {
    let broadcaster = ProgressBroadcaster::new(1024);
    let store = sqlite_store(dir, &broadcaster).await;
    manager_with_store(dir, Arc::new(store), broadcaster, stages)
}

fn manager_with_store(
    dir: &TempDir,
    store: Arc<dyn JobStore>,
    broadcaster: ProgressBroadcaster,
    stages: Vec<Arc<dyn StageProcessor>>,
) -> JobManager {
    let mut processors = Processors::new();
    for stage in stages {
        processors.register(stage);
    }
    JobManager::new(
        store,
        processors,
        broadcaster,
        JobLog::new(dir.path().join("logs")),
        Duration::from_millis(500),
    )
}

async fn wait_for(manager: &JobManager, id: &str, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = manager.get(id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {} waiting for {}",
            id,
            job.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn drain(rx: &mut broadcast::Receiver<JobEvent>, id: &str) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.job_id() == id {
            events.push(event);
        }
    }
    events
}

fn updates(events: &[JobEvent]) -> Vec<(JobStatus, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::JobUpdate(u) => Some((u.status, u.progress)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_job_lifecycle_events() {
    let dir = TempDir::new().unwrap();
    let steps: Vec<i64> = (1..=19).map(|i| i * 5).collect();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed()).steps(steps.clone(), Duration::ZERO);
    let manager = setup(&dir, vec![Arc::new(stage)]).await;
    let mut rx = manager.subscribe();

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    manager.wait_idle().await;

    let events = drain(&mut rx, &job.id);
    assert!(matches!(&events[0], JobEvent::JobCreated(created) if created.id == job.id));

    let seen = updates(&events);
    let mut expected = vec![(JobStatus::Running, 0)];
    expected.extend(steps.iter().map(|p| (JobStatus::Running, *p as u8)));
    expected.push((JobStatus::Completed, 100));
    assert_eq!(seen, expected);

    let stored = manager.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(stored.result, transcribed().ok());
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn test_progress_is_clamped_and_never_regresses() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed())
        .steps(vec![-5, 40, 40, 20, 150], Duration::ZERO);
    let manager = setup(&dir, vec![Arc::new(stage)]).await;
    let mut rx = manager.subscribe();

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    manager.wait_idle().await;

    let progress: Vec<u8> = updates(&drain(&mut rx, &job.id)).into_iter().map(|(_, p)| p).collect();
    // repeats without a new message carry nothing and are not published
    assert_eq!(progress, vec![0, 40, 100, 100]);
}

#[tokio::test]
async fn test_acquire_chains_transcribe_children() {
    let dir = TempDir::new().unwrap();
    let artifacts = vec![PathBuf::from("/media/incoming/a.mp4"), PathBuf::from("/media/incoming/b.mkv")];
    let acquire = ScriptedStage::new(
        JobType::Acquire,
        Ok(JobResult::Acquire(AcquireResult {
            artifacts: artifacts.clone(),
        })),
    );
    let transcribe = ScriptedStage::new(JobType::Transcribe, transcribed());
    let manager = setup(&dir, vec![Arc::new(acquire), Arc::new(transcribe)]).await;

    let parent = manager.submit(acquire_params(true)).await.unwrap();
    manager.wait_idle().await;

    let jobs = manager.list(None).await.unwrap();
    assert_eq!(jobs.len(), 3);

    let mut children: Vec<Job> = jobs
        .into_iter()
        .filter(|j| j.parent_job_id.as_deref() == Some(parent.id.as_str()))
        .collect();
    children.sort_by(|a, b| a.artifact_path.cmp(&b.artifact_path));
    assert_eq!(children.len(), 2);
    for (child, artifact) in children.iter().zip(&artifacts) {
        assert_eq!(child.job_type, JobType::Transcribe);
        assert_eq!(child.status, JobStatus::Completed);
        assert_eq!(child.artifact_path.as_ref(), Some(artifact));
        match &child.parameters {
            JobParams::Transcribe(p) => {
                assert_eq!(&p.input, artifact);
                assert_eq!(p.options.language.as_deref(), Some("en"));
            }
            other => panic!("unexpected child parameters: {:?}", other),
        }
    }

    // children already exist, re-chaining creates nothing
    let created = manager.chain_children(&parent.id).await.unwrap();
    assert!(created.is_empty());
    manager.wait_idle().await;
    assert_eq!(manager.list(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_acquire_without_chain_creates_no_children() {
    let dir = TempDir::new().unwrap();
    let acquire = ScriptedStage::new(
        JobType::Acquire,
        Ok(JobResult::Acquire(AcquireResult {
            artifacts: vec![PathBuf::from("/media/incoming/a.mp4")],
        })),
    );
    let manager = setup(&dir, vec![Arc::new(acquire)]).await;

    let parent = manager.submit(acquire_params(false)).await.unwrap();
    manager.wait_idle().await;

    assert_eq!(wait_for(&manager, &parent.id, JobStatus::Completed).await.progress, 100);
    assert_eq!(manager.list(None).await.unwrap().len(), 1);

    // chaining only applies to completed acquire jobs
    let transcribe_job = manager.store().create(transcribe_params("/media/x.mp4")).await.unwrap();
    let err = manager.chain_children(&transcribe_job.id).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState { action: "chain", .. }));
}

#[tokio::test]
async fn test_stage_failure_is_recorded() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(
        JobType::Transcribe,
        Err(StageError::process("ffmpeg exited with status 1")),
    )
    .steps(vec![30], Duration::ZERO);
    let manager = setup(&dir, vec![Arc::new(stage)]).await;

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    manager.wait_idle().await;

    let failed = manager.get(&job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 30);
    assert!(failed.result.is_none());
    assert!(failed.error.unwrap().contains("ffmpeg exited with status 1"));

    let log = manager.logs(&job.id).await.unwrap();
    assert!(log.contains("started"));
    assert!(log.contains("failed"));
}

#[tokio::test]
async fn test_submit_rejects_unregistered_type() {
    let dir = TempDir::new().unwrap();
    let manager = setup(&dir, vec![]).await;

    let err = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap_err();
    assert!(matches!(err, JobError::NoProcessor(JobType::Transcribe)));
    assert!(manager.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_queued_job_never_runs() {
    let dir = TempDir::new().unwrap();
    let stage = Arc::new(ScriptedStage::new(JobType::Transcribe, transcribed()));
    let manager = setup(&dir, vec![stage.clone() as Arc<dyn StageProcessor>]).await;
    let mut rx = manager.subscribe();

    // stored but not dispatched, as after a restart of the service
    let job = manager.store().create(transcribe_params("/media/a.mp4")).await.unwrap();

    let cancelled = manager.cancel(&job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    assert_eq!(manager.resume_queued().await.unwrap(), 0);
    manager.wait_idle().await;

    let seen = updates(&drain(&mut rx, &job.id));
    assert_eq!(seen, vec![(JobStatus::Cancelled, 0)]);
    assert_eq!(manager.get(&job.id).await.unwrap().status, JobStatus::Cancelled);
    // no work happened, nothing to clean up
    assert_eq!(stage.cleanups.load(Ordering::SeqCst), 0);

    let err = manager.cancel(&job.id).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState { action: "cancel", .. }));
}

#[tokio::test]
async fn test_cancel_dispatched_queued_job_never_runs() {
    let dir = TempDir::new().unwrap();
    let broadcaster = ProgressBroadcaster::new(1024);
    let store = SlowStartStore {
        inner: sqlite_store(&dir, &broadcaster).await,
        delay: Duration::from_millis(200),
    };
    let stage = Arc::new(ScriptedStage::new(JobType::Transcribe, transcribed()));
    let manager = manager_with_store(
        &dir,
        Arc::new(store),
        broadcaster,
        vec![stage.clone() as Arc<dyn StageProcessor>],
    );
    let mut rx = manager.subscribe();

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    // the runner is now holding its start write
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get(&job.id).await.unwrap().status, JobStatus::Queued);

    let cancelled = manager.cancel(&job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    manager.wait_idle().await;

    assert_eq!(updates(&drain(&mut rx, &job.id)), vec![(JobStatus::Cancelled, 0)]);
    assert_eq!(manager.get(&job.id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(stage.runs.load(Ordering::SeqCst), 0);
    assert_eq!(stage.cleanups.load(Ordering::SeqCst), 0);
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_cancel_running_job_runs_cleanup() {
    let dir = TempDir::new().unwrap();
    let stage = Arc::new(
        ScriptedStage::new(JobType::Transcribe, transcribed())
            .steps(vec![10, 20, 30], Duration::from_secs(30)),
    );
    let manager = setup(&dir, vec![stage.clone() as Arc<dyn StageProcessor>]).await;

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    wait_for(&manager, &job.id, JobStatus::Running).await;

    let cancelled = manager.cancel(&job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    manager.wait_idle().await;

    let stored = manager.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.result.is_none());
    assert_eq!(stage.cleanups.load(Ordering::SeqCst), 1);
    assert!(manager.registry().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_terminates_running_process() {
    use crate::schedule::processors::transcode::TranscodeProcessor;
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("clip.mkv");
    std::fs::write(&input, b"video").unwrap();

    let write_script = |name: &str, body: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    };
    let ffprobe = write_script("ffprobe", "echo 10.000000\n");
    let ffmpeg = write_script(
        "ffmpeg",
        "for last; do :; done\nprintf partial > \"$last\"\necho out_time_ms=1000000\nexec sleep 30\n",
    );

    let manager = setup(&dir, vec![Arc::new(TranscodeProcessor::new(ffmpeg, ffprobe))]).await;
    let job = manager
        .submit(JobParams::Transcode(TranscodeParams {
            input,
            output: None,
        }))
        .await
        .unwrap();

    let partial = dir.path().join("clip.part.mp4");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let pid = loop {
        if let Some(handle) = manager.registry().process(&job.id) {
            if partial.exists() {
                break handle.pid;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "ffmpeg never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let cancelled = manager.cancel(&job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    manager.wait_idle().await;

    assert!(!partial.exists());
    assert!(!dir.path().join("clip.mp4").exists());
    // Safety: signal 0 only probes for existence.
    let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
    assert!(!alive, "ffmpeg pid {} survived cancellation", pid);
    assert_eq!(manager.get(&job.id).await.unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_races_completion() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed())
        .steps(vec![25, 50, 75], Duration::from_millis(2));
    let manager = setup(&dir, vec![Arc::new(stage)]).await;

    for i in 0..20u64 {
        let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(i % 8)).await;
        let cancel = manager.cancel(&job.id).await;
        manager.wait_idle().await;

        let stored = manager.get(&job.id).await.unwrap();
        match cancel {
            Ok(_) => {
                assert_eq!(stored.status, JobStatus::Cancelled);
                assert!(stored.result.is_none());
            }
            Err(JobError::InvalidState { .. }) => {
                assert_eq!(stored.status, JobStatus::Completed);
                assert_eq!(stored.progress, 100);
            }
            Err(e) => panic!("unexpected cancel error: {}", e),
        }
    }
}

#[tokio::test]
async fn test_restart_copies_parameters() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed());
    let manager = setup(&dir, vec![Arc::new(stage)]).await;

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    manager.wait_idle().await;

    let restarted = manager.restart(&job.id).await.unwrap();
    assert_ne!(restarted.id, job.id);
    assert_eq!(restarted.parameters, job.parameters);
    assert_eq!(restarted.parent_job_id, None);
    manager.wait_idle().await;
    assert_eq!(manager.get(&restarted.id).await.unwrap().status, JobStatus::Completed);

    // queued jobs are not restartable
    let queued = manager.store().create(transcribe_params("/media/b.mp4")).await.unwrap();
    let err = manager.restart(&queued.id).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState { action: "restart", .. }));

    assert!(matches!(
        manager.restart("job-missing").await.unwrap_err(),
        JobError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_delete_job() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed());
    let manager = setup(&dir, vec![Arc::new(stage)]).await;
    let mut rx = manager.subscribe();

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    manager.wait_idle().await;
    assert!(manager.logs(&job.id).await.is_ok());

    manager.delete(&job.id).await.unwrap();
    assert!(matches!(manager.get(&job.id).await.unwrap_err(), JobError::NotFound(_)));
    assert!(matches!(manager.logs(&job.id).await.unwrap_err(), JobError::NotFound(_)));
    assert!(drain(&mut rx, &job.id)
        .iter()
        .any(|e| matches!(e, JobEvent::JobDeleted { .. })));

    assert!(matches!(manager.delete(&job.id).await.unwrap_err(), JobError::NotFound(_)));
}

#[tokio::test]
async fn test_clear_finished_jobs() {
    let dir = TempDir::new().unwrap();
    let ok = ScriptedStage::new(JobType::Transcribe, transcribed());
    let bad = ScriptedStage::new(JobType::Translate, Err(StageError::backend("translator offline")));
    let manager = setup(&dir, vec![Arc::new(ok), Arc::new(bad)]).await;

    manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    manager
        .submit(JobParams::Translate(TranslateParams {
            input: PathBuf::from("/media/a.srt"),
            target_lang: "fr".to_string(),
            source_lang: "en".to_string(),
        }))
        .await
        .unwrap();
    manager.wait_idle().await;
    let queued = manager.store().create(transcribe_params("/media/b.mp4")).await.unwrap();
    let cancelled = manager.store().create(transcribe_params("/media/c.mp4")).await.unwrap();
    manager.cancel(&cancelled.id).await.unwrap();

    let stats = manager.stats().await.unwrap();
    assert_eq!(
        (stats.queued, stats.completed, stats.failed, stats.cancelled),
        (1, 1, 1, 1)
    );

    let err = manager.clear(Some(&[JobStatus::Running])).await.unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    assert_eq!(manager.clear(None).await.unwrap(), 2);
    let left: Vec<String> = manager.list(None).await.unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(left, vec![cancelled.id.clone(), queued.id.clone()]);

    assert_eq!(manager.clear(Some(&[JobStatus::Cancelled])).await.unwrap(), 1);
    assert_eq!(manager.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resume_queued_jobs() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed());
    let manager = setup(&dir, vec![Arc::new(stage)]).await;

    let first = manager.store().create(transcribe_params("/media/a.mp4")).await.unwrap();
    let second = manager.store().create(transcribe_params("/media/b.mp4")).await.unwrap();

    assert_eq!(manager.resume_queued().await.unwrap(), 2);
    manager.wait_idle().await;

    for id in [&first.id, &second.id] {
        assert_eq!(manager.get(id).await.unwrap().status, JobStatus::Completed);
    }
    assert_eq!(manager.resume_queued().await.unwrap(), 0);
}

#[tokio::test]
async fn test_job_log_records_progress() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed()).steps(vec![50], Duration::ZERO);
    let manager = setup(&dir, vec![Arc::new(stage)]).await;

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    manager.wait_idle().await;

    let log = manager.logs(&job.id).await.unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert!(lines[0].contains("started transcribe job"));
    assert!(lines.iter().any(|l| l.contains("50%")));
    assert!(lines.last().unwrap().contains("completed"));
}

#[tokio::test]
async fn test_shutdown_cancels_running_jobs() {
    let dir = TempDir::new().unwrap();
    let stage = ScriptedStage::new(JobType::Transcribe, transcribed())
        .steps(vec![10], Duration::from_secs(30));
    let manager = setup(&dir, vec![Arc::new(stage)]).await;

    let job = manager.submit(transcribe_params("/media/a.mp4")).await.unwrap();
    wait_for(&manager, &job.id, JobStatus::Running).await;

    manager.shutdown(Duration::from_secs(5)).await;
    assert_eq!(manager.get(&job.id).await.unwrap().status, JobStatus::Cancelled);

    // closed runners do not pick up new work
    let late = manager.submit(transcribe_params("/media/b.mp4")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get(&late.id).await.unwrap().status, JobStatus::Queued);
}
