use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::pipeline::PipelineCoordinator;
use super::registry::{JobSlot, ProcessRegistry};
use super::Processors;
use crate::error::JobError;
use crate::schedule::processors::StageContext;
use crate::schedule::types::{Job, JobResult, JobStatus, JobType, JobUpdate, ProgressUpdate};
use crate::storage::job::JobStore;
use crate::utils::job_log::JobLog;

/// Drives a job through `Queued -> Running -> Completed | Failed`, one tokio
/// task per job.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: ProcessRegistry,
    processors: Arc<Processors>,
    coordinator: PipelineCoordinator,
    job_log: JobLog,
    tracker: TaskTracker,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: ProcessRegistry,
        processors: Arc<Processors>,
        job_log: JobLog,
    ) -> Self {
        Self {
            coordinator: PipelineCoordinator::new(store.clone()),
            store,
            registry,
            processors,
            job_log,
            tracker: TaskTracker::new(),
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Start a runner task for a Queued job. Returns false if the job already
    /// has one or the runner is shutting down.
    pub fn dispatch(self: &Arc<Self>, job_id: &str) -> bool {
        if self.tracker.is_closed() {
            warn!(job_id, "Not dispatching job, runner is shutting down");
            return false;
        }
        let Some(slot) = self.registry.open(job_id) else {
            debug!(job_id, "Job already has a runner");
            return false;
        };

        let stopped = slot.stop_guard();
        let runner = self.clone();
        let job_id = job_id.to_string();
        self.tracker.spawn(async move {
            runner.run(&job_id, &slot).await;
            runner.registry.close(&job_id);
            drop(stopped);
        });
        true
    }

    async fn run(self: &Arc<Self>, id: &str, slot: &JobSlot) {
        let job = match self.store.get(id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %id, "Dispatched job could not be loaded: {}", e);
                return;
            }
        };

        if job.status != JobStatus::Queued || slot.is_cancelling() {
            info!(job_id = %id, status = %job.status, "Job is no longer queued, skipping");
            return;
        }

        match self
            .store
            .update_status_from(id, &[JobStatus::Queued], JobUpdate::running(0, Some("Started".to_string())))
            .await
        {
            Ok(()) => {}
            Err(JobError::Concurrency { status, .. }) => {
                info!(job_id = %id, %status, "Job left the queue before it started");
                return;
            }
            Err(e) => {
                error!(job_id = %id, "Failed to start job: {}", e);
                return;
            }
        }
        info!(job_id = %id, job_type = %job.job_type, "Job started");
        self.job_log.append(id, &format!("started {} job", job.job_type)).await;

        let (outcome, last_percent) = self.execute(&job, slot).await;

        if !slot.claim_finish() {
            info!(job_id = %id, "Job was cancelled, discarding its outcome");
            self.job_log.append(id, "cancelled").await;
            return;
        }

        match outcome {
            Ok(result) => {
                if let Err(e) = self.store.update_status(id, JobUpdate::completed(result)).await {
                    error!(job_id = %id, "Failed to record completion: {}", e);
                    return;
                }
                info!(job_id = %id, "Job completed");
                self.job_log.append(id, "completed").await;

                if job.job_type == JobType::Acquire {
                    match self.store.get(id).await {
                        Ok(completed) => {
                            if let Err(e) = self.chain_children(&completed).await {
                                error!(job_id = %id, "Failed to chain children: {}", e);
                            }
                        }
                        Err(e) => error!(job_id = %id, "Failed to reload completed job: {}", e),
                    }
                }
            }
            Err(message) => {
                warn!(job_id = %id, "Job failed: {}", message);
                self.job_log.append(id, &format!("failed: {}", message)).await;
                if let Err(e) = self
                    .store
                    .update_status(id, JobUpdate::failed(last_percent, message))
                    .await
                {
                    error!(job_id = %id, "Failed to record failure: {}", e);
                }
            }
        }
    }

    /// Run the job's stage on its own task while forwarding its progress.
    /// Returns the outcome and the last forwarded percent.
    async fn execute(&self, job: &Job, slot: &JobSlot) -> (Result<JobResult, String>, u8) {
        let Some(processor) = self.processors.get(&job.job_type).cloned() else {
            return (Err(JobError::NoProcessor(job.job_type).to_string()), 0);
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = StageContext::new(job.id.clone(), tx, slot.token().clone(), self.registry.clone());
        let stage_job = job.clone();
        let mut stage = tokio::spawn(async move { processor.process(&stage_job, &ctx).await });

        let mut last_percent = 0u8;
        let joined = loop {
            tokio::select! {
                Some(update) = rx.recv() => self.forward(&job.id, slot, &mut last_percent, update).await,
                joined = &mut stage => break joined,
            }
        };
        // the stage task is gone, everything it reported is already queued
        while let Ok(update) = rx.try_recv() {
            self.forward(&job.id, slot, &mut last_percent, update).await;
        }

        let outcome = match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err("stage panicked".to_string()),
            Err(e) => Err(format!("stage aborted: {}", e)),
        };
        (outcome, last_percent)
    }

    async fn forward(&self, id: &str, slot: &JobSlot, last_percent: &mut u8, update: ProgressUpdate) {
        if slot.is_cancelling() {
            return;
        }

        let percent = update.percent.clamp(0, 100) as u8;
        if percent < *last_percent {
            debug!(job_id = %id, percent, last = *last_percent, "Dropping regressing progress report");
            return;
        }
        if percent == *last_percent && update.message.is_none() {
            return;
        }
        *last_percent = percent;

        match &update.message {
            Some(message) => self.job_log.append(id, &format!("{}% {}", percent, message)).await,
            None => self.job_log.append(id, &format!("{}%", percent)).await,
        }

        match self
            .store
            .update_status_from(id, &[JobStatus::Running], JobUpdate::running(percent, update.message))
            .await
        {
            Ok(()) => {}
            Err(JobError::Concurrency { status, .. }) => {
                debug!(job_id = %id, %status, "Progress after terminal status ignored");
            }
            Err(e) => error!(job_id = %id, "Failed to record progress: {}", e),
        }
    }

    /// Create and dispatch the children of a completed Acquire job.
    pub async fn chain_children(self: &Arc<Self>, job: &Job) -> Result<Vec<Job>, JobError> {
        let children = self.coordinator.on_acquire_completed(job).await?;
        for child in &children {
            self.job_log
                .append(&job.id, &format!("created child {} for {:?}", child.id, child.artifact_path))
                .await;
            self.dispatch(&child.id);
        }
        Ok(children)
    }
}
