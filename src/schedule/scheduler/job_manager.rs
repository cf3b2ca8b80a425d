use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::cancel::CancellationManager;
use super::registry::ProcessRegistry;
use super::runner::JobRunner;
use super::Processors;
use crate::error::JobError;
use crate::schedule::callback::{JobEvent, ProgressBroadcaster};
use crate::schedule::types::{Job, JobParams, JobStats, JobStatus, JobType};
use crate::storage::job::JobStore;
use crate::utils::job_log::JobLog;

/// Statuses removed by `clear` when none are given.
pub const DEFAULT_CLEAR_STATUSES: [JobStatus; 2] = [JobStatus::Completed, JobStatus::Failed];

/// The control surface: submission, queries and operator actions on jobs.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    processors: Arc<Processors>,
    registry: ProcessRegistry,
    broadcaster: ProgressBroadcaster,
    runner: Arc<JobRunner>,
    cancellation: CancellationManager,
    job_log: JobLog,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        processors: Processors,
        broadcaster: ProgressBroadcaster,
        job_log: JobLog,
        kill_grace: Duration,
    ) -> Self {
        let processors = Arc::new(processors);
        let registry = ProcessRegistry::new();
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            registry.clone(),
            processors.clone(),
            job_log.clone(),
        ));
        let cancellation =
            CancellationManager::new(store.clone(), registry.clone(), processors.clone(), kill_grace);

        Self {
            store,
            processors,
            registry,
            broadcaster,
            runner,
            cancellation,
            job_log,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Validate and store a new job, then start it.
    pub async fn submit(&self, params: JobParams) -> Result<Job, JobError> {
        let job_type = params.job_type();
        let processor = self
            .processors
            .get(&job_type)
            .ok_or(JobError::NoProcessor(job_type))?;
        processor.validate_params(&params)?;

        let job = self.store.create(params).await?;
        info!(job_id = %job.id, %job_type, "Created new job");
        self.runner.dispatch(&job.id);
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        self.store.get(id).await
    }

    pub async fn list(&self, statuses: Option<&[JobStatus]>) -> Result<Vec<Job>, JobError> {
        match statuses {
            Some(statuses) if !statuses.is_empty() => self.store.list_by_status(statuses).await,
            _ => self.store.list().await,
        }
    }

    pub async fn cancel(&self, id: &str) -> Result<Job, JobError> {
        self.cancellation.cancel(id).await
    }

    /// Submit a copy of a finished job's parameters as a new job.
    pub async fn restart(&self, id: &str) -> Result<Job, JobError> {
        let job = self.store.get(id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::InvalidState {
                id: job.id,
                status: job.status,
                action: "restart",
            });
        }

        let restarted = self.submit(job.parameters).await?;
        info!(job_id = %id, new_job_id = %restarted.id, "Restarted job");
        Ok(restarted)
    }

    /// Delete a job, cancelling it first if it has not finished.
    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        let job = self.store.get(id).await?;
        if job.status.is_cancellable() {
            match self.cancellation.cancel(id).await {
                Ok(_) | Err(JobError::InvalidState { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.store.delete(id).await?;
        self.job_log.remove(id).await;
        info!(job_id = %id, "Deleted job");
        Ok(())
    }

    /// Delete every job in one of `statuses` (default: completed and failed).
    pub async fn clear(&self, statuses: Option<&[JobStatus]>) -> Result<u64, JobError> {
        let statuses = match statuses {
            Some(statuses) if !statuses.is_empty() => statuses,
            _ => &DEFAULT_CLEAR_STATUSES[..],
        };
        if let Some(status) = statuses.iter().find(|s| !s.is_terminal()) {
            return Err(JobError::Validation(format!("cannot clear {} jobs", status)));
        }

        let doomed = self.store.list_by_status(statuses).await?;
        let deleted = self.store.delete_by_status(statuses).await?;
        for job in &doomed {
            self.job_log.remove(&job.id).await;
        }

        info!(deleted, "Cleared jobs with status {:?}", statuses);
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<JobStats, JobError> {
        self.store.count_by_status().await
    }

    pub async fn logs(&self, id: &str) -> Result<String, JobError> {
        self.store.get(id).await?;
        match self.job_log.read(id).await {
            Ok(Some(content)) => Ok(content),
            Ok(None) => Err(JobError::NotFound(format!("log for job {}", id))),
            Err(e) => {
                warn!(job_id = %id, "Failed to read job log: {}", e);
                Err(JobError::NotFound(format!("log for job {}", id)))
            }
        }
    }

    /// Re-run completion handling for a completed Acquire job. Only missing
    /// children are created; the new ones are returned.
    pub async fn chain_children(&self, id: &str) -> Result<Vec<Job>, JobError> {
        let job = self.store.get(id).await?;
        if job.job_type != JobType::Acquire || job.status != JobStatus::Completed {
            return Err(JobError::InvalidState {
                id: job.id,
                status: job.status,
                action: "chain",
            });
        }
        self.runner.chain_children(&job).await
    }

    /// Dispatch every job left Queued by a previous run, oldest first.
    pub async fn resume_queued(&self) -> Result<usize, JobError> {
        let mut queued = self.store.list_by_status(&[JobStatus::Queued]).await?;
        queued.reverse();

        let mut dispatched = 0;
        for job in &queued {
            if self.runner.dispatch(&job.id) {
                dispatched += 1;
            }
        }
        if dispatched > 0 {
            info!("Resumed {} queued jobs", dispatched);
        }
        Ok(dispatched)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Stop accepting work, cancel whatever is still running and wait for
    /// the runner tasks to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        let tracker = self.runner.tracker();
        tracker.close();

        for id in self.registry.active_jobs() {
            if let Err(e) = self.cancellation.cancel(&id).await {
                warn!(job_id = %id, "Could not cancel job during shutdown: {}", e);
            }
        }

        if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
            warn!("Timed out waiting for {} job tasks", tracker.len());
        }
        info!("JobManager shut down");
    }

    /// Wait until no runner task is in flight. Submissions keep working.
    pub async fn wait_idle(&self) {
        while !self.runner.tracker().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
