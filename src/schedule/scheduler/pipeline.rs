use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::schedule::types::{Job, JobParams, JobResult, JobStatus, JobType, TranscribeParams};
use crate::storage::job::JobStore;

/// Turns the artifacts of a completed Acquire job into Transcribe jobs.
///
/// A child is only created for an artifact no job owns yet, so handling the
/// same completion twice creates nothing new.
#[derive(Clone)]
pub struct PipelineCoordinator {
    store: Arc<dyn JobStore>,
}

impl PipelineCoordinator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Create the missing children of `job`, returning only the new ones.
    pub async fn on_acquire_completed(&self, job: &Job) -> Result<Vec<Job>, JobError> {
        let JobParams::Acquire(params) = &job.parameters else {
            return Ok(Vec::new());
        };
        if job.job_type != JobType::Acquire || job.status != JobStatus::Completed {
            return Ok(Vec::new());
        }
        if !params.chain {
            debug!(job_id = %job.id, "Chaining disabled, no children created");
            return Ok(Vec::new());
        }

        let artifacts = match &job.result {
            Some(JobResult::Acquire(result)) => &result.artifacts,
            other => {
                warn!(job_id = %job.id, "Completed acquire job has unexpected result {:?}", other);
                return Ok(Vec::new());
            }
        };

        let mut created = Vec::new();
        let mut first_error = None;
        for artifact in artifacts {
            let child = JobParams::Transcribe(TranscribeParams {
                input: artifact.clone(),
                options: params.transcribe.clone(),
            });

            match self.store.create_child(&job.id, child).await {
                Ok(Some(child)) => {
                    info!(job_id = %job.id, child_id = %child.id, "Created transcribe job for {}", artifact.display());
                    created.push(child);
                }
                Ok(None) => {
                    debug!(job_id = %job.id, "{} already has a job", artifact.display());
                }
                Err(e) => {
                    error!(job_id = %job.id, "Failed to create child for {}: {}", artifact.display(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if created.is_empty() => Err(e),
            _ => Ok(created),
        }
    }
}
