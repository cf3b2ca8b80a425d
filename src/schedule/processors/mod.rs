pub mod acquire;
pub mod command;
pub mod srt;
pub mod transcode;
pub mod transcribe;
pub mod translate;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, StageError};
use crate::schedule::scheduler::registry::ProcessRegistry;
use crate::schedule::types::{Job, JobParams, JobResult, JobType, ProgressUpdate};

pub use acquire::AcquireProcessor;
pub use transcode::TranscodeProcessor;
pub use transcribe::TranscribeProcessor;
pub use translate::TranslateProcessor;

/// A pipeline stage. One processor is registered per job type.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Reject malformed parameters at submission, before anything is stored.
    fn validate_params(&self, params: &JobParams) -> Result<(), JobError>;

    async fn process(&self, job: &Job, ctx: &StageContext) -> Result<JobResult, StageError>;

    /// Remove job-scoped intermediate files. Called after a cancellation.
    async fn cleanup(&self, job: &Job) -> Result<(), StageError>;
}

/// What a running stage gets from the runner: a progress sink, its
/// cancellation token and a way to register the OS process it spawns.
pub struct StageContext {
    job_id: String,
    progress: mpsc::UnboundedSender<ProgressUpdate>,
    token: CancellationToken,
    registry: ProcessRegistry,
}

impl StageContext {
    pub fn new(
        job_id: impl Into<String>,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
        token: CancellationToken,
        registry: ProcessRegistry,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            progress,
            token,
            registry,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Queue a progress report. Never blocks; reports sent after the runner
    /// stopped listening are dropped.
    pub fn report(&self, percent: i64, message: impl Into<String>) {
        self.send(ProgressUpdate {
            percent,
            message: Some(message.into()),
        });
    }

    pub fn report_percent(&self, percent: i64) {
        self.send(ProgressUpdate {
            percent,
            message: None,
        });
    }

    fn send(&self, update: ProgressUpdate) {
        let _ = self.progress.send(update);
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// `Err(Cancelled)` once cancellation was requested. For stages that
    /// poll between units of work.
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.is_cancelled() {
            Err(StageError::cancelled())
        } else {
            Ok(())
        }
    }

    pub fn register_process(&self, pid: u32) {
        self.registry.register_process(&self.job_id, pid);
    }

    pub fn deregister_process(&self, pid: u32) {
        self.registry.deregister_process(&self.job_id, pid);
    }
}

/// A context outside any runner, for exercising a single stage.
#[cfg(test)]
pub(crate) fn detached_context(
    job_id: &str,
) -> (StageContext, mpsc::UnboundedReceiver<ProgressUpdate>, ProcessRegistry) {
    let registry = ProcessRegistry::new();
    let slot = registry.open(job_id).expect("fresh registry");
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = StageContext::new(job_id, tx, slot.token().clone(), registry.clone());
    (ctx, rx, registry)
}

/// Unwrap the parameters a processor expects, or fail the job.
pub(crate) fn expect_params<'a, T>(
    job: &'a Job,
    select: impl FnOnce(&'a JobParams) -> Option<&'a T>,
) -> Result<&'a T, StageError> {
    select(&job.parameters).ok_or_else(|| {
        StageError::input(format!(
            "job {} has {} parameters",
            job.id,
            job.parameters.job_type()
        ))
    })
}

pub(crate) fn wrong_params(expected: JobType, params: &JobParams) -> JobError {
    JobError::Validation(format!(
        "expected {} parameters, got {}",
        expected,
        params.job_type()
    ))
}
