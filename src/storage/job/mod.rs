use std::path::Path;

use async_trait::async_trait;

use crate::error::JobError;
use crate::schedule::types::{Job, JobParams, JobStats, JobStatus, JobUpdate};

pub mod mapping;
pub mod sqlite;

pub use sqlite::SqliteJobStore;

/// Durable record of job state.
///
/// Every status write is a single-row compare-and-set: the row only changes if
/// its current status is one of the expected predecessors, so concurrent
/// writers to the same job cannot both win.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new Queued job and return it.
    async fn create(&self, params: JobParams) -> Result<Job, JobError>;

    /// Insert a Queued child of an Acquire job, unless some job already owns
    /// the same artifact path. Returns `None` when the artifact is taken.
    async fn create_child(&self, parent_id: &str, params: JobParams) -> Result<Option<Job>, JobError>;

    async fn get(&self, id: &str) -> Result<Job, JobError>;

    /// All jobs, newest first.
    async fn list(&self) -> Result<Vec<Job>, JobError>;

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, JobError>;

    async fn find_by_artifact(&self, path: &Path) -> Result<Option<Job>, JobError>;

    /// Apply `update` only if the job's current status is in `expected`.
    async fn update_status_from(
        &self,
        id: &str,
        expected: &[JobStatus],
        update: JobUpdate,
    ) -> Result<(), JobError>;

    /// Apply `update` from any legal predecessor of its target status.
    async fn update_status(&self, id: &str, update: JobUpdate) -> Result<(), JobError> {
        let expected = update.status.predecessors();
        self.update_status_from(id, expected, update).await
    }

    async fn delete(&self, id: &str) -> Result<(), JobError>;

    /// Delete every job in one of `statuses`, returning how many went away.
    async fn delete_by_status(&self, statuses: &[JobStatus]) -> Result<u64, JobError>;

    async fn count_by_status(&self) -> Result<JobStats, JobError>;
}
