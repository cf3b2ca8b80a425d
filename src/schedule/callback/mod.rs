//! Fan-out of job state changes to any number of subscribers.
//!
//! Backed by a `tokio::sync::broadcast` channel: publishing never waits on a
//! subscriber, and a subscriber that falls more than `capacity` events behind
//! observes `RecvError::Lagged` and resumes from the newest events. There is
//! no history; late subscribers read current state from the job store.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::schedule::types::{Job, JobResult, JobStatus, JobUpdate};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated(Job),
    JobUpdate(JobUpdateEvent),
    JobDeleted { job_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdateEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl JobEvent {
    pub fn update(job_id: &str, update: &JobUpdate) -> Self {
        JobEvent::JobUpdate(JobUpdateEvent {
            job_id: job_id.to_string(),
            status: update.status,
            progress: update.progress,
            result: update.result.clone(),
            error: update.error.clone(),
            message: update.message.clone(),
        })
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobCreated(job) => &job.id,
            JobEvent::JobUpdate(update) => &update.job_id,
            JobEvent::JobDeleted { job_id } => job_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<JobEvent>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: JobEvent) {
        // An error only means nobody is listening right now.
        if self.sender.send(event).is_err() {
            tracing::trace!("job event published with no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
