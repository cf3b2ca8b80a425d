//! Cancellation of queued and running jobs.
//!
//! Cancelling a running job races its natural completion. The race is settled
//! on the job's supervisor slot: whoever claims it first writes the terminal
//! status, the other side's write is skipped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::registry::{JobSlot, ProcessHandle, ProcessRegistry};
use super::Processors;
use crate::error::JobError;
use crate::schedule::types::{Job, JobStatus, JobUpdate};
use crate::storage::job::JobStore;

pub struct CancellationManager {
    store: Arc<dyn JobStore>,
    registry: ProcessRegistry,
    processors: Arc<Processors>,
    kill_grace: Duration,
}

impl CancellationManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: ProcessRegistry,
        processors: Arc<Processors>,
        kill_grace: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            processors,
            kill_grace,
        }
    }

    /// Cancel a Queued or Running job and return its final record.
    ///
    /// A job that has not started yet goes straight to Cancelled: its runner,
    /// if one was dispatched, then fails to move it to Running and exits
    /// without touching the stage.
    pub async fn cancel(&self, id: &str) -> Result<Job, JobError> {
        let job = self.store.get(id).await?;
        if !job.status.is_cancellable() {
            return Err(invalid_state(&job.id, job.status));
        }

        let mut slot = self.claim_slot(id, job.status).await?;

        if job.status == JobStatus::Queued {
            match self
                .store
                .update_status_from(id, &[JobStatus::Queued], JobUpdate::cancelled(job.progress))
                .await
            {
                Ok(()) => {
                    info!(job_id = %id, "Queued job cancelled");
                    return self.store.get(id).await;
                }
                Err(JobError::Concurrency {
                    status: JobStatus::Running,
                    ..
                }) => {
                    info!(job_id = %id, "Job started before it could be cancelled");
                    if slot.is_none() {
                        slot = self.claim_slot(id, JobStatus::Running).await?;
                    }
                }
                Err(JobError::Concurrency { status, .. }) => return Err(invalid_state(id, status)),
                Err(e) => {
                    error!(job_id = %id, "Failed to persist cancellation: {}", e);
                    return Err(e);
                }
            }
        }

        match &slot {
            Some(slot) => {
                if let Some(process) = self.registry.take_process(id) {
                    terminate_process_tree(process, self.kill_grace).await;
                }
                if !slot.wait_stopped(self.kill_grace).await {
                    warn!(job_id = %id, "Stage did not stop within {:?}", self.kill_grace);
                }
            }
            None => info!(job_id = %id, "Cancelling running job without a runner"),
        }
        self.run_cleanup(&job).await;

        // re-read progress, the stage may have reported more since the first read
        let progress = self.store.get(id).await.map(|j| j.progress).unwrap_or(job.progress);
        match self
            .store
            .update_status_from(id, &[JobStatus::Running], JobUpdate::cancelled(progress))
            .await
        {
            Ok(()) => {}
            Err(JobError::Concurrency { status, .. }) => return Err(invalid_state(id, status)),
            Err(e) => {
                error!(job_id = %id, "Failed to persist cancellation: {}", e);
                return Err(e);
            }
        }

        info!(job_id = %id, "Job cancelled");
        self.store.get(id).await
    }

    /// Claim the job's runner slot, if it has one, and signal its stage.
    async fn claim_slot(&self, id: &str, status: JobStatus) -> Result<Option<Arc<JobSlot>>, JobError> {
        let Some(slot) = self.registry.get(id) else {
            return Ok(None);
        };
        if !slot.claim_cancel() {
            // the runner is already writing the outcome, or another cancel is in flight
            let current = self.store.get(id).await.map(|j| j.status).unwrap_or(status);
            return Err(invalid_state(id, current));
        }

        info!(job_id = %id, "Cancelling job");
        slot.token().cancel();
        Ok(Some(slot))
    }

    async fn run_cleanup(&self, job: &Job) {
        let Some(processor) = self.processors.get(&job.job_type) else {
            warn!(job_id = %job.id, "No processor to clean up {} job", job.job_type);
            return;
        };
        if let Err(e) = processor.cleanup(job).await {
            warn!(job_id = %job.id, "Cleanup after cancellation failed: {}", e);
        }
    }
}

fn invalid_state(id: &str, status: JobStatus) -> JobError {
    JobError::InvalidState {
        id: id.to_string(),
        status,
        action: "cancel",
    }
}

/// Terminate `process` and everything below it: descendants get SIGTERM
/// deepest first, then the process group. Whatever is still alive after
/// `grace` is killed.
#[cfg(unix)]
pub async fn terminate_process_tree(process: ProcessHandle, grace: Duration) {
    let root = process.pid as libc::pid_t;
    let mut tree = descendants(root);
    tree.reverse();

    info!(pid = root, descendants = tree.len(), "Terminating process tree");
    for pid in &tree {
        signal(*pid, libc::SIGTERM);
    }
    signal_group(root, libc::SIGTERM);
    signal(root, libc::SIGTERM);

    tree.push(root);
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if !tree.iter().any(|pid| is_alive(*pid)) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    warn!(pid = root, "Process tree survived SIGTERM, sending SIGKILL");
    for pid in &tree {
        if is_alive(*pid) {
            signal(*pid, libc::SIGKILL);
        }
    }
    signal_group(root, libc::SIGKILL);
}

#[cfg(not(unix))]
pub async fn terminate_process_tree(process: ProcessHandle, _grace: Duration) {
    warn!(pid = process.pid, "Process tree termination is only supported on Unix");
}

/// All descendants of `root`, parents before children.
#[cfg(unix)]
fn descendants(root: libc::pid_t) -> Vec<libc::pid_t> {
    let mut found = Vec::new();
    let mut queue = std::collections::VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for child in children(pid) {
            if !found.contains(&child) && child != root {
                found.push(child);
                queue.push_back(child);
            }
        }
    }
    found
}

/// Direct children from `/proc/<pid>/task/*/children`. Empty where procfs is unavailable.
#[cfg(unix)]
fn children(pid: libc::pid_t) -> Vec<libc::pid_t> {
    let Ok(tasks) = std::fs::read_dir(format!("/proc/{}/task", pid)) else {
        return Vec::new();
    };
    tasks
        .flatten()
        .filter_map(|task| std::fs::read_to_string(task.path().join("children")).ok())
        .flat_map(|list| {
            list.split_whitespace()
                .filter_map(|p| p.parse().ok())
                .collect::<Vec<libc::pid_t>>()
        })
        .collect()
}

#[cfg(unix)]
fn signal(pid: libc::pid_t, sig: libc::c_int) {
    // Safety: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(pid, sig);
    }
}

#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, sig: libc::c_int) {
    // Safety: killpg(2) has no memory-safety preconditions; a missing group yields ESRCH.
    unsafe {
        libc::killpg(pgid, sig);
    }
}

/// Alive and not a zombie waiting to be reaped.
#[cfg(unix)]
fn is_alive(pid: libc::pid_t) -> bool {
    // Safety: signal 0 only checks for existence and permission.
    let exists = unsafe { libc::kill(pid, 0) } == 0;
    if !exists {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // the state field follows the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(true),
        Err(_) => true,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn test_terminates_group_and_grandchildren() {
        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg("sleep 30 & sleep 30; wait")
            .stdout(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);
        let mut child = command.spawn().unwrap();
        let pid = child.id().unwrap();

        // give the shell time to start its children
        tokio::time::sleep(Duration::from_millis(200)).await;
        let grandchildren = descendants(pid as libc::pid_t);

        terminate_process_tree(ProcessHandle { pid }, Duration::from_secs(2)).await;

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("process tree should be gone")
            .unwrap();
        assert!(!status.success());
        for pid in grandchildren {
            assert!(!is_alive(pid), "descendant {} survived", pid);
        }
    }

    #[tokio::test]
    async fn test_escalates_to_sigkill() {
        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg("trap '' TERM; while true; do sleep 0.05; done")
            .process_group(0)
            .kill_on_drop(true);
        let mut child = command.spawn().unwrap();
        let pid = child.id().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        terminate_process_tree(ProcessHandle { pid }, Duration::from_millis(300)).await;

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("SIGKILL should end the process")
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_unknown_pid_is_not_alive() {
        assert!(!is_alive(i32::MAX - 1));
    }
}
