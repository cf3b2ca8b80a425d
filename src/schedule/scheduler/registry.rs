//! Supervisor state for in-flight jobs.
//!
//! One slot per dispatched job, holding its cancellation token, the claim that
//! decides whether natural completion or cancellation gets to write the
//! terminal status, and the OS process currently backing the stage (if any).
//! Slots live in a `DashMap`, so lookups and (de)registration only contend
//! per entry.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

const ACTIVE: u8 = 0;
const CANCELLING: u8 = 1;
const FINISHING: u8 = 2;

/// An external process backing a stage. Stage processes lead their own
/// process group, so `pid` doubles as the group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

#[derive(Debug)]
pub struct JobSlot {
    token: CancellationToken,
    /// Cancelled once the job's runner task has exited.
    stopped: CancellationToken,
    state: AtomicU8,
    process: Mutex<Option<ProcessHandle>>,
}

impl JobSlot {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            stopped: CancellationToken::new(),
            state: AtomicU8::new(ACTIVE),
            process: Mutex::new(None),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Held by the runner task; marks the slot stopped when dropped.
    pub fn stop_guard(&self) -> DropGuard {
        self.stopped.clone().drop_guard()
    }

    /// Wait up to `timeout` for the runner to exit. Returns whether it did.
    pub async fn wait_stopped(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.stopped.cancelled())
            .await
            .is_ok()
    }

    /// Claim the terminal write for cancellation. Fails if the runner already
    /// claimed it for natural completion.
    pub fn claim_cancel(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, CANCELLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the terminal write for natural completion.
    pub fn claim_finish(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, FINISHING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelling(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLING
    }

    fn process(&self) -> MutexGuard<'_, Option<ProcessHandle>> {
        // the guarded value is a plain Copy handle, a poisoned lock is still usable
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    slots: Arc<DashMap<String, Arc<JobSlot>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for a job being dispatched. Returns `None` if the job
    /// already has a live runner.
    pub fn open(&self, job_id: &str) -> Option<Arc<JobSlot>> {
        match self.slots.entry(job_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let slot = Arc::new(JobSlot::new());
                entry.insert(slot.clone());
                Some(slot)
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobSlot>> {
        self.slots.get(job_id).map(|slot| slot.value().clone())
    }

    pub fn close(&self, job_id: &str) {
        self.slots.remove(job_id);
    }

    pub fn register_process(&self, job_id: &str, pid: u32) -> bool {
        let Some(slot) = self.get(job_id) else {
            warn!(job_id, pid, "process registered for a job without a runner");
            return false;
        };
        let mut process = slot.process();
        if let Some(previous) = process.replace(ProcessHandle { pid }) {
            debug!(job_id, previous = previous.pid, pid, "replacing registered process");
        }
        true
    }

    /// Clear the job's process, but only if it is still `pid`; a newer
    /// registration from a later step of the same stage is left alone.
    pub fn deregister_process(&self, job_id: &str, pid: u32) {
        if let Some(slot) = self.get(job_id) {
            let mut process = slot.process();
            if *process == Some(ProcessHandle { pid }) {
                *process = None;
            }
        }
    }

    pub fn process(&self, job_id: &str) -> Option<ProcessHandle> {
        self.get(job_id).and_then(|slot| *slot.process())
    }

    pub fn take_process(&self, job_id: &str) -> Option<ProcessHandle> {
        self.get(job_id).and_then(|slot| slot.process().take())
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
