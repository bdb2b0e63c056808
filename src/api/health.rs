//! Shared health state for the /health endpoint.
//! Updated by the batch processor, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::now_ns;

/// Shared health metrics. The processor writes, the API reads.
#[derive(Default)]
pub struct HealthState {
    /// Jobs currently running in this process.
    pub active_jobs: AtomicU64,
    /// Jobs that reached completed status since startup.
    pub jobs_completed: AtomicU64,
    /// Nanosecond timestamp of the last completed job (0 = none yet).
    pub last_completed_at_ns: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.last_completed_at_ns
            .store(now_ns().max(0) as u64, Ordering::Relaxed);
    }

    pub fn active_jobs(&self) -> u64 {
        self.active_jobs.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn last_completed_at_ns(&self) -> u64 {
        self.last_completed_at_ns.load(Ordering::Relaxed)
    }
}
