use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Jobs currently owned by this process, keyed by job id. Cancellation is
/// cooperative: the flag is read before each batch dispatch, so in-flight
/// batches finish rather than being hard-killed.
#[derive(Default)]
pub struct JobRegistry {
    active: DashMap<String, Arc<AtomicBool>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a starting job and return its cancel flag.
    pub fn register(&self, job_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.active.insert(job_id.to_string(), Arc::clone(&flag));
        flag
    }

    /// Flip the cancel flag for an active job. Returns false when the job is
    /// not owned by this process.
    pub fn request_cancel(&self, job_id: &str) -> bool {
        match self.active.get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, job_id: &str) {
        self.active.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flips_flag_for_registered_jobs_only() {
        let registry = JobRegistry::new();
        let flag = registry.register("j1");
        assert!(!flag.load(Ordering::Relaxed));

        assert!(registry.request_cancel("j1"));
        assert!(flag.load(Ordering::Relaxed));
        assert!(!registry.request_cancel("unknown"));
    }

    #[test]
    fn unregistered_jobs_are_no_longer_cancellable() {
        let registry = JobRegistry::new();
        registry.register("j1");
        registry.unregister("j1");
        assert!(!registry.request_cancel("j1"));
    }
}
