//! Correlation registry: pending jobs keyed by worker job id.
//!
//! A [`JobContext`] is registered when the worker accepts a submission and
//! removed the moment its completion starts processing. The atomic
//! [`CorrelationRegistry::claim_and_remove`] is what guarantees a job's
//! outputs are processed at most once, even if the worker reports the same
//! completion twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use genforge_core::types::{DbId, JobParameters, Timestamp};

/// Everything needed to attribute a completion back to its request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub job_id: String,
    pub user_id: DbId,
    pub template_id: DbId,
    /// Parameter values as applied, including staged image references.
    pub parameters: JobParameters,
    pub submitted_at: Timestamp,
}

impl JobContext {
    /// Milliseconds elapsed since submission.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.submitted_at).num_milliseconds()
    }
}

/// Thread-safe `job_id -> JobContext` table.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, JobContext>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a context under its job id.
    ///
    /// Returns `false` and keeps the existing entry when the id is already
    /// registered.
    pub fn register(&self, context: JobContext) -> bool {
        let mut pending = self.lock();
        if pending.contains_key(&context.job_id) {
            tracing::warn!(job_id = %context.job_id, "Job already registered, keeping existing context");
            return false;
        }
        pending.insert(context.job_id.clone(), context);
        true
    }

    /// Atomically take the context for `job_id`.
    ///
    /// Only the first caller for a given id receives `Some`.
    pub fn claim_and_remove(&self, job_id: &str) -> Option<JobContext> {
        self.lock().remove(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return every context submitted more than `max_age` ago.
    pub fn evict_older_than(&self, max_age: Duration) -> Vec<JobContext> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Vec::new();
        };

        let mut pending = self.lock();
        let stale: Vec<String> = pending
            .values()
            .filter(|ctx| ctx.submitted_at < cutoff)
            .map(|ctx| ctx.job_id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|job_id| pending.remove(job_id))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobContext>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
