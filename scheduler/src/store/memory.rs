//! In-memory job store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{JobStore, JobTx};
use crate::error::JobError;
use crate::job::{JobKey, JobRecord};

type JobTable = BTreeMap<i64, JobRecord>;

/// Job store keeping rows in memory.
///
/// A transaction holds the table lock from `begin` until commit or
/// rollback, which serializes transactions the way a row lock does.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<JobTable>>,
    fail_next_begin: AtomicBool,
    fail_next_commit: AtomicBool,
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a job row.
    pub async fn insert_job(&self, job: JobRecord) {
        self.jobs.lock().await.insert(job.id, job);
    }

    /// Deletes a job row.
    pub async fn remove_job(&self, id: i64) {
        self.jobs.lock().await.remove(&id);
    }

    /// Returns a copy of a committed row.
    pub async fn job(&self, key: &JobKey) -> Option<JobRecord> {
        self.jobs
            .lock()
            .await
            .values()
            .find(|job| key.matches(job))
            .cloned()
    }

    /// Makes the next `begin` fail.
    pub fn fail_next_begin(&self) {
        self.fail_next_begin.store(true, Ordering::SeqCst);
    }

    /// Makes the next commit fail.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn begin(&self) -> Result<Box<dyn JobTx>, JobError> {
        if self.fail_next_begin.swap(false, Ordering::SeqCst) {
            return Err(JobError::Injected("begin".to_string()));
        }
        let guard = Arc::clone(&self.jobs).lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryJobTx {
            guard,
            working,
            fail_commit: self.fail_next_commit.swap(false, Ordering::SeqCst),
        }))
    }
}

struct MemoryJobTx {
    guard: OwnedMutexGuard<JobTable>,
    working: JobTable,
    fail_commit: bool,
}

#[async_trait]
impl JobTx for MemoryJobTx {
    async fn lock_job(&mut self, key: &JobKey) -> Result<Option<JobRecord>, JobError> {
        Ok(self.working.values().find(|job| key.matches(job)).cloned())
    }

    async fn save_job(&mut self, job: &JobRecord) -> Result<(), JobError> {
        let row = self
            .working
            .get_mut(&job.id)
            .ok_or_else(|| JobError::NotFound(format!("#{}", job.id)))?;
        row.status = job.status;
        row.executor_count = job.executor_count;
        row.last_run = job.last_run;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), JobError> {
        if self.fail_commit {
            return Err(JobError::Injected("commit".to_string()));
        }
        let working = std::mem::take(&mut self.working);
        *self.guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), JobError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[tokio::test]
    async fn test_commit_persists_changes() {
        let store = MemoryJobStore::new();
        store.insert_job(JobRecord::new(1, "refresh-prices")).await;

        let mut tx = store.begin().await.expect("begin");
        let mut job = tx
            .lock_job(&JobKey::name("refresh-prices"))
            .await
            .expect("lock")
            .expect("job");
        job.status = JobStatus::Locked;
        job.executor_count = 1;
        tx.save_job(&job).await.expect("save");
        tx.commit().await.expect("commit");

        let saved = store.job(&JobKey::Id(1)).await.expect("job");
        assert_eq!(saved.status, JobStatus::Locked);
        assert_eq!(saved.executor_count, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = MemoryJobStore::new();
        store.insert_job(JobRecord::new(1, "refresh-prices")).await;

        let mut tx = store.begin().await.expect("begin");
        let mut job = tx.lock_job(&JobKey::Id(1)).await.expect("lock").expect("job");
        job.executor_count = 5;
        tx.save_job(&job).await.expect("save");
        tx.rollback().await.expect("rollback");

        assert_eq!(store.job(&JobKey::Id(1)).await.expect("job").executor_count, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_discards_changes() {
        let store = MemoryJobStore::new();
        store.insert_job(JobRecord::new(1, "refresh-prices")).await;
        store.fail_next_commit();

        let mut tx = store.begin().await.expect("begin");
        let mut job = tx.lock_job(&JobKey::Id(1)).await.expect("lock").expect("job");
        job.executor_count = 1;
        tx.save_job(&job).await.expect("save");
        assert!(tx.commit().await.is_err());

        assert_eq!(store.job(&JobKey::Id(1)).await.expect("job").executor_count, 0);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = MemoryJobStore::new();
        let mut tx = store.begin().await.expect("begin");
        assert!(tx.lock_job(&JobKey::name("nope")).await.expect("lock").is_none());
        assert!(tx.save_job(&JobRecord::new(9, "nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_begin() {
        let store = MemoryJobStore::new();
        store.fail_next_begin();
        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }
}
