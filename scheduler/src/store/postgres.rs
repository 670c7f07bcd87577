//! Postgres job store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};

use super::{JobStore, JobTx};
use crate::error::JobError;
use crate::job::{JobKey, JobRecord};

const LOCK_BY_ID: &str = "SELECT id, name, status, executor_count, last_run, timeout_seconds, config_json \
     FROM job WHERE id = $1 FOR UPDATE";

const LOCK_BY_NAME: &str = "SELECT id, name, status, executor_count, last_run, timeout_seconds, config_json \
     FROM job WHERE name = $1 FOR UPDATE";

/// Job store on the `job` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Creates a store on the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, JobError> {
    let status: String = row.try_get("status")?;
    let config: Option<Json<serde_json::Value>> = row.try_get("config_json")?;
    Ok(JobRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status.parse().map_err(JobError::Decode)?,
        executor_count: row.try_get("executor_count")?,
        last_run: row.try_get("last_run")?,
        timeout_seconds: row.try_get("timeout_seconds")?,
        config: config.map_or(serde_json::Value::Null, |c| c.0),
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn begin(&self) -> Result<Box<dyn JobTx>, JobError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgJobTx { tx }))
    }
}

struct PgJobTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl JobTx for PgJobTx {
    async fn lock_job(&mut self, key: &JobKey) -> Result<Option<JobRecord>, JobError> {
        let row = match key {
            JobKey::Id(id) => {
                sqlx::query(LOCK_BY_ID)
                    .bind(*id)
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
            JobKey::Name(name) => {
                sqlx::query(LOCK_BY_NAME)
                    .bind(name)
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
        };
        row.as_ref().map(job_from_row).transpose()
    }

    async fn save_job(&mut self, job: &JobRecord) -> Result<(), JobError> {
        let result = sqlx::query(
            "UPDATE job SET status = $2, executor_count = $3, last_run = $4 WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.executor_count)
        .bind(job.last_run)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(JobError::NotFound(format!("#{}", job.id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), JobError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), JobError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;

    #[tokio::test]
    async fn test_begin_fails_without_database() {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_millis(50))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .expect("lazy pool");
        let store = PgJobStore::new(pool);
        assert!(store.begin().await.is_err());
    }
}
