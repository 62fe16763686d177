//! Repository for `job_history` — written only by the Scheduler (C7).

use crate::error::AppResult;
use crate::model::{JobHistory, JobStatus};
use crate::repository::Store;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Clone)]
pub struct JobHistoryRepository {
    store: Store,
}

impl JobHistoryRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn find(&self, job_name: &str, provider_id: Option<&str>) -> AppResult<Option<JobHistory>> {
        if self.store.is_stopping() {
            return Ok(None);
        }
        let row = match provider_id {
            Some(provider_id) => {
                sqlx::query("SELECT * FROM job_history WHERE job_name = ? AND provider_id = ?")
                    .bind(job_name)
                    .bind(provider_id)
                    .fetch_optional(self.store.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM job_history WHERE job_name = ? AND provider_id IS NULL")
                    .bind(job_name)
                    .fetch_optional(self.store.pool())
                    .await?
            }
        };
        Ok(row.map(|row| row_to_job_history(&row)))
    }

    pub async fn is_running(&self, job_name: &str) -> AppResult<bool> {
        if self.store.is_stopping() {
            return Ok(false);
        }
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM job_history WHERE job_name = ? AND status = 'running'",
        )
        .bind(job_name)
        .fetch_one(self.store.pool())
        .await?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    pub async fn mark_running(&self, job_name: &str, provider_id: Option<&str>) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO job_history (
                job_name, provider_id, status, last_execution, execution_count,
                created_at, last_updated
            ) VALUES (?, ?, 'running', ?, 1, ?, ?)
            ON CONFLICT(job_name, provider_id) DO UPDATE SET
                status = 'running',
                last_execution = excluded.last_execution,
                execution_count = job_history.execution_count + 1,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(job_name)
        .bind(provider_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        job_name: &str,
        provider_id: Option<&str>,
        result: Option<&str>,
    ) -> AppResult<()> {
        self.finish(job_name, provider_id, JobStatus::Completed, result, None)
            .await
    }

    pub async fn mark_failed(
        &self,
        job_name: &str,
        provider_id: Option<&str>,
        error: &str,
    ) -> AppResult<()> {
        self.finish(job_name, provider_id, JobStatus::Failed, None, Some(error))
            .await
    }

    async fn finish(
        &self,
        job_name: &str,
        provider_id: Option<&str>,
        status: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> AppResult<()> {
        let status_str = status_to_str(status);
        sqlx::query(
            r#"
            UPDATE job_history SET status = ?, last_result = ?, last_error = ?, last_updated = ?
            WHERE job_name = ? AND provider_id IS ?
            "#,
        )
        .bind(status_str)
        .bind(result)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(job_name)
        .bind(provider_id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Crash recovery: any row left `running` from a prior process is
    /// transitioned to `cancelled`. Called once from `Scheduler::initialize`.
    pub async fn cancel_all_running(&self) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE job_history SET status = 'cancelled', last_updated = ? WHERE status = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn row_to_job_history(row: &sqlx::sqlite::SqliteRow) -> JobHistory {
    let status: String = row.get("status");
    let parse_ts = |value: Option<String>| {
        value.and_then(|value| {
            DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    };
    JobHistory {
        job_name: row.get("job_name"),
        provider_id: row.get("provider_id"),
        status: match status.as_str() {
            "running" => JobStatus::Running,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Completed,
        },
        last_execution: parse_ts(row.get("last_execution")),
        execution_count: row.get::<i64, _>("execution_count") as u64,
        last_result: row.get("last_result"),
        last_error: row.get("last_error"),
        last_provider_check: parse_ts(row.get("last_provider_check")),
        last_settings_check: parse_ts(row.get("last_settings_check")),
        last_policy_check: parse_ts(row.get("last_policy_check")),
        created_at: parse_ts(row.get("created_at")).unwrap_or_else(Utc::now),
        last_updated: parse_ts(row.get("last_updated")).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crash_recovery_cancels_running_rows() {
        let store = Store::connect_test().await.unwrap();
        let repo = JobHistoryRepository::new(store);
        repo.mark_running("sync", None).await.unwrap();
        assert!(repo.is_running("sync").await.unwrap());

        let cancelled = repo.cancel_all_running().await.unwrap();
        assert_eq!(cancelled, 1);
        assert!(!repo.is_running("sync").await.unwrap());

        let row = repo.find("sync", None).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn mark_completed_clears_running_state() {
        let store = Store::connect_test().await.unwrap();
        let repo = JobHistoryRepository::new(store);
        repo.mark_running("sync", Some("p1")).await.unwrap();
        repo.mark_completed("sync", Some("p1"), Some("ok")).await.unwrap();

        assert!(!repo.is_running("sync").await.unwrap());
        let row = repo.find("sync", Some("p1")).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.last_result.as_deref(), Some("ok"));
    }
}
