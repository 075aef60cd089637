//! Job repository.
//!
//! [`JobRepository`] is the normal runtime API: insert, claim, finalize. It
//! never touches a `running` row except to finalize the exact attempt that
//! claimed it. [`RunningJobStore`] is the narrower bypass used by the
//! heartbeat reporter and the watchdog, the only code allowed to rewrite a
//! running job.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JobDbModel, JobErrorRecord};
use crate::database::time::now_ms;
use crate::{Error, Result};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: &JobDbModel) -> Result<()>;

    /// Insert `job` unless a job of the same kind already exists for
    /// `queue_id`, in any state. `true` when the row was inserted.
    async fn insert_job_once(&self, job: &JobDbModel, queue_id: &str) -> Result<bool>;

    async fn get_job(&self, id: &str) -> Result<JobDbModel>;
    async fn list_jobs_by_kind(&self, kind: &str) -> Result<Vec<JobDbModel>>;

    /// Atomically claim the oldest due job of `queue`, bumping its attempt.
    async fn claim_next(&self, queue: &str, now: i64) -> Result<Option<JobDbModel>>;

    async fn complete(&self, id: &str, attempt: i64) -> Result<bool>;
    async fn retry(
        &self,
        id: &str,
        attempt: i64,
        scheduled_at: i64,
        error: &JobErrorRecord,
    ) -> Result<bool>;
    async fn discard(&self, id: &str, attempt: i64, error: &JobErrorRecord) -> Result<bool>;
    async fn finalize_cancelled(&self, id: &str, attempt: i64) -> Result<bool>;

    /// Hand an attempt interrupted by shutdown back to the queue without
    /// counting it.
    async fn release(&self, id: &str, attempt: i64) -> Result<bool>;

    /// Cancel a job that has not started yet.
    async fn cancel_pending(&self, id: &str) -> Result<bool>;

    /// Number of jobs of a kind that are waiting or running.
    async fn count_active_kind(&self, kind: &str) -> Result<i64>;

    /// Startup recovery for `running` rows without `tag`; those have no
    /// heartbeat and would otherwise never be picked up again.
    async fn requeue_running_without_tag(&self, tag: &str) -> Result<u64>;
}

/// Direct access to `running` jobs, bypassing the runtime's ownership rule.
#[async_trait]
pub trait RunningJobStore: Send + Sync {
    async fn list_running(&self, tag: &str) -> Result<Vec<JobDbModel>>;
    /// Stamp `args.heartbeat_time`. Returns `false` if the job is gone.
    async fn update_heartbeat(&self, id: &str, heartbeat_ms: i64) -> Result<bool>;
    /// `running -> retryable`, due immediately. The heartbeat is cleared so
    /// the next attempt is not judged by the previous one's last stamp.
    async fn force_retry(&self, id: &str) -> Result<bool>;
    async fn force_delete(&self, id: &str) -> Result<bool>;
}

/// SQLx implementation of both job traits.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn finalize_with_error(
        &self,
        id: &str,
        attempt: i64,
        state: &str,
        scheduled_at: Option<i64>,
        error: &JobErrorRecord,
    ) -> Result<bool> {
        let error_json = serde_json::to_string(error)?;
        let now = now_ms();
        let finalized_at = if scheduled_at.is_none() { Some(now) } else { None };
        let result = sqlx::query(
            r#"
            UPDATE job
            SET state = ?,
                scheduled_at = COALESCE(?, scheduled_at),
                finalized_at = ?,
                errors = json_insert(errors, '$[#]', json(?))
            WHERE id = ? AND state = 'running' AND attempt = ?
            "#,
        )
        .bind(state)
        .bind(scheduled_at)
        .bind(finalized_at)
        .bind(error_json)
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert_job(&self, job: &JobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job (
                id, kind, queue, state, tags, max_attempts, attempt, args, errors,
                scheduled_at, attempted_at, finalized_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.kind)
        .bind(&job.queue)
        .bind(&job.state)
        .bind(&job.tags)
        .bind(job.max_attempts)
        .bind(job.attempt)
        .bind(&job.args)
        .bind(&job.errors)
        .bind(job.scheduled_at)
        .bind(job.attempted_at)
        .bind(job.finalized_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_job_once(&self, job: &JobDbModel, queue_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO job (
                id, kind, queue, state, tags, max_attempts, attempt, args, errors,
                scheduled_at, attempted_at, finalized_at, created_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM job
                WHERE kind = ? AND json_extract(args, '$.queue_id') = ?
            )
            "#,
        )
        .bind(&job.id)
        .bind(&job.kind)
        .bind(&job.queue)
        .bind(&job.state)
        .bind(&job.tags)
        .bind(job.max_attempts)
        .bind(job.attempt)
        .bind(&job.args)
        .bind(&job.errors)
        .bind(job.scheduled_at)
        .bind(job.attempted_at)
        .bind(job.finalized_at)
        .bind(job.created_at)
        .bind(&job.kind)
        .bind(queue_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, id: &str) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn list_jobs_by_kind(&self, kind: &str) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM job WHERE kind = ? ORDER BY created_at",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn claim_next(&self, queue: &str, now: i64) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>(
            r#"
            UPDATE job
            SET state = 'running', attempt = attempt + 1, attempted_at = ?1
            WHERE id = (
                SELECT id FROM job
                WHERE queue = ?2
                  AND state IN ('available', 'scheduled', 'retryable')
                  AND scheduled_at <= ?1
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            AND state IN ('available', 'scheduled', 'retryable')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn complete(&self, id: &str, attempt: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job SET state = 'completed', finalized_at = ? \
             WHERE id = ? AND state = 'running' AND attempt = ?",
        )
        .bind(now_ms())
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn retry(
        &self,
        id: &str,
        attempt: i64,
        scheduled_at: i64,
        error: &JobErrorRecord,
    ) -> Result<bool> {
        self.finalize_with_error(id, attempt, "retryable", Some(scheduled_at), error)
            .await
    }

    async fn discard(&self, id: &str, attempt: i64, error: &JobErrorRecord) -> Result<bool> {
        self.finalize_with_error(id, attempt, "discarded", None, error)
            .await
    }

    async fn finalize_cancelled(&self, id: &str, attempt: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job SET state = 'cancelled', finalized_at = ? \
             WHERE id = ? AND state = 'running' AND attempt = ?",
        )
        .bind(now_ms())
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, id: &str, attempt: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job SET state = 'retryable', attempt = attempt - 1, scheduled_at = ? \
             WHERE id = ? AND state = 'running' AND attempt = ?",
        )
        .bind(now_ms())
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_pending(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job SET state = 'cancelled', finalized_at = ? \
             WHERE id = ? AND state IN ('available', 'scheduled', 'retryable')",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_active_kind(&self, kind: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job \
             WHERE kind = ? AND state IN ('available', 'scheduled', 'retryable', 'running')",
        )
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn requeue_running_without_tag(&self, tag: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job SET state = 'retryable', scheduled_at = ?
            WHERE state = 'running'
              AND NOT EXISTS (SELECT 1 FROM json_each(job.tags) WHERE json_each.value = ?)
            "#,
        )
        .bind(now_ms())
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RunningJobStore for SqlxJobRepository {
    async fn list_running(&self, tag: &str) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM job
            WHERE state = 'running'
              AND EXISTS (SELECT 1 FROM json_each(job.tags) WHERE json_each.value = ?)
            ORDER BY attempted_at
            "#,
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn update_heartbeat(&self, id: &str, heartbeat_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job SET args = json_set(args, '$.heartbeat_time', ?) WHERE id = ?",
        )
        .bind(heartbeat_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn force_retry(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job
            SET state = 'retryable',
                scheduled_at = ?,
                args = json_set(args, '$.heartbeat_time', 0)
            WHERE id = ? AND state = 'running'
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn force_delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::JobState;
    use crate::database::test_support::migrated_pool;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn error(attempt: i64) -> JobErrorRecord {
        JobErrorRecord {
            attempt,
            at: now_ms(),
            error: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn test_claim_respects_queue_and_schedule() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqlxJobRepository::new(pool);

        let due = JobDbModel::new("a", "default", "{}", &[], 3, None);
        let later = JobDbModel::new("b", "default", "{}", &[], 3, Some(now_ms() + 60_000));
        let other = JobDbModel::new("c", "chat-render", "{}", &[], 3, None);
        for job in [&due, &later, &other] {
            repo.insert_job(job).await.unwrap();
        }

        let claimed = repo.claim_next("default", now_ms()).await.unwrap().unwrap();
        assert_eq!(claimed.id, due.id);
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.state(), Some(JobState::Running));

        assert!(repo.claim_next("default", now_ms()).await.unwrap().is_none());
        let claimed_later = repo
            .claim_next("default", now_ms() + 120_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed_later.id, later.id);
    }

    #[tokio::test]
    async fn test_finalize_guarded_by_attempt() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqlxJobRepository::new(pool);
        let job = JobDbModel::new("a", "default", "{}", &["archive"], 3, None);
        repo.insert_job(&job).await.unwrap();

        let first = repo.claim_next("default", now_ms()).await.unwrap().unwrap();
        assert!(repo.retry(&job.id, first.attempt, now_ms(), &error(1)).await.unwrap());
        // A second finalize of the same attempt is a no-op.
        assert!(!repo.complete(&job.id, first.attempt).await.unwrap());

        let second = repo.claim_next("default", now_ms()).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert!(!repo.complete(&job.id, first.attempt).await.unwrap());
        assert!(repo.discard(&job.id, second.attempt, &error(2)).await.unwrap());

        let stored = repo.get_job(&job.id).await.unwrap();
        assert_eq!(stored.state(), Some(JobState::Discarded));
        assert_eq!(stored.errors().len(), 2);
        assert!(stored.finalized_at.is_some());
    }

    #[tokio::test]
    async fn test_force_retry_then_stale_finalize_is_ignored() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqlxJobRepository::new(pool);
        let job = JobDbModel::new("a", "default", r#"{"queue_id":"q"}"#, &["archive"], 3, None);
        repo.insert_job(&job).await.unwrap();
        let claimed = repo.claim_next("default", now_ms()).await.unwrap().unwrap();

        assert_eq!(repo.list_running("archive").await.unwrap().len(), 1);
        assert!(repo.update_heartbeat(&job.id, 1234).await.unwrap());
        let args: serde_json::Value =
            serde_json::from_str(&repo.get_job(&job.id).await.unwrap().args).unwrap();
        assert_eq!(args["heartbeat_time"], 1234);
        assert_eq!(args["queue_id"], "q");

        assert!(repo.force_retry(&job.id).await.unwrap());
        assert!(!repo.complete(&job.id, claimed.attempt).await.unwrap());
        let retried = repo.get_job(&job.id).await.unwrap();
        assert_eq!(retried.state(), Some(JobState::Retryable));
        let args: serde_json::Value = serde_json::from_str(&retried.args).unwrap();
        assert_eq!(args["heartbeat_time"], 0);
        assert_eq!(args["queue_id"], "q");

        // The next attempt starts without the previous attempt's heartbeat.
        let reclaimed = repo.claim_next("default", now_ms()).await.unwrap().unwrap();
        let args: serde_json::Value = serde_json::from_str(&reclaimed.args).unwrap();
        assert_eq!(args["heartbeat_time"], 0);

        assert!(repo.force_delete(&job.id).await.unwrap());
        assert!(!repo.update_heartbeat(&job.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_once_per_kind_and_queue() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqlxJobRepository::new(pool);
        let args = r#"{"queue_id":"q1","heartbeat_time":0,"continue":true}"#;

        let first = JobDbModel::new("move_video", "default", args, &["archive"], 5, None);
        assert!(repo.insert_job_once(&first, "q1").await.unwrap());
        let claimed = repo.claim_next("default", now_ms()).await.unwrap().unwrap();
        assert!(repo.complete(&first.id, claimed.attempt).await.unwrap());

        // Finished jobs still count.
        let again = JobDbModel::new("move_video", "default", args, &["archive"], 5, None);
        assert!(!repo.insert_job_once(&again, "q1").await.unwrap());

        let other_kind = JobDbModel::new("move_chat", "default", args, &["archive"], 5, None);
        assert!(repo.insert_job_once(&other_kind, "q1").await.unwrap());
        let other_queue = JobDbModel::new(
            "move_video",
            "default",
            r#"{"queue_id":"q2","heartbeat_time":0,"continue":true}"#,
            &["archive"],
            5,
            None,
        );
        assert!(repo.insert_job_once(&other_queue, "q2").await.unwrap());
        assert_eq!(repo.list_jobs_by_kind("move_video").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_release_and_cancel_pending() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqlxJobRepository::new(pool);
        let running = JobDbModel::new("a", "default", "{}", &[], 1, None);
        repo.insert_job(&running).await.unwrap();
        let claimed = repo.claim_next("default", now_ms()).await.unwrap().unwrap();
        assert!(repo.release(&running.id, claimed.attempt).await.unwrap());
        let released = repo.get_job(&running.id).await.unwrap();
        assert_eq!(released.attempt, 0);
        assert_eq!(released.state(), Some(JobState::Retryable));

        let pending = JobDbModel::new("w", "default", "{}", &[], 1, Some(now_ms() + 60_000));
        repo.insert_job(&pending).await.unwrap();
        assert_eq!(repo.count_active_kind("w").await.unwrap(), 1);
        assert!(repo.cancel_pending(&pending.id).await.unwrap());
        assert!(!repo.cancel_pending(&pending.id).await.unwrap());
        assert_eq!(repo.count_active_kind("w").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requeue_running_without_tag() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqlxJobRepository::new(pool);
        let archive = JobDbModel::new("a", "default", "{}", &["archive"], 3, None);
        let watchdog = JobDbModel::new("watchdog", "default", "{}", &[], 1, None);
        repo.insert_job(&archive).await.unwrap();
        repo.insert_job(&watchdog).await.unwrap();
        repo.claim_next("default", now_ms()).await.unwrap();
        repo.claim_next("default", now_ms()).await.unwrap();

        assert_eq!(repo.requeue_running_without_tag("archive").await.unwrap(), 1);
        let running = repo.list_running("archive").await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, archive.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let (pool, _dir) = migrated_pool().await;
        let repo = Arc::new(SqlxJobRepository::new(pool));
        for _ in 0..20 {
            repo.insert_job(&JobDbModel::new("a", "default", "{}", &[], 1, None))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = repo.claim_next("default", now_ms()).await.unwrap() {
                    ids.push(job.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }
}
