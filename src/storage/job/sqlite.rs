use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Alias, Expr, Iden, Order, Query, QueryStatementWriter, SqliteQueryBuilder};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use super::mapping::{encode_path, encode_time, row_to_job};
use super::JobStore;
use crate::error::JobError;
use crate::schedule::callback::{JobEvent, ProgressBroadcaster};
use crate::schedule::types::{Job, JobParams, JobStats, JobStatus, JobType, JobUpdate};

#[derive(Iden)]
enum Jobs {
    Table,
    Id,
    Status,
    CreatedAt,
}

/// Columns added after the first release, with the DDL used to add them.
const LATE_COLUMNS: &[(&str, &str)] = &[
    ("job_type", "TEXT DEFAULT 'transcribe'"),
    ("parent_job_id", "TEXT"),
    ("artifact_path", "TEXT"),
    ("message", "TEXT"),
];

pub struct SqliteJobStore {
    pool: SqlitePool,
    broadcaster: ProgressBroadcaster,
}

impl SqliteJobStore {
    pub async fn new(database_url: &str, broadcaster: ProgressBroadcaster) -> Result<Self, JobError> {
        info!("Initializing SQLite job store at {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // every connection to :memory: is its own database
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        let store = Self { pool, broadcaster };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), JobError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                parameters TEXT,
                result TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let existing: Vec<String> = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;

        for (column, ddl) in LATE_COLUMNS {
            if !existing.iter().any(|c| c == column) {
                sqlx::query(&format!("ALTER TABLE jobs ADD COLUMN {} {}", column, ddl))
                    .execute(&self.pool)
                    .await?;
                info!("Added {} column to jobs table", column);
            }
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_artifact_path ON jobs (artifact_path)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs (created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn current_status(&self, id: &str) -> Result<Option<JobStatus>, JobError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            JobStatus::try_from(status.as_str()).map_err(|reason| JobError::Corrupt {
                id: id.to_string(),
                reason,
            })
        })
        .transpose()
    }

    fn new_job_id() -> String {
        format!("job-{}", Uuid::new_v4())
    }

    /// Decode rows for listing. One unreadable row must not hide the rest.
    fn decode_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_job(&row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job row: {}", e),
            }
        }
        jobs
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, params: JobParams) -> Result<Job, JobError> {
        let job = Job::new(Self::new_job_id(), params, None);

        sqlx::query(
            r#"
            INSERT INTO jobs
            (id, job_type, status, progress, created_at, updated_at, parameters, parent_job_id, artifact_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(encode_time(&job.created_at))
        .bind(encode_time(&job.updated_at))
        .bind(serde_json::to_string(&job.parameters)?)
        .bind(&job.parent_job_id)
        .bind(job.artifact_path.as_deref().map(encode_path))
        .execute(&self.pool)
        .await?;

        self.broadcaster.publish(JobEvent::JobCreated(job.clone()));
        Ok(job)
    }

    async fn create_child(&self, parent_id: &str, params: JobParams) -> Result<Option<Job>, JobError> {
        let job = Job::new(Self::new_job_id(), params, Some(parent_id.to_string()));
        let artifact = job
            .artifact_path
            .as_deref()
            .map(encode_path)
            .ok_or_else(|| JobError::Validation("child job has no input artifact".to_string()))?;

        // One statement: the parent check, the idempotency check and the insert
        // cannot interleave with another writer.
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs
            (id, job_type, status, progress, created_at, updated_at, parameters, parent_job_id, artifact_path)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ? AND job_type IN ('acquire', 'download'))
              AND NOT EXISTS (SELECT 1 FROM jobs WHERE artifact_path = ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(encode_time(&job.created_at))
        .bind(encode_time(&job.updated_at))
        .bind(serde_json::to_string(&job.parameters)?)
        .bind(parent_id)
        .bind(&artifact)
        .bind(parent_id)
        .bind(&artifact)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            self.broadcaster.publish(JobEvent::JobCreated(job.clone()));
            return Ok(Some(job));
        }

        let parent = self.get(parent_id).await?;
        if parent.job_type != JobType::Acquire {
            return Err(JobError::Validation(format!(
                "parent job {} is a {} job, not acquire",
                parent_id, parent.job_type
            )));
        }
        Ok(None)
    }

    async fn get(&self, id: &str) -> Result<Job, JobError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        row_to_job(&row)
    }

    async fn list(&self) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await?;

        Ok(Self::decode_rows(rows))
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, JobError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Jobs::Table)
            .and_where(Expr::col(Jobs::Status).is_in(statuses.iter().map(|s| s.as_str())))
            .order_by(Jobs::CreatedAt, Order::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(Self::decode_rows(rows))
    }

    async fn find_by_artifact(&self, path: &Path) -> Result<Option<Job>, JobError> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE artifact_path = ? ORDER BY created_at ASC LIMIT 1",
        )
        .bind(encode_path(path))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn update_status_from(
        &self,
        id: &str,
        expected: &[JobStatus],
        update: JobUpdate,
    ) -> Result<(), JobError> {
        if expected.is_empty() {
            return match self.current_status(id).await? {
                Some(status) => Err(JobError::Concurrency {
                    id: id.to_string(),
                    status,
                }),
                None => Err(JobError::NotFound(id.to_string())),
            };
        }

        let result = update.result.as_ref().map(serde_json::to_string).transpose()?;
        let sql = format!(
            r#"
            UPDATE jobs
            SET progress = CASE WHEN status = 'running' AND ? = 'running'
                                THEN MAX(progress, ?) ELSE ? END,
                status = ?,
                updated_at = ?,
                result = ?,
                error = ?,
                message = COALESCE(?, message)
            WHERE id = ? AND status IN ({})
            RETURNING progress, message
            "#,
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(update.status.as_str())
            .bind(update.progress as i64)
            .bind(update.progress as i64)
            .bind(update.status.as_str())
            .bind(encode_time(&Utc::now()))
            .bind(result)
            .bind(&update.error)
            .bind(&update.message)
            .bind(id);
        for status in expected {
            query = query.bind(status.as_str());
        }

        let Some(row) = query.fetch_optional(&self.pool).await? else {
            return match self.current_status(id).await? {
                Some(status) => Err(JobError::Concurrency {
                    id: id.to_string(),
                    status,
                }),
                None => Err(JobError::NotFound(id.to_string())),
            };
        };

        let progress: i64 = row.try_get("progress")?;
        let message: Option<String> = row.try_get("message")?;
        let persisted = JobUpdate {
            progress: progress.clamp(0, 100) as u8,
            message,
            ..update
        };
        self.broadcaster.publish(JobEvent::update(id, &persisted));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), JobError> {
        let deleted = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }

        self.broadcaster.publish(JobEvent::JobDeleted {
            job_id: id.to_string(),
        });
        Ok(())
    }

    async fn delete_by_status(&self, statuses: &[JobStatus]) -> Result<u64, JobError> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let values: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let select = Query::select()
            .column(Jobs::Id)
            .from(Jobs::Table)
            .and_where(Expr::col(Jobs::Status).is_in(values.clone()))
            .to_string(SqliteQueryBuilder);
        let delete = Query::delete()
            .from_table(Jobs::Table)
            .and_where(Expr::col(Jobs::Status).is_in(values))
            .to_string(SqliteQueryBuilder);

        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = sqlx::query(&select)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<_, _>>()?;
        let deleted = sqlx::query(&delete).execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        for job_id in ids {
            self.broadcaster.publish(JobEvent::JobDeleted { job_id });
        }
        Ok(deleted)
    }

    async fn count_by_status(&self) -> Result<JobStats, JobError> {
        let sql = Query::select()
            .column(Jobs::Status)
            .expr_as(Expr::col(Jobs::Id).count(), Alias::new("count"))
            .from(Jobs::Table)
            .group_by_col(Jobs::Status)
            .to_string(SqliteQueryBuilder);

        let mut stats = JobStats::default();
        for row in sqlx::query(&sql).fetch_all(&self.pool).await? {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match JobStatus::try_from(status.as_str()) {
                Ok(status) => stats.add(status, count.max(0) as u64),
                Err(e) => warn!("Ignoring {} rows: {}", count, e),
            }
        }
        Ok(stats)
    }
}
