use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::JobError;
use crate::schedule::types::{Job, JobParams, JobResult, JobStatus, JobType};

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(id: &str, column: &str, value: &str) -> Result<DateTime<Utc>, JobError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("{}: {}", column, e)))
}

pub fn encode_path(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

fn corrupt(id: &str, reason: impl Into<String>) -> JobError {
    JobError::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

/// Decode stored parameters. Rows written before parameters were tagged carry
/// no `type` field; the `job_type` column supplies it.
fn decode_params(id: &str, job_type: JobType, raw: Option<String>) -> Result<JobParams, JobError> {
    let raw = raw.unwrap_or_else(|| "{}".to_string());
    let mut value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| corrupt(id, format!("parameters: {}", e)))?;

    if let Some(object) = value.as_object_mut() {
        object
            .entry("type")
            .or_insert_with(|| serde_json::Value::String(job_type.as_str().to_string()));
    }

    serde_json::from_value(value).map_err(|e| corrupt(id, format!("parameters: {}", e)))
}

pub fn row_to_job(row: &SqliteRow) -> Result<Job, JobError> {
    let id: String = row.try_get("id")?;

    // legacy rows predate the job_type column and were all transcriptions
    let job_type = match row.try_get::<Option<String>, _>("job_type")? {
        Some(t) => JobType::try_from(t.as_str()).map_err(|e| corrupt(&id, e))?,
        None => JobType::Transcribe,
    };

    let status: String = row.try_get("status")?;
    let status = JobStatus::try_from(status.as_str()).map_err(|e| corrupt(&id, e))?;

    let progress: i64 = row.try_get("progress")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let parameters = decode_params(&id, job_type, row.try_get("parameters")?)?;

    let result: Option<String> = row.try_get("result")?;
    let result = result
        .map(|r| serde_json::from_str::<JobResult>(&r))
        .transpose()
        .map_err(|e| corrupt(&id, format!("result: {}", e)))?;

    let artifact_path: Option<String> = row.try_get("artifact_path")?;

    Ok(Job {
        job_type,
        status,
        progress: progress.clamp(0, 100) as u8,
        created_at: decode_time(&id, "created_at", &created_at)?,
        updated_at: decode_time(&id, "updated_at", &updated_at)?,
        parameters,
        result,
        error: row.try_get("error")?,
        message: row.try_get("message")?,
        parent_job_id: row.try_get("parent_job_id")?,
        artifact_path: artifact_path.map(PathBuf::from),
        id,
    })
}
