use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Acquire,
    Transcribe,
    Translate,
    Transcode,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Acquire => "acquire",
            JobType::Transcribe => "transcribe",
            JobType::Translate => "translate",
            JobType::Transcode => "transcode",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobType {
    type Error = String;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            // rows written before the stage was renamed still say "download"
            "acquire" | "download" => Ok(JobType::Acquire),
            "transcribe" => Ok(JobType::Transcribe),
            "translate" => Ok(JobType::Translate),
            "transcode" => Ok(JobType::Transcode),
            _ => Err(format!("Invalid job type: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Statuses a job may be in for a write of `self` to be legal.
    ///
    /// `Running -> Running` is the progress update path. Nothing moves back to `Queued`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[],
            JobStatus::Running => &[JobStatus::Queued, JobStatus::Running],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Running],
            JobStatus::Cancelled => &[JobStatus::Queued, JobStatus::Running],
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = String;
    fn try_from(status: &str) -> Result<Self, Self::Error> {
        match status {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: {}", status)),
        }
    }
}

/// Stage-specific job parameters, validated by the stage processor at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobParams {
    Acquire(AcquireParams),
    Transcribe(TranscribeParams),
    Translate(TranslateParams),
    Transcode(TranscodeParams),
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Acquire(_) => JobType::Acquire,
            JobParams::Transcribe(_) => JobType::Transcribe,
            JobParams::Translate(_) => JobType::Translate,
            JobParams::Transcode(_) => JobType::Transcode,
        }
    }

    /// The input artifact this job works on. Acquire jobs produce artifacts instead.
    pub fn artifact_path(&self) -> Option<PathBuf> {
        match self {
            JobParams::Acquire(_) => None,
            JobParams::Transcribe(p) => Some(p.input.clone()),
            JobParams::Translate(p) => Some(p.input.clone()),
            JobParams::Transcode(p) => Some(p.input.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireParams {
    /// http(s) URL, `file://` URL, local media file or directory of media files.
    pub source: String,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Create a transcribe job for every acquired artifact.
    #[serde(default = "default_chain")]
    pub chain: bool,
    /// Template for the chained transcribe jobs.
    #[serde(default)]
    pub transcribe: TranscribeOptions,
}

fn default_chain() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscribeOptions {
    #[serde(default)]
    pub language: Option<String>,
    /// Overrides the configured speech model for this job.
    #[serde(default)]
    pub model: Option<PathBuf>,
    #[serde(default)]
    pub threads: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeParams {
    pub input: PathBuf,
    #[serde(flatten)]
    pub options: TranscribeOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateParams {
    /// Subtitle file (.srt) to translate.
    pub input: PathBuf,
    pub target_lang: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
}

fn default_source_lang() -> String {
    "auto".to_string()
}

impl TranslateParams {
    pub fn output_path(&self) -> PathBuf {
        let stem = file_stem(&self.input);
        self.input
            .with_file_name(format!("{}.{}.srt", stem, self.target_lang))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeParams {
    pub input: PathBuf,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl TranscodeParams {
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("mp4"))
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobResult {
    Acquire(AcquireResult),
    Transcribe(TranscribeResult),
    Translate(TranslateResult),
    Transcode(TranscodeResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireResult {
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeResult {
    pub subtitle_path: PathBuf,
    pub segment_count: usize,
    pub duration_secs: f64,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResult {
    pub output_path: PathBuf,
    pub cue_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeResult {
    pub output_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parameters: JobParams,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Last progress message reported by the stage.
    pub message: Option<String>,
    pub parent_job_id: Option<String>,
    pub artifact_path: Option<PathBuf>,
}

impl Job {
    pub fn new(id: String, parameters: JobParams, parent_job_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type: parameters.job_type(),
            status: JobStatus::Queued,
            progress: 0,
            created_at: now,
            updated_at: now,
            artifact_path: parameters.artifact_path(),
            parameters,
            result: None,
            error: None,
            message: None,
            parent_job_id,
        }
    }
}

/// A status write as accepted by the job store.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn running(progress: u8, message: Option<String>) -> Self {
        Self {
            status: JobStatus::Running,
            progress: progress.min(100),
            result: None,
            error: None,
            message,
        }
    }

    pub fn completed(result: JobResult) -> Self {
        Self {
            status: JobStatus::Completed,
            progress: 100,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    pub fn failed(progress: u8, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: progress.min(100),
            result: None,
            error: Some(error.into()),
            message: None,
        }
    }

    pub fn cancelled(progress: u8) -> Self {
        Self {
            status: JobStatus::Cancelled,
            progress: progress.min(100),
            result: None,
            error: None,
            message: Some("Cancelled by user".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: i64,
    pub message: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl JobStats {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }
}
