use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use super::{expect_params, wrong_params, StageContext, StageProcessor};
use crate::error::{JobError, StageError};
use crate::schedule::types::{AcquireParams, AcquireResult, Job, JobParams, JobResult, JobType};
use crate::utils::http::{download_file, partial_download_path};

pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "avi", "mov", "m4v", "flv", "wmv", "mp3", "wav", "m4a", "flac", "ogg", "opus",
];

#[derive(Debug, PartialEq, Eq)]
enum Source {
    Remote(String),
    Local(PathBuf),
}

impl Source {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("source is required".to_string());
        }
        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(Source::Local(PathBuf::from(path)));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            reqwest::Url::parse(raw).map_err(|e| format!("invalid URL {}: {}", raw, e))?;
            return Ok(Source::Remote(raw.to_string()));
        }
        if raw.contains("://") {
            return Err(format!("unsupported source scheme: {}", raw));
        }
        Ok(Source::Local(PathBuf::from(raw)))
    }
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Media files directly inside `dir`, sorted by path.
async fn media_in_dir(dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_media_file(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Brings media into the working area: downloads a URL, or picks up a local
/// file or every media file of a local directory.
pub struct AcquireProcessor {
    client: reqwest::Client,
    downloads_dir: PathBuf,
}

impl AcquireProcessor {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            downloads_dir: downloads_dir.into(),
        }
    }

    fn output_dir(&self, params: &AcquireParams) -> PathBuf {
        params
            .output_dir
            .clone()
            .unwrap_or_else(|| self.downloads_dir.clone())
    }

    async fn download(&self, ctx: &StageContext, url: &str, dir: &Path) -> Result<Vec<PathBuf>, StageError> {
        ctx.report(5, format!("Downloading {}", url));
        let mut last_percent = 5;
        let path = download_file(&self.client, url, dir, ctx.token(), |received, total| {
            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = 5 + (received.min(total) * 90 / total) as i64;
                if percent > last_percent {
                    last_percent = percent;
                    ctx.report(percent, format!("Downloaded {} of {} bytes", received, total));
                }
            }
        })
        .await?;
        Ok(vec![path])
    }

    async fn collect_local(&self, ctx: &StageContext, path: &Path) -> Result<Vec<PathBuf>, StageError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| StageError::input(format!("cannot access {}: {}", path.display(), e)))?;

        if metadata.is_dir() {
            ctx.report(10, format!("Scanning {}", path.display()));
            media_in_dir(path).await
        } else if is_media_file(path) {
            Ok(vec![path.to_path_buf()])
        } else {
            Err(StageError::input(format!("not a media file: {}", path.display())))
        }
    }
}

#[async_trait]
impl StageProcessor for AcquireProcessor {
    fn job_type(&self) -> JobType {
        JobType::Acquire
    }

    async fn process(&self, job: &Job, ctx: &StageContext) -> Result<JobResult, StageError> {
        let params = expect_params(job, |p| match p {
            JobParams::Acquire(p) => Some(p),
            _ => None,
        })?;

        let artifacts = match Source::parse(&params.source).map_err(StageError::input)? {
            Source::Remote(url) => self.download(ctx, &url, &self.output_dir(params)).await?,
            Source::Local(path) => self.collect_local(ctx, &path).await?,
        };

        info!(job_id = %job.id, "Acquired {} artifacts from {}", artifacts.len(), params.source);
        ctx.report(95, format!("Acquired {} artifacts", artifacts.len()));
        Ok(JobResult::Acquire(AcquireResult { artifacts }))
    }

    fn validate_params(&self, params: &JobParams) -> Result<(), JobError> {
        let JobParams::Acquire(p) = params else {
            return Err(wrong_params(JobType::Acquire, params));
        };

        match Source::parse(&p.source).map_err(JobError::Validation)? {
            Source::Remote(_) => Ok(()),
            Source::Local(path) if path.is_dir() => Ok(()),
            Source::Local(path) if path.is_file() => {
                if is_media_file(&path) {
                    Ok(())
                } else {
                    Err(JobError::Validation(format!("not a media file: {}", path.display())))
                }
            }
            Source::Local(path) => Err(JobError::Validation(format!("source not found: {}", path.display()))),
        }
    }

    async fn cleanup(&self, job: &Job) -> Result<(), StageError> {
        let JobParams::Acquire(p) = &job.parameters else {
            return Ok(());
        };
        if let Ok(Source::Remote(url)) = Source::parse(&p.source) {
            let partial = partial_download_path(&url, &self.output_dir(p));
            match tokio::fs::remove_file(&partial).await {
                Ok(()) => info!(job_id = %job.id, "Removed {}", partial.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %job.id, "Failed to remove {}: {}", partial.display(), e),
            }
        }
        Ok(())
    }
}
