use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::command::{capture_stdout, run_tracked, ProgressStream};
use super::{expect_params, wrong_params, StageContext, StageProcessor};
use crate::error::{JobError, StageError};
use crate::schedule::types::{Job, JobParams, JobResult, JobType, TranscodeParams, TranscodeResult};

/// Re-encodes video to H.264/AAC MP4 with ffmpeg.
pub struct TranscodeProcessor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl TranscodeProcessor {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn partial_path(output: &Path) -> PathBuf {
        output.with_extension("part.mp4")
    }

    /// Media duration in seconds, if ffprobe can tell.
    async fn probe_duration(&self, ctx: &StageContext, input: &Path) -> Option<f64> {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input);

        match capture_stdout(ctx, command).await {
            Ok(out) => out.trim().parse::<f64>().ok().filter(|d| *d > 0.0),
            Err(e) => {
                warn!(job_id = ctx.job_id(), "ffprobe failed, progress will be coarse: {}", e);
                None
            }
        }
    }

    fn build_command(&self, input: &Path, partial: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-c:v", "libx264", "-preset", "medium", "-crf", "23"])
            .args(["-c:a", "aac", "-b:a", "128k"])
            .args(["-movflags", "+faststart"])
            .args(["-progress", "pipe:1", "-nostats"])
            .arg(partial);
        command
    }

    async fn transcode(
        &self,
        ctx: &StageContext,
        params: &TranscodeParams,
        partial: &Path,
    ) -> Result<(), StageError> {
        ctx.report(2, "Probing input");
        let duration = self.probe_duration(ctx, &params.input).await;
        ctx.check_cancelled()?;

        ctx.report(10, "Transcoding");
        let command = self.build_command(&params.input, partial);
        run_tracked(ctx, command, ProgressStream::Stdout, |line| {
            if let (Some(total), Some(done)) = (duration, parse_out_time(line)) {
                ctx.report_percent(progress_percent(done, total));
            }
        })
        .await
    }
}

/// Seconds encoded so far, from an `out_time_ms=` line of `-progress` output.
/// Despite the name ffmpeg reports microseconds there.
pub fn parse_out_time(line: &str) -> Option<f64> {
    let value = line.strip_prefix("out_time_ms=")?;
    let micros = value.trim().parse::<i64>().ok()?;
    Some(micros.max(0) as f64 / 1_000_000.0)
}

/// Map encoded seconds onto 10..=95.
pub fn progress_percent(done: f64, total: f64) -> i64 {
    let fraction = (done / total).clamp(0.0, 1.0);
    (10.0 + fraction * 85.0) as i64
}

async fn remove_partial(job_id: &str, partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => info!(job_id, "Removed {}", partial.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(job_id, "Failed to remove {}: {}", partial.display(), e),
    }
}

#[async_trait]
impl StageProcessor for TranscodeProcessor {
    fn job_type(&self) -> JobType {
        JobType::Transcode
    }

    async fn process(&self, job: &Job, ctx: &StageContext) -> Result<JobResult, StageError> {
        let params = expect_params(job, |p| match p {
            JobParams::Transcode(p) => Some(p),
            _ => None,
        })?;

        if !params.input.is_file() {
            return Err(StageError::input(format!("input file not found: {}", params.input.display())));
        }

        let output = params.output_path();
        let partial = Self::partial_path(&output);
        info!(job_id = %job.id, "Transcoding {} -> {}", params.input.display(), output.display());

        if let Err(e) = self.transcode(ctx, params, &partial).await {
            remove_partial(&job.id, &partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &output).await?;
        let size_bytes = tokio::fs::metadata(&output).await?.len();

        Ok(JobResult::Transcode(TranscodeResult {
            output_path: output,
            size_bytes,
        }))
    }

    fn validate_params(&self, params: &JobParams) -> Result<(), JobError> {
        let JobParams::Transcode(p) = params else {
            return Err(wrong_params(JobType::Transcode, params));
        };

        if !p.input.is_file() {
            return Err(JobError::Validation(format!("input file not found: {}", p.input.display())));
        }
        if p.output_path() == p.input {
            return Err(JobError::Validation(format!(
                "output would overwrite the input {}; set an explicit output path",
                p.input.display()
            )));
        }

        Ok(())
    }

    async fn cleanup(&self, job: &Job) -> Result<(), StageError> {
        if let JobParams::Transcode(p) = &job.parameters {
            remove_partial(&job.id, &Self::partial_path(&p.output_path())).await;
        }
        Ok(())
    }
}
