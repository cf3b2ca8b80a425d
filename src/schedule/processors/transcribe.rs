use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{expect_params, srt, wrong_params, StageContext, StageProcessor};
use crate::asr::{AsrEngine, AsrParams};
use crate::audio::{clean_wav_path, extract_wav, wav_duration};
use crate::error::{JobError, StageError};
use crate::schedule::types::{
    file_stem, Job, JobParams, JobResult, JobType, TranscribeParams, TranscribeResult,
};

#[derive(Clone)]
pub struct TranscribeProcessor {
    asr: Arc<dyn AsrEngine>,
    ffmpeg: PathBuf,
}

impl TranscribeProcessor {
    pub fn new(asr: Arc<dyn AsrEngine>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            asr,
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn subtitle_path(input: &Path) -> PathBuf {
        input.with_file_name(format!("{}.srt", file_stem(input)))
    }

    async fn transcribe(
        &self,
        ctx: &StageContext,
        params: &TranscribeParams,
        wav: &Path,
        subtitle: &Path,
    ) -> Result<TranscribeResult, StageError> {
        ctx.report(5, "Extracting audio");
        extract_wav(ctx, &self.ffmpeg, &params.input, wav).await?;
        let duration_secs = wav_duration(wav)?;

        ctx.report(10, format!("Transcribing {:.0}s of audio", duration_secs));
        let mut asr_params = AsrParams::new();
        asr_params
            .set_language(params.options.language.clone())
            .set_model(params.options.model.clone())
            .set_threads(params.options.threads);

        // engine progress maps onto 11..=94, strictly between the stage's own reports
        let mut on_progress = |p: u8| ctx.report_percent(11 + i64::from(p) * 83 / 100);
        self.asr
            .transcribe(wav, subtitle, &asr_params, ctx, &mut on_progress)
            .await?;

        let content = tokio::fs::read_to_string(subtitle).await?;
        let segment_count = srt::parse(&content).len();
        ctx.report(95, format!("Transcribed {} segments", segment_count));

        Ok(TranscribeResult {
            subtitle_path: subtitle.to_path_buf(),
            segment_count,
            duration_secs,
            language: params.options.language.clone(),
        })
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[async_trait]
impl StageProcessor for TranscribeProcessor {
    fn job_type(&self) -> JobType {
        JobType::Transcribe
    }

    async fn process(&self, job: &Job, ctx: &StageContext) -> Result<JobResult, StageError> {
        let params = expect_params(job, |p| match p {
            JobParams::Transcribe(p) => Some(p),
            _ => None,
        })?;

        if !params.input.is_file() {
            return Err(StageError::input(format!("input file not found: {}", params.input.display())));
        }
        info!(job_id = %job.id, "Transcribing {}", params.input.display());

        let wav = clean_wav_path(&params.input);
        let subtitle = Self::subtitle_path(&params.input);
        let result = self.transcribe(ctx, params, &wav, &subtitle).await;

        // the wav only exists for the engine
        remove_if_exists(&wav).await;

        result.map(JobResult::Transcribe)
    }

    fn validate_params(&self, params: &JobParams) -> Result<(), JobError> {
        let JobParams::Transcribe(p) = params else {
            return Err(wrong_params(JobType::Transcribe, params));
        };

        if p.input.as_os_str().is_empty() {
            return Err(JobError::Validation("input is required".to_string()));
        }
        if !p.input.is_file() {
            return Err(JobError::Validation(format!("input file not found: {}", p.input.display())));
        }

        if let Some(lang) = &p.options.language {
            let valid = lang == "auto"
                || ((2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_lowercase()));
            if !valid {
                return Err(JobError::Validation(format!("Unsupported language: {}", lang)));
            }
        }

        if p.options.threads == Some(0) {
            return Err(JobError::Validation("threads must be at least 1".to_string()));
        }

        Ok(())
    }

    async fn cleanup(&self, job: &Job) -> Result<(), StageError> {
        if let JobParams::Transcribe(p) = &job.parameters {
            remove_if_exists(&clean_wav_path(&p.input)).await;
        }
        Ok(())
    }
}
