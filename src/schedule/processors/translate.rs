use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{expect_params, srt, wrong_params, StageContext, StageProcessor};
use crate::error::{JobError, StageError};
use crate::schedule::types::{Job, JobParams, JobResult, JobType, TranslateResult};

/// Machine translation of a single piece of text.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, StageError>;
}

/// A LibreTranslate compatible `/translate` endpoint.
pub struct LibreTranslateBackend {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl LibreTranslateBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TranslationBackend for LibreTranslateBackend {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, StageError> {
        let response = self
            .client
            .post(&self.url)
            .json(&TranslateRequest {
                q: text,
                source,
                target,
                format: "text",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::backend(format!(
                "translation request failed with status {}: {}",
                status,
                body.trim()
            )));
        }

        let body: TranslateResponse = response.json().await?;
        Ok(body.translated_text)
    }
}

pub struct TranslateProcessor {
    backend: Arc<dyn TranslationBackend>,
}

impl TranslateProcessor {
    pub fn new(backend: Arc<dyn TranslationBackend>) -> Self {
        Self { backend }
    }

    fn partial_path(output: &Path) -> PathBuf {
        output.with_extension("srt.part")
    }
}

#[async_trait]
impl StageProcessor for TranslateProcessor {
    fn job_type(&self) -> JobType {
        JobType::Translate
    }

    async fn process(&self, job: &Job, ctx: &StageContext) -> Result<JobResult, StageError> {
        let params = expect_params(job, |p| match p {
            JobParams::Translate(p) => Some(p),
            _ => None,
        })?;

        let content = tokio::fs::read_to_string(&params.input)
            .await
            .map_err(|e| StageError::input(format!("cannot read {}: {}", params.input.display(), e)))?;
        let mut cues = srt::parse(&content);
        let total = cues.len();
        info!(job_id = %job.id, "Translating {} cues to {}", total, params.target_lang);
        ctx.report(5, format!("Translating {} cues", total));

        for (i, cue) in cues.iter_mut().enumerate() {
            ctx.check_cancelled()?;
            cue.text = self
                .backend
                .translate(&cue.text, &params.source_lang, &params.target_lang)
                .await?;
            ctx.report_percent(5 + ((i + 1) * 90 / total) as i64);
        }
        ctx.check_cancelled()?;

        let output = params.output_path();
        let partial = Self::partial_path(&output);
        tokio::fs::write(&partial, srt::render(&cues)).await?;
        tokio::fs::rename(&partial, &output).await?;

        Ok(JobResult::Translate(TranslateResult {
            output_path: output,
            cue_count: total,
        }))
    }

    fn validate_params(&self, params: &JobParams) -> Result<(), JobError> {
        let JobParams::Translate(p) = params else {
            return Err(wrong_params(JobType::Translate, params));
        };

        let is_srt = p
            .input
            .extension()
            .map(|e| e.eq_ignore_ascii_case("srt"))
            .unwrap_or(false);
        if !is_srt {
            return Err(JobError::Validation(format!("input must be an .srt file: {}", p.input.display())));
        }
        if !p.input.is_file() {
            return Err(JobError::Validation(format!("input file not found: {}", p.input.display())));
        }

        let lang_ok = |lang: &str| !lang.is_empty() && lang.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
        if !lang_ok(&p.target_lang) {
            return Err(JobError::Validation(format!("invalid target language: {:?}", p.target_lang)));
        }
        if !lang_ok(&p.source_lang) {
            return Err(JobError::Validation(format!("invalid source language: {:?}", p.source_lang)));
        }
        if p.target_lang == p.source_lang {
            return Err(JobError::Validation("source and target language are the same".to_string()));
        }

        Ok(())
    }

    async fn cleanup(&self, job: &Job) -> Result<(), StageError> {
        if let JobParams::Translate(p) = &job.parameters {
            let partial = Self::partial_path(&p.output_path());
            match tokio::fs::remove_file(&partial).await {
                Ok(()) => info!(job_id = %job.id, "Removed {}", partial.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %job.id, "Failed to remove {}: {}", partial.display(), e),
            }
        }
        Ok(())
    }
}
