use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StageError;
use crate::schedule::processors::StageContext;

pub mod whisper_cli;

pub use whisper_cli::WhisperCliEngine;

#[derive(Debug, Clone, Default)]
pub struct AsrParams {
    pub language: Option<String>,
    pub model: Option<PathBuf>,
    pub threads: Option<u32>,
}

impl AsrParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_language(&mut self, language: Option<String>) -> &mut Self {
        self.language = language;
        self
    }

    pub fn set_model(&mut self, model: Option<PathBuf>) -> &mut Self {
        self.model = model;
        self
    }

    pub fn set_threads(&mut self, threads: Option<u32>) -> &mut Self {
        self.threads = threads;
        self
    }
}

/// Speech-to-text over a 16 kHz mono WAV file, producing a SubRip file.
///
/// `progress` receives the engine's own completion percentage (0..=100).
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(
        &self,
        wav: &Path,
        srt: &Path,
        params: &AsrParams,
        ctx: &StageContext,
        progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<(), StageError>;
}
