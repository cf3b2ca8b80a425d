use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::asr::{AsrEngine, AsrParams};
use crate::error::StageError;
use crate::schedule::processors::command::{run_tracked, ProgressStream};
use crate::schedule::processors::StageContext;

/// Runs a whisper.cpp style command line (`whisper-cli`) as a tracked process.
pub struct WhisperCliEngine {
    binary: PathBuf,
    model: PathBuf,
}

impl WhisperCliEngine {
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
        }
    }

    fn build_command(&self, wav: &Path, srt: &Path, params: &AsrParams) -> Command {
        let model = params.model.as_deref().unwrap_or(&self.model);
        // -of takes the output path without the extension
        let output_base = srt.with_extension("");

        let mut command = Command::new(&self.binary);
        command
            .arg("-m")
            .arg(model)
            .arg("-f")
            .arg(wav)
            .arg("-osrt")
            .arg("-of")
            .arg(output_base)
            .arg("-pp");

        // 未指定语言时让模型自动检测
        command
            .arg("-l")
            .arg(params.language.as_deref().unwrap_or("auto"));

        if let Some(threads) = params.threads {
            command.arg("-t").arg(threads.to_string());
        }

        command
    }
}

/// Parse `... progress = 42%` as printed with `-pp`.
pub fn parse_progress(line: &str) -> Option<u8> {
    let rest = &line[line.find("progress =")? + "progress =".len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u32>().ok().map(|p| p.min(100) as u8)
}

#[async_trait]
impl AsrEngine for WhisperCliEngine {
    async fn transcribe(
        &self,
        wav: &Path,
        srt: &Path,
        params: &AsrParams,
        ctx: &StageContext,
        progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<(), StageError> {
        info!(job_id = ctx.job_id(), "Transcribing {}", wav.display());

        let command = self.build_command(wav, srt, params);
        run_tracked(ctx, command, ProgressStream::Stderr, |line| {
            if let Some(p) = parse_progress(line) {
                progress(p);
            }
        })
        .await?;

        if !tokio::fs::try_exists(srt).await? {
            return Err(StageError::process(format!(
                "{} produced no subtitle file at {}",
                self.binary.display(),
                srt.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("whisper_print_progress_callback: progress =  35%"), Some(35));
        assert_eq!(parse_progress("progress = 100%"), Some(100));
        assert_eq!(parse_progress("[00:00.000 --> 00:02.000]  hello"), None);
        assert_eq!(parse_progress("progress = %"), None);
    }

    #[test]
    fn test_command_line() {
        let engine = WhisperCliEngine::new("whisper-cli", "/models/base.bin");
        let mut params = AsrParams::new();
        params.set_language(Some("sr".to_string())).set_threads(Some(4));

        let command = engine.build_command(Path::new("/tmp/a_clean.wav"), Path::new("/tmp/a.srt"), &params);
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-m", "/models/base.bin", "-f", "/tmp/a_clean.wav", "-osrt", "-of", "/tmp/a", "-pp",
                "-l", "sr", "-t", "4"
            ]
        );
    }
}
