use std::path::{Path, PathBuf};

use hound::WavReader;
use tokio::process::Command;
use tracing::info;

use crate::error::StageError;
use crate::schedule::processors::command::{run_tracked, ProgressStream};
use crate::schedule::processors::StageContext;
use crate::schedule::types::file_stem;

/// 语音识别引擎要求的采样率
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// 给定输入文件对应的临时 WAV 路径: `<目录>/<文件名>_clean.wav`
pub fn clean_wav_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}_clean.wav", file_stem(input)))
}

/// 使用 FFmpeg 提取音轨并转换为 16kHz 单声道 PCM WAV
///
/// # 参数
/// * `ctx` - 当前阶段的上下文，FFmpeg 进程会登记到进程注册表中以便取消
/// * `ffmpeg` - FFmpeg 可执行文件
/// * `input` - 输入的音视频文件
/// * `output` - 输出的 WAV 文件路径
///
/// # 注意
/// 此函数依赖于系统中安装的FFmpeg
pub async fn extract_wav(
    ctx: &StageContext,
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
) -> Result<(), StageError> {
    info!(job_id = ctx.job_id(), "Extracting audio from {}", input.display());

    let mut command = Command::new(ffmpeg);
    command
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg(TARGET_SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg("1")
        .arg(output);

    run_tracked(ctx, command, ProgressStream::Stdout, |_| {}).await
}

/// 读取 WAV 文件头，返回音频时长（秒）
pub fn wav_duration(path: &Path) -> Result<f64, StageError> {
    let reader = WavReader::open(path)
        .map_err(|e| StageError::input(format!("Failed to read WAV file {}: {}", path.display(), e)))?;

    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(StageError::input(format!("WAV file {} has no sample rate", path.display())));
    }

    // duration() 返回每个通道的样本数
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}
