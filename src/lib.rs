pub mod asr;
pub mod audio;
pub mod config;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

use std::sync::Arc;

use config::{Config, CONFIG};
use schedule::processors::translate::LibreTranslateBackend;
use schedule::{
    AcquireProcessor, JobManager, ProgressBroadcaster, Processors, TranscodeProcessor,
    TranscribeProcessor, TranslateProcessor,
};
use storage::SqliteJobStore;
use utils::job_log::JobLog;

pub struct AppContext {
    pub job_manager: Arc<JobManager>,
}

pub fn init_env() {
    dotenv::dotenv().ok();

    // 确保数据目录存在
    let mut dirs = vec![CONFIG.data_dir.clone(), CONFIG.downloads_dir(), CONFIG.job_log_dir()];
    dirs.extend(CONFIG.database_dir());
    for dir in dirs {
        std::fs::create_dir_all(&dir).unwrap_or_else(|e| {
            eprintln!("Failed to create directory {}: {}", dir.display(), e);
        });
    }
}

/// The default processor for every stage, wired to the configured tools.
pub fn default_processors(config: &Config) -> Processors {
    let asr = Arc::new(asr::WhisperCliEngine::new(&config.whisper_bin, &config.whisper_model));
    let translator = Arc::new(LibreTranslateBackend::new(config.translate_url.clone()));

    let mut processors = Processors::new();
    processors
        .register(Arc::new(AcquireProcessor::new(config.downloads_dir())))
        .register(Arc::new(TranscribeProcessor::new(asr, &config.ffmpeg)))
        .register(Arc::new(TranslateProcessor::new(translator)))
        .register(Arc::new(TranscodeProcessor::new(&config.ffmpeg, &config.ffprobe)));
    processors
}

/// Open the job store and build the job manager.
pub async fn build_context(config: &Config, processors: Processors) -> anyhow::Result<AppContext> {
    let broadcaster = ProgressBroadcaster::new(config.event_capacity);
    let store = SqliteJobStore::new(&config.database_url, broadcaster.clone()).await?;

    let job_manager = JobManager::new(
        Arc::new(store),
        processors,
        broadcaster,
        JobLog::new(config.job_log_dir()),
        config.kill_grace,
    );

    Ok(AppContext {
        job_manager: Arc::new(job_manager),
    })
}
