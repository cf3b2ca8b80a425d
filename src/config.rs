use std::env;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::schedule::callback::DEFAULT_EVENT_CAPACITY;

const DATABASE_URL: &str = "sqlite://./mediaflow_data/jobs.db?mode=rwc";
const DATA_DIR: &str = "./mediaflow_data";
const LOG_DIR: &str = "./logs";
const BIND_ADDR: &str = "127.0.0.1:7200";
const WHISPER_MODEL: &str = "./models/ggml-large-v3.bin";
const TRANSLATE_URL: &str = "http://127.0.0.1:5000/translate";
const KILL_GRACE_MS: u64 = 3000;

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub bind_addr: String,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub whisper_bin: PathBuf,
    pub whisper_model: PathBuf,
    pub translate_url: String,
    /// How long a terminated process tree gets before SIGKILL.
    pub kill_grace: Duration,
    pub event_capacity: usize,
}

/// 先读进程环境变量，再读 .env，最后使用默认值
fn lookup(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
}

fn lookup_or(key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn lookup_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                eprintln!("Ignoring invalid value for {}: {}", key, raw);
                default
            }
        },
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: lookup_or("MEDIAFLOW_DATABASE_URL", DATABASE_URL),
            data_dir: lookup_or("MEDIAFLOW_DATA_DIR", DATA_DIR).into(),
            log_dir: lookup_or("MEDIAFLOW_LOG_DIR", LOG_DIR).into(),
            bind_addr: lookup_or("MEDIAFLOW_BIND_ADDR", BIND_ADDR),
            ffmpeg: lookup_or("MEDIAFLOW_FFMPEG", "ffmpeg").into(),
            ffprobe: lookup_or("MEDIAFLOW_FFPROBE", "ffprobe").into(),
            whisper_bin: lookup_or("MEDIAFLOW_WHISPER_BIN", "whisper-cli").into(),
            whisper_model: lookup_or("MEDIAFLOW_WHISPER_MODEL", WHISPER_MODEL).into(),
            translate_url: lookup_or("MEDIAFLOW_TRANSLATE_URL", TRANSLATE_URL),
            kill_grace: Duration::from_millis(lookup_parsed("MEDIAFLOW_KILL_GRACE_MS", KILL_GRACE_MS)),
            event_capacity: lookup_parsed("MEDIAFLOW_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY).max(1),
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn job_log_dir(&self) -> PathBuf {
        self.log_dir.join("jobs")
    }

    /// Filesystem directory of the sqlite database, if the URL points at a file.
    pub fn database_dir(&self) -> Option<PathBuf> {
        let path = self.database_url.strip_prefix("sqlite://")?;
        let path = path.split('?').next()?;
        if path.is_empty() || path.starts_with(":memory:") {
            return None;
        }
        PathBuf::from(path).parent().map(|p| p.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DATABASE_URL.to_string(),
            data_dir: DATA_DIR.into(),
            log_dir: LOG_DIR.into(),
            bind_addr: BIND_ADDR.to_string(),
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            whisper_bin: "whisper-cli".into(),
            whisper_model: WHISPER_MODEL.into(),
            translate_url: TRANSLATE_URL.to_string(),
            kill_grace: Duration::from_millis(KILL_GRACE_MS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
