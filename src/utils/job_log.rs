use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Per-job log files, `<dir>/job_<id>.log`, one line per progress report and outcome.
#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("job_{}.log", job_id))
    }

    /// Append a timestamped line. Failures are logged and otherwise ignored.
    pub async fn append(&self, job_id: &str, line: &str) {
        if let Err(e) = self.try_append(job_id, line).await {
            warn!(job_id, "Failed to write job log: {}", e);
        }
    }

    async fn try_append(&self, job_id: &str, line: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(job_id))
            .await?;
        let entry = format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"), line);
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }

    /// The job's log, or `None` if it has none.
    pub async fn read(&self, job_id: &str) -> std::io::Result<Option<String>> {
        match fs::read_to_string(self.path(job_id)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn remove(&self, job_id: &str) {
        match fs::remove_file(self.path(job_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(job_id, "Failed to remove job log: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_read_remove() {
        let dir = TempDir::new().unwrap();
        let log = JobLog::new(dir.path().join("jobs"));

        assert_eq!(log.read("job-1").await.unwrap(), None);

        log.append("job-1", "started").await;
        log.append("job-1", "progress 50%").await;

        let content = log.read("job-1").await.unwrap().unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] started"));
        assert!(lines[1].ends_with("] progress 50%"));
        assert_eq!(log.path("job-1"), dir.path().join("jobs/job_job-1.log"));

        log.remove("job-1").await;
        assert_eq!(log.read("job-1").await.unwrap(), None);
    }
}
