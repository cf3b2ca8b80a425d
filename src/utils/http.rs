use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::StageError;

/// 从 URL 中提取文件名，忽略查询参数
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    match path.split_once('/') {
        Some((_, rest)) => rest
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("download")
            .to_string(),
        None => "download".to_string(),
    }
}

/// Where a download of `url` into `dest_dir` is written before it completes.
pub fn partial_download_path(url: &str, dest_dir: &Path) -> PathBuf {
    dest_dir.join(format!("{}.part", filename_from_url(url)))
}

/// Stream `url` into `dest_dir`, returning the final path.
///
/// The body is written to a `.part` file and renamed once complete. `on_progress`
/// gets the bytes received so far and the expected total when the server sent one.
pub async fn download_file<F>(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    token: &CancellationToken,
    mut on_progress: F,
) -> Result<PathBuf, StageError>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    info!("Starting download from URL: {}", url);

    let dest_path = dest_dir.join(filename_from_url(url));
    let partial = partial_download_path(url, dest_dir);

    // 创建目标目录（如果不存在）
    fs::create_dir_all(dest_dir).await?;

    let mut response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(StageError::backend(format!(
            "HTTP request failed with status: {}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut file = fs::File::create(&partial).await?;
    let mut received: u64 = 0;

    let outcome: Result<(), StageError> = async {
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(StageError::cancelled()),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            on_progress(received, total);
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    drop(file);
    if let Err(e) = outcome {
        if let Err(remove_err) = fs::remove_file(&partial).await {
            warn!("Failed to remove partial download {}: {}", partial.display(), remove_err);
        }
        return Err(e);
    }

    fs::rename(&partial, &dest_path).await?;
    info!("Download completed: {} ({} bytes)", dest_path.display(), received);
    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://cdn.example.com/media/talk.mp4"), "talk.mp4");
        assert_eq!(filename_from_url("https://cdn.example.com/media/talk.mp4?sig=abc#t=5"), "talk.mp4");
        assert_eq!(filename_from_url("https://cdn.example.com/media/"), "media");
        assert_eq!(filename_from_url("https://cdn.example.com"), "download");
    }

    #[test]
    fn test_partial_download_path() {
        assert_eq!(
            partial_download_path("http://host/a/b.webm", Path::new("/data/downloads")),
            PathBuf::from("/data/downloads/b.webm.part")
        );
    }

    #[tokio::test]
    async fn test_download_from_local_server() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = b"0123456789";
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });

        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("http://{}/files/clip.mp4", addr);
        let mut last = (0, None);
        let path = download_file(
            &reqwest::Client::new(),
            &url,
            dir.path(),
            &CancellationToken::new(),
            |received, total| last = (received, total),
        )
        .await
        .unwrap();

        assert_eq!(path, dir.path().join("clip.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
        assert_eq!(last, (10, Some(10)));
        assert!(!dir.path().join("clip.mp4.part").exists());
    }
}
