use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

use crate::error::VmError;

/// Where base images come from.
#[allow(async_fn_in_trait)] // no Send bound needed, everything runs on the caller's task
pub trait ImageSource {
    /// Fetch `url` into `dest`. On error `dest` must not exist.
    async fn fetch(&self, name: &str, url: &str, dest: &Path) -> Result<(), VmError>;
}

/// `<dest>.part`, the in-flight download path for `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut s = OsString::from(dest.as_os_str());
    s.push(".part");
    PathBuf::from(s)
}

/// Downloads over HTTP(S); plain paths and `file://` URLs are copied.
#[derive(Debug, Clone, Default)]
pub struct HttpImageSource;

impl ImageSource for HttpImageSource {
    async fn fetch(&self, name: &str, url: &str, dest: &Path) -> Result<(), VmError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                VmError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        let tmp_path = partial_path(dest);

        // A .part left behind by an interrupted run is never resumed.
        if tokio::fs::remove_file(&tmp_path).await.is_ok() {
            tracing::warn!(name, path = %tmp_path.display(), "removed stale partial download");
        }

        let result = if url.starts_with("http://") || url.starts_with("https://") {
            download(name, url, &tmp_path).await
        } else {
            copy_local(name, url.strip_prefix("file://").unwrap_or(url), &tmp_path).await
        };

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        tokio::fs::rename(&tmp_path, dest)
            .await
            .map_err(|e| {
                VmError::io(
                    format!("renaming {} to {}", tmp_path.display(), dest.display()),
                    e,
                )
            })?;

        tracing::info!(name, path = %dest.display(), "base image ready");
        Ok(())
    }
}

fn download_failed(name: &str, message: String) -> VmError {
    VmError::DownloadFailed {
        name: name.to_string(),
        message,
        source: None,
    }
}

async fn copy_local(name: &str, source: &str, tmp_path: &Path) -> Result<(), VmError> {
    let source = Path::new(source);
    if !source.is_file() {
        return Err(download_failed(
            name,
            format!("base image not found: {}", source.display()),
        ));
    }
    tracing::info!(name, source = %source.display(), "copying local base image");
    tokio::fs::copy(source, tmp_path)
        .await
        .map_err(|e| VmError::DownloadFailed {
            name: name.to_string(),
            message: format!("copying {}", source.display()),
            source: Some(Box::new(e)),
        })?;
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Stream `url` into `tmp_path`. No retries: transport errors surface as-is.
async fn download(name: &str, url: &str, tmp_path: &Path) -> Result<(), VmError> {
    tracing::info!(name, url, "downloading base image");

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| VmError::DownloadFailed {
            name: name.to_string(),
            message: "building HTTP client".into(),
            source: Some(Box::new(e)),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| VmError::DownloadFailed {
            name: name.to_string(),
            message: format!("request to {url} failed"),
            source: Some(Box::new(e)),
        })?;

    if !response.status().is_success() {
        return Err(download_failed(
            name,
            format!("HTTP {} from {url}", response.status()),
        ));
    }

    let expected = response.content_length();
    let pb = progress_bar(expected.unwrap_or(0));

    let mut file = tokio::fs::File::create(tmp_path)
        .await
        .map_err(|e| VmError::io(format!("creating temp file {}", tmp_path.display()), e))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| VmError::DownloadFailed {
            name: name.to_string(),
            message: "error reading response body".into(),
            source: Some(Box::new(e)),
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| VmError::DownloadFailed {
                name: name.to_string(),
                message: format!("writing {}", tmp_path.display()),
                source: Some(Box::new(e)),
            })?;
        written += chunk.len() as u64;
        pb.inc(chunk.len() as u64);
    }

    file.sync_all().await.map_err(|e| VmError::DownloadFailed {
        name: name.to_string(),
        message: format!("flushing {}", tmp_path.display()),
        source: Some(Box::new(e)),
    })?;
    pb.finish_and_clear();

    if let Some(expected) = expected
        && written != expected
    {
        return Err(download_failed(
            name,
            format!("truncated download: got {written} of {expected} bytes"),
        ));
    }

    tracing::debug!(name, bytes = written, "download complete");
    Ok(())
}
