//! Model downloading for built-in models
//!
//! Streams a model file into a temporary file next to the cache, hashing it
//! on the fly. The file is renamed into place only once the transfer completed
//! and its MD5 matches the digest published for the model.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use crate::models::ModelKind;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use md5::Md5;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::Instrument;

/// Outcome of a completed download
#[derive(Debug, Clone)]
pub struct DownloadedModel {
    pub kind: ModelKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the downloaded file
    pub sha256: String,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Downloads built-in models into a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Make sure `kind` is in the cache, downloading it when missing
    ///
    /// # Errors
    /// - Network errors during download
    /// - File system errors while writing into the cache
    pub async fn ensure_model(&self, kind: ModelKind, show_progress: bool) -> Result<PathBuf> {
        if self.cache.is_model_cached(kind) {
            log::debug!("Model already cached: {}", kind);
            return Ok(self.cache.get_model_path(kind));
        }

        let downloaded = self.download_model(kind, show_progress).await?;
        Ok(downloaded.path)
    }

    /// Download `kind` into the cache, replacing any existing copy
    ///
    /// # Errors
    /// - Network errors or non-success HTTP status
    /// - File system errors while writing into the cache
    pub async fn download_model(
        &self,
        kind: ModelKind,
        show_progress: bool,
    ) -> Result<DownloadedModel> {
        let url = kind.download_url();
        let final_path = self.cache.get_model_path(kind);
        let temp_path = final_path.with_extension("onnx.part");

        let span = tracing::info_span!("download", model = %kind, url = %url);
        log::info!("Downloading model {} from {}", kind, url);

        let progress = if show_progress {
            Self::create_progress_indicator()
        } else {
            ProgressIndicator::NoOp
        };
        progress.set_message(format!("Downloading {}", kind.file_name()));

        match self
            .download_file(&url, &temp_path, &progress)
            .instrument(span)
            .await
        {
            Ok((size_bytes, digests)) => {
                if let Err(e) = finalize_download(kind, &temp_path, &final_path, &digests) {
                    progress.finish_with_message("Download failed".to_string());
                    return Err(e);
                }
                progress.finish_with_message(format!("Downloaded {}", kind.file_name()));
                log::info!(
                    "Model {} cached at {} (sha256 {})",
                    kind,
                    final_path.display(),
                    digests.sha256
                );

                Ok(DownloadedModel {
                    kind,
                    path: final_path,
                    size_bytes,
                    sha256: digests.sha256,
                })
            },
            Err(e) => {
                if temp_path.exists() {
                    if let Err(cleanup_err) = fs::remove_file(&temp_path) {
                        log::warn!("Failed to remove partial download: {}", cleanup_err);
                    }
                }
                progress.finish_with_message("Download failed".to_string());
                Err(e)
            },
        }
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream `url` into `local_path`, returning the byte count and digests
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<(u64, FileDigests)> {
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(&format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                &format!("Download of {url} failed"),
                format!("HTTP {}", response.status()),
            ));
        }

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut sha256 = Sha256::new();
        let mut md5 = Md5::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            sha256.update(chunk);
            md5.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            progress.set_position(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        if downloaded == 0 {
            return Err(BgRemovalError::network_error(
                &format!("Download of {url} failed"),
                "empty response body",
            ));
        }

        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok((
            downloaded,
            FileDigests {
                md5: format!("{:x}", md5.finalize()),
                sha256: format!("{:x}", sha256.finalize()),
            },
        ))
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Lowercase hex digests of a model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha256: String,
}

/// Digests of a file on disk
///
/// # Errors
/// - File cannot be read
pub fn file_digests(path: &Path) -> Result<FileDigests> {
    let contents = fs::read(path)
        .map_err(|e| BgRemovalError::file_io_error("read file for hashing", path, &e))?;
    Ok(FileDigests {
        md5: format!("{:x}", Md5::digest(&contents)),
        sha256: format!("{:x}", Sha256::digest(&contents)),
    })
}

/// Compare `md5` against the published digest of `kind`
///
/// # Errors
/// - Digest mismatch, reported as a network error
pub fn verify_checksum(kind: ModelKind, md5: &str) -> Result<()> {
    if md5.eq_ignore_ascii_case(kind.md5()) {
        return Ok(());
    }
    Err(BgRemovalError::network_error(
        &format!("Checksum mismatch for {}", kind.file_name()),
        format!("expected md5 {}, got {md5}", kind.md5()),
    ))
}

/// Check a file on disk against the published digest of `kind`
///
/// # Errors
/// - File cannot be read
/// - Digest mismatch
pub fn verify_model_file(kind: ModelKind, path: &Path) -> Result<FileDigests> {
    let digests = file_digests(path)?;
    verify_checksum(kind, &digests.md5)?;
    Ok(digests)
}

/// Move a verified download into place; a mismatching file is deleted
fn finalize_download(
    kind: ModelKind,
    temp_path: &Path,
    final_path: &Path,
    digests: &FileDigests,
) -> Result<()> {
    if let Err(e) = verify_checksum(kind, &digests.md5) {
        if let Err(cleanup_err) = fs::remove_file(temp_path) {
            log::warn!("Failed to remove rejected download: {}", cleanup_err);
        }
        return Err(e);
    }
    fs::rename(temp_path, final_path)
        .map_err(|e| BgRemovalError::file_io_error("move downloaded model to cache", final_path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_digests() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();

        let digests = file_digests(&path).unwrap();
        assert_eq!(digests.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            digests.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(file_digests(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_verify_checksum() {
        assert!(verify_checksum(ModelKind::U2netp, ModelKind::U2netp.md5()).is_ok());
        assert!(verify_checksum(ModelKind::U2netp, &ModelKind::U2netp.md5().to_uppercase()).is_ok());

        let err = verify_checksum(ModelKind::U2netp, ModelKind::U2net.md5()).unwrap_err();
        assert!(matches!(err, BgRemovalError::Network(_)));
        assert!(err.to_string().contains("u2netp.onnx"));
    }

    #[test]
    fn test_mismatching_download_is_deleted_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let final_path = cache.get_model_path(ModelKind::U2netp);
        let temp_path = final_path.with_extension("onnx.part");
        fs::write(&temp_path, b"<html>Not Found</html>").unwrap();

        let digests = file_digests(&temp_path).unwrap();
        let result = finalize_download(ModelKind::U2netp, &temp_path, &final_path, &digests);

        assert!(matches!(result, Err(BgRemovalError::Network(_))));
        assert!(!temp_path.exists());
        assert!(!final_path.exists());
        assert!(!cache.is_model_cached(ModelKind::U2netp));
    }

    #[test]
    fn test_verify_model_file_rejects_wrong_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("u2net.onnx");
        fs::write(&path, b"truncated model").unwrap();

        assert!(matches!(
            verify_model_file(ModelKind::U2net, &path),
            Err(BgRemovalError::Network(_))
        ));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_ensure_model_uses_cached_copy() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let cached = cache.get_model_path(ModelKind::U2netp);
        fs::write(&cached, b"cached model").unwrap();

        let downloader = ModelDownloader::new(cache).unwrap();
        let path = downloader.ensure_model(ModelKind::U2netp, false).await.unwrap();
        assert_eq!(path, cached);
    }

    #[test]
    fn test_noop_progress_is_silent() {
        let progress = ProgressIndicator::NoOp;
        progress.set_length(10);
        progress.set_position(5);
        progress.set_message("hello".to_string());
        progress.finish_with_message("done".to_string());
    }
}
