//! Download-if-missing for model, voice and config artifacts.
//!
//! Files are streamed to `<name>.part` next to their destination and only
//! renamed into place after the byte count matches the declared content
//! length (and the SHA-256, when one is configured). Any mismatch is an
//! [`ScriptvoxError::DownloadIntegrityError`] and the partial file is removed.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{ScriptvoxError, ScriptvoxResult};

/// A file expected in the models directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name, also the last URL segment
    pub filename: String,
    /// Optional lowercase hex SHA-256
    pub sha256: Option<String>,
}

impl Artifact {
    /// Artifact without a digest
    pub fn new<S: Into<String>>(filename: S) -> Self {
        Self {
            filename: filename.into(),
            sha256: None,
        }
    }

    /// Require a SHA-256 digest
    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, sha256: S) -> Self {
        self.sha256 = Some(sha256.into().to_ascii_lowercase());
        self
    }
}

/// Fetches missing artifacts from a release URL
#[derive(Debug, Clone)]
pub struct AssetDownloader {
    client: reqwest::Client,
    base_url: String,
    target_dir: PathBuf,
}

impl AssetDownloader {
    /// Downloader for `base_url` writing into `target_dir`
    pub fn new<U: Into<String>, P: Into<PathBuf>>(base_url: U, target_dir: P) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            target_dir: target_dir.into(),
        }
    }

    /// Directory artifacts are stored in
    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Make sure every artifact exists locally, downloading the missing ones
    /// in order.
    ///
    /// # Errors
    ///
    /// Stops at the first network, file or integrity failure.
    pub async fn ensure_all(&self, artifacts: &[Artifact]) -> ScriptvoxResult<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            paths.push(self.ensure(artifact).await?);
        }
        Ok(paths)
    }

    /// Make sure one artifact exists locally.
    ///
    /// # Errors
    ///
    /// Returns a network error for transport failures or non-success status,
    /// and an integrity error when the download is short, long or corrupt.
    pub async fn ensure(&self, artifact: &Artifact) -> ScriptvoxResult<PathBuf> {
        let destination = self.target_dir.join(&artifact.filename);
        if tokio::fs::try_exists(&destination).await? {
            tracing::debug!(file = %artifact.filename, "Artifact already present");
            return Ok(destination);
        }
        tokio::fs::create_dir_all(&self.target_dir).await?;

        let partial = self.target_dir.join(format!("{}.part", artifact.filename));
        let result = self.download(artifact, &partial).await;
        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, &destination).await?;
        tracing::info!(file = %artifact.filename, "Artifact downloaded");
        Ok(destination)
    }

    async fn download(&self, artifact: &Artifact, partial: &Path) -> ScriptvoxResult<()> {
        let url = format!("{}/{}", self.base_url, artifact.filename);
        tracing::info!(%url, "Downloading artifact");

        let mut response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ScriptvoxError::network(format!(
                "GET {url} returned HTTP {}",
                response.status()
            )));
        }
        let declared = response.content_length();

        let mut file = tokio::fs::File::create(partial).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        verify_length(&artifact.filename, declared, written)?;
        if let Some(expected) = &artifact.sha256 {
            let actual = format!("{:x}", hasher.finalize());
            if &actual != expected {
                return Err(ScriptvoxError::download_integrity(
                    &artifact.filename,
                    format!("SHA-256 {actual} does not match expected {expected}"),
                ));
            }
        }
        Ok(())
    }
}

/// Compare the received byte count with the declared content length.
///
/// A response without a declared length cannot be checked and is accepted.
///
/// # Errors
///
/// Returns an integrity error on mismatch.
pub fn verify_length(filename: &str, declared: Option<u64>, received: u64) -> ScriptvoxResult<()> {
    match declared {
        Some(expected) if expected != received => Err(ScriptvoxError::download_integrity(
            filename,
            format!("received {received} bytes, server declared {expected}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_verify_length() {
        assert!(verify_length("a.bin", Some(10), 10).is_ok());
        assert!(verify_length("a.bin", None, 3).is_ok());
        let err = verify_length("a.bin", Some(10), 9).unwrap_err();
        assert!(matches!(
            err,
            ScriptvoxError::DownloadIntegrityError { ref file, .. } if file == "a.bin"
        ));
    }

    #[test(tokio::test)]
    async fn test_downloads_missing_artifact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/voices-v1.0.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"voice-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = AssetDownloader::new(format!("{}/", server.uri()), dir.path());
        let artifact = Artifact::new("voices-v1.0.bin");

        let path = downloader.ensure(&artifact).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"voice-bytes");
        assert!(!dir.path().join("voices-v1.0.bin.part").exists());

        // second call finds the file and does not hit the server again
        downloader.ensure(&artifact).await.unwrap();
    }

    #[test(tokio::test)]
    async fn test_checksum_mismatch_is_fatal_and_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kokoro-v1.0.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = AssetDownloader::new(server.uri(), dir.path());
        let artifact = Artifact::new("kokoro-v1.0.onnx").with_sha256("00".repeat(32));

        let err = downloader.ensure(&artifact).await.unwrap_err();
        assert_eq!(err.category(), "download_integrity");
        assert!(err.is_fatal_at_startup());
        assert!(!dir.path().join("kokoro-v1.0.onnx").exists());
        assert!(!dir.path().join("kokoro-v1.0.onnx.part").exists());
    }

    #[test(tokio::test)]
    async fn test_checksum_match_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = AssetDownloader::new(server.uri(), dir.path());
        // SHA-256 of "abc"
        let artifact = Artifact::new("config.json")
            .with_sha256("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD");
        assert!(downloader.ensure(&artifact).await.is_ok());
    }

    #[test(tokio::test)]
    async fn test_http_error_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = AssetDownloader::new(server.uri(), dir.path());
        let err = downloader.ensure(&Artifact::new("missing.bin")).await.unwrap_err();
        assert_eq!(err.category(), "network");
        assert!(err.is_retriable());
    }

    #[test(tokio::test)]
    async fn test_ensure_all_stops_at_first_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = AssetDownloader::new(server.uri(), dir.path());
        let result = downloader
            .ensure_all(&[Artifact::new("a.bin"), Artifact::new("b.bin"), Artifact::new("c.bin")])
            .await;
        assert!(result.is_err());
        assert!(dir.path().join("a.bin").exists());
        assert!(!dir.path().join("c.bin").exists());
    }
}
