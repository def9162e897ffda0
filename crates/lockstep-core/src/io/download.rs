//! Async download module with streaming SHA256 verification.
//!
//! Package archives are written straight to disk while being hashed, so the
//! checksum is known as soon as the last byte lands.

use std::path::Path;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// Request for a download operation
#[derive(Debug)]
pub struct DownloadRequest<'a> {
    pub client: &'a Client,
    pub url: &'a Url,
    pub dest: &'a Path,
    pub bearer_token: Option<&'a str>,
    pub expected_sha256: Option<&'a str>,
}

impl<'a> DownloadRequest<'a> {
    pub fn new(client: &'a Client, url: &'a Url, dest: &'a Path) -> Self {
        Self {
            client,
            url,
            dest,
            bearer_token: None,
            expected_sha256: None,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<&'a str>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn with_expected_sha256(mut self, hash: &'a str) -> Self {
        self.expected_sha256 = Some(hash);
        self
    }

    /// Execute the download, returning the hex SHA256 of what was written.
    pub async fn execute(self) -> Result<String, DownloadError> {
        download_and_verify(self).await
    }
}

async fn download_and_verify(req: DownloadRequest<'_>) -> Result<String, DownloadError> {
    let mut request = req
        .client
        .get(req.url.clone())
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
    if let Some(token) = req.bearer_token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?.error_for_status()?;

    let mut file = File::create(req.dest).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().await?;
    let actual_hash = hex::encode(hasher.finalize());
    tracing::debug!(url = %req.url, bytes = downloaded, sha256 = %actual_hash, "downloaded");

    if let Some(expected) = req.expected_sha256 {
        if !actual_hash.eq_ignore_ascii_case(expected) {
            tokio::fs::remove_file(req.dest).await.ok();
            return Err(DownloadError::HashMismatch {
                expected: expected.to_string(),
                actual: actual_hash,
            });
        }
    }

    Ok(actual_hash)
}

/// Fetch a small document (checksums, signatures) into memory.
pub async fn fetch_bytes(
    client: &Client,
    url: &Url,
    bearer_token: Option<&str>,
) -> Result<Bytes, DownloadError> {
    let mut request = client
        .get(url.clone())
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }
    Ok(request.send().await?.error_for_status()?.bytes().await?)
}
