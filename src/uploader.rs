//! src/uploader.rs
//!
//! Client-side chunked upload driver, exposed through the `--upload` CLI
//! mode. Splits a file into fixed-size chunks, sends them strictly in order
//! with bounded retry and doubling backoff, and reports cumulative progress
//! per accepted chunk. The server is free to see chunks out of order or
//! duplicated; this driver simply never re-splits and never loses progress.

use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Fixed chunk size, safely below typical gateway request ceilings.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

const MAX_CHUNK_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("the file is too large for the upload endpoint")]
    FileTooLarge,
    #[error("server rejected chunk {index}: {message}")]
    ChunkRejected {
        index: usize,
        status: u16,
        message: String,
    },
    #[error("chunk {index} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        last_error: String,
    },
    #[error("server accepted every chunk but never reported completion")]
    MissingCompletion,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type UploadOutcome = Result<RemoteUpload, UploadError>;

/// The server-side location of the assembled file.
#[derive(Debug, Clone)]
pub struct RemoteUpload {
    pub file_path: String,
    pub file_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkResponse {
    success: bool,
    #[serde(default)]
    complete: bool,
    #[serde(default)]
    received: Option<usize>,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

pub fn chunk_count(file_size: u64, chunk_size: usize) -> usize {
    if file_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size as u64) as usize
}

fn backoff_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * 2u32.saturating_pow(attempt)
}

/// Unique enough across concurrent uploads without central coordination.
fn new_upload_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

pub struct ChunkedUploader {
    http: reqwest::Client,
    server_url: String,
}

impl ChunkedUploader {
    pub fn new(http: reqwest::Client, server_url: impl Into<String>) -> Self {
        let mut server_url = server_url.into();
        while server_url.ends_with('/') {
            server_url.pop();
        }
        Self { http, server_url }
    }

    /// Upload one file, invoking `progress(received, total)` after every
    /// accepted chunk. Fails the whole operation once any chunk exhausts its
    /// retries or the server rejects it outright.
    pub async fn upload_file<F>(&self, path: &Path, mut progress: F) -> UploadOutcome
    where
        F: FnMut(usize, usize),
    {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no filename")
            })?;
        let file_size = tokio::fs::metadata(path).await?.len();
        let total_chunks = chunk_count(file_size, CHUNK_SIZE);
        let upload_id = new_upload_id();
        debug!(upload_id, total_chunks, file_size, "starting chunked upload");

        let mut file = File::open(path).await?;
        for index in 0..total_chunks {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let mut filled = 0;
            while filled < chunk.len() {
                let n = file.read(&mut chunk[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            chunk.truncate(filled);

            let response = self
                .send_chunk_with_retry(&upload_id, index, total_chunks, &filename, chunk)
                .await?;

            if response.complete {
                progress(total_chunks, total_chunks);
                return Ok(RemoteUpload {
                    file_path: response.file_path.ok_or(UploadError::MissingCompletion)?,
                    file_size: response.file_size.unwrap_or(file_size),
                });
            }
            progress(
                response.received.unwrap_or(index + 1),
                response.total.unwrap_or(total_chunks),
            );
        }

        Err(UploadError::MissingCompletion)
    }

    async fn send_chunk_with_retry(
        &self,
        upload_id: &str,
        index: usize,
        total_chunks: usize,
        filename: &str,
        chunk: Vec<u8>,
    ) -> Result<ChunkResponse, UploadError> {
        let mut last_error = String::new();
        for attempt in 0..=MAX_CHUNK_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                warn!(
                    index,
                    attempt, "retrying chunk after {:?}: {}", delay, last_error
                );
                tokio::time::sleep(delay).await;
            }

            match self
                .send_chunk(upload_id, index, total_chunks, filename, chunk.clone())
                .await
            {
                Ok(SendResult::Accepted(response)) => return Ok(response),
                Ok(SendResult::Rejected { status, message }) => {
                    // The server rejected the chunk itself (oversized or
                    // malformed); retrying the same bytes cannot succeed.
                    return Err(UploadError::ChunkRejected {
                        index,
                        status,
                        message,
                    });
                }
                Ok(SendResult::NotJson) => return Err(UploadError::FileTooLarge),
                Err(err) => last_error = err,
            }
        }
        Err(UploadError::RetriesExhausted {
            index,
            attempts: MAX_CHUNK_RETRIES + 1,
            last_error,
        })
    }

    /// Returns Err(message) only for transient transport/server failures
    /// worth retrying.
    async fn send_chunk(
        &self,
        upload_id: &str,
        index: usize,
        total_chunks: usize,
        filename: &str,
        chunk: Vec<u8>,
    ) -> Result<SendResult, String> {
        let form = reqwest::multipart::Form::new()
            .text("chunkIndex", index.to_string())
            .text("totalChunks", total_chunks.to_string())
            .text("uploadId", upload_id.to_string())
            .text("filename", filename.to_string())
            .part(
                "chunk",
                reqwest::multipart::Part::bytes(chunk)
                    .file_name(filename.to_string())
                    .mime_str("application/octet-stream")
                    .map_err(|e| e.to_string())?,
            );

        let response = self
            .http
            .post(format!("{}/api/upload-chunk", self.server_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;

        if status.is_server_error() {
            return Err(format!("server error {}: {}", status, body));
        }

        // A gateway-level rejection (e.g. an HTML "payload too large" page)
        // is not JSON; surface it as a file-size failure, never a parse
        // crash.
        let parsed: ChunkResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(SendResult::NotJson),
        };

        if parsed.success {
            Ok(SendResult::Accepted(parsed))
        } else {
            Ok(SendResult::Rejected {
                status: status.as_u16(),
                message: parsed.error.unwrap_or_else(|| "rejected".into()),
            })
        }
    }
}

enum SendResult {
    Accepted(ChunkResponse),
    Rejected { status: u16, message: String },
    NotJson,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_covers_partial_tail() {
        let mb = 1024 * 1024;
        assert_eq!(chunk_count(12 * mb, CHUNK_SIZE), 3);
        assert_eq!(chunk_count(12 * mb + 1, CHUNK_SIZE), 4);
        assert_eq!(chunk_count(1, CHUNK_SIZE), 1);
        assert_eq!(chunk_count(0, CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64, CHUNK_SIZE), 1);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn upload_ids_do_not_collide_trivially() {
        let a = new_upload_id();
        let b = new_upload_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn non_json_body_is_not_a_parse_error() {
        let err = serde_json::from_str::<ChunkResponse>("<html>413</html>");
        assert!(err.is_err());
    }
}
