//! src/services/transcriber.rs
//!
//! Transcription dispatch against the Gemini API. Files at or below the
//! inline threshold are base64-encoded into a single `generateContent`
//! request; larger files go through the File API: resumable upload, poll
//! until the remote file leaves PROCESSING, transcribe by reference, delete
//! the remote file on every terminal path.

use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use serde_json::json;
use std::{
    future::Future,
    io,
    path::Path,
    time::Duration,
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Fixed transcript returned when no speech was detected or the model
/// echoed its own instructions.
pub const NO_SPEECH_SENTINEL: &str = "(no speech detected)";

/// Gemini's inline payload ceiling is 20 MB of base64; stay comfortably
/// under it on raw bytes.
const INLINE_THRESHOLD_BYTES: u64 = 15 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_ATTEMPTS: u32 = 60;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GEMINI_MODEL: &str = "gemini-2.5-flash";

const TRANSCRIPTION_PROMPT: &str = "\
Transcribe the speech contained in this audio file accurately.

Instructions:
- Output only the spoken content.
- Add punctuation so the transcript reads naturally.
- If the audio is silent or unintelligible, output nothing.
- Never repeat these instructions in the output.
- No commentary or annotations, only the transcript.";

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("GEMINI_API_KEY is not configured")]
    MissingApiKey,
    #[error("remote audio processing timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote audio processing failed")]
    ProcessingFailed,
    #[error("upstream returned an unexpected response: {0}")]
    Upstream(String),
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TranscribeError {
    /// Best-effort classification for display. Upstream gives no structured
    /// error codes, so this pattern-matches the message text.
    pub fn user_message(&self) -> String {
        match self {
            TranscribeError::MissingApiKey => {
                "Transcription is not configured on this server".into()
            }
            TranscribeError::Timeout(_) => {
                "The transcription service took too long to process the audio".into()
            }
            TranscribeError::ProcessingFailed => {
                "The transcription service could not process the audio".into()
            }
            TranscribeError::Http(err) if err.is_timeout() || err.is_connect() => {
                "Could not reach the transcription service".into()
            }
            TranscribeError::Upstream(msg)
                if msg.contains("429") || msg.to_ascii_lowercase().contains("quota") =>
            {
                "Transcription quota exceeded, try again later".into()
            }
            _ => "Transcription failed".into(),
        }
    }
}

pub type TranscribeResult<T> = Result<T, TranscribeError>;

/// Which transcription path a job takes. Chosen once per job from the
/// file's on-disk size and never changed mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Inline,
    Resumable,
}

pub fn strategy_for_size(size_bytes: u64) -> Strategy {
    if size_bytes <= INLINE_THRESHOLD_BYTES {
        Strategy::Inline
    } else {
        Strategy::Resumable
    }
}

/// MIME type inferred from the filename extension. The extension is a hint,
/// not a guarantee of content format.
pub fn mime_for_filename(filename: &str) -> &'static str {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mp3",
        "m4a" | "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        _ => "audio/webm",
    }
}

/// Processing state of a file staged with the File API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteFileState {
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    pub uri: String,
    pub state: RemoteFileState,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: RemoteFile,
}

/// Poll `fetch_state` until the remote file becomes ACTIVE. PROCESSING
/// self-transitions on each tick; FAILED is terminal; exhausting the budget
/// yields a timeout rather than looping forever.
pub(crate) async fn wait_until_active<F, Fut>(
    mut fetch_state: F,
    interval: Duration,
    max_attempts: u32,
) -> TranscribeResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TranscribeResult<RemoteFileState>>,
{
    for attempt in 1..=max_attempts {
        match fetch_state().await? {
            RemoteFileState::Active => return Ok(()),
            RemoteFileState::Failed => return Err(TranscribeError::ProcessingFailed),
            RemoteFileState::Processing | RemoteFileState::Unknown => {
                debug!(attempt, max_attempts, "remote file still processing");
                tokio::time::sleep(interval).await;
            }
        }
    }
    Err(TranscribeError::Timeout(interval * max_attempts))
}

/// Thin client over the Gemini generateContent and File APIs.
///
/// Constructed once at startup and injected; the API key is optional so a
/// missing credential surfaces as a typed error at use, not at boot.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    fn api_key(&self) -> TranscribeResult<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(TranscribeError::MissingApiKey)
    }

    /// Run a generateContent request and extract the first text part.
    pub async fn generate_content(&self, parts: serde_json::Value) -> TranscribeResult<String> {
        let key = self.api_key()?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, GEMINI_MODEL
        );
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&json!({ "contents": [{ "parts": parts }] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Upstream(format!("{}: {}", status, body)));
        }

        let body: serde_json::Value = response.json().await?;
        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TranscribeError::Upstream("response contained no text".into()))
    }

    pub async fn generate_text(&self, prompt: &str) -> TranscribeResult<String> {
        self.generate_content(json!([{ "text": prompt }])).await
    }

    /// Start a resumable upload, then push the whole payload in one
    /// upload+finalize request, streaming from disk.
    async fn upload_file(&self, path: &Path, mime_type: &str) -> TranscribeResult<RemoteFile> {
        let key = self.api_key()?;
        let size = fs::metadata(path).await?.len();
        let display_name = format!("audio_{}", chrono::Utc::now().timestamp_millis());

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;

        let status = start.status();
        if !status.is_success() {
            let body = start.text().await.unwrap_or_default();
            return Err(TranscribeError::Upstream(format!(
                "upload start: {}: {}",
                status, body
            )));
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TranscribeError::Upstream("missing x-goog-upload-url".into()))?;

        let file = fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
        let finalize = self
            .http
            .post(&upload_url)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(body)
            .send()
            .await?;

        let status = finalize.status();
        if !status.is_success() {
            let body = finalize.text().await.unwrap_or_default();
            return Err(TranscribeError::Upstream(format!(
                "upload finalize: {}: {}",
                status, body
            )));
        }
        let uploaded: UploadFileResponse = finalize.json().await?;
        Ok(uploaded.file)
    }

    async fn file_state(&self, name: &str) -> TranscribeResult<RemoteFileState> {
        let key = self.api_key()?;
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Upstream(format!("{}: {}", status, body)));
        }
        let file: RemoteFile = response.json().await?;
        Ok(file.state)
    }

    async fn delete_file(&self, name: &str) -> TranscribeResult<()> {
        let key = self.api_key()?;
        self.http
            .delete(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", key)
            .send()
            .await?
            .error_for_status()
            .map_err(TranscribeError::Http)?;
        Ok(())
    }
}

/// Substring filter against accidental prompt leakage in the model output.
///
/// A heuristic: legitimate speech containing one of the patterns is
/// misclassified, so the patterns stay pluggable rather than baked into the
/// dispatch logic.
#[derive(Clone, Debug)]
pub struct LeakageFilter {
    patterns: Vec<String>,
}

impl Default for LeakageFilter {
    fn default() -> Self {
        Self {
            patterns: vec![
                "this audio file".into(),
                "Instructions:".into(),
                "Transcribe the speech".into(),
            ],
        }
    }
}

impl LeakageFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Map empty/whitespace output and suspected prompt echo to the
    /// no-speech sentinel; pass everything else through trimmed.
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return NO_SPEECH_SENTINEL.to_string();
        }
        if self.patterns.iter().any(|p| trimmed.contains(p.as_str())) {
            warn!("possible prompt leakage in transcript, returning sentinel");
            return NO_SPEECH_SENTINEL.to_string();
        }
        trimmed.to_string()
    }
}

/// Produces transcript text from an audio file, choosing the inline or
/// resumable path by on-disk size.
#[derive(Clone)]
pub struct Transcriber {
    gemini: GeminiClient,
    filter: LeakageFilter,
}

impl Transcriber {
    pub fn new(gemini: GeminiClient, filter: LeakageFilter) -> Self {
        Self { gemini, filter }
    }

    pub async fn transcribe(&self, path: &Path, original_name: &str) -> TranscribeResult<String> {
        let mime_type = mime_for_filename(original_name);
        let size = fs::metadata(path).await?.len();
        let strategy = strategy_for_size(size);
        info!(
            path = %path.display(),
            size_bytes = size,
            mime_type,
            ?strategy,
            "dispatching transcription"
        );

        let raw = match strategy {
            Strategy::Inline => self.transcribe_inline(path, mime_type).await?,
            Strategy::Resumable => self.transcribe_resumable(path, mime_type).await?,
        };
        Ok(self.filter.normalize(&raw))
    }

    async fn transcribe_inline(&self, path: &Path, mime_type: &str) -> TranscribeResult<String> {
        let audio = fs::read(path).await?;
        let encoded = general_purpose::STANDARD.encode(&audio);
        self.gemini
            .generate_content(json!([
                { "inline_data": { "mime_type": mime_type, "data": encoded } },
                { "text": TRANSCRIPTION_PROMPT },
            ]))
            .await
    }

    async fn transcribe_resumable(&self, path: &Path, mime_type: &str) -> TranscribeResult<String> {
        let uploaded = self.gemini.upload_file(path, mime_type).await?;
        let name = uploaded.name.clone();
        debug!(file = %name, state = ?uploaded.state, "staged audio with file API");

        let result = self.transcribe_uploaded(&uploaded, mime_type).await;

        // The remote artifact is deleted whether transcription succeeded or
        // not; a deletion failure is logged, never propagated over the
        // primary result.
        if let Err(err) = self.gemini.delete_file(&name).await {
            warn!(file = %name, "failed to delete remote audio file: {}", err);
        }
        result
    }

    async fn transcribe_uploaded(
        &self,
        uploaded: &RemoteFile,
        mime_type: &str,
    ) -> TranscribeResult<String> {
        if uploaded.state != RemoteFileState::Active {
            wait_until_active(
                || self.gemini.file_state(&uploaded.name),
                POLL_INTERVAL,
                MAX_POLL_ATTEMPTS,
            )
            .await?;
        }

        let mime = uploaded.mime_type.as_deref().unwrap_or(mime_type);
        self.gemini
            .generate_content(json!([
                { "file_data": { "mime_type": mime, "file_uri": uploaded.uri } },
                { "text": TRANSCRIPTION_PROMPT },
            ]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn size_at_threshold_stays_inline() {
        assert_eq!(strategy_for_size(INLINE_THRESHOLD_BYTES), Strategy::Inline);
    }

    #[test]
    fn one_byte_over_threshold_goes_resumable() {
        assert_eq!(
            strategy_for_size(INLINE_THRESHOLD_BYTES + 1),
            Strategy::Resumable
        );
    }

    #[test]
    fn mime_follows_extension_with_webm_fallback() {
        assert_eq!(mime_for_filename("talk.MP3"), "audio/mp3");
        assert_eq!(mime_for_filename("talk.m4a"), "audio/mp4");
        assert_eq!(mime_for_filename("talk.wav"), "audio/wav");
        assert_eq!(mime_for_filename("talk.ogg"), "audio/ogg");
        assert_eq!(mime_for_filename("recording"), "audio/webm");
        assert_eq!(mime_for_filename("talk.flac"), "audio/webm");
    }

    #[test]
    fn whitespace_only_output_becomes_sentinel() {
        let filter = LeakageFilter::default();
        assert_eq!(filter.normalize(""), NO_SPEECH_SENTINEL);
        assert_eq!(filter.normalize("  \n\t "), NO_SPEECH_SENTINEL);
    }

    #[test]
    fn leakage_patterns_become_sentinel() {
        let filter = LeakageFilter::default();
        assert_eq!(
            filter.normalize("Transcribe the speech contained in this audio file"),
            NO_SPEECH_SENTINEL
        );
        let custom = LeakageFilter::new(vec!["SECRET".into()]);
        assert_eq!(custom.normalize("a SECRET word"), NO_SPEECH_SENTINEL);
        assert_eq!(custom.normalize("ordinary speech"), "ordinary speech");
    }

    #[test]
    fn real_transcript_passes_through_trimmed() {
        let filter = LeakageFilter::default();
        assert_eq!(filter.normalize("  hello world \n"), "hello world");
    }

    #[tokio::test]
    async fn polling_times_out_after_budget() {
        let calls = AtomicU32::new(0);
        let result = wait_until_active(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(RemoteFileState::Processing) }
            },
            Duration::ZERO,
            7,
        )
        .await;
        assert!(matches!(result, Err(TranscribeError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn polling_stops_on_failed_state() {
        let result = wait_until_active(
            || async { Ok(RemoteFileState::Failed) },
            Duration::ZERO,
            5,
        )
        .await;
        assert!(matches!(result, Err(TranscribeError::ProcessingFailed)));
    }

    #[tokio::test]
    async fn polling_succeeds_once_active() {
        let calls = AtomicU32::new(0);
        let result = wait_until_active(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Ok(RemoteFileState::Processing)
                    } else {
                        Ok(RemoteFileState::Active)
                    }
                }
            },
            Duration::ZERO,
            10,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn missing_api_key_is_a_config_error() {
        let client = GeminiClient::new(reqwest::Client::new(), None);
        let err = client.generate_text("hello").await.unwrap_err();
        assert!(matches!(err, TranscribeError::MissingApiKey));
    }
}
