//! POST /api/transcribe — the pipeline from an assembled upload to a stored
//! history row: transcribe, retain an audio copy, render the document,
//! upload it to drive, record history, enqueue auto-summarization. Temp
//! files are owned by scoped guards so every exit path releases them.

use crate::{
    auth::{AuthUser, DriveToken},
    errors::AppError,
    models::history::NewHistoryRecord,
    services::{
        chunk_store::ensure_filename_safe,
        cleanup::TempFile,
        docgen::DOC_MIME_TYPE,
        jobs::Job,
        transcriber::mime_for_filename,
    },
    state::AppState,
};
use axum::{Json, extract::State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub file_path: String,
    pub original_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeResponse {
    pub success: bool,
    pub transcription: String,
    pub doc_url: String,
    pub history_id: i64,
}

/// Only files the upload endpoints handed out may be transcribed.
async fn resolve_upload_path(uploads_dir: &Path, requested: &str) -> Result<PathBuf, AppError> {
    let uploads_root = fs::canonicalize(uploads_dir)
        .await
        .map_err(|e| AppError::internal(format!("uploads dir unavailable: {}", e)))?;
    let path = fs::canonicalize(requested)
        .await
        .map_err(|_| AppError::bad_request("file path does not exist"))?;
    if !path.starts_with(&uploads_root) {
        return Err(AppError::bad_request(
            "file path is not an uploaded file",
        ));
    }
    Ok(path)
}

pub async fn transcribe(
    State(state): State<AppState>,
    user: AuthUser,
    token: DriveToken,
    Json(req): Json<TranscribeRequest>,
) -> Result<Json<TranscribeResponse>, AppError> {
    if req.file_path.is_empty() {
        return Err(AppError::bad_request("file path is required"));
    }
    let path = resolve_upload_path(&state.uploads_dir, &req.file_path).await?;

    // The assembled upload is consumed by this request; the guard removes it
    // whether we succeed or bail below.
    let audio = TempFile::new(path);
    let file_size = fs::metadata(audio.path())
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .len() as i64;

    let transcript = state
        .transcriber
        .transcribe(audio.path(), &req.original_name)
        .await?;

    // Retain a copy of the audio for playback from history.
    let original_base = Path::new(&req.original_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| ensure_filename_safe(n).is_ok())
        .unwrap_or_else(|| "recording.webm".to_string());
    fs::create_dir_all(&state.audio_dir)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    let audio_name = format!("audio_{}_{}", Utc::now().timestamp_millis(), original_base);
    fs::copy(audio.path(), state.audio_dir.join(&audio_name))
        .await
        .map_err(|e| AppError::internal(format!("could not retain audio copy: {}", e)))?;
    let audio_public_path = format!("/api/audio/{}", audio_name);

    let doc_path = state
        .docs
        .generate(&transcript, &req.original_name)
        .await
        .map_err(|e| AppError::internal(format!("document generation failed: {}", e)))?;
    let doc = TempFile::new(doc_path);

    let doc_stem = Path::new(&original_base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let doc_name = format!("transcription_{}.md", doc_stem);
    let folder_id = req
        .folder_id
        .filter(|f| !f.is_empty())
        .or_else(|| state.drive_folder_id.clone());

    let uploaded = state
        .drive
        .upload_file(
            doc.path(),
            &doc_name,
            DOC_MIME_TYPE,
            folder_id.as_deref(),
            &token.0,
        )
        .await?;
    let doc_url = uploaded.web_view_link.clone().unwrap_or_default();

    let filename = audio
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| original_base.clone());
    let history_id = state
        .history
        .add(NewHistoryRecord {
            filename,
            original_name: req.original_name.clone(),
            file_type: req
                .file_type
                .unwrap_or_else(|| mime_for_filename(&req.original_name).to_string()),
            file_size,
            transcription_text: transcript.clone(),
            doc_file_id: uploaded.id,
            doc_file_url: doc_url.clone(),
            audio_file_path: Some(audio_public_path),
            user_id: user.email.clone(),
        })
        .await?;

    state.jobs.submit(Job::AutoSummarize {
        history_id,
        user_id: user.email,
    });

    info!(history_id, "transcription pipeline complete");
    Ok(Json(TranscribeResponse {
        success: true,
        transcription: transcript,
        doc_url,
        history_id,
    }))
}
