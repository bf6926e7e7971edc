//! Defines routes for the transcription service API.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /api/upload`        — single-shot multipart upload
//!   - `POST /api/upload-chunk`  — one chunk of a chunked upload
//!   - `GET  /api/audio/{filename}` — stream a retained audio copy
//!
//! - **Pipeline + history endpoints**
//!   - `POST   /api/transcribe`           — run the transcription pipeline
//!   - `GET    /api/history`              — list the caller's history
//!   - `GET    /api/history/{id}`         — fetch one history item
//!   - `DELETE /api/history`              — delete a history item
//!   - `POST   /api/history/{id}/export`  — export as txt/markdown
//!   - `POST   /api/summarize`            — summarize a transcript
//!   - `POST   /api/ask`                  — Q&A over a transcript
//!
//! - **Drive endpoints**
//!   - `GET   /api/drive/folders` — list folders
//!   - `POST  /api/drive/folders` — create a folder
//!   - `PATCH /api/drive/rename`  — rename a generated document

use crate::{
    handlers::{
        ai_handlers::{ask, summarize},
        drive_handlers::{create_folder, list_folders, rename_document},
        health_handlers::{healthz, readyz},
        history_handlers::{delete_history, export_history_item, get_history_item, list_history},
        transcribe_handlers::transcribe,
        upload_handlers::{get_audio, upload_chunk, upload_file},
    },
    services::chunk_store::MAX_CHUNK_SIZE,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};

/// Build and return the router for all API routes.
///
/// The upload routes get a raised body limit so a full chunk plus multipart
/// framing fits; every other route keeps the axum default.
pub fn routes() -> Router<AppState> {
    let upload_routes = Router::new()
        .route("/api/upload", post(upload_file))
        .route("/api/upload-chunk", post(upload_chunk))
        .layer(DefaultBodyLimit::max(MAX_CHUNK_SIZE + 1024 * 1024));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(upload_routes)
        .route("/api/audio/{filename}", get(get_audio))
        .route("/api/transcribe", post(transcribe))
        .route("/api/history", get(list_history).delete(delete_history))
        .route("/api/history/{id}", get(get_history_item))
        .route("/api/history/{id}/export", post(export_history_item))
        .route("/api/summarize", post(summarize))
        .route("/api/ask", post(ask))
        .route("/api/drive/folders", get(list_folders).post(create_folder))
        .route("/api/drive/rename", patch(rename_document))
}
