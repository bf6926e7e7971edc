//! Shared router state: every service constructed once at startup and
//! injected into handlers, no lazily-initialized globals.

use crate::services::{
    chunk_store::ChunkStore, docgen::DocumentGenerator, drive::DriveClient,
    history_service::HistoryService, jobs::JobQueue, summarizer::SummaryEngine,
    transcriber::Transcriber,
};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub chunks: Arc<ChunkStore>,
    pub transcriber: Arc<Transcriber>,
    pub summary: SummaryEngine,
    pub docs: Arc<DocumentGenerator>,
    pub drive: DriveClient,
    pub history: HistoryService,
    pub jobs: JobQueue,
    /// Where assembled uploads live; transcription requests may only
    /// reference files under this directory.
    pub uploads_dir: PathBuf,
    /// Retained audio copies served via GET /api/audio.
    pub audio_dir: PathBuf,
    /// Default drive folder when the client does not pick one.
    pub drive_folder_id: Option<String>,
}
