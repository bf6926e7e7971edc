//! Represents one finished transcription in a user's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A transcription history row. The transcript text lives in the row;
/// the generated document lives in the user's drive and is referenced by id.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Auto-increment row id.
    pub id: i64,

    /// Name of the assembled file on the server at transcription time.
    pub filename: String,

    /// Original filename as uploaded by the client.
    pub original_name: String,

    /// Declared MIME type of the audio.
    pub file_type: String,

    /// Size of the uploaded audio in bytes.
    pub file_size: i64,

    /// Full transcript text.
    pub transcription_text: String,

    /// Drive file id of the generated document.
    pub doc_file_id: String,

    /// Drive web link of the generated document.
    pub doc_file_url: String,

    /// Server path of the retained audio copy, if kept.
    pub audio_file_path: Option<String>,

    /// On-demand or auto-generated summary, if one exists.
    pub summary_text: Option<String>,

    /// Template id the summary was generated with.
    pub summary_template: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Owner; rows are only ever visible to their owner.
    pub user_id: String,
}

/// Insert payload for a new history row.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub filename: String,
    pub original_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub transcription_text: String,
    pub doc_file_id: String,
    pub doc_file_url: String,
    pub audio_file_path: Option<String>,
    pub user_id: String,
}
