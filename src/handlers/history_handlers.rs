//! Transcription history: list, fetch, delete, and export.

use crate::{auth::AuthUser, errors::AppError, models::history::HistoryRecord, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HistoryListResponse {
    pub success: bool,
    pub items: Vec<HistoryRecord>,
}

#[derive(Debug, Serialize)]
pub struct HistoryItemResponse {
    pub success: bool,
    pub item: HistoryRecord,
}

#[derive(Debug, Deserialize)]
pub struct DeleteHistoryRequest {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub format: String,
}

/// GET `/api/history`
pub async fn list_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<HistoryListResponse>, AppError> {
    let items = state.history.list_for_user(&user.email).await?;
    Ok(Json(HistoryListResponse {
        success: true,
        items,
    }))
}

/// GET `/api/history/{id}`
pub async fn get_history_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<HistoryItemResponse>, AppError> {
    let item = state.history.get(id, &user.email).await?;
    Ok(Json(HistoryItemResponse {
        success: true,
        item,
    }))
}

/// DELETE `/api/history`
pub async fn delete_history(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DeleteHistoryRequest>,
) -> Result<Json<OkResponse>, AppError> {
    state.history.delete(req.id, &user.email).await?;
    Ok(Json(OkResponse { success: true }))
}

/// POST `/api/history/{id}/export` — render a history item as a txt or
/// markdown attachment.
pub async fn export_history_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ExportRequest>,
) -> Result<Response, AppError> {
    let item = state.history.get(id, &user.email).await?;

    let (content, content_type, extension) = match req.format.as_str() {
        "txt" => (render_txt(&item), "text/plain; charset=utf-8", "txt"),
        "markdown" => (
            render_markdown(&item),
            "text/markdown; charset=utf-8",
            "md",
        ),
        other => {
            return Err(AppError::bad_request(format!(
                "unsupported export format `{}`",
                other
            )));
        }
    };

    let date = Utc::now().format("%Y-%m-%d");
    let disposition = format!("attachment; filename=\"transcription_{}.{}\"", date, extension);

    let mut response = Response::new(Body::from(content));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn render_txt(item: &HistoryRecord) -> String {
    let mut out = String::new();
    out.push_str("Transcription Result\n");
    out.push_str("====================\n");
    out.push_str(&format!("Source file: {}\n", item.original_name));
    out.push_str(&format!(
        "Created: {}\n\n",
        item.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(summary) = &item.summary_text {
        out.push_str("--- Summary ---\n");
        out.push_str(summary);
        out.push_str("\n\n");
    }
    out.push_str("--- Full transcript ---\n");
    out.push_str(&item.transcription_text);
    out.push('\n');
    out
}

fn render_markdown(item: &HistoryRecord) -> String {
    let mut out = String::new();
    out.push_str("# Transcription Result\n\n");
    out.push_str(&format!("> **Source file:** {}\n", item.original_name));
    out.push_str(&format!(
        "> **Created:** {}\n\n",
        item.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(summary) = &item.summary_text {
        out.push_str("## Summary\n\n");
        out.push_str(summary);
        out.push_str("\n\n");
    }
    out.push_str("## Full Transcript\n\n");
    out.push_str(&item.transcription_text);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(summary: Option<&str>) -> HistoryRecord {
        HistoryRecord {
            id: 1,
            filename: "2026-01-01_meeting.webm".into(),
            original_name: "meeting.webm".into(),
            file_type: "audio/webm".into(),
            file_size: 42,
            transcription_text: "the transcript body".into(),
            doc_file_id: "doc-id".into(),
            doc_file_url: "https://drive.example/doc".into(),
            audio_file_path: None,
            summary_text: summary.map(str::to_string),
            summary_template: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            user_id: "alice@example.com".into(),
        }
    }

    #[test]
    fn txt_export_includes_summary_when_present() {
        let rendered = render_txt(&item(Some("short summary")));
        assert!(rendered.contains("Source file: meeting.webm"));
        assert!(rendered.contains("--- Summary ---\nshort summary"));
        assert!(rendered.contains("the transcript body"));
    }

    #[test]
    fn txt_export_omits_summary_section_when_absent() {
        let rendered = render_txt(&item(None));
        assert!(!rendered.contains("--- Summary ---"));
        assert!(rendered.contains("the transcript body"));
    }

    #[test]
    fn markdown_export_uses_headings() {
        let rendered = render_markdown(&item(Some("short summary")));
        assert!(rendered.starts_with("# Transcription Result"));
        assert!(rendered.contains("## Summary\n\nshort summary"));
        assert!(rendered.contains("## Full Transcript\n\nthe transcript body"));
    }
}
