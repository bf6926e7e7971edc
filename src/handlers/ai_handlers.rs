//! On-demand summarization and transcript Q&A.

use crate::{
    auth::AuthUser,
    errors::AppError,
    services::summarizer::SummaryTemplate,
    state::AppState,
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    pub history_id: i64,
    #[serde(default)]
    pub template_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub history_id: i64,
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub success: bool,
    pub answer: String,
    pub suggestions: Vec<String>,
}

/// POST `/api/summarize` — summarize a transcript with the requested
/// template and persist the result on the history row.
pub async fn summarize(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<SummarizeResponse>, AppError> {
    let template = match req.template_id.as_deref() {
        None => SummaryTemplate::default(),
        Some(id) => SummaryTemplate::from_id(id)
            .ok_or_else(|| AppError::bad_request(format!("unknown summary template `{}`", id)))?,
    };

    let item = state.history.get(req.history_id, &user.email).await?;
    let summary = state
        .summary
        .summarize(&item.transcription_text, template)
        .await?;
    state
        .history
        .set_summary(req.history_id, &user.email, &summary, template.id())
        .await?;

    Ok(Json(SummarizeResponse {
        success: true,
        summary,
    }))
}

/// POST `/api/ask` — answer a question against a stored transcript.
pub async fn ask(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(AppError::bad_request("question is required"));
    }

    let item = state.history.get(req.history_id, &user.email).await?;
    let answer = state.summary.ask(&item.transcription_text, question).await?;

    Ok(Json(AskResponse {
        success: true,
        answer: answer.answer,
        suggestions: answer.suggestions,
    }))
}
