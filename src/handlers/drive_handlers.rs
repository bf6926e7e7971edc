//! Drive folder browsing and document renaming, proxied on behalf of the
//! caller's bearer token.

use crate::{
    auth::{AuthUser, DriveToken},
    errors::AppError,
    services::drive::DriveFolder,
    state::AppState,
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct FoldersResponse {
    pub success: bool,
    pub folders: Vec<DriveFolder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateFolderResponse {
    pub success: bool,
    pub folder: DriveFolder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub history_id: i64,
    pub new_name: String,
    pub drive_file_id: String,
}

#[derive(Debug, Serialize)]
pub struct RenameResponse {
    pub success: bool,
    pub new_name: String,
}

/// GET `/api/drive/folders`
pub async fn list_folders(
    State(state): State<AppState>,
    _user: AuthUser,
    token: DriveToken,
) -> Result<Json<FoldersResponse>, AppError> {
    let folders = state.drive.list_folders(&token.0).await?;
    Ok(Json(FoldersResponse {
        success: true,
        folders,
    }))
}

/// POST `/api/drive/folders`
pub async fn create_folder(
    State(state): State<AppState>,
    _user: AuthUser,
    token: DriveToken,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<CreateFolderResponse>, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("folder name is required"));
    }
    let folder = state
        .drive
        .create_folder(name, req.parent_id.as_deref(), &token.0)
        .await?;
    Ok(Json(CreateFolderResponse {
        success: true,
        folder,
    }))
}

/// PATCH `/api/drive/rename` — rename the generated document on drive and
/// mirror the new name on the history row.
pub async fn rename_document(
    State(state): State<AppState>,
    user: AuthUser,
    token: DriveToken,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, AppError> {
    let base = req.new_name.trim().trim_end_matches(".md");
    if base.is_empty() {
        return Err(AppError::bad_request("new name is required"));
    }
    let doc_name = format!("{}.md", base);

    state
        .drive
        .rename_file(&req.drive_file_id, &doc_name, &token.0)
        .await?;
    state
        .history
        .rename(req.history_id, &user.email, base)
        .await?;

    Ok(Json(RenameResponse {
        success: true,
        new_name: doc_name,
    }))
}
