//! src/services/drive.rs
//!
//! Thin client over the Google Drive v3 REST API. The access token is
//! supplied per request by the caller (the fronting OAuth provider handles
//! acquisition and refresh); this client never holds credentials.

use serde::Deserialize;
use serde_json::json;
use std::{io, path::Path};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("drive access token is invalid or expired")]
    Unauthorized,
    #[error("no permission for the requested drive resource")]
    Forbidden,
    #[error("drive request failed: {0}")]
    Upstream(String),
    #[error("drive request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DriveResult<T> = Result<T, DriveError>;

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFolder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFolder>,
}

#[derive(Clone)]
pub struct DriveClient {
    http: reqwest::Client,
}

impl DriveClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn check(response: reqwest::Response) -> DriveResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status.as_u16() {
            401 => Err(DriveError::Unauthorized),
            403 => Err(DriveError::Forbidden),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(DriveError::Upstream(format!("{}: {}", status, body)))
            }
        }
    }

    pub async fn list_folders(&self, access_token: &str) -> DriveResult<Vec<DriveFolder>> {
        let response = self
            .http
            .get(format!("{}/files", DRIVE_API_URL))
            .bearer_auth(access_token)
            .query(&[
                ("q", format!("mimeType='{}' and trashed=false", FOLDER_MIME).as_str()),
                ("fields", "files(id, name, parents)"),
                ("orderBy", "name"),
                ("pageSize", "100"),
            ])
            .send()
            .await?;
        let listing: FileListResponse = Self::check(response).await?.json().await?;
        Ok(listing.files)
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        access_token: &str,
    ) -> DriveResult<DriveFolder> {
        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent_id {
            metadata["parents"] = json!([parent]);
        }
        let response = self
            .http
            .post(format!("{}/files", DRIVE_API_URL))
            .bearer_auth(access_token)
            .query(&[("fields", "id, name")])
            .json(&metadata)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn rename_file(
        &self,
        file_id: &str,
        new_name: &str,
        access_token: &str,
    ) -> DriveResult<DriveFile> {
        let response = self
            .http
            .patch(format!("{}/files/{}", DRIVE_API_URL, file_id))
            .bearer_auth(access_token)
            .query(&[("fields", "id, name, webViewLink")])
            .json(&json!({ "name": new_name }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Upload a local file: create the metadata first, then stream the
    /// content with a media upload against the new file id.
    pub async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
        access_token: &str,
    ) -> DriveResult<DriveFile> {
        let mut metadata = json!({ "name": name });
        if let Some(folder) = folder_id {
            metadata["parents"] = json!([folder]);
        }
        let response = self
            .http
            .post(format!("{}/files", DRIVE_API_URL))
            .bearer_auth(access_token)
            .query(&[("fields", "id")])
            .json(&metadata)
            .send()
            .await?;
        let created: DriveFile = Self::check(response).await?.json().await?;

        let file = File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .patch(format!("{}/files/{}", DRIVE_UPLOAD_URL, created.id))
            .bearer_auth(access_token)
            .query(&[("uploadType", "media"), ("fields", "id, name, webViewLink")])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
