//! HTTP handlers for the upload surface: the chunked upload endpoint, the
//! single-shot upload for small files, and streaming retained audio back
//! out. Chunk payloads are streamed to the store rather than buffered.

use crate::{
    auth::AuthUser,
    errors::AppError,
    services::{
        chunk_store::{AssembledUpload, ChunkPutOutcome, ensure_filename_safe},
        transcriber::mime_for_filename,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::Field},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::io;
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Wire shape of every chunk-upload response.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl ChunkUploadResponse {
    fn progress(received: usize, total: usize) -> Self {
        Self {
            success: true,
            complete: false,
            received: Some(received),
            total: Some(total),
            file_path: None,
            file_size: None,
        }
    }

    fn complete(assembled: &AssembledUpload) -> Self {
        Self {
            success: true,
            complete: true,
            received: None,
            total: None,
            file_path: Some(assembled.path.to_string_lossy().into_owned()),
            file_size: Some(assembled.size_bytes),
        }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_path: String,
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::bad_request(format!("malformed multipart body: {}", err))
}

async fn text_field(field: Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|_| AppError::bad_request(format!("invalid field `{}`", name)))
}

async fn usize_field(field: Field<'_>, name: &str) -> Result<usize, AppError> {
    text_field(field, name)
        .await?
        .trim()
        .parse::<usize>()
        .map_err(|_| AppError::bad_request(format!("field `{}` must be a non-negative integer", name)))
}

/// Adapt a multipart field into the byte stream the chunk store consumes.
fn field_stream(field: Field<'_>) -> impl Stream<Item = io::Result<Bytes>> + '_ {
    futures::stream::unfold(field, |mut field| async move {
        match field.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), field)),
            Ok(None) => None,
            Err(err) => Some((Err(io::Error::other(err)), field)),
        }
    })
}

/// POST `/api/upload-chunk` — accept one chunk of a chunked upload.
///
/// The metadata fields must precede the `chunk` field in the form; the
/// chunk bytes are streamed to staging as they arrive. The response is
/// either progress, completion with the assembled path, or a typed
/// rejection (413 for oversized chunks).
pub async fn upload_chunk(
    State(state): State<AppState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, AppError> {
    let mut chunk_index: Option<usize> = None;
    let mut total_chunks: Option<usize> = None;
    let mut upload_id: Option<String> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("chunkIndex") => chunk_index = Some(usize_field(field, "chunkIndex").await?),
            Some("totalChunks") => total_chunks = Some(usize_field(field, "totalChunks").await?),
            Some("uploadId") => upload_id = Some(text_field(field, "uploadId").await?),
            Some("filename") => filename = Some(text_field(field, "filename").await?),
            Some("chunk") => {
                let (index, total, id, name) = match (
                    chunk_index,
                    total_chunks,
                    upload_id.as_deref(),
                    filename.as_deref(),
                ) {
                    (Some(index), Some(total), Some(id), Some(name)) => {
                        (index, total, id.to_string(), name.to_string())
                    }
                    _ => {
                        return Err(AppError::bad_request(
                            "chunk metadata fields must precede the chunk payload",
                        ));
                    }
                };

                let outcome = state
                    .chunks
                    .put_chunk(&id, index, total, &name, field_stream(field))
                    .await?;

                return Ok(Json(match outcome {
                    ChunkPutOutcome::Progress { received, total } => {
                        ChunkUploadResponse::progress(received, total)
                    }
                    ChunkPutOutcome::Complete(assembled) => {
                        ChunkUploadResponse::complete(&assembled)
                    }
                }));
            }
            _ => {}
        }
    }

    Err(AppError::bad_request("missing `chunk` field"))
}

/// POST `/api/upload` — single-shot upload for files small enough to fit in
/// one request. Streams the body to the uploads directory.
pub async fn upload_file(
    State(state): State<AppState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let original = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "recording.webm".to_string());
        ensure_filename_safe(&original).map_err(AppError::from)?;

        fs::create_dir_all(&state.uploads_dir)
            .await
            .map_err(|e| AppError::internal(e.to_string()))?;

        let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let dest = state.uploads_dir.join(format!("{}_{}", timestamp, original));
        let tmp = state.uploads_dir.join(format!(".tmp-{}", Uuid::new_v4()));

        let result: io::Result<()> = async {
            let mut file = fs::File::create(&tmp).await?;
            loop {
                match field.chunk().await {
                    Ok(Some(bytes)) => file.write_all(&bytes).await?,
                    Ok(None) => break,
                    Err(err) => return Err(io::Error::other(err)),
                }
            }
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp, &dest).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(AppError::internal(format!("upload failed: {}", err)));
        }

        return Ok(Json(UploadResponse {
            success: true,
            file_path: dest.to_string_lossy().into_owned(),
        }));
    }

    Err(AppError::bad_request("missing `file` field"))
}

/// GET `/api/audio/{filename}` — stream a retained audio copy.
pub async fn get_audio(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    ensure_filename_safe(&filename).map_err(AppError::from)?;
    let path = state.audio_dir.join(&filename);

    let file = fs::File::open(&path).await.map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            AppError::not_found("audio file not found")
        } else {
            AppError::internal(err.to_string())
        }
    })?;
    let length = file
        .metadata()
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mime_for_filename(&filename)),
    );
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        response.headers_mut().insert(header::CONTENT_LENGTH, value);
    }
    Ok(response.into_response())
}
