use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::fs;
use tracing::{info, warn};

use crate::api::{AvatarList, DownloadQuery, UploadResponse};
use crate::error::ApiError;
use crate::AppState;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

pub(crate) async fn upload_chat(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            continue;
        }
        let original = field.file_name().unwrap_or("upload").to_string();
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?;
        files.push(state.tools.uploads.stage(&original, &bytes, &mime).await?);
    }

    if files.is_empty() {
        return Err(ApiError::bad_request("未选择文件"));
    }
    info!(count = files.len(), "Chat attachments staged");
    Ok(Json(UploadResponse {
        success: true,
        files,
    }))
}

pub(crate) async fn download_by_query(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    serve_download(&state, &query.token).await
}

pub(crate) async fn download_by_path(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    serve_download(&state, &token).await
}

async fn serve_download(state: &AppState, token: &str) -> Result<Response, ApiError> {
    if token.is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "Missing token").into_response());
    }
    let Some(download) = state.tools.downloads.consume(token).await else {
        return Ok((StatusCode::NOT_FOUND, "Invalid or expired token").into_response());
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.mime)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename*=UTF-8''{}",
                urlencoding::encode(&download.filename)
            ),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(download.data))
        .map_err(|e| ApiError::internal(e.to_string()))
}

async fn list_images(dir: &FsPath, prefix: &str) -> Vec<String> {
    let mut images = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return images,
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_image = name
                    .rsplit_once('.')
                    .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
                if is_image {
                    images.push(format!("{prefix}/{name}"));
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read avatar directory");
                break;
            }
        }
    }
    images.sort();
    images
}

// Avatar images grouped by persona; missing directories list as empty.
pub(crate) async fn avatars(State(state): State<AppState>) -> Json<AvatarList> {
    let root = &state.settings.avatars_dir;
    Json(AvatarList {
        lan: list_images(&root.join("lan"), "lan").await,
        yuan: list_images(&root.join("yuan"), "yuan").await,
    })
}
