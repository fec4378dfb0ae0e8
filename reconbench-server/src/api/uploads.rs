//! Image uploads and dataset browsing.

use axum::{
    extract::{Multipart, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use reconbench_core::files::{is_safe_segment, list_images, sanitize_file_name};
use reconbench_schemas::{DatasetImages, FileEntry, UploadResponse};
use serde::{Deserialize, Serialize};
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::extract::ApiQuery;
use crate::{error::ApiError, ApiContextRef};

pub fn router() -> Router<ApiContextRef> {
    Router::new()
        .route("/upload", post(upload_images))
        .route("/revert", delete(revert_upload))
        .route("/dataset/{name}/{resolution}", get(dataset_images))
}

async fn upload_images(
    State(context): State<ApiContextRef>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let upload_id = Uuid::new_v4().to_string();
    let upload_dir = context.config.dirs.uploads.join(&upload_id);

    let files = save_images(&upload_dir, multipart).await?;
    info!(%upload_id, count = files.len(), "Stored upload");

    Ok(Json(UploadResponse { upload_id, files }))
}

#[derive(Debug, Deserialize)]
struct RevertParams {
    upload_id: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn revert_upload(
    State(context): State<ApiContextRef>,
    ApiQuery(params): ApiQuery<RevertParams>,
) -> Result<Json<StatusResponse>, ApiError> {
    if !is_safe_segment(&params.upload_id) {
        return Err(ApiError::BadRequest(format!(
            "Invalid upload id: {}",
            params.upload_id
        )));
    }

    let upload_dir = context.config.dirs.uploads.join(&params.upload_id);
    match tokio::fs::remove_dir_all(&upload_dir).await {
        Ok(()) => info!(upload_id = %params.upload_id, "Removed upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(upload_id = %params.upload_id, "Nothing to revert")
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(StatusResponse { status: "success" }))
}

async fn dataset_images(
    State(context): State<ApiContextRef>,
    Path((name, resolution)): Path<(String, String)>,
) -> Result<Json<DatasetImages>, ApiError> {
    if !is_safe_segment(&name) || !is_safe_segment(&resolution) {
        return Err(ApiError::NotFound("Dataset not found".to_string()));
    }

    let dir: PathBuf = context.config.dirs.datasets.join(&name).join(&resolution);
    let images = tokio::task::spawn_blocking(move || list_images(&dir))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|_| ApiError::NotFound("Dataset not found".to_string()))?;

    Ok(Json(DatasetImages {
        dataset: name,
        resolution,
        images,
    }))
}

/// Write every `image/*` part of `multipart` into `dir`. Other parts are skipped.
pub(crate) async fn save_images(
    dir: &FsPath,
    mut multipart: Multipart,
) -> Result<Vec<FileEntry>, ApiError> {
    tokio::fs::create_dir_all(dir).await?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let is_image = field
            .content_type()
            .is_some_and(|content_type| content_type.starts_with("image/"));
        let file_name = field.file_name().and_then(sanitize_file_name);

        let Some(file_name) = file_name.filter(|_| is_image) else {
            debug!(
                field = ?field.name(),
                content_type = ?field.content_type(),
                "Skipping non-image part"
            );
            continue;
        };

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;

        files.push(FileEntry {
            name: file_name,
            path: path.display().to_string(),
            size: bytes.len() as u64,
        });
    }

    Ok(files)
}
