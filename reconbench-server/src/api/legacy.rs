//! Single-engine reconstructions, one container per method.

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reconbench_core::legacy::methods;
use reconbench_schemas::{
    DatasetSummary, JobRecord, LegacyReconstructionQueued, LegacyStatus, LegacyUploadResponse,
    MethodInfo, ResultListing,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{extract::ApiForm, uploads::save_images};
use crate::{error::ApiError, ApiContextRef};

pub fn router() -> Router<ApiContextRef> {
    Router::new()
        .route("/methods", get(list_methods))
        .route("/datasets", get(list_datasets))
        .route("/upload", post(upload_images))
        .route("/reconstruct", post(start_reconstruction))
        .route("/status/{job_id}", get(job_status))
        .route("/results/{job_id}", get(job_results))
        .route("/download/{job_id}/{*path}", get(download_result))
}

#[derive(Serialize)]
struct MethodsResponse {
    methods: BTreeMap<String, MethodInfo>,
}

async fn list_methods() -> Json<MethodsResponse> {
    Json(MethodsResponse { methods: methods() })
}

#[derive(Serialize)]
struct DatasetsResponse {
    datasets: Vec<DatasetSummary>,
}

async fn list_datasets(State(context): State<ApiContextRef>) -> Json<DatasetsResponse> {
    Json(DatasetsResponse {
        datasets: context.legacy.datasets().await,
    })
}

async fn upload_images(
    State(context): State<ApiContextRef>,
    multipart: Multipart,
) -> Result<Json<LegacyUploadResponse>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let files = save_images(&context.legacy.upload_dir(&job_id), multipart).await?;
    let uploaded_files: Vec<String> = files.into_iter().map(|file| file.name).collect();

    Ok(Json(LegacyUploadResponse {
        job_id,
        file_count: uploaded_files.len(),
        uploaded_files,
    }))
}

#[derive(Debug, Deserialize)]
struct ReconstructForm {
    job_id: String,
    method: String,
    dataset_name: Option<String>,
    parameters: Option<String>,
}

async fn start_reconstruction(
    State(context): State<ApiContextRef>,
    ApiForm(form): ApiForm<ReconstructForm>,
) -> Result<Json<LegacyReconstructionQueued>, ApiError> {
    let dataset_name = form.dataset_name.as_deref().filter(|name| !name.is_empty());
    let queued = context
        .legacy
        .enqueue(
            &form.job_id,
            &form.method,
            dataset_name,
            form.parameters.as_deref(),
        )
        .await?;

    let reconstruction_id = queued.record.job_id.clone();
    context.legacy.start(reconstruction_id.clone());

    Ok(Json(LegacyReconstructionQueued {
        reconstruction_id,
        method: queued.record.method,
        status: LegacyStatus::Queued,
        estimated_time: queued.estimated_time,
    }))
}

async fn job_status(
    State(context): State<ApiContextRef>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    Ok(Json(context.legacy.status(&job_id).await?))
}

async fn job_results(
    State(context): State<ApiContextRef>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultListing>, ApiError> {
    Ok(Json(context.legacy.results(&job_id).await?))
}

async fn download_result(
    State(context): State<ApiContextRef>,
    Path((job_id, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let file = context.legacy.resolve_download(&job_id, &path).await?;
    let bytes = tokio::fs::read(&file).await?;

    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_default();

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
