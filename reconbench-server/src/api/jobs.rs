//! Multi-tool reconstruction jobs.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use reconbench_core::{coordinator::JobRequest, files::is_safe_segment};
use reconbench_schemas::{Job, JobId, ReconstructionRequest, ReconstructionStarted};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use super::extract::ApiJson;
use crate::{config::Directories, error::ApiError, ApiContextRef};

/// Upload directory used when a request names neither a dataset nor an upload.
const LATEST_UPLOAD: &str = "latest";

pub fn router() -> Router<ApiContextRef> {
    Router::new()
        .route("/reconstruct", post(start_reconstruction))
        .route("/status/{job_id}", get(job_status))
        .route("/results/{job_id}", get(job_results))
}

async fn start_reconstruction(
    State(context): State<ApiContextRef>,
    ApiJson(request): ApiJson<ReconstructionRequest>,
) -> Result<Json<ReconstructionStarted>, ApiError> {
    let input_path = input_path(&context.config.dirs, &request)?;
    let job_request = JobRequest::builder()
        .input_path(input_path)
        .results_root(context.config.dirs.results.clone())
        .max_resolution(request.max_resolution)
        .build();

    let job_id = context
        .coordinator
        .submit(&request.tools, job_request)
        .await?;
    info!(%job_id, tools = ?request.tools, "Reconstruction job started");

    Ok(Json(ReconstructionStarted {
        job_id,
        status: "started".to_string(),
    }))
}

async fn job_status(
    State(context): State<ApiContextRef>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(context.coordinator.status(job_id).await?))
}

async fn job_results(
    State(context): State<ApiContextRef>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(context.coordinator.results(job_id).await?))
}

/// Ids that are not UUIDs cannot name a job.
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Job not found".to_string()))
}

fn input_path(dirs: &Directories, request: &ReconstructionRequest) -> Result<PathBuf, ApiError> {
    match (&request.dataset, &request.upload_id) {
        (Some(dataset), _) => {
            if !is_safe_segment(dataset) || !is_safe_segment(&request.resolution) {
                return Err(ApiError::BadRequest(format!(
                    "Invalid dataset: {dataset}/{}",
                    request.resolution
                )));
            }
            Ok(dirs.datasets.join(dataset).join(&request.resolution))
        }
        (None, Some(upload_id)) => {
            if !is_safe_segment(upload_id) {
                return Err(ApiError::BadRequest(format!("Invalid upload id: {upload_id}")));
            }
            Ok(dirs.uploads.join(upload_id))
        }
        (None, None) => Ok(dirs.uploads.join(LATEST_UPLOAD)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dirs() -> Directories {
        Directories {
            uploads: PathBuf::from("/data/uploads"),
            results: PathBuf::from("/data/results"),
            datasets: PathBuf::from("/data/datasets"),
            scenes: PathBuf::from("/data/scenes"),
            store: None,
        }
    }

    #[rstest]
    #[case(Some("garden"), None, "images_4", "/data/datasets/garden/images_4")]
    #[case(Some("garden"), Some("u1"), "images", "/data/datasets/garden/images")]
    #[case(None, Some("u1"), "images", "/data/uploads/u1")]
    #[case(None, None, "images", "/data/uploads/latest")]
    fn resolves_input_directory(
        #[case] dataset: Option<&str>,
        #[case] upload_id: Option<&str>,
        #[case] resolution: &str,
        #[case] expected: &str,
    ) {
        let request = ReconstructionRequest::builder()
            .tools(vec!["COLMAP".to_string()])
            .maybe_dataset(dataset.map(str::to_string))
            .maybe_upload_id(upload_id.map(str::to_string))
            .resolution(resolution.to_string())
            .build();

        assert_eq!(input_path(&dirs(), &request).unwrap(), PathBuf::from(expected));
    }

    #[test]
    fn rejects_escaping_dataset() {
        let request = ReconstructionRequest::builder()
            .tools(vec!["COLMAP".to_string()])
            .dataset("..".to_string())
            .build();

        assert!(matches!(
            input_path(&dirs(), &request),
            Err(ApiError::BadRequest(_))
        ));
    }
}
