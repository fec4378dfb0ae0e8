//! Engine availability, accelerator and host resource reporting.

use axum::{extract::State, routing::get, Json, Router};
use reconbench_core::system;
use reconbench_schemas::{GpuStatus, SystemInfo, ToolInfo, ToolName};
use std::collections::BTreeMap;

use crate::ApiContextRef;

pub fn router() -> Router<ApiContextRef> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/gpu-status", get(gpu_status))
        .route("/system-info", get(system_info))
}

async fn list_tools(State(context): State<ApiContextRef>) -> Json<BTreeMap<ToolName, ToolInfo>> {
    Json(context.coordinator.manager().tool_status().await)
}

async fn gpu_status(State(context): State<ApiContextRef>) -> Json<GpuStatus> {
    Json(context.gpu.status().await)
}

async fn system_info(State(context): State<ApiContextRef>) -> Json<SystemInfo> {
    let gpu = context.gpu.status().await;
    Json(system::collect(gpu, &context.config.dirs.results).await)
}
