//! Generate JSON schemas for the reconbench API
//!
//! Writes one schema per public payload into the workspace `json_schema/`
//! directory for use by API clients and documentation.

use reconbench_schemas::{
    GpuStatus, Job, JobRecord, ReconstructionRequest, SystemInfo, ToolInfo, UploadResponse,
};
use schemars::{schema::RootSchema, schema_for};
use std::path::{Path, PathBuf};

fn write_schema(dir: &Path, name: &str, schema: RootSchema) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = dir.join(format!("{name}.schema.json"));
    std::fs::write(&output_path, serde_json::to_string_pretty(&schema)?)?;
    println!("Generated JSON schema at: {}", output_path.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("json_schema");
    std::fs::create_dir_all(&output_dir)?;

    write_schema(&output_dir, "reconstruction_request", schema_for!(ReconstructionRequest))?;
    write_schema(&output_dir, "job", schema_for!(Job))?;
    write_schema(&output_dir, "tool_info", schema_for!(ToolInfo))?;
    write_schema(&output_dir, "gpu_status", schema_for!(GpuStatus))?;
    write_schema(&output_dir, "system_info", schema_for!(SystemInfo))?;
    write_schema(&output_dir, "upload_response", schema_for!(UploadResponse))?;
    write_schema(&output_dir, "legacy_job_record", schema_for!(JobRecord))?;

    Ok(())
}
