// src/routes/analyze.rs
use axum::{
    extract::{Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};

use super::ErrorResponse;
use crate::AppState;
use crate::pipeline::AnalysisOptions;
use crate::report::results_file_name;

type RouteError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str, message: impl Into<String>) -> RouteError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error, message)))
}

fn internal_error(error: &str, message: impl Into<String>) -> RouteError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(error, message)))
}

// POST /analyze - multipart upload, field `firmware`
pub async fn analyze_firmware(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, RouteError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request("multipart_error", format!("Failed to parse multipart form: {}", e)))?
    {
        if field.name() != Some("firmware") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let contents = field
            .bytes()
            .await
            .map_err(|e| bad_request("read_error", format!("Failed to read file contents: {}", e)))?
            .to_vec();
        upload = Some((file_name, contents));
    }

    let Some((file_name, contents)) = upload else {
        return Err(bad_request("No firmware file provided", "multipart field 'firmware' is missing"));
    };
    if file_name.trim().is_empty() {
        return Err(bad_request("No selected file", "the uploaded file has no name"));
    }
    if contents.is_empty() {
        return Err(bad_request("Empty firmware file", "the uploaded file has no content"));
    }

    let upload_dir = tempfile::Builder::new()
        .prefix("firmscan-upload-")
        .tempdir()
        .map_err(|e| internal_error("upload_error", format!("Failed to stage upload: {}", e)))?;
    let staged = upload_dir.path().join(sanitize_file_name(&file_name));
    tokio::fs::write(&staged, &contents)
        .await
        .map_err(|e| internal_error("upload_error", format!("Failed to stage upload: {}", e)))?;

    tracing::info!("Received firmware upload {} ({} bytes)", file_name, contents.len());

    let outcome = state
        .analyzer
        .analyze_image(&staged, AnalysisOptions::default())
        .await
        .map_err(|e| internal_error("analysis_error", format!("Failed to analyze firmware: {}", e)))?;

    let body = outcome
        .report
        .to_json_pretty()
        .map_err(|e| internal_error("serialization_error", format!("Failed to serialize report: {}", e)))?;

    let attachment = results_file_name(&file_name, chrono::Local::now());
    let headers = [
        (header::CONTENT_TYPE, "application/json".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", attachment),
        ),
    ];
    Ok((StatusCode::OK, headers, body).into_response())
}

/// Keeps only the final path component and a conservative character set.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "firmware.bin".to_string()
    } else {
        cleaned
    }
}
