//! Upload endpoints
//!
//! Thin handlers over the lifecycle service. The multipart handler streams
//! each file field to the temp directory through `TransferInstrumentation`,
//! so progress is tracked while bytes are still arriving.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::models::{FileDescriptor, ProgressSnapshot, SessionInfo, UploadBatchResult, ValidationReport};
use crate::services::{DeclaredFileInfo, StagedFile, TransferError, TransferInstrumentation};
use crate::{ApiError, ApiResult, AppState};

/// Name of the multipart field carrying the file manifest
pub const MANIFEST_FIELD: &str = "manifest";

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub files: Vec<DeclaredFileInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub category: String,
    pub expected_files: usize,
}

/// First multipart field of an upload: what the following fields contain
#[derive(Debug, Deserialize, Serialize)]
pub struct UploadManifest {
    #[serde(default)]
    pub category: Option<String>,
    pub files: Vec<DeclaredFileInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub session_id: String,
}

/// POST /upload/validate
pub async fn validate_files(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Json<ValidationReport> {
    Json(state.lifecycle.validate_files(&request.files))
}

/// POST /upload/session
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let info = state
        .lifecycle
        .create_session(&request.category, request.expected_files)?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// POST /upload/files/:session_id
///
/// Expects a `manifest` JSON field followed by one field per declared file,
/// in manifest order. A session accepts one batch; later requests get 409.
pub async fn upload_files(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadBatchResult>> {
    let Some(session_category) = state
        .tracker
        .registry()
        .with_session(&session_id, |s| s.category.clone())
    else {
        return Err(ApiError::NotFound(format!("Upload session {}", session_id)));
    };

    let manifest = read_manifest(&mut multipart).await?;
    let report = state.lifecycle.validate_files(&manifest.files);
    if !report.valid {
        return Err(ApiError::BadRequest(report.error_messages().join("; ")));
    }
    let category = manifest
        .category
        .or(session_category)
        .ok_or_else(|| ApiError::BadRequest("No category for upload".to_string()))?;
    if !state.config.is_valid_category(&category) {
        return Err(ApiError::BadRequest(format!("Unknown category '{}'", category)));
    }

    // One batch per session
    state.lifecycle.claim_upload(&session_id)?;

    let descriptors: Vec<FileDescriptor> = manifest
        .files
        .iter()
        .map(|f| FileDescriptor::new(f.name.clone(), f.size))
        .collect();

    tokio::fs::create_dir_all(&state.temp_dir).await?;
    let mut instrumentation = TransferInstrumentation::begin(
        state.tracker.clone(),
        session_id.clone(),
        descriptors.clone(),
        state.config.progress_throttle(),
    );

    let mut temp_paths = Vec::new();
    let staged = match receive_files(
        &mut instrumentation,
        &mut multipart,
        &descriptors,
        &state.temp_dir,
        &mut temp_paths,
    )
    .await
    {
        Ok(staged) => staged,
        Err(e) => {
            instrumentation.fail_outstanding(&e);
            remove_temp_files(&temp_paths).await;
            *state.last_error.write().await = Some(e.to_string());
            return Err(e.into());
        }
    };

    info!(
        session_id = %session_id,
        files = staged.len(),
        bytes = instrumentation.uploaded_size(),
        "Upload received"
    );

    match state.lifecycle.upload_files(&session_id, &category, staged).await {
        Ok(Some(result)) => Ok(Json(result)),
        Ok(None) => {
            remove_temp_files(&temp_paths).await;
            Err(ApiError::NotFound(format!("Upload session {}", session_id)))
        }
        Err(e) => {
            remove_temp_files(&temp_paths).await;
            Err(e.into())
        }
    }
}

async fn read_manifest(multipart: &mut Multipart) -> ApiResult<UploadManifest> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
        .ok_or_else(|| ApiError::BadRequest("Missing upload manifest".to_string()))?;

    if field.name() != Some(MANIFEST_FIELD) {
        return Err(ApiError::BadRequest(format!(
            "First field must be '{}'",
            MANIFEST_FIELD
        )));
    }
    let text = field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Unreadable manifest: {}", e)))?;
    serde_json::from_str(&text).map_err(|e| ApiError::BadRequest(format!("Invalid manifest: {}", e)))
}

/// Stream every file field to the temp directory
async fn receive_files(
    instrumentation: &mut TransferInstrumentation,
    multipart: &mut Multipart,
    descriptors: &[FileDescriptor],
    temp_dir: &std::path::Path,
    temp_paths: &mut Vec<PathBuf>,
) -> Result<Vec<StagedFile>, TransferError> {
    let mut staged = Vec::with_capacity(descriptors.len());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TransferError::Stream(e.to_string()))?
    {
        let index = staged.len();
        let Some(descriptor) = descriptors.get(index) else {
            let name = field.file_name().or(field.name()).unwrap_or("unnamed").to_string();
            return Err(TransferError::UnexpectedFile(name));
        };

        let temp_path = temp_dir.join(format!("{}.part", descriptor.id));
        temp_paths.push(temp_path.clone());
        let mut file = tokio::fs::File::create(&temp_path).await?;

        let written = instrumentation.pipe(field, &mut file).await?;
        instrumentation.verify_file(index, written)?;

        staged.push(StagedFile {
            id: descriptor.id.clone(),
            original_name: descriptor.original_name.clone(),
            size: written,
            temp_path,
        });
    }

    instrumentation.finish(staged.len())?;
    Ok(staged)
}

async fn remove_temp_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

/// GET /upload/progress/:session_id
pub async fn get_progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ProgressSnapshot>> {
    state
        .lifecycle
        .get_progress(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Upload session {}", session_id)))
}

/// POST /upload/cancel/:session_id
///
/// `success` is false when the session had already finished.
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    if !state.tracker.registry().contains(&session_id) {
        return Err(ApiError::NotFound(format!("Upload session {}", session_id)));
    }
    let success = state.lifecycle.cancel_session(&session_id);
    Ok(Json(CancelResponse { success, session_id }))
}

/// Build upload routes
///
/// `body_limit` caps the multipart request size.
pub fn upload_routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/upload/validate", post(validate_files))
        .route("/upload/session", post(create_session))
        .route(
            "/upload/files/:session_id",
            post(upload_files).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/upload/progress/:session_id", get(get_progress))
        .route("/upload/cancel/:session_id", post(cancel_upload))
        .route("/upload/events/:session_id", get(super::sse::upload_event_stream))
}
