use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, Query, State,
    },
    middleware,
    routing::{get, post},
    Json, Router,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tower_http::services::ServeDir;

use crate::auth::require_uploader;
use crate::errors::CatalogError;
use crate::services::catalog_service::{now_millis, stored_file_name, NewUpload};
use crate::services::query_service::{QueryPage, QueryRequest};
use crate::state::AppState;

/// Build the listing, upload and download routes.
pub fn routes(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_mb.saturating_mul(1024 * 1024);

    let uploads = Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(upload_limit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_uploader,
        ));

    Router::new()
        .route("/api/list-update", get(list_updates))
        .merge(uploads)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .with_state(state)
}

//
// ─────────────────────────────────────────────────────────────
// GET /api/list-update
// Filter / sort / paginate the catalog
// ─────────────────────────────────────────────────────────────
//
async fn list_updates(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<QueryPage>, CatalogError>
{
    let request = QueryRequest::from_params(&params);
    let page = state.catalog.list(&request).await?;
    Ok(Json(page))
}

//
// ─────────────────────────────────────────────────────────────
// POST /upload
// Multipart: file, name, description, tag
// ─────────────────────────────────────────────────────────────
//
async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<&'static str, CatalogError>
{
    let upload_dir = PathBuf::from(&state.config.upload_dir);
    let mut stored = None;

    match receive_upload(&state, &upload_dir, multipart, &mut stored).await {
        Ok(()) => Ok("Upload successful"),
        Err(e) => {
            if let Some(file_path) = stored {
                discard(&upload_dir.join(file_path)).await;
            }
            Err(e)
        }
    }
}

/// Read the form, stream the file to disk and record the entry. `stored`
/// names the file on disk, if any, so the caller can remove it on failure.
async fn receive_upload(
    state: &AppState,
    upload_dir: &Path,
    mut multipart: Multipart,
    stored: &mut Option<String>,
) -> Result<(), CatalogError>
{
    let upload_time = now_millis();

    let mut name = None;
    let mut description = None;
    let mut tag = None;
    let mut original_file_name = None;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let field_name = field.name().unwrap_or_default().to_string();

        match field_name.as_str() {
            "file" => {
                let original = field.file_name().unwrap_or("upload").to_string();

                // only the last file part is kept
                if let Some(previous) = stored.take() {
                    discard(&upload_dir.join(previous)).await;
                }

                let file_path = stored_file_name(&original, upload_time);
                *stored = Some(file_path.clone());
                let written = write_field(&mut field, &upload_dir.join(&file_path)).await?;
                tracing::debug!("Stored {written} bytes as {file_path}");

                original_file_name = Some(original);
            }
            "name" | "description" | "tag" => {
                let text = field.text().await.map_err(malformed)?;
                let text = Some(text).filter(|t| !t.trim().is_empty());
                match field_name.as_str() {
                    "name" => name = text,
                    "description" => description = text,
                    _ => tag = text,
                }
            }
            _ => {}
        }
    }

    let (Some(original_file_name), Some(file_path)) = (original_file_name, stored.clone()) else {
        return Err(CatalogError::MalformedUpload("missing file".into()));
    };
    let Some(name) = name else {
        return Err(CatalogError::MalformedUpload("missing name".into()));
    };

    let upload = NewUpload {
        name,
        original_file_name,
        description,
        tag,
        file_path,
        upload_time,
    };

    state.catalog.record_upload(upload).await.map_err(|e| {
        tracing::error!("Could not record upload: {e}");
        CatalogError::UploadFailed
    })?;

    Ok(())
}

/// Copy a multipart field to `path` chunk by chunk.
async fn write_field(field: &mut Field<'_>, path: &Path) -> Result<u64, CatalogError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await.map_err(storage_failure)?;
    }

    let mut file = fs::File::create(path).await.map_err(storage_failure)?;
    let mut written = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        file.write_all(&chunk).await.map_err(storage_failure)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(storage_failure)?;
    Ok(written)
}

fn malformed(e: MultipartError) -> CatalogError {
    CatalogError::MalformedUpload(e.to_string())
}

fn storage_failure(e: std::io::Error) -> CatalogError {
    tracing::error!("Could not write upload: {e}");
    CatalogError::UploadFailed
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        tracing::warn!("Could not remove rejected upload {}: {e}", path.display());
    }
}
