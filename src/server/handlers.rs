//! Request handlers for the snapshot API.

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::AppError;
use super::owner::Owner;
use super::AppState;
use crate::models::{Bookmark, CacheState, FAVICON_NAME, INDEX_NAME};
use crate::services::RetrievedFile;

/// Body of `GET /api/v1/records/{id}/cache/status`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CacheStatusResponse {
    Cached {
        cache_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        favicon_url: Option<String>,
    },
    Error {
        error: String,
    },
    Pending,
}

impl CacheStatusResponse {
    fn from_bookmark(record_id: &str, bookmark: &Bookmark) -> Self {
        match bookmark.state() {
            CacheState::Cached => CacheStatusResponse::Cached {
                cache_url: cache_file_url(record_id, INDEX_NAME),
                favicon_url: bookmark
                    .favicon()
                    .map(|_| cache_file_url(record_id, FAVICON_NAME)),
            },
            CacheState::Failed => CacheStatusResponse::Error {
                error: bookmark.cache_error.clone().unwrap_or_default(),
            },
            CacheState::Pending => CacheStatusResponse::Pending,
        }
    }
}

fn cache_file_url(record_id: &str, name: &str) -> String {
    format!(
        "/api/v1/records/{}/cache/{}",
        urlencoding::encode(record_id),
        name
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateBookmarkRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CreateBookmarkResponse {
    pub id: String,
    pub filename: String,
    pub bookmark_id: String,
    pub status: CacheState,
}

/// `POST /api/v1/records/bookmarks`
pub async fn create_bookmark(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<CreateBookmarkRequest>,
) -> Result<(StatusCode, Json<CreateBookmarkResponse>), AppError> {
    let (record, bookmark) = state
        .services
        .records
        .create_bookmark(&owner, &request.url)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookmarkResponse {
            id: record.id,
            filename: record.filename,
            bookmark_id: bookmark.id.clone(),
            status: bookmark.state(),
        }),
    ))
}

/// `DELETE /api/v1/records/{id}`
pub async fn delete_record(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(record_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.services.records.delete(&owner, &record_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/records/{id}/cache/status`
pub async fn cache_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(record_id): Path<String>,
) -> Result<Json<CacheStatusResponse>, AppError> {
    let bookmark = state
        .services
        .records
        .cache_status(&owner, &record_id)
        .await?;
    Ok(Json(CacheStatusResponse::from_bookmark(&record_id, &bookmark)))
}

/// `GET /api/v1/records/{id}/cache`
pub async fn cache_listing(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(record_id): Path<String>,
) -> Result<Response, AppError> {
    let files = state.services.retrieval.list(&owner, &record_id).await?;
    Ok(plain_text(files.join("\n")))
}

/// `GET /api/v1/records/{id}/cache/{filename}`
pub async fn cache_file(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((record_id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let file = state
        .services
        .retrieval
        .fetch_artifact(&owner, &record_id, &filename)
        .await?;
    Ok(file_response(file))
}

/// `GET /api/v1/cache/{bookmark}`
pub async fn cache_listing_by_name(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(bookmark): Path<String>,
) -> Result<Response, AppError> {
    let retrieval = &state.services.retrieval;
    let record_id = retrieval.resolve_filename(&owner, &bookmark).await?;
    let files = retrieval.list(&owner, &record_id).await?;
    Ok(plain_text(files.join("\n")))
}

/// `GET /api/v1/cache/{bookmark}/{filename}`
pub async fn cache_file_by_name(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((bookmark, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let retrieval = &state.services.retrieval;
    let record_id = retrieval.resolve_filename(&owner, &bookmark).await?;
    let file = retrieval.fetch_artifact(&owner, &record_id, &filename).await?;
    Ok(file_response(file))
}

/// `GET /api/v1/cache`
pub async fn cached_index(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Response, AppError> {
    let names = state.services.retrieval.cached_index(&owner).await?;
    Ok(plain_text(names.join("\n")))
}

fn file_response(file: RetrievedFile) -> Response {
    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    (
        [
            (CONTENT_TYPE, content_type),
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        ],
        file.bytes,
    )
        .into_response()
}

fn plain_text(body: String) -> Response {
    (
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body,
    )
        .into_response()
}
