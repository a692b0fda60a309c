//! REST handlers for downloads and the proxy gateway.

use axum::extract::{Path, Query, State};
use axum::http::header::RANGE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::error::ApiError;
use super::AppState;
use crate::catalog::CatalogEntry;
use crate::download::DownloadState;
use crate::proxy::{decode_source_url, filename_from_url, ProxyError, ProxySource};
use crate::service::{DownloadStats, ServiceError};
use crate::store::DownloadRecord;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub(super) struct ListParams {
    state: Option<DownloadState>,
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "isofetch",
        "version": crate::VERSION,
    }))
}

pub(super) async fn start_download(
    State(state): State<AppState>,
    Json(entry): Json<CatalogEntry>,
) -> ApiResult<(StatusCode, Json<DownloadRecord>)> {
    let record = state.service.start_download(entry).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub(super) async fn list_downloads(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<DownloadRecord>>> {
    Ok(Json(state.service.list(params.state).await?))
}

pub(super) async fn stats(State(state): State<AppState>) -> ApiResult<Json<DownloadStats>> {
    Ok(Json(state.service.stats().await?))
}

pub(super) async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<DownloadRecord>> {
    Ok(Json(state.service.get(id).await?))
}

pub(super) async fn pause_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<DownloadRecord>> {
    Ok(Json(state.service.pause(id).await?))
}

pub(super) async fn resume_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<DownloadRecord>> {
    Ok(Json(state.service.resume(id).await?))
}

pub(super) async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<DownloadRecord>> {
    Ok(Json(state.service.cancel(id).await?))
}

pub(super) async fn delete_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn clear_completed(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let deleted = state.service.clear_completed().await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// Re-stream the source of a stored download.
pub(super) async fn proxy_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let record = state.service.get(id).await.map_err(|err| match err {
        ServiceError::NotFound(id) => ApiError::from(ProxyError::NotFound(format!(
            "download {} not found",
            id
        ))),
        other => ApiError::from(other),
    })?;

    let source = ProxySource {
        filename: record.filename(),
        url: record.url,
    };
    debug!(download_id = id, url = %source.url, range = ?headers.get(RANGE), "Proxy request");
    Ok(state.gateway.stream(&source, headers.get(RANGE)).await?)
}

/// Re-stream an arbitrary http(s) URL given as URL-safe base64.
pub(super) async fn proxy_url(
    State(state): State<AppState>,
    Path(encoded): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let url = decode_source_url(&encoded)?;
    let source = ProxySource {
        filename: filename_from_url(&url),
        url,
    };
    Ok(state.gateway.stream(&source, headers.get(RANGE)).await?)
}
