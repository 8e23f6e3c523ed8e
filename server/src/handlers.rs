//! HTTP handlers. Each one parses its input and hands the work to
//! [`LicenseService`] on the blocking pool.

use crate::api::{ExtendRequest, HealthResponse, LicenseInfo, ListQuery, ListResponse, StatsResponse};
use crate::error::{AppError, AppResult};
use crate::service::LicenseService;
use crate::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use callguard_license::protocol::{
    ActivateRequest, ActivateResponse, GenerateRequest, GenerateResponse, HeartbeatRequest,
    HeartbeatResponse,
};
use callguard_license::LicenseKey;
use std::sync::Arc;

/// Runs `f` against the service on the blocking thread pool.
async fn blocking<T, F>(state: &AppState, f: F) -> AppResult<T>
where
    F: FnOnce(&LicenseService) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<GenerateResponse>)> {
    let Json(req) = payload?;
    let resp = blocking(&state, move |svc| svc.generate(req)).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> AppResult<Json<ActivateResponse>> {
    let key = LicenseKey::parse(&key)?;
    let Json(req) = payload?;
    let resp = blocking(&state, move |svc| svc.activate(&key, &req.hardware_fingerprint)).await?;
    Ok(Json(resp))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> AppResult<Json<HeartbeatResponse>> {
    let key = LicenseKey::parse(&key)?;
    let Json(req) = payload?;
    let resp = blocking(&state, move |svc| svc.heartbeat(&key, &req)).await?;
    Ok(Json(resp))
}

pub async fn info(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<LicenseInfo>> {
    let key = LicenseKey::parse(&key)?;
    Ok(Json(blocking(&state, move |svc| svc.info(&key)).await?))
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<ListResponse>> {
    let Query(query) = query?;
    Ok(Json(blocking(&state, move |svc| svc.list(query.status)).await?))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    Ok(Json(blocking(&state, |svc| svc.stats()).await?))
}

pub async fn extend(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<ExtendRequest>, JsonRejection>,
) -> AppResult<Json<LicenseInfo>> {
    let key = LicenseKey::parse(&key)?;
    let Json(req) = payload?;
    Ok(Json(blocking(&state, move |svc| svc.extend(&key, req.days)).await?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<LicenseInfo>> {
    let key = LicenseKey::parse(&key)?;
    Ok(Json(blocking(&state, move |svc| svc.deactivate(&key)).await?))
}

pub async fn reactivate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<LicenseInfo>> {
    let key = LicenseKey::parse(&key)?;
    Ok(Json(blocking(&state, move |svc| svc.reactivate(&key)).await?))
}

pub async fn reset_hardware(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<LicenseInfo>> {
    let key = LicenseKey::parse(&key)?;
    Ok(Json(blocking(&state, move |svc| svc.reset_hardware(&key)).await?))
}
