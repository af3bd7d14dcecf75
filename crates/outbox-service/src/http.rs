//! HTTP routes

use crate::error::ServiceError;
use crate::registration::{PrepareRequest, Registration, RegistrationService};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use outbox_artifact::ArtifactId;
use outbox_ledger::{
    CommitRequest, EntryEdit, EntryId, JournalEntry, JournalFilter, JournalPage, DEFAULT_LIMIT,
    XLSX_MEDIA_TYPE,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Success envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<RegistrationService>,
    api_tokens: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(service: Arc<RegistrationService>, api_tokens: Vec<String>) -> Self {
        Self {
            service,
            api_tokens: Arc::new(api_tokens),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JournalParams {
    pub year: Option<i32>,
    pub month: Option<u32>,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
    pub as_of: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportParams {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

fn bad_json(rejection: &JsonRejection) -> ServiceError {
    ServiceError::InvalidRequest(rejection.body_text())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/api/outbox/prepare-registration", post(prepare_registration))
        .route("/api/outbox/artifacts/{artifact_id}", get(artifact))
        .route("/api/outbox/submit-signature", post(submit_signature))
        .route("/api/journal/entries", get(list_entries))
        .route(
            "/api/journal/entries/{id}",
            patch(edit_entry).delete(delete_entry).get(get_entry),
        )
        .route("/api/journal/export/xlsx", get(export_xlsx))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// # Errors
/// I/O errors from the listener.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ServiceError> {
    if state.api_tokens.is_empty() {
        return Ok(next.run(request).await);
    }
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(token) if state.api_tokens.iter().any(|known| known == token) => Ok(next.run(request).await),
        _ => Err(ServiceError::Unauthorized),
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

async fn prepare_registration(
    State(state): State<AppState>,
    payload: Result<Json<PrepareRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Registration>>, ServiceError> {
    let Json(request) = payload.map_err(|e| bad_json(&e))?;
    let registration = state.service.prepare_registration(&request).await?;
    Ok(ApiResponse::success(registration))
}

async fn artifact(
    State(state): State<AppState>,
    artifact_id: Result<Path<ArtifactId>, PathRejection>,
) -> Result<Response, ServiceError> {
    let Path(artifact_id) = artifact_id.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let bytes = state.service.artifact_bytes(artifact_id).await?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

async fn submit_signature(
    State(state): State<AppState>,
    payload: Result<Json<CommitRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<JournalEntry>>, ServiceError> {
    let Json(request) = payload.map_err(|e| bad_json(&e))?;
    let entry = state.service.submit_signature(request).await?;
    Ok(ApiResponse::success(entry))
}

async fn list_entries(
    State(state): State<AppState>,
    params: Result<Query<JournalParams>, QueryRejection>,
) -> Result<Json<ApiResponse<JournalPage>>, ServiceError> {
    let Query(params) = params.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let filter = JournalFilter {
        year: params.year,
        month: params.month,
    };
    let page = state.service.list(
        &filter,
        params.skip,
        params.limit.unwrap_or(DEFAULT_LIMIT),
        params.as_of,
    )?;
    Ok(ApiResponse::success(page))
}

async fn get_entry(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<ApiResponse<JournalEntry>>, ServiceError> {
    let Path(id) = id.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let entry = state
        .service
        .entry(EntryId(id))
        .ok_or_else(|| outbox_ledger::LedgerError::NotFound(format!("journal entry {id}")))?;
    Ok(ApiResponse::success(entry))
}

async fn edit_entry(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    payload: Result<Json<EntryEdit>, JsonRejection>,
) -> Result<Json<ApiResponse<JournalEntry>>, ServiceError> {
    let Path(id) = id.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let Json(edit) = payload.map_err(|e| bad_json(&e))?;
    let entry = state.service.edit(EntryId(id), &edit).await?;
    Ok(ApiResponse::success(entry))
}

async fn delete_entry(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<ApiResponse<JournalEntry>>, ServiceError> {
    let Path(id) = id.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let entry = state.service.delete(EntryId(id)).await?;
    Ok(ApiResponse::success(entry))
}

async fn export_xlsx(
    State(state): State<AppState>,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> Result<Response, ServiceError> {
    let Query(params) = params.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let export = state.service.export(&JournalFilter {
        year: params.year,
        month: params.month,
    })?;
    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    Ok((
        [
            (CONTENT_TYPE, XLSX_MEDIA_TYPE.to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        export.bytes,
    )
        .into_response())
}
