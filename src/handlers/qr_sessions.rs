use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::qr_session,
    services::qr_sessions::{CloseSessionResult, ScanRequest, SessionValidation, SessionView},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachCustomerRequest {
    #[serde(alias = "customerId")]
    pub customer_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/api/v1/qr-sessions/scan",
    summary = "Scan a table QR code",
    description = "Returns the table's ACTIVE session, opening a new one when none exists",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Session opened or reused", body = ApiResponse<SessionView>),
        (status = 400, description = "Invalid session token", body = crate::errors::ErrorResponse),
        (status = 404, description = "Table missing or inactive", body = crate::errors::ErrorResponse),
    ),
    tag = "Sessions"
)]
pub async fn scan(
    State(state): State<AppState>,
    Json(payload): Json<ScanRequest>,
) -> ApiResult<SessionView> {
    let session = state.services.sessions.open_or_reuse(payload).await?;
    Ok(Json(ApiResponse::success(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionView> {
    let session = state.services.sessions.get_session(id).await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/qr-sessions/{id}/validate",
    summary = "Validate a cached session",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Validation result", body = ApiResponse<SessionValidation>),
    ),
    tag = "Sessions"
)]
pub async fn validate_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionValidation> {
    let validation = state.services.sessions.validate_session(id).await?;
    Ok(Json(ApiResponse::success(validation)))
}

#[utoipa::path(
    put,
    path = "/api/v1/qr-sessions/{id}/end",
    summary = "Close a session",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session completed", body = ApiResponse<CloseSessionResult>),
        (status = 404, description = "Session not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Sessions"
)]
pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CloseSessionResult> {
    let result = state.services.sessions.close_session(id).await?;
    Ok(Json(ApiResponse::success(result)))
}

pub async fn attach_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AttachCustomerRequest>,
) -> ApiResult<qr_session::Model> {
    let session = state
        .services
        .sessions
        .attach_customer(id, payload.customer_id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}
