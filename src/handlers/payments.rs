use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use uuid::Uuid;

use crate::{
    entities::payment,
    services::payments::{
        CancelledSessionPayments, ConfirmPaymentRequest, CreateSessionPaymentsRequest,
        PayOrderRequest, PaymentConfirmation, PaymentFilters, PaymentReceipt, RefundRequest,
        RefundResult, SessionPaymentBatch, SettleSessionRequest, SettlementSummary,
    },
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/payment",
    summary = "Start paying an order",
    description = "CASH settles immediately; BANKING and QR return a transfer QR and stay PENDING",
    request_body = PayOrderRequest,
    responses(
        (status = 200, description = "Payment recorded", body = ApiResponse<PaymentReceipt>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order paid or another payment pending", body = crate::errors::ErrorResponse),
        (status = 502, description = "QR generation failed", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn pay_order(
    State(state): State<AppState>,
    Json(payload): Json<PayOrderRequest>,
) -> ApiResult<PaymentReceipt> {
    let receipt = state.services.payments.pay_order(payload).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payment/callback",
    summary = "Bank transfer confirmation",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment settled or failed", body = ApiResponse<PaymentConfirmation>),
        (status = 400, description = "Amount mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "No pending payment", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> ApiResult<PaymentConfirmation> {
    let confirmation = state.services.payments.confirm_payment(payload).await?;
    Ok(Json(ApiResponse::success(confirmation)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payment/admin",
    summary = "Settle a whole session",
    request_body = SettleSessionRequest,
    responses(
        (status = 200, description = "Session settled", body = ApiResponse<SettlementSummary>),
        (status = 404, description = "Session inactive or without orders", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn settle_session(
    State(state): State<AppState>,
    Json(payload): Json<SettleSessionRequest>,
) -> ApiResult<SettlementSummary> {
    let summary = state.services.payments.pay_order_by_admin(payload).await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(filters): Query<PaymentFilters>,
) -> ApiResult<Vec<payment::Model>> {
    let payments = state.services.payments.list_payments(filters).await?;
    Ok(Json(ApiResponse::success(payments)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<payment::Model> {
    let payment = state.services.payments.get_payment(id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> ApiResult<RefundResult> {
    let refund = state.services.payments.refund_payment(id, payload).await?;
    Ok(Json(ApiResponse::success(refund)))
}

pub async fn create_session_payments(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CreateSessionPaymentsRequest>,
) -> ApiResult<SessionPaymentBatch> {
    let batch = state
        .services
        .payments
        .create_session_payments(session_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(batch)))
}

pub async fn cancel_session_payments(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<CancelledSessionPayments> {
    let cancelled = state
        .services
        .payments
        .cancel_session_payments(session_id)
        .await?;
    Ok(Json(ApiResponse::success(cancelled)))
}
