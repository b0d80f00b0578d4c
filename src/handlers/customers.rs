use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    entities::customer,
    services::customers::{UpsertCustomerRequest, UpsertCustomerResult},
    ApiCreated, ApiResponse, ApiResult, AppState,
};

/// 201 for a new registration, 200 when an existing phone was updated.
pub async fn upsert_customer(
    State(state): State<AppState>,
    Json(payload): Json<UpsertCustomerRequest>,
) -> ApiCreated<UpsertCustomerResult> {
    let result = state.services.customers.create_or_update(payload).await?;
    let status = if result.is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::success(result))))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<customer::Model> {
    let customer = state.services.customers.get_customer(id).await?;
    Ok(Json(ApiResponse::success(customer)))
}

pub async fn get_customer_by_phone(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<customer::Model> {
    let customer = state.services.customers.get_customer_by_phone(&phone).await?;
    Ok(Json(ApiResponse::success(customer)))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    state.services.customers.delete_customer(id).await?;
    Ok(Json(ApiResponse::success(json!({
        "customer_id": id,
        "deleted": true
    }))))
}
