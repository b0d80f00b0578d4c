use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    entities::dining_table,
    services::tables::{CreateTableRequest, UpdateTableRequest},
    ApiCreated, ApiResponse, ApiResult, AppState,
};

pub async fn create_table(
    State(state): State<AppState>,
    Json(payload): Json<CreateTableRequest>,
) -> ApiCreated<dining_table::Model> {
    let table = state.services.tables.create_table(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(table))))
}

pub async fn list_tables(State(state): State<AppState>) -> ApiResult<Vec<dining_table::Model>> {
    let tables = state.services.tables.list_tables().await?;
    Ok(Json(ApiResponse::success(tables)))
}

pub async fn get_table(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<dining_table::Model> {
    let table = state.services.tables.get_table(id).await?;
    Ok(Json(ApiResponse::success(table)))
}

pub async fn update_table(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTableRequest>,
) -> ApiResult<dining_table::Model> {
    let table = state.services.tables.update_table(id, payload).await?;
    Ok(Json(ApiResponse::success(table)))
}

pub async fn delete_table(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    state.services.tables.delete_table(id).await?;
    Ok(Json(ApiResponse::success(json!({
        "table_id": id,
        "deleted": true
    }))))
}
