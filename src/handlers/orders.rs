use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    services::orders::{
        AddItemsRequest, CreateOrderByAdminRequest, CreateOrderRequest, OrderFilters,
        OrderItemChange, OrderList, OrderReconciliation, OrderStatusChange, OrderView,
        PlacedOrder, UpdateOrderItemRequest, UpdateOrderStatusRequest,
    },
    ApiCreated, ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Place or extend an order",
    description = "Items merge into the session's NEW order; a new order is opened when none exists",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<PlacedOrder>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Session or menu item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session no longer active", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> ApiCreated<PlacedOrder> {
    let order = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/admin/create",
    summary = "Place an order for a table on behalf of guests",
    request_body = CreateOrderByAdminRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<PlacedOrder>),
        (status = 404, description = "Table missing or inactive", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order_by_admin(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderByAdminRequest>,
) -> ApiCreated<PlacedOrder> {
    let order = state.services.orders.create_order_by_admin(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    params(OrderFilters),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<OrderList>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filters): Query<OrderFilters>,
) -> ApiResult<OrderList> {
    let orders = state.services.orders.get_all_orders(filters).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state.services.orders.get_order_by_id(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_session_orders(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Vec<OrderView>> {
    let orders = state
        .services
        .orders
        .get_orders_by_session_id(session_id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_table_orders(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
) -> ApiResult<Vec<OrderView>> {
    let orders = state.services.orders.get_orders_by_table_id(table_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn add_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddItemsRequest>,
) -> ApiResult<OrderView> {
    let order = state.services.orders.add_items(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Move an order through its lifecycle",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status changed or already current", body = ApiResponse<OrderStatusChange>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderStatusChange> {
    let change = state.services.orders.update_status(id, payload).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderStatusChange> {
    let change = state.services.orders.cancel_order(id).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn update_order_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateOrderItemRequest>,
) -> ApiResult<OrderItemChange> {
    let change = state
        .services
        .orders
        .update_order_item_quantity(id, item_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn remove_order_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<OrderItemChange> {
    let change = state.services.orders.remove_order_item(id, item_id).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn reconcile_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderReconciliation> {
    let report = state.services.orders.reconcile_order(id).await?;
    Ok(Json(ApiResponse::success(report)))
}
