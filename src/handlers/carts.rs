use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    entities::cart,
    services::{
        carts::{
            AddToCartRequest, AddToCartResult, CartItemChange, CartView, CheckoutCartRequest,
            ClearCartResult, UpdateCartItemRequest, UpdateCartStatusRequest,
        },
        orders::PlacedOrder,
    },
    ApiCreated, ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/cart",
    summary = "Add an item to the session cart",
    request_body = AddToCartRequest,
    responses(
        (status = 201, description = "Item added", body = ApiResponse<AddToCartResult>),
        (status = 404, description = "Session or menu item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session no longer active", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    Json(payload): Json<AddToCartRequest>,
) -> ApiCreated<AddToCartResult> {
    let added = state.services.carts.add_to_cart(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(added))))
}

pub async fn get_cart(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state.services.carts.get_cart(session_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<ClearCartResult> {
    let cleared = state.services.carts.clear_cart(session_id).await?;
    Ok(Json(ApiResponse::success(cleared)))
}

pub async fn checkout_cart(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<CheckoutCartRequest>>,
) -> ApiCreated<PlacedOrder> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let order = state
        .services
        .carts
        .checkout_cart(session_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{id}",
    summary = "Update a cart line",
    description = "Quantity 0 deletes the line",
    params(("id" = Uuid, Path, description = "Cart item id")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Line updated or deleted", body = ApiResponse<CartItemChange>),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart or line no longer editable", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> ApiResult<CartItemChange> {
    let change = state.services.carts.update_cart_item(id, payload).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CartItemChange> {
    let change = state.services.carts.remove_cart_item(id).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn update_cart_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCartStatusRequest>,
) -> ApiResult<cart::Model> {
    let cart = state.services.carts.update_cart_status(id, payload).await?;
    Ok(Json(ApiResponse::success(cart)))
}
