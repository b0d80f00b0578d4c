use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::{services::points::CustomerPoints, ApiResponse, ApiResult, AppState};

#[utoipa::path(
    get,
    path = "/api/v1/points/customer/{id}",
    summary = "Loyalty balance of a customer",
    params(("id" = Uuid, Path, description = "Customer id")),
    responses(
        (status = 200, description = "Points snapshot", body = ApiResponse<CustomerPoints>),
        (status = 404, description = "Customer not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Points"
)]
pub async fn get_customer_points(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CustomerPoints> {
    let points = state.services.points.get_customer_points(id).await?;
    Ok(Json(ApiResponse::success(points)))
}
