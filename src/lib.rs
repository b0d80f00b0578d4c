//! Tableside API Library
//!
//! Core of the QR table-ordering backend: dining sessions, carts, orders,
//! payments and loyalty points, plus the real-time notification hub.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub notifications: Arc<notifications::RoomBroadcaster>,
}

impl AppState {
    /// Builds the notification hub and every service on top of `db`.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let notifications = Arc::new(notifications::RoomBroadcaster::new(
            config.notification_channel_capacity,
        ));
        let services = handlers::AppServices::new(
            db.clone(),
            &config,
            event_sender.clone(),
            notifications.clone(),
        );
        Self {
            db,
            config,
            event_sender,
            services,
            notifications,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Result type for handlers that choose their own success status (201 on create)
pub type ApiCreated<T> = Result<(StatusCode, Json<ApiResponse<T>>), errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let sessions = Router::new()
        .route("/scan", post(handlers::qr_sessions::scan))
        .route("/:id", get(handlers::qr_sessions::get_session))
        .route("/:id/validate", get(handlers::qr_sessions::validate_session))
        .route("/:id/end", put(handlers::qr_sessions::end_session))
        .route("/:id/customer", put(handlers::qr_sessions::attach_customer));

    let cart = Router::new()
        .route("/", post(handlers::carts::add_to_cart))
        .route(
            "/session/:session_id",
            get(handlers::carts::get_cart).delete(handlers::carts::clear_cart),
        )
        .route(
            "/session/:session_id/checkout",
            post(handlers::carts::checkout_cart),
        )
        .route(
            "/items/:id",
            put(handlers::carts::update_cart_item).delete(handlers::carts::remove_cart_item),
        )
        .route("/:id/status", put(handlers::carts::update_cart_status));

    let orders = Router::new()
        .route(
            "/",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/admin/create", post(handlers::orders::create_order_by_admin))
        .route(
            "/session/:session_id",
            get(handlers::orders::get_session_orders),
        )
        .route("/table/:table_id", get(handlers::orders::get_table_orders))
        .route("/:id", get(handlers::orders::get_order))
        .route("/:id/items", post(handlers::orders::add_items))
        .route(
            "/:id/items/:item_id",
            put(handlers::orders::update_order_item).delete(handlers::orders::remove_order_item),
        )
        .route("/:id/status", put(handlers::orders::update_order_status))
        .route("/:id/cancel", put(handlers::orders::cancel_order))
        .route("/:id/reconcile", get(handlers::orders::reconcile_order));

    let payments = Router::new()
        .route(
            "/",
            get(handlers::payments::list_payments).post(handlers::payments::pay_order),
        )
        .route("/callback", post(handlers::payments::payment_callback))
        .route("/admin", post(handlers::payments::settle_session))
        .route(
            "/session/:session_id",
            post(handlers::payments::create_session_payments)
                .delete(handlers::payments::cancel_session_payments),
        )
        .route("/:id", get(handlers::payments::get_payment))
        .route("/:id/refund", post(handlers::payments::refund_payment));

    let tables = Router::new()
        .route(
            "/",
            get(handlers::tables::list_tables).post(handlers::tables::create_table),
        )
        .route(
            "/:id",
            get(handlers::tables::get_table)
                .put(handlers::tables::update_table)
                .delete(handlers::tables::delete_table),
        );

    let customers = Router::new()
        .route("/", post(handlers::customers::upsert_customer))
        .route(
            "/phone/:phone",
            get(handlers::customers::get_customer_by_phone),
        )
        .route(
            "/:id",
            get(handlers::customers::get_customer).delete(handlers::customers::delete_customer),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .nest("/qr-sessions", sessions)
        .nest("/cart", cart)
        .nest("/orders", orders)
        .nest("/payment", payments)
        .route(
            "/points/customer/:id",
            get(handlers::points::get_customer_points),
        )
        .nest("/tables", tables)
        .nest("/customers", customers)
        .route(
            "/notifications/stream",
            get(handlers::notifications::stream),
        )
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "tableside-api",
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
