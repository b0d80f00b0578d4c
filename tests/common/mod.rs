#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tableside_api::{
    config::AppConfig,
    db,
    entities::{customer, dining_table, menu_item},
    events::{self, EventSender},
    services::{
        orders::OrderItemInput,
        qr_sessions::{ScanRequest, SessionView},
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by a throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = db_dir.path().join("tableside_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        // One connection keeps SQLite writers strictly serialized.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.bank.bank_code = Some("970436".to_string());
        cfg.bank.account_no = Some("0011004455667".to_string());
        cfg.bank.account_name = Some("TABLESIDE TEST".to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = Router::new()
            .nest("/api/v1", tableside_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_table(&self, number: &str) -> dining_table::Model {
        self.state
            .services
            .tables
            .create_table(tableside_api::services::tables::CreateTableRequest {
                table_number: number.to_string(),
            })
            .await
            .expect("seed table")
    }

    pub async fn seed_menu_item(&self, name: &str, price: Decimal) -> menu_item::Model {
        let now = Utc::now();
        menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            is_available: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed menu item")
    }

    pub async fn seed_customer(&self, phone: &str, points: i32) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(Some("Test Guest".to_string())),
            phone: Set(phone.to_string()),
            email: Set(None),
            points: Set(points),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer")
    }

    /// Scans the table's QR without a token.
    pub async fn open_session(&self, table_id: Uuid) -> SessionView {
        self.state
            .services
            .sessions
            .open_or_reuse(ScanRequest {
                table_id,
                customer_id: None,
                session_token: None,
            })
            .await
            .expect("open session")
    }
}

pub fn item(menu_item_id: Uuid, quantity: i32) -> OrderItemInput {
    OrderItemInput {
        menu_item_id,
        quantity,
        note: None,
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
