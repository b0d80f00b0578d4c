mod common;

use assert_matches::assert_matches;
use common::TestApp;
use chrono::{Duration, Utc};
use common::item;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use tableside_api::{
    entities::qr_session::{self, SessionStatus},
    errors::ServiceError,
    services::{
        orders::CreateOrderRequest,
        qr_sessions::{ScanRequest, SessionInvalidReason},
        tables::UpdateTableRequest,
    },
};
use uuid::Uuid;

/// Moves the session's expiry into the past.
async fn backdate(app: &TestApp, session_id: Uuid) {
    let session = qr_session::Entity::find_by_id(session_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: qr_session::ActiveModel = session.into();
    active.expired_at = Set(Utc::now() - Duration::minutes(5));
    active.update(&*app.state.db).await.unwrap();
}

#[tokio::test]
async fn repeated_scans_reuse_the_active_session() {
    let app = TestApp::new().await;
    let table = app.seed_table("T1").await;

    let first = app.open_session(table.id).await;
    let second = app.open_session(table.id).await;

    assert!(first.is_new);
    assert!(!second.is_new);
    assert_eq!(first.session.id, second.session.id);
    assert_eq!(second.table_number, "T1");
    assert_eq!(second.session.status, SessionStatus::Active);
}

#[tokio::test]
async fn ending_a_session_lets_the_next_scan_open_a_fresh_one() {
    let app = TestApp::new().await;
    let table = app.seed_table("T2").await;
    let sessions = app.state.services.sessions.clone();

    let first = app.open_session(table.id).await;
    let closed = sessions.close_session(first.session.id).await.unwrap();
    assert!(closed.closed_now);

    let again = sessions.close_session(first.session.id).await.unwrap();
    assert!(!again.closed_now);
    assert_eq!(again.status, SessionStatus::Completed);

    let next = app.open_session(table.id).await;
    assert!(next.is_new);
    assert_ne!(next.session.id, first.session.id);
}

#[tokio::test]
async fn scanning_with_a_forged_token_is_rejected() {
    let app = TestApp::new().await;
    let table = app.seed_table("T3").await;

    let err = app
        .state
        .services
        .sessions
        .open_or_reuse(ScanRequest {
            table_id: table.id,
            customer_id: None,
            session_token: Some("not-a-real-signature".to_string()),
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn scanning_an_unknown_table_is_not_found() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .sessions
        .open_or_reuse(ScanRequest {
            table_id: Uuid::new_v4(),
            customer_id: None,
            session_token: None,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn validation_tells_clients_to_drop_stale_sessions() {
    let app = TestApp::new().await;
    let table = app.seed_table("T4").await;
    let sessions = app.state.services.sessions.clone();

    let missing = sessions.validate_session(Uuid::new_v4()).await.unwrap();
    assert!(!missing.valid);
    assert!(missing.should_clear);
    assert_eq!(missing.reason, Some(SessionInvalidReason::SessionNotFound));

    let open = app.open_session(table.id).await;
    let live = sessions.validate_session(open.session.id).await.unwrap();
    assert!(live.valid);
    assert!(!live.should_clear);

    sessions.close_session(open.session.id).await.unwrap();
    let done = sessions.validate_session(open.session.id).await.unwrap();
    assert!(!done.valid);
    assert_eq!(done.reason, Some(SessionInvalidReason::SessionCompleted));
}

#[tokio::test]
async fn customers_attach_to_active_sessions_only() {
    let app = TestApp::new().await;
    let table = app.seed_table("T5").await;
    let guest = app.seed_customer("0901234567", 0).await;
    let sessions = app.state.services.sessions.clone();

    let open = app.open_session(table.id).await;
    let attached = sessions
        .attach_customer(open.session.id, guest.id)
        .await
        .unwrap();
    assert_eq!(attached.customer_id, Some(guest.id));

    sessions.close_session(open.session.id).await.unwrap();
    let err = sessions
        .attach_customer(open.session.id, guest.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_) | ServiceError::Conflict(_));
}

#[tokio::test]
async fn expired_sessions_are_completed_when_validated() {
    let app = TestApp::new().await;
    let table = app.seed_table("T6").await;
    let sessions = app.state.services.sessions.clone();

    let open = app.open_session(table.id).await.session;
    backdate(&app, open.id).await;

    let check = sessions.validate_session(open.id).await.unwrap();
    assert!(!check.valid);
    assert!(check.should_clear);
    assert_eq!(check.reason, Some(SessionInvalidReason::SessionExpired));
    assert_eq!(
        check.session.map(|s| s.status),
        Some(SessionStatus::Completed)
    );

    let stored = sessions.get_session(open.id).await.unwrap();
    assert_eq!(stored.session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn scanning_replaces_an_expired_session_and_drops_its_lock() {
    let app = TestApp::new().await;
    let table = app.seed_table("T7").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let services = &app.state.services;

    let stale = app.open_session(table.id).await.session;
    services
        .orders
        .create_order(CreateOrderRequest {
            qr_session_id: stale.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
        .await
        .unwrap();
    assert_eq!(services.locks.len(), 1);

    backdate(&app, stale.id).await;
    let fresh = app.open_session(table.id).await;
    assert!(fresh.is_new);
    assert_ne!(fresh.session.id, stale.id);
    assert_eq!(fresh.session.status, SessionStatus::Active);
    assert!(services.locks.is_empty());

    let old = services.sessions.get_session(stale.id).await.unwrap();
    assert_eq!(old.session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn deactivated_tables_invalidate_their_sessions() {
    let app = TestApp::new().await;
    let table = app.seed_table("T8").await;
    let services = &app.state.services;

    let open = app.open_session(table.id).await.session;
    services
        .tables
        .update_table(
            table.id,
            UpdateTableRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let check = services.sessions.validate_session(open.id).await.unwrap();
    assert!(!check.valid);
    assert!(check.should_clear);
    assert_eq!(check.reason, Some(SessionInvalidReason::TableInactive));
}
