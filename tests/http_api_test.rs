mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn status_and_health_respond_with_the_envelope() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "tableside-api");
    assert!(body["meta"]["timestamp"].is_string());

    let response = app.request(Method::GET, "/api/v1/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}

#[tokio::test]
async fn scan_cart_and_checkout_over_http() {
    let app = TestApp::new().await;
    let table = app.seed_table("H1").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/qr-sessions/scan",
            Some(json!({ "tableId": table.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["is_new"], true);
    assert_eq!(body["data"]["status"], "ACTIVE");
    let session_id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart",
            Some(json!({
                "qrSessionId": session_id,
                "menuItemId": pho.id,
                "quantity": 2,
                "note": "less onion"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .request(Method::GET, &format!("/api/v1/cart/session/{session_id}"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["item_count"], 2);

    // Checkout works without a body.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/session/{session_id}/checkout"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["is_new_order"], true);
    assert_eq!(body["data"]["status"], "NEW");
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(1));
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/session/{session_id}"),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"][0]["id"], order_id.as_str());

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "IN_PROGRESS" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "IN_PROGRESS");
    assert_eq!(body["data"]["previous_status"], "NEW");
}

#[tokio::test]
async fn service_errors_map_to_http_statuses() {
    let app = TestApp::new().await;
    let table = app.seed_table("H2").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Not Found");

    let session = app.open_session(table.id).await.session;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "qrSessionId": session.id, "items": [] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.request(Method::PUT, &format!("/api/v1/qr-sessions/{}/end", session.id), None)
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "qrSessionId": session.id,
                "items": [{ "menuItemId": pho.id, "quantity": 1 }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .request(
            Method::GET,
            "/api/v1/notifications/stream?room=KITCHEN",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn customers_register_once_per_phone() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "phone": "0903 111 222", "name": "Lan" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let customer_id = body["data"]["customer"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "phone": "0903111222", "email": "lan@example.com" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["customer"]["id"], customer_id.as_str());
    assert_eq!(body["data"]["is_new"], false);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/points/customer/{customer_id}"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["points"], 0);
}
