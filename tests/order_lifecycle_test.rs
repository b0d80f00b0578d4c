mod common;

use assert_matches::assert_matches;
use common::{item, TestApp};
use rstest::rstest;
use rust_decimal_macros::dec;
use tableside_api::{
    entities::{order::OrderStatus, qr_session::SessionStatus},
    errors::ServiceError,
    services::orders::{
        AddItemsRequest, CreateOrderByAdminRequest, CreateOrderRequest, OrderFilters,
        UpdateOrderItemRequest, UpdateOrderStatusRequest,
    },
};
use uuid::Uuid;

fn status(raw: &str) -> UpdateOrderStatusRequest {
    UpdateOrderStatusRequest {
        status: raw.to_string(),
        admin_id: None,
    }
}

#[tokio::test]
async fn repeat_orders_merge_into_the_open_new_order() {
    let app = TestApp::new().await;
    let table = app.seed_table("O1").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let tea = app.seed_menu_item("Tra da", dec!(5000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let first = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 2)],
            note: Some("window seat".to_string()),
        })
        .await
        .unwrap();
    assert!(first.is_new_order);
    assert_eq!(first.added_total, dec!(100000));

    let second = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1), item(tea.id, 3)],
            note: None,
        })
        .await
        .unwrap();
    assert!(!second.is_new_order);
    assert_eq!(second.order.order.id, first.order.order.id);
    assert_eq!(second.added_total, dec!(65000));
    assert_eq!(second.order.order.total_price, dec!(165000));

    let pho_line = second
        .order
        .items
        .iter()
        .find(|line| line.item.menu_item_id == pho.id)
        .unwrap();
    assert_eq!(pho_line.item.quantity, 3);
    assert_eq!(pho_line.menu_item_name.as_deref(), Some("Pho bo"));

    let check = orders.reconcile_order(first.order.order.id).await.unwrap();
    assert!(check.consistent);
    assert_eq!(check.computed_total, dec!(165000));
}

#[tokio::test]
async fn orders_after_the_kitchen_starts_open_a_second_order() {
    let app = TestApp::new().await;
    let table = app.seed_table("O2").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let first = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
        .await
        .unwrap();
    let first_id = first.order.order.id;
    orders
        .update_status(first_id, status("IN_PROGRESS"))
        .await
        .unwrap();

    let second = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
        .await
        .unwrap();
    assert!(second.is_new_order);
    assert_ne!(second.order.order.id, first_id);

    let session_orders = orders.get_orders_by_session_id(session.id).await.unwrap();
    assert_eq!(session_orders.len(), 2);
    assert_eq!(session_orders[0].order.status, OrderStatus::InProgress);
    assert_eq!(session_orders[1].order.status, OrderStatus::New);

    let by_table = orders.get_orders_by_table_id(table.id).await.unwrap();
    assert_eq!(by_table.len(), 2);
}

#[rstest]
#[case("DONE")]
#[case("PAID")]
#[tokio::test]
async fn new_orders_cannot_skip_the_kitchen(#[case] target: &str) {
    let app = TestApp::new().await;
    let table = app.seed_table("O3").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let placed = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
        .await
        .unwrap();

    let err = orders
        .update_status(placed.order.order.id, status(target))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn status_updates_walk_the_lifecycle_and_paid_closes_the_session() {
    let app = TestApp::new().await;
    let table = app.seed_table("O4").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let id = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
        .await
        .unwrap()
        .order
        .order
        .id;

    let same = orders.update_status(id, status("NEW")).await.unwrap();
    assert!(!same.changed);

    for next in ["IN_PROGRESS", "DONE", "PAID"] {
        let change = orders.update_status(id, status(next)).await.unwrap();
        assert!(change.changed);
    }

    let err = orders
        .update_status(id, status("CANCELLED"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let payments = app
        .state
        .services
        .payments
        .list_payments(Default::default())
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, dec!(50000));

    let view = app.state.services.sessions.get_session(session.id).await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn unknown_status_names_are_validation_errors() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .orders
        .update_status(Uuid::new_v4(), status("SHIPPED"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn cancel_is_only_allowed_before_the_kitchen_starts() {
    let app = TestApp::new().await;
    let table = app.seed_table("O5").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let place = || {
        orders.create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
    };

    let started = place().await.unwrap().order.order.id;
    orders
        .update_status(started, status("IN_PROGRESS"))
        .await
        .unwrap();
    let err = orders.cancel_order(started).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let fresh = place().await.unwrap().order.order.id;
    let cancelled = orders.cancel_order(fresh).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.previous_status, OrderStatus::New);
}

#[tokio::test]
async fn staff_additions_append_rows_and_keep_totals_consistent() {
    let app = TestApp::new().await;
    let table = app.seed_table("O6").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let id = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1)],
            note: None,
        })
        .await
        .unwrap()
        .order
        .order
        .id;
    orders.update_status(id, status("IN_PROGRESS")).await.unwrap();

    let view = orders
        .add_items(
            id,
            AddItemsRequest {
                items: vec![item(pho.id, 2)],
            },
        )
        .await
        .unwrap();
    assert_eq!(view.items.len(), 2);
    assert_eq!(view.order.total_price, dec!(150000));
    assert!(orders.reconcile_order(id).await.unwrap().consistent);

    orders.update_status(id, status("DONE")).await.unwrap();
    let err = orders
        .add_items(
            id,
            AddItemsRequest {
                items: vec![item(pho.id, 1)],
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn editing_lines_of_a_new_order_adjusts_the_total() {
    let app = TestApp::new().await;
    let table = app.seed_table("O7").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let tea = app.seed_menu_item("Tra da", dec!(5000)).await;
    let session = app.open_session(table.id).await.session;
    let orders = app.state.services.orders.clone();

    let placed = orders
        .create_order(CreateOrderRequest {
            qr_session_id: session.id,
            items: vec![item(pho.id, 1), item(tea.id, 2)],
            note: None,
        })
        .await
        .unwrap();
    let id = placed.order.order.id;
    let pho_line = placed
        .order
        .items
        .iter()
        .find(|l| l.item.menu_item_id == pho.id)
        .unwrap()
        .item
        .id;
    let tea_line = placed
        .order
        .items
        .iter()
        .find(|l| l.item.menu_item_id == tea.id)
        .unwrap()
        .item
        .id;

    let change = orders
        .update_order_item_quantity(id, pho_line, UpdateOrderItemRequest { quantity: 3 })
        .await
        .unwrap();
    assert_eq!(change.total_price, dec!(160000));

    let change = orders.remove_order_item(id, tea_line).await.unwrap();
    assert!(!change.order_deleted);
    assert_eq!(change.total_price, dec!(150000));
    assert!(orders.reconcile_order(id).await.unwrap().consistent);

    let change = orders.remove_order_item(id, pho_line).await.unwrap();
    assert!(change.order_deleted);
    let err = orders.get_order_by_id(id).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn staff_orders_open_the_table_session_and_attach_the_customer() {
    let app = TestApp::new().await;
    let table = app.seed_table("O8").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let guest = app.seed_customer("0987654321", 10).await;
    let admin = Uuid::new_v4();

    let placed = app
        .state
        .services
        .orders
        .create_order_by_admin(CreateOrderByAdminRequest {
            table_id: table.id,
            items: vec![item(pho.id, 2)],
            admin_id: Some(admin),
            customer_phone: Some("0987654321".to_string()),
            note: None,
        })
        .await
        .unwrap();
    assert!(placed.is_new_order);
    assert_eq!(placed.order.order.admin_id, Some(admin));

    let session = app
        .state
        .services
        .sessions
        .get_session(placed.order.order.qr_session_id)
        .await
        .unwrap();
    assert_eq!(session.session.table_id, table.id);
    assert_eq!(session.session.customer_id, Some(guest.id));
}

#[tokio::test]
async fn order_listing_filters_and_paginates() {
    let app = TestApp::new().await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let orders = app.state.services.orders.clone();

    let mut table_ids = Vec::new();
    for number in ["L1", "L2", "L3"] {
        let table = app.seed_table(number).await;
        let session = app.open_session(table.id).await.session;
        orders
            .create_order(CreateOrderRequest {
                qr_session_id: session.id,
                items: vec![item(pho.id, 1)],
                note: None,
            })
            .await
            .unwrap();
        table_ids.push(table.id);
    }

    let page = orders
        .get_all_orders(OrderFilters {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders.len(), 2);
    assert_eq!(page.total_pages, 2);

    let one_table = orders
        .get_all_orders(OrderFilters {
            table_id: Some(table_ids[1]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(one_table.total, 1);

    let in_progress = orders
        .get_all_orders(OrderFilters {
            status: Some("in_progress".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(in_progress.total, 0);
}

#[tokio::test]
async fn concurrent_orders_for_one_session_merge_into_a_single_new_order() {
    let app = TestApp::new().await;
    let table = app.seed_table("O9").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session = app.open_session(table.id).await.session;

    let (session_id, pho_id) = (session.id, pho.id);
    let service = app.state.services.orders.clone();
    let handles: Vec<_> = (0..6)
        .map(move |_| {
            let orders = service.clone();
            tokio::spawn(async move {
                orders
                    .create_order(CreateOrderRequest {
                        qr_session_id: session_id,
                        items: vec![item(pho_id, 1)],
                        note: None,
                    })
                    .await
            })
        })
        .collect();
    let placed: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(placed.iter().filter(|p| p.is_new_order).count(), 1);
    let order_id = placed[0].order.order.id;
    assert!(placed.iter().all(|p| p.order.order.id == order_id));

    let open = app
        .state
        .services
        .orders
        .get_orders_by_session_id(session.id)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].order.status, OrderStatus::New);
    assert_eq!(open[0].order.total_price, dec!(300000));
    assert_eq!(open[0].items.len(), 1);
    assert_eq!(open[0].items[0].item.quantity, 6);

    let check = app.state.services.orders.reconcile_order(order_id).await.unwrap();
    assert!(check.consistent);
}
