mod common;

use assert_matches::assert_matches;
use common::{item, TestApp};
use rust_decimal_macros::dec;
use tableside_api::{
    entities::{
        order::OrderStatus,
        payment::{PaymentMethod, PaymentStatus},
        qr_session::SessionStatus,
    },
    errors::ServiceError,
    services::{
        orders::{CreateOrderRequest, UpdateOrderStatusRequest},
        payments::{
            ConfirmPaymentRequest, CreateSessionPaymentsRequest, PayOrderRequest, PaymentFilters,
            RefundRequest,
        },
    },
};
use uuid::Uuid;

struct Seated {
    app: TestApp,
    session_id: Uuid,
    order_id: Uuid,
}

/// One table, one session, one NEW order worth 100,000.
async fn seated() -> Seated {
    let app = TestApp::new().await;
    let table = app.seed_table("P1").await;
    let pho = app.seed_menu_item("Pho bo", dec!(50000)).await;
    let session_id = app.open_session(table.id).await.session.id;
    let order_id = app
        .state
        .services
        .orders
        .create_order(CreateOrderRequest {
            qr_session_id: session_id,
            items: vec![item(pho.id, 2)],
            note: None,
        })
        .await
        .unwrap()
        .order
        .order
        .id;
    Seated {
        app,
        session_id,
        order_id,
    }
}

fn pay(order_id: Uuid, method: &str) -> PayOrderRequest {
    PayOrderRequest {
        order_id,
        method: method.to_string(),
        print_bill: false,
    }
}

fn callback(session_id: Uuid, success: bool) -> ConfirmPaymentRequest {
    ConfirmPaymentRequest {
        qr_session_id: session_id,
        transaction_code: Some("FT24001".to_string()),
        amount: None,
        success,
    }
}

#[tokio::test]
async fn failed_transfer_callback_reopens_the_order() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    let receipt = payments.pay_order(pay(s.order_id, "BANKING")).await.unwrap();
    assert_eq!(receipt.payment.payment_status, PaymentStatus::Pending);
    assert_eq!(receipt.payment.amount, dec!(100000));
    assert!(receipt.qr_data.is_some());
    assert!(!receipt.is_existing);

    let outcome = payments
        .confirm_payment(callback(s.session_id, false))
        .await
        .unwrap();
    assert_eq!(outcome.payment_status, PaymentStatus::Failed);
    assert_eq!(outcome.order_status, OrderStatus::New);
    assert!(!outcome.session_closed);

    let stored = payments.get_payment(receipt.payment.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
    let order = s.app.state.services.orders.get_order_by_id(s.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::New);
    let session = s.app.state.services.sessions.get_session(s.session_id).await.unwrap();
    assert_eq!(session.session.status, SessionStatus::Active);

    // Nothing is pending any more.
    let err = payments
        .confirm_payment(callback(s.session_id, true))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn successful_transfer_callback_pays_and_closes_the_session() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    payments.pay_order(pay(s.order_id, "QR")).await.unwrap();
    let outcome = payments
        .confirm_payment(ConfirmPaymentRequest {
            amount: Some(dec!(100000)),
            ..callback(s.session_id, true)
        })
        .await
        .unwrap();
    assert_eq!(outcome.payment_status, PaymentStatus::Paid);
    assert_eq!(outcome.order_status, OrderStatus::Paid);
    assert_eq!(outcome.transaction_code.as_deref(), Some("FT24001"));
    assert!(outcome.session_closed);

    let session = s.app.state.services.sessions.get_session(s.session_id).await.unwrap();
    assert_eq!(session.session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn callback_amount_must_match_the_pending_payment() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    payments.pay_order(pay(s.order_id, "BANKING")).await.unwrap();
    let err = payments
        .confirm_payment(ConfirmPaymentRequest {
            amount: Some(dec!(99000)),
            ..callback(s.session_id, true)
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let pending = payments
        .list_payments(PaymentFilters {
            session_id: Some(s.session_id),
            status: Some("PENDING".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn pending_transfers_are_reissued_but_never_duplicated() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    let first = payments.pay_order(pay(s.order_id, "BANKING")).await.unwrap();
    let again = payments.pay_order(pay(s.order_id, "QR")).await.unwrap();
    assert!(again.is_existing);
    assert_eq!(again.payment.id, first.payment.id);
    assert!(again.qr_data.is_some());

    let err = payments.pay_order(pay(s.order_id, "CASH")).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let all = payments
        .list_payments(PaymentFilters {
            session_id: Some(s.session_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn cash_payments_settle_immediately_without_flipping_the_order() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    let receipt = payments.pay_order(pay(s.order_id, "cash")).await.unwrap();
    assert_eq!(receipt.payment.method, PaymentMethod::Cash);
    assert_eq!(receipt.payment.payment_status, PaymentStatus::Paid);
    assert!(receipt.payment.paid_at.is_some());
    assert!(receipt.qr_data.is_none());

    let order = s.app.state.services.orders.get_order_by_id(s.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::New);
}

#[tokio::test]
async fn an_order_settled_in_cash_cannot_be_paid_twice() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    payments.pay_order(pay(s.order_id, "CASH")).await.unwrap();
    let err = payments.pay_order(pay(s.order_id, "CASH")).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    let err = payments
        .pay_order(pay(s.order_id, "BANKING"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let paid = payments
        .list_payments(PaymentFilters {
            session_id: Some(s.session_id),
            status: Some("PAID".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].amount, dec!(100000));
}

#[tokio::test]
async fn paid_and_cancelled_orders_cannot_be_paid_again() {
    let s = seated().await;
    let orders = s.app.state.services.orders.clone();
    let payments = s.app.state.services.payments.clone();

    orders.cancel_order(s.order_id).await.unwrap();
    let err = payments.pay_order(pay(s.order_id, "CASH")).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let err = payments
        .pay_order(pay(Uuid::new_v4(), "CASH"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = payments
        .pay_order(pay(s.order_id, "BITCOIN"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn cancelling_an_order_fails_its_pending_payment() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    let receipt = payments.pay_order(pay(s.order_id, "BANKING")).await.unwrap();
    s.app
        .state
        .services
        .orders
        .update_status(
            s.order_id,
            UpdateOrderStatusRequest {
                status: "CANCELLED".to_string(),
                admin_id: None,
            },
        )
        .await
        .unwrap();

    let stored = payments.get_payment(receipt.payment.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn refunds_reduce_paid_amounts_only() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    let pending = payments.pay_order(pay(s.order_id, "BANKING")).await.unwrap();
    let err = payments
        .refund_payment(
            pending.payment.id,
            RefundRequest {
                amount: dec!(1000),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    payments
        .confirm_payment(callback(s.session_id, true))
        .await
        .unwrap();

    let refund = payments
        .refund_payment(
            pending.payment.id,
            RefundRequest {
                amount: dec!(30000),
                reason: Some("cold soup".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(refund.remaining, dec!(70000));

    let err = payments
        .refund_payment(
            pending.payment.id,
            RefundRequest {
                amount: dec!(70001),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = payments
        .refund_payment(
            pending.payment.id,
            RefundRequest {
                amount: dec!(0),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let order = s.app.state.services.orders.get_order_by_id(s.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn session_batches_open_one_pending_payment_per_order() {
    let s = seated().await;
    let payments = s.app.state.services.payments.clone();

    let batch = payments
        .create_session_payments(
            s.session_id,
            CreateSessionPaymentsRequest {
                method: "BANKING".to_string(),
                order_ids: vec![s.order_id],
            },
        )
        .await
        .unwrap();
    assert_eq!(batch.total_amount, dec!(100000));
    assert!(batch.qr_data.is_some());
    assert!(!batch.payments[0].is_existing);

    let repeat = payments
        .create_session_payments(
            s.session_id,
            CreateSessionPaymentsRequest {
                method: "BANKING".to_string(),
                order_ids: vec![s.order_id],
            },
        )
        .await
        .unwrap();
    assert!(repeat.payments[0].is_existing);
    assert_eq!(repeat.payments[0].payment_id, batch.payments[0].payment_id);

    let err = payments
        .create_session_payments(
            s.session_id,
            CreateSessionPaymentsRequest {
                method: "BANKING".to_string(),
                order_ids: vec![Uuid::new_v4()],
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let cancelled = payments.cancel_session_payments(s.session_id).await.unwrap();
    assert_eq!(cancelled.cancelled_payments, 1);
}
