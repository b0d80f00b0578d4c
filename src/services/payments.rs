use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::{BankConfig, LoyaltyConfig},
    db::{lock_for_update, DbPool},
    entities::{
        order::{self, OrderStatus},
        parse_enum,
        payment::{self, Entity as PaymentEntity, Model as PaymentModel, PaymentMethod, PaymentStatus},
        qr_session,
    },
    errors::ServiceError,
    events::{
        effects::{EffectRunner, PostCommitEffects},
        Event,
    },
    notifications::{NotificationKind, NotificationPayload, NotificationTarget},
    services::{
        orders::fail_pending_payments,
        points::{earn_points_from_payment, redeem_all_points, AccrualOutcome, RedemptionOutcome},
        qr_sessions::{complete_session, QrSessionService},
        session_locks::SessionLocks,
        vietqr::{build_payment_qr, order_transfer_note, session_transfer_note, PaymentQrData},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PayOrderRequest {
    #[serde(alias = "orderId")]
    pub order_id: Uuid,
    pub method: String,
    #[serde(default, alias = "printBill")]
    pub print_bill: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentReceipt {
    #[serde(flatten)]
    pub payment: PaymentModel,
    pub qr_session_id: Uuid,
    /// True when an existing PENDING transfer was reused.
    pub is_existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_data: Option<PaymentQrData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ConfirmPaymentRequest {
    #[serde(alias = "qrSessionId", alias = "sessionId")]
    pub qr_session_id: Uuid,
    #[serde(default, alias = "transactionCode")]
    #[validate(length(max = 100))]
    pub transaction_code: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentConfirmation {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub qr_session_id: Uuid,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_code: Option<String>,
    pub amount: Decimal,
    pub confirmed_at: DateTime<Utc>,
    pub session_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RefundRequest {
    pub amount: Decimal,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundResult {
    pub payment_id: Uuid,
    pub refunded: Decimal,
    pub remaining: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PaymentFilters {
    #[serde(alias = "qr_session_id")]
    pub session_id: Option<Uuid>,
    pub status: Option<String>,
    /// Lower bound on `paid_at`.
    pub from: Option<DateTime<Utc>>,
    /// Upper bound on `paid_at`.
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateSessionPaymentsRequest {
    pub method: String,
    #[serde(alias = "orderIds")]
    pub order_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionPaymentLine {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub is_existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionPaymentBatch {
    pub session_id: Uuid,
    pub method: PaymentMethod,
    pub payments: Vec<SessionPaymentLine>,
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_data: Option<PaymentQrData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelledSessionPayments {
    pub session_id: Uuid,
    pub cancelled_payments: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SettleSessionRequest {
    #[serde(alias = "sessionId", alias = "qr_session_id")]
    pub session_id: Uuid,
    #[serde(default, alias = "adminId")]
    pub admin_id: Option<Uuid>,
    #[serde(default, alias = "useAllPoints")]
    pub use_all_points: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SettledOrder {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementSummary {
    pub session_id: Uuid,
    pub orders_confirmed: Vec<SettledOrder>,
    pub orders_cancelled: Vec<SettledOrder>,
    pub total_amount: Decimal,
    pub points_used: i32,
    pub discount_from_points: Decimal,
    pub final_amount: Decimal,
    pub points_earned: i32,
    pub new_points_balance: Option<i32>,
    pub session_status: qr_session::SessionStatus,
}

#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    bank: BankConfig,
    policy: LoyaltyConfig,
    sessions: Arc<QrSessionService>,
    locks: SessionLocks,
    effects: EffectRunner,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        bank: BankConfig,
        policy: LoyaltyConfig,
        sessions: Arc<QrSessionService>,
        locks: SessionLocks,
        effects: EffectRunner,
    ) -> Self {
        Self {
            db_pool,
            bank,
            policy,
            sessions,
            locks,
            effects,
        }
    }

    /// Starts paying one order. CASH settles immediately; transfers stay
    /// PENDING behind a QR code until the callback arrives.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.method))]
    pub async fn pay_order(&self, request: PayOrderRequest) -> Result<PaymentReceipt, ServiceError> {
        let method: PaymentMethod = parse_enum(&request.method, "payment method")?;

        let txn = self.db_pool.begin().await?;
        let order = lock_for_update(order::Entity::find_by_id(request.order_id), &txn)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", request.order_id)))?;
        match order.status {
            OrderStatus::Paid => {
                return Err(ServiceError::Conflict(format!(
                    "order {} is already paid",
                    order.id
                )))
            }
            OrderStatus::Cancelled => {
                return Err(ServiceError::Conflict(format!(
                    "order {} is cancelled",
                    order.id
                )))
            }
            _ => {}
        }

        let already_paid = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .count(&txn)
            .await?;
        if already_paid > 0 {
            return Err(ServiceError::Conflict(format!(
                "order {} already has a settled payment",
                order.id
            )));
        }

        let pending = lock_for_update(
            PaymentEntity::find()
                .filter(payment::Column::OrderId.eq(order.id))
                .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending)),
            &txn,
        )
        .one(&txn)
        .await?;

        if let Some(existing) = pending {
            if existing.method.is_transfer() && method.is_transfer() {
                let qr = build_payment_qr(&self.bank, existing.amount, &order_transfer_note(order.id))?;
                txn.commit().await?;
                info!(payment_id = %existing.id, "reissued QR for pending transfer");
                return Ok(PaymentReceipt {
                    payment: existing,
                    qr_session_id: order.qr_session_id,
                    is_existing: true,
                    qr_data: Some(qr),
                });
            }
            return Err(ServiceError::Conflict(format!(
                "order {} already has a pending {:?} payment; complete or cancel it first",
                order.id, existing.method
            )));
        }

        let qr_data = if method.is_transfer() {
            Some(build_payment_qr(
                &self.bank,
                order.total_price,
                &order_transfer_note(order.id),
            )?)
        } else {
            None
        };

        let now = Utc::now();
        let settled = method == PaymentMethod::Cash;
        let inserted = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            admin_id: Set(None),
            method: Set(method),
            amount: Set(order.total_price),
            payment_status: Set(if settled {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Pending
            }),
            print_bill: Set(request.print_bill),
            transaction_code: Set(None),
            paid_at: Set(settled.then_some(now)),
            confirmed_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from);
        let payment = match inserted {
            Ok(payment) => payment,
            Err(e) if e.is_unique_violation() => {
                return Err(ServiceError::Conflict(format!(
                    "order {} already has a pending payment",
                    order.id
                )))
            }
            Err(e) => return Err(e),
        };
        txn.commit().await?;

        counter!("tableside.payments.created", 1);
        info!(payment_id = %payment.id, status = ?payment.payment_status, "payment created");

        let mut effects = PostCommitEffects::new();
        effects.publish(Event::PaymentCreated {
            payment_id: payment.id,
            order_id: order.id,
            method,
        });
        let notice = if settled {
            NotificationPayload::new(NotificationKind::Success, "Payment received")
        } else {
            NotificationPayload::new(NotificationKind::Info, "Waiting for your payment")
        };
        effects.notify(
            NotificationTarget::Session(order.qr_session_id),
            notice.with_data(serde_json::json!({
                "payment_id": payment.id,
                "order_id": order.id,
                "method": method,
                "amount": payment.amount,
            })),
        );
        self.effects.run(effects).await;

        Ok(PaymentReceipt {
            payment,
            qr_session_id: order.qr_session_id,
            is_existing: false,
            qr_data,
        })
    }

    /// Bank callback for the session's most recent PENDING payment.
    #[instrument(skip(self, request), fields(session_id = %request.qr_session_id, success = request.success))]
    pub async fn confirm_payment(
        &self,
        request: ConfirmPaymentRequest,
    ) -> Result<PaymentConfirmation, ServiceError> {
        request.validate()?;
        let session_id = request.qr_session_id;

        let txn = self.db_pool.begin().await?;
        let pending = lock_for_update(
            PaymentEntity::find()
                .join(JoinType::InnerJoin, payment::Relation::Order.def())
                .filter(order::Column::QrSessionId.eq(session_id))
                .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
                .order_by_desc(payment::Column::CreatedAt),
            &txn,
        )
        .one(&txn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("no pending payment for session {session_id}"))
        })?;

        if let Some(amount) = request.amount {
            if amount != pending.amount {
                return Err(ServiceError::ValidationError(format!(
                    "amount mismatch: expected {}, received {amount}",
                    pending.amount
                )));
            }
        }

        let now = Utc::now();
        let order_id = pending.order_id;
        let (payment_status, order_status) = if request.success {
            (PaymentStatus::Paid, OrderStatus::Paid)
        } else {
            (PaymentStatus::Failed, OrderStatus::New)
        };

        let transaction_code = request
            .transaction_code
            .clone()
            .filter(|c| !c.trim().is_empty());
        let mut active: payment::ActiveModel = pending.into();
        active.payment_status = Set(payment_status);
        active.transaction_code = Set(transaction_code.clone());
        active.confirmed_at = Set(Some(now));
        if request.success {
            active.paid_at = Set(Some(now));
        }
        let payment = active.update(&txn).await?;

        order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(order_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        let mut effects = PostCommitEffects::new();
        if request.success {
            counter!("tableside.payments.confirmed", 1);
            info!(payment_id = %payment.id, "payment confirmed");
            effects.publish(Event::PaymentConfirmed {
                payment_id: payment.id,
                order_id,
            });
            effects.notify(
                NotificationTarget::Session(session_id),
                NotificationPayload::new(NotificationKind::Success, "Payment confirmed")
                    .with_data(serde_json::json!({ "payment_id": payment.id, "order_id": order_id })),
            );
        } else {
            counter!("tableside.payments.failed", 1);
            warn!(payment_id = %payment.id, "payment failed, order restored to NEW");
            effects.publish(Event::PaymentFailed {
                payment_id: payment.id,
                order_id,
            });
            effects.notify(
                NotificationTarget::Session(session_id),
                NotificationPayload::new(
                    NotificationKind::Error,
                    "Payment failed, please try again",
                )
                .with_data(serde_json::json!({ "payment_id": payment.id, "order_id": order_id })),
            );
        }
        self.effects.run(effects).await;

        let session_closed = if request.success {
            match self.sessions.close_if_settled(session_id).await {
                Ok(closed) => closed,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "could not close session after payment");
                    false
                }
            }
        } else {
            false
        };

        Ok(PaymentConfirmation {
            payment_id: payment.id,
            order_id,
            qr_session_id: session_id,
            payment_status,
            order_status,
            transaction_code,
            amount: payment.amount,
            confirmed_at: now,
            session_closed,
        })
    }

    /// Reduces a PAID payment's recorded amount. Order status is untouched.
    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        request: RefundRequest,
    ) -> Result<RefundResult, ServiceError> {
        request.validate()?;
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "refund amount must be positive".to_string(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        let current = lock_for_update(PaymentEntity::find_by_id(payment_id), &txn)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {payment_id} not found")))?;
        if current.payment_status != PaymentStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "payment {payment_id} is {:?}; only PAID payments can be refunded",
                current.payment_status
            )));
        }
        if request.amount > current.amount {
            return Err(ServiceError::ValidationError(format!(
                "refund {} exceeds paid amount {}",
                request.amount, current.amount
            )));
        }

        let remaining = current.amount - request.amount;
        let mut active: payment::ActiveModel = current.into();
        active.amount = Set(remaining);
        active.update(&txn).await?;
        txn.commit().await?;

        info!(payment_id = %payment_id, refunded = %request.amount, remaining = %remaining, "payment refunded");
        let mut effects = PostCommitEffects::new();
        effects.publish(Event::PaymentRefunded {
            payment_id,
            amount: request.amount,
        });
        self.effects.run(effects).await;

        Ok(RefundResult {
            payment_id,
            refunded: request.amount,
            remaining,
            reason: request.reason,
        })
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentModel, ServiceError> {
        PaymentEntity::find_by_id(payment_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {payment_id} not found")))
    }

    pub async fn list_payments(&self, filters: PaymentFilters) -> Result<Vec<PaymentModel>, ServiceError> {
        let mut query = PaymentEntity::find();
        if let Some(session_id) = filters.session_id {
            query = query
                .join(JoinType::InnerJoin, payment::Relation::Order.def())
                .filter(order::Column::QrSessionId.eq(session_id));
        }
        if let Some(raw) = filters.status.as_deref() {
            let status: PaymentStatus = parse_enum(raw, "payment status")?;
            query = query.filter(payment::Column::PaymentStatus.eq(status));
        }
        if let Some(from) = filters.from {
            query = query.filter(payment::Column::PaidAt.gte(from));
        }
        if let Some(to) = filters.to {
            query = query.filter(payment::Column::PaidAt.lte(to));
        }

        Ok(query
            .order_by_desc(payment::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    /// Opens PENDING payments for a batch of the session's orders. Orders
    /// that already have one are reported, not duplicated.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn create_session_payments(
        &self,
        session_id: Uuid,
        request: CreateSessionPaymentsRequest,
    ) -> Result<SessionPaymentBatch, ServiceError> {
        let method: PaymentMethod = parse_enum(&request.method, "payment method")?;
        if request.order_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one order id is required".to_string(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        qr_session::Entity::find_by_id(session_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;

        let mut lines = Vec::with_capacity(request.order_ids.len());
        let mut created = Vec::new();
        for order_id in &request.order_ids {
            let order = lock_for_update(
                order::Entity::find_by_id(*order_id)
                    .filter(order::Column::QrSessionId.eq(session_id)),
                &txn,
            )
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("order {order_id} not found in session {session_id}"))
            })?;
            if order.status.is_terminal() {
                return Err(ServiceError::Conflict(format!(
                    "order {order_id} is {:?}",
                    order.status
                )));
            }

            if let Some(existing) = PaymentEntity::find()
                .filter(payment::Column::OrderId.eq(order.id))
                .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
                .one(&txn)
                .await?
            {
                lines.push(SessionPaymentLine {
                    payment_id: existing.id,
                    order_id: order.id,
                    amount: order.total_price,
                    is_existing: true,
                });
                continue;
            }

            let payment = payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                admin_id: Set(None),
                method: Set(method),
                amount: Set(order.total_price),
                payment_status: Set(PaymentStatus::Pending),
                print_bill: Set(false),
                transaction_code: Set(None),
                paid_at: Set(None),
                confirmed_at: Set(None),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            created.push((payment.id, order.id));
            lines.push(SessionPaymentLine {
                payment_id: payment.id,
                order_id: order.id,
                amount: order.total_price,
                is_existing: false,
            });
        }

        let total_amount: Decimal = lines.iter().map(|l| l.amount).sum();
        let qr_data = if method.is_transfer() {
            Some(build_payment_qr(
                &self.bank,
                total_amount,
                &session_transfer_note(session_id),
            )?)
        } else {
            None
        };
        txn.commit().await?;

        info!(session_id = %session_id, created = created.len(), total = %total_amount, "session payments opened");
        let mut effects = PostCommitEffects::new();
        for (payment_id, order_id) in created {
            effects.publish(Event::PaymentCreated {
                payment_id,
                order_id,
                method,
            });
        }
        self.effects.run(effects).await;

        Ok(SessionPaymentBatch {
            session_id,
            method,
            payments: lines,
            total_amount,
            qr_data,
        })
    }

    #[instrument(skip(self))]
    pub async fn cancel_session_payments(
        &self,
        session_id: Uuid,
    ) -> Result<CancelledSessionPayments, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let order_ids: Vec<Uuid> = order::Entity::find()
            .filter(order::Column::QrSessionId.eq(session_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        if order_ids.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "no orders found for session {session_id}"
            )));
        }

        let cancelled = fail_pending_payments(&txn, &order_ids).await?;
        txn.commit().await?;

        info!(session_id = %session_id, cancelled, "pending session payments cancelled");
        Ok(CancelledSessionPayments {
            session_id,
            cancelled_payments: cancelled,
        })
    }

    /// Staff settlement of a whole session in one transaction: confirmed
    /// orders are paid (optionally against the customer's points), unconfirmed
    /// ones are cancelled, points accrue and the session completes.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, use_all_points = request.use_all_points))]
    pub async fn pay_order_by_admin(
        &self,
        request: SettleSessionRequest,
    ) -> Result<SettlementSummary, ServiceError> {
        let session_id = request.session_id;
        let guard = self.locks.acquire(session_id).await;
        let txn = self.db_pool.begin().await?;

        let session = lock_for_update(qr_session::Entity::find_by_id(session_id), &txn)
            .one(&txn)
            .await?
            .filter(qr_session::Model::is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("session {session_id} not found or already completed"))
            })?;

        let orders = lock_for_update(
            order::Entity::find()
                .filter(order::Column::QrSessionId.eq(session_id))
                .order_by_asc(order::Column::CreatedAt),
            &txn,
        )
        .all(&txn)
        .await?;
        if orders.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "no orders found for session {session_id}"
            )));
        }

        let (to_confirm, to_cancel): (Vec<_>, Vec<_>) = orders
            .into_iter()
            .filter(|o| !o.status.is_terminal())
            .partition(|o| matches!(o.status, OrderStatus::InProgress | OrderStatus::Done));
        let confirm_ids: Vec<Uuid> = to_confirm.iter().map(|o| o.id).collect();
        let cancel_ids: Vec<Uuid> = to_cancel.iter().map(|o| o.id).collect();
        let total_amount: Decimal = to_confirm.iter().map(|o| o.total_price).sum();

        let redemption: Option<RedemptionOutcome> = match session.customer_id {
            Some(customer_id) if request.use_all_points && total_amount > Decimal::ZERO => {
                redeem_all_points(&txn, &self.policy, customer_id, total_amount).await?
            }
            _ => None,
        };
        let discount = redemption.map(|r| r.discount).unwrap_or(Decimal::ZERO);
        let final_amount = total_amount - discount;

        let now = Utc::now();
        if !cancel_ids.is_empty() {
            let mut update = order::Entity::update_many()
                .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
                .col_expr(order::Column::UpdatedAt, Expr::value(now));
            if let Some(admin_id) = request.admin_id {
                update = update.col_expr(order::Column::AdminId, Expr::value(admin_id));
            }
            update
                .filter(order::Column::Id.is_in(cancel_ids.clone()))
                .exec(&txn)
                .await?;
            fail_pending_payments(&txn, &cancel_ids).await?;
        }

        if !confirm_ids.is_empty() {
            let mut update = order::Entity::update_many()
                .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
                .col_expr(order::Column::UpdatedAt, Expr::value(now));
            if let Some(admin_id) = request.admin_id {
                update = update.col_expr(order::Column::AdminId, Expr::value(admin_id));
            }
            update
                .filter(order::Column::Id.is_in(confirm_ids.clone()))
                .exec(&txn)
                .await?;

            let mut settle = PaymentEntity::update_many()
                .col_expr(payment::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
                .col_expr(payment::Column::ConfirmedAt, Expr::value(now))
                .col_expr(payment::Column::PaidAt, Expr::value(now))
                .col_expr(payment::Column::UpdatedAt, Expr::value(now));
            if let Some(admin_id) = request.admin_id {
                settle = settle.col_expr(payment::Column::AdminId, Expr::value(admin_id));
            }
            settle
                .filter(payment::Column::OrderId.is_in(confirm_ids.clone()))
                .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
                .exec(&txn)
                .await?;

            let paid: HashSet<Uuid> = PaymentEntity::find()
                .filter(payment::Column::OrderId.is_in(confirm_ids.clone()))
                .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Paid))
                .all(&txn)
                .await?
                .into_iter()
                .map(|p| p.order_id)
                .collect();
            for order in to_confirm.iter().filter(|o| !paid.contains(&o.id)) {
                payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    admin_id: Set(request.admin_id),
                    method: Set(PaymentMethod::Cash),
                    amount: Set(order.total_price),
                    payment_status: Set(PaymentStatus::Paid),
                    print_bill: Set(false),
                    transaction_code: Set(None),
                    paid_at: Set(Some(now)),
                    confirmed_at: Set(Some(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        let accrual: Option<AccrualOutcome> = match session.customer_id {
            Some(customer_id) if final_amount > Decimal::ZERO => {
                earn_points_from_payment(&txn, &self.policy, customer_id, final_amount).await?
            }
            _ => None,
        };

        complete_session(&txn, session_id).await?;
        txn.commit().await?;
        drop(guard);
        self.locks.release_idle(session_id);

        counter!("tableside.settlements.completed", 1);
        info!(
            session_id = %session_id,
            confirmed = confirm_ids.len(),
            cancelled = cancel_ids.len(),
            total = %total_amount,
            final_amount = %final_amount,
            "session settled"
        );

        let points_used = redemption.map(|r| r.points_used).unwrap_or(0);
        let points_earned = accrual.map(|a| a.points_earned).unwrap_or(0);
        let new_points_balance = accrual
            .map(|a| a.new_balance)
            .or(redemption.map(|r| r.remaining_points));

        let summary = SettlementSummary {
            session_id,
            orders_confirmed: to_confirm
                .iter()
                .map(|o| SettledOrder {
                    id: o.id,
                    status: OrderStatus::Paid,
                    total_price: o.total_price,
                })
                .collect(),
            orders_cancelled: to_cancel
                .iter()
                .map(|o| SettledOrder {
                    id: o.id,
                    status: OrderStatus::Cancelled,
                    total_price: o.total_price,
                })
                .collect(),
            total_amount,
            points_used,
            discount_from_points: discount,
            final_amount,
            points_earned,
            new_points_balance,
            session_status: qr_session::SessionStatus::Completed,
        };

        let mut effects = PostCommitEffects::new();
        effects.notify(
            NotificationTarget::Session(session_id),
            NotificationPayload::new(
                NotificationKind::SessionPaid,
                "Payment completed. Thank you for dining with us!",
            )
            .with_data(serde_json::json!({
                "total_amount": summary.total_amount,
                "points_used": summary.points_used,
                "discount_from_points": summary.discount_from_points,
                "final_amount": summary.final_amount,
                "points_earned": summary.points_earned,
                "new_points_balance": summary.new_points_balance,
                "orders_confirmed": summary.orders_confirmed.len(),
                "orders_cancelled": summary.orders_cancelled.len(),
            })),
        );
        effects.publish(Event::SessionSettled {
            session_id,
            orders_confirmed: summary.orders_confirmed.len(),
            final_amount,
        });
        if let Some(r) = redemption.filter(|r| r.points_used > 0 || r.discount > Decimal::ZERO) {
            effects.publish(Event::PointsRedeemed {
                customer_id: r.customer_id,
                points: r.points_used,
                discount: r.discount,
            });
        }
        if let Some(a) = accrual.filter(|a| a.points_earned > 0) {
            effects.publish(Event::PointsEarned {
                customer_id: a.customer_id,
                points: a.points_earned,
                new_balance: a.new_balance,
            });
        }
        effects.publish(Event::SessionClosed(session_id));
        self.effects.run(effects).await;

        Ok(summary)
    }
}
