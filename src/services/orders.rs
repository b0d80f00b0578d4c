use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{lock_for_update, DbPool},
    entities::{
        dining_table, menu_item,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        parse_enum,
        payment::{self, PaymentMethod, PaymentStatus},
        qr_session::{self, SessionStatus},
    },
    errors::ServiceError,
    events::{
        effects::{EffectRunner, PostCommitEffects},
        Event, KitchenTicket, KitchenTicketLine,
    },
    notifications::{NotificationKind, NotificationPayload, NotificationTarget},
    services::{
        customers::{find_live_by_phone, normalize_phone},
        qr_sessions::{require_active_session, QrSessionService, ScanRequest},
        session_locks::SessionLocks,
        tables::find_usable_table,
    },
};

const DEFAULT_PAGE_SIZE: u64 = 100;
const MAX_PAGE_SIZE: u64 = 500;

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    #[serde(alias = "menuItemId")]
    pub menu_item_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[serde(alias = "qrSessionId", alias = "session_id")]
    pub qr_session_id: Uuid,
    #[validate]
    pub items: Vec<OrderItemInput>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderByAdminRequest {
    #[serde(alias = "tableId")]
    pub table_id: Uuid,
    #[validate]
    pub items: Vec<OrderItemInput>,
    #[serde(default, alias = "adminId")]
    pub admin_id: Option<Uuid>,
    #[serde(default, alias = "customerPhone")]
    pub customer_phone: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddItemsRequest {
    #[validate]
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
    #[serde(default, alias = "adminId")]
    pub admin_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderItemRequest {
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OrderFilters {
    pub status: Option<String>,
    #[serde(alias = "qr_session_id")]
    pub session_id: Option<Uuid>,
    pub table_id: Option<Uuid>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    #[serde(flatten)]
    pub item: OrderItemModel,
    pub menu_item_name: Option<String>,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderList {
    pub orders: Vec<OrderView>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: OrderView,
    /// False when the items were merged into an existing NEW order.
    pub is_new_order: bool,
    pub added_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusChange {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub previous_status: OrderStatus,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemChange {
    pub order_id: Uuid,
    pub order_deleted: bool,
    pub total_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<OrderItemModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderReconciliation {
    pub order_id: Uuid,
    pub stored_total: Decimal,
    pub computed_total: Decimal,
    pub consistent: bool,
}

/// What a merge did to the session's NEW order.
#[derive(Debug, Clone)]
pub(crate) struct MergeOutcome {
    pub order: OrderModel,
    pub created: bool,
    pub added_total: Decimal,
    pub added_quantity: i32,
}

pub(crate) fn require_items(items: &[OrderItemInput]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "at least one item is required".to_string(),
        ));
    }
    Ok(())
}

async fn find_orderable_menu_item<C>(conn: &C, id: Uuid) -> Result<menu_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    menu_item::Entity::find_by_id(id)
        .one(conn)
        .await?
        .filter(menu_item::Model::is_orderable)
        .ok_or_else(|| ServiceError::NotFound(format!("menu item {id} not found or unavailable")))
}

/// Adds `delta` to the stored running total in place.
pub(crate) async fn adjust_order_total<C>(conn: &C, order_id: Uuid, delta: Decimal) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if delta.is_zero() {
        return Ok(());
    }
    OrderEntity::update_many()
        .col_expr(
            order::Column::TotalPrice,
            Expr::col(order::Column::TotalPrice).add(delta),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .exec(conn)
        .await?;
    Ok(())
}

async fn load_order_for_update<C>(conn: &C, order_id: Uuid) -> Result<OrderModel, ServiceError>
where
    C: ConnectionTrait,
{
    lock_for_update(OrderEntity::find_by_id(order_id), conn)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))
}

/// Applies the merge rule: items go into the session's NEW order, opening one
/// when none exists. A menu item already on the order has its quantity
/// raised at the unit price captured when it was first added.
pub(crate) async fn merge_items_into_new_order<C>(
    conn: &C,
    session_id: Uuid,
    admin_id: Option<Uuid>,
    items: &[OrderItemInput],
    note: Option<String>,
) -> Result<MergeOutcome, ServiceError>
where
    C: ConnectionTrait,
{
    let existing = lock_for_update(
        OrderEntity::find()
            .filter(order::Column::QrSessionId.eq(session_id))
            .filter(order::Column::Status.eq(OrderStatus::New))
            .order_by_desc(order::Column::CreatedAt),
        conn,
    )
    .one(conn)
    .await?;

    let (order, created) = match existing {
        Some(order) => {
            if admin_id.is_some() && order.admin_id != admin_id {
                let mut active: order::ActiveModel = order.into();
                active.admin_id = Set(admin_id);
                (active.update(conn).await?, false)
            } else {
                (order, false)
            }
        }
        None => {
            let order = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                qr_session_id: Set(session_id),
                admin_id: Set(admin_id),
                status: Set(OrderStatus::New),
                total_price: Set(Decimal::ZERO),
                note: Set(note.filter(|n| !n.trim().is_empty())),
                ..Default::default()
            }
            .insert(conn)
            .await?;
            (order, true)
        }
    };

    let mut lines: HashMap<Uuid, OrderItemModel> = HashMap::new();
    for line in OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?
    {
        lines.entry(line.menu_item_id).or_insert(line);
    }

    let mut added_total = Decimal::ZERO;
    let mut added_quantity = 0;
    for input in items {
        let menu = find_orderable_menu_item(conn, input.menu_item_id).await?;
        let note = input.note.clone().filter(|n| !n.trim().is_empty());

        let updated = match lines.remove(&menu.id) {
            Some(line) => {
                added_total += line.unit_price * Decimal::from(input.quantity);
                let quantity = line.quantity + input.quantity;
                let mut active: order_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                if note.is_some() {
                    active.note = Set(note);
                }
                active.update(conn).await?
            }
            None => {
                added_total += menu.price * Decimal::from(input.quantity);
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    menu_item_id: Set(menu.id),
                    quantity: Set(input.quantity),
                    note: Set(note),
                    unit_price: Set(menu.price),
                    ..Default::default()
                }
                .insert(conn)
                .await?
            }
        };
        added_quantity += input.quantity;
        lines.insert(updated.menu_item_id, updated);
    }

    adjust_order_total(conn, order.id, added_total).await?;
    let order = OrderEntity::find_by_id(order.id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError("merged order vanished".to_string()))?;

    Ok(MergeOutcome {
        order,
        created,
        added_total,
        added_quantity,
    })
}

/// Staff alert and domain event for a merge.
fn merge_effects(outcome: &MergeOutcome, table: &dining_table::Model) -> PostCommitEffects {
    let mut effects = PostCommitEffects::new();
    let (kind, priority, message) = if outcome.created {
        (
            "ORDER_NEW",
            "high",
            format!(
                "Table {} - new order with {} item(s)",
                table.table_number, outcome.added_quantity
            ),
        )
    } else {
        (
            "ORDER_UPDATE",
            "medium",
            format!(
                "Table {} - {} item(s) added to order {}",
                table.table_number, outcome.added_quantity, outcome.order.id
            ),
        )
    };

    effects.notify(
        NotificationTarget::Staff,
        NotificationPayload::new(NotificationKind::Info, message).with_data(serde_json::json!({
            "kind": kind,
            "priority": priority,
            "order_id": outcome.order.id,
            "qr_session_id": outcome.order.qr_session_id,
            "table_id": table.id,
            "table_number": table.table_number,
            "total_items": outcome.added_quantity,
        })),
    );
    effects.publish(if outcome.created {
        Event::OrderCreated {
            order_id: outcome.order.id,
            session_id: outcome.order.qr_session_id,
        }
    } else {
        Event::OrderItemsMerged {
            order_id: outcome.order.id,
            added_total: outcome.added_total,
        }
    });
    effects
}

async fn table_of_session<C>(conn: &C, session: &qr_session::Model) -> Result<dining_table::Model, ServiceError>
where
    C: ConnectionTrait,
{
    dining_table::Entity::find_by_id(session.table_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("table {} not found", session.table_id)))
}

async fn hydrate<C>(conn: &C, orders: Vec<OrderModel>) -> Result<Vec<OrderView>, ServiceError>
where
    C: ConnectionTrait,
{
    if orders.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut by_order: HashMap<Uuid, Vec<OrderItemView>> = HashMap::new();
    for (item, menu) in OrderItemEntity::find()
        .filter(order_item::Column::OrderId.is_in(ids))
        .find_also_related(menu_item::Entity)
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?
    {
        by_order.entry(item.order_id).or_default().push(OrderItemView {
            line_total: item.line_total(),
            menu_item_name: menu.map(|m| m.name),
            item,
        });
    }

    Ok(orders
        .into_iter()
        .map(|order| OrderView {
            items: by_order.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect())
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    locks: SessionLocks,
    sessions: Arc<QrSessionService>,
    effects: EffectRunner,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        locks: SessionLocks,
        sessions: Arc<QrSessionService>,
        effects: EffectRunner,
    ) -> Self {
        Self {
            db_pool,
            locks,
            sessions,
            effects,
        }
    }

    /// Customer order from an ACTIVE session, merged into its NEW order.
    #[instrument(skip(self, request), fields(session_id = %request.qr_session_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PlacedOrder, ServiceError> {
        request.validate()?;
        require_items(&request.items)?;
        self.place(request.qr_session_id, None, &request.items, request.note)
            .await
    }

    /// Staff order for a table; opens the table's session when needed.
    #[instrument(skip(self, request), fields(table_id = %request.table_id))]
    pub async fn create_order_by_admin(
        &self,
        request: CreateOrderByAdminRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        request.validate()?;
        require_items(&request.items)?;
        find_usable_table(&*self.db_pool, request.table_id).await?;

        let customer = match request
            .customer_phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            Some(raw) => {
                let phone = normalize_phone(raw)?;
                let found = find_live_by_phone(&*self.db_pool, &phone).await?;
                if found.is_none() {
                    info!(phone = %phone, "no customer registered for phone");
                }
                found
            }
            None => None,
        };

        let scan = self
            .sessions
            .open_or_reuse(ScanRequest {
                table_id: request.table_id,
                customer_id: None,
                session_token: None,
            })
            .await?;
        let session_id = scan.session.id;
        if let (Some(customer), None) = (customer.as_ref(), scan.session.customer_id) {
            self.sessions.attach_customer(session_id, customer.id).await?;
        }

        self.place(session_id, request.admin_id, &request.items, request.note)
            .await
    }

    async fn place(
        &self,
        session_id: Uuid,
        admin_id: Option<Uuid>,
        items: &[OrderItemInput],
        note: Option<String>,
    ) -> Result<PlacedOrder, ServiceError> {
        let _guard = self.locks.acquire(session_id).await;
        let txn = self.db_pool.begin().await?;
        let session = require_active_session(&txn, session_id).await?;
        let table = table_of_session(&txn, &session).await?;
        let outcome = merge_items_into_new_order(&txn, session.id, admin_id, items, note).await?;
        txn.commit().await?;
        drop(_guard);

        info!(
            order_id = %outcome.order.id,
            created = outcome.created,
            added_total = %outcome.added_total,
            "order placed"
        );
        self.effects.run(merge_effects(&outcome, &table)).await;

        Ok(PlacedOrder {
            order: self.get_order_by_id(outcome.order.id).await?,
            is_new_order: outcome.created,
            added_total: outcome.added_total,
        })
    }

    /// Converts the session's ACTIVE cart into order items through the merge
    /// rule and marks the cart ORDERED.
    #[instrument(skip(self))]
    pub async fn create_order_from_cart(
        &self,
        session_id: Uuid,
        note: Option<String>,
    ) -> Result<PlacedOrder, ServiceError> {
        use crate::entities::{
            cart::{self, CartStatus},
            cart_item::{self, CartItemStatus},
        };

        let _guard = self.locks.acquire(session_id).await;
        let txn = self.db_pool.begin().await?;
        let session = require_active_session(&txn, session_id).await?;
        let table = table_of_session(&txn, &session).await?;

        let cart = lock_for_update(
            cart::Entity::find()
                .filter(cart::Column::QrSessionId.eq(session_id))
                .filter(cart::Column::Status.eq(CartStatus::Active)),
            &txn,
        )
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no active cart for session {session_id}")))?;

        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::Status.eq(CartItemStatus::InCart))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".to_string()));
        }
        let items: Vec<OrderItemInput> = lines
            .iter()
            .map(|line| OrderItemInput {
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
                note: line.note.clone(),
            })
            .collect();

        let outcome = merge_items_into_new_order(&txn, session.id, None, &items, note).await?;

        let cart_id = cart.id;
        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(CartStatus::Ordered);
        active.update(&txn).await?;
        cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Status, Expr::value(CartItemStatus::Ordered))
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::Status.eq(CartItemStatus::InCart))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        drop(_guard);

        info!(cart_id = %cart_id, order_id = %outcome.order.id, "cart checked out");
        self.effects.run(merge_effects(&outcome, &table)).await;

        Ok(PlacedOrder {
            order: self.get_order_by_id(outcome.order.id).await?,
            is_new_order: outcome.created,
            added_total: outcome.added_total,
        })
    }

    /// Staff additions to a NEW or IN_PROGRESS order. Always appends rows.
    #[instrument(skip(self, request))]
    pub async fn add_items(&self, order_id: Uuid, request: AddItemsRequest) -> Result<OrderView, ServiceError> {
        request.validate()?;
        require_items(&request.items)?;

        let txn = self.db_pool.begin().await?;
        let order = load_order_for_update(&txn, order_id).await?;
        if !matches!(order.status, OrderStatus::New | OrderStatus::InProgress) {
            return Err(ServiceError::Conflict(format!(
                "items can only be added to NEW or IN_PROGRESS orders, order {order_id} is {:?}",
                order.status
            )));
        }

        let mut rows = Vec::with_capacity(request.items.len());
        let mut added_total = Decimal::ZERO;
        let mut added_quantity = 0;
        for input in &request.items {
            let menu = find_orderable_menu_item(&txn, input.menu_item_id).await?;
            added_total += menu.price * Decimal::from(input.quantity);
            added_quantity += input.quantity;
            rows.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                menu_item_id: Set(menu.id),
                quantity: Set(input.quantity),
                note: Set(input.note.clone().filter(|n| !n.trim().is_empty())),
                unit_price: Set(menu.price),
                created_at: Set(Utc::now()),
            });
        }
        OrderItemEntity::insert_many(rows).exec(&txn).await?;
        adjust_order_total(&txn, order.id, added_total).await?;
        txn.commit().await?;

        info!(order_id = %order_id, added_total = %added_total, "items appended");
        let mut effects = PostCommitEffects::new();
        effects.notify(
            NotificationTarget::Staff,
            NotificationPayload::new(
                NotificationKind::Info,
                format!("{added_quantity} item(s) added to order {order_id}"),
            )
            .with_data(serde_json::json!({
                "kind": "ORDER_UPDATE",
                "priority": "medium",
                "order_id": order_id,
                "qr_session_id": order.qr_session_id,
                "total_items": added_quantity,
            })),
        );
        effects.publish(Event::OrderItemsMerged {
            order_id,
            added_total,
        });
        self.effects.run(effects).await;

        self.get_order_by_id(order_id).await
    }

    /// Moves an order along NEW → IN_PROGRESS → DONE → PAID (or NEW →
    /// CANCELLED). Requesting the current status changes nothing.
    #[instrument(skip(self, request), fields(status = %request.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderStatusChange, ServiceError> {
        let next: OrderStatus = parse_enum(&request.status, "order status")?;

        let txn = self.db_pool.begin().await?;
        let order = load_order_for_update(&txn, order_id).await?;
        let previous = order.status;
        if previous == next {
            return Ok(OrderStatusChange {
                order_id,
                status: next,
                previous_status: previous,
                changed: false,
            });
        }
        if !previous.can_transition_to(next) {
            return Err(ServiceError::Conflict(format!(
                "order {order_id} cannot move from {previous:?} to {next:?}"
            )));
        }

        let session_id = order.qr_session_id;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(next);
        if request.admin_id.is_some() {
            active.admin_id = Set(request.admin_id);
        }
        let order = active.update(&txn).await?;
        if next == OrderStatus::Cancelled {
            fail_pending_payments(&txn, &[order_id]).await?;
        }
        txn.commit().await?;

        info!(order_id = %order_id, from = ?previous, to = ?next, "order status changed");
        let mut effects = PostCommitEffects::new();
        effects.publish(Event::OrderStatusChanged {
            order_id,
            old_status: previous,
            new_status: next,
        });
        if next == OrderStatus::InProgress {
            match self.kitchen_ticket(&order).await {
                Ok(ticket) => effects.publish(Event::KitchenTicketRequested(ticket)),
                Err(e) => warn!(order_id = %order_id, error = %e, "kitchen ticket not built"),
            }
        }
        self.effects.run(effects).await;

        if next == OrderStatus::Paid {
            if let Err(e) = self.ensure_paid_payment(&order, request.admin_id).await {
                warn!(order_id = %order_id, error = %e, "could not record payment for paid order");
            }
            if let Err(e) = self.sessions.close_if_settled(session_id).await {
                warn!(session_id = %session_id, error = %e, "could not close session after payment");
            }
        }

        Ok(OrderStatusChange {
            order_id,
            status: next,
            previous_status: previous,
            changed: true,
        })
    }

    /// A PAID order always has a PAID payment: promote a PENDING one or
    /// record the amount as CASH.
    async fn ensure_paid_payment(&self, order: &OrderModel, admin_id: Option<Uuid>) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;
        if payments
            .iter()
            .any(|p| p.payment_status == PaymentStatus::Paid)
        {
            return Ok(());
        }

        let now = Utc::now();
        match payments
            .into_iter()
            .find(|p| p.payment_status == PaymentStatus::Pending)
        {
            Some(pending) => {
                let mut active: payment::ActiveModel = pending.into();
                active.payment_status = Set(PaymentStatus::Paid);
                active.admin_id = Set(admin_id);
                active.paid_at = Set(Some(now));
                active.confirmed_at = Set(Some(now));
                active.update(&txn).await?;
            }
            None => {
                payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    admin_id: Set(admin_id),
                    method: Set(PaymentMethod::Cash),
                    amount: Set(order.total_price),
                    payment_status: Set(PaymentStatus::Paid),
                    print_bill: Set(false),
                    transaction_code: Set(None),
                    paid_at: Set(Some(now)),
                    confirmed_at: Set(None),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }
        txn.commit().await?;
        info!(order_id = %order.id, "payment recorded for paid order");
        Ok(())
    }

    async fn kitchen_ticket(&self, order: &OrderModel) -> Result<KitchenTicket, ServiceError> {
        let db = &*self.db_pool;
        let table_number = qr_session::Entity::find_by_id(order.qr_session_id)
            .find_also_related(dining_table::Entity)
            .one(db)
            .await?
            .and_then(|(_, table)| table)
            .map(|t| t.table_number)
            .unwrap_or_default();
        let lines = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .find_also_related(menu_item::Entity)
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?
            .into_iter()
            .map(|(item, menu)| KitchenTicketLine {
                name: menu.map(|m| m.name).unwrap_or_else(|| item.menu_item_id.to_string()),
                quantity: item.quantity,
                note: item.note,
            })
            .collect();

        Ok(KitchenTicket {
            order_id: order.id,
            table_number,
            note: order.note.clone(),
            lines,
            requested_at: Utc::now(),
        })
    }

    pub async fn get_order_by_id(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;
        hydrate(db, vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InternalError("order hydration failed".to_string()))
    }

    #[instrument(skip(self))]
    pub async fn get_all_orders(&self, filters: OrderFilters) -> Result<OrderList, ServiceError> {
        let db = &*self.db_pool;
        let limit = filters
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = filters.offset.unwrap_or(0);

        let mut query = OrderEntity::find();
        if let Some(raw) = filters.status.as_deref() {
            let status: OrderStatus = parse_enum(raw, "order status")?;
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(session_id) = filters.session_id {
            query = query.filter(order::Column::QrSessionId.eq(session_id));
        }
        if let Some(table_id) = filters.table_id {
            query = query
                .join(JoinType::InnerJoin, order::Relation::QrSession.def())
                .filter(qr_session::Column::TableId.eq(table_id));
        }

        let total = query.clone().count(db).await?;
        let orders = query
            .order_by_desc(order::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(db)
            .await?;

        Ok(OrderList {
            orders: hydrate(db, orders).await?,
            total,
            limit,
            offset,
            total_pages: total.div_ceil(limit),
        })
    }

    pub async fn get_orders_by_session_id(&self, session_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let db = &*self.db_pool;
        qr_session::Entity::find_by_id(session_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;
        let orders = OrderEntity::find()
            .filter(order::Column::QrSessionId.eq(session_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;
        hydrate(db, orders).await
    }

    /// Open orders of the table's current ACTIVE session only.
    pub async fn get_orders_by_table_id(&self, table_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let db = &*self.db_pool;
        dining_table::Entity::find_by_id(table_id)
            .one(db)
            .await?
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("table {table_id} not found")))?;

        let Some(session) = qr_session::Entity::find()
            .filter(qr_session::Column::TableId.eq(table_id))
            .filter(qr_session::Column::Status.eq(SessionStatus::Active))
            .one(db)
            .await?
        else {
            return Ok(Vec::new());
        };

        let orders = OrderEntity::find()
            .filter(order::Column::QrSessionId.eq(session.id))
            .filter(order::Column::Status.is_in(OrderStatus::OPEN))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;
        hydrate(db, orders).await
    }

    async fn load_new_order_line<C>(
        conn: &C,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<(OrderModel, OrderItemModel), ServiceError>
    where
        C: ConnectionTrait,
    {
        let order = load_order_for_update(conn, order_id).await?;
        if order.status != OrderStatus::New {
            return Err(ServiceError::Conflict(format!(
                "order {order_id} is {:?}; only NEW orders can be edited",
                order.status
            )));
        }
        let item = OrderItemEntity::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order item {item_id} not found")))?;
        Ok((order, item))
    }

    /// Removes one line from a NEW order; an order left empty is deleted.
    #[instrument(skip(self))]
    pub async fn remove_order_item(&self, order_id: Uuid, item_id: Uuid) -> Result<OrderItemChange, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let (order, item) = Self::load_new_order_line(&txn, order_id, item_id).await?;
        let change = Self::drop_line(&txn, order, item).await?;
        txn.commit().await?;
        info!(order_id = %order_id, item_id = %item_id, order_deleted = change.order_deleted, "order item removed");
        Ok(change)
    }

    async fn drop_line<C>(conn: &C, order: OrderModel, item: OrderItemModel) -> Result<OrderItemChange, ServiceError>
    where
        C: ConnectionTrait,
    {
        let delta = -item.line_total();
        OrderItemEntity::delete_by_id(item.id).exec(conn).await?;

        let remaining = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .count(conn)
            .await?;
        if remaining == 0 {
            OrderEntity::delete_by_id(order.id).exec(conn).await?;
            return Ok(OrderItemChange {
                order_id: order.id,
                order_deleted: true,
                total_price: Decimal::ZERO,
                item: None,
            });
        }

        adjust_order_total(conn, order.id, delta).await?;
        Ok(OrderItemChange {
            order_id: order.id,
            order_deleted: false,
            total_price: order.total_price + delta,
            item: None,
        })
    }

    /// Sets a NEW order line's quantity; 0 removes the line.
    #[instrument(skip(self, request))]
    pub async fn update_order_item_quantity(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        request: UpdateOrderItemRequest,
    ) -> Result<OrderItemChange, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;
        let (order, item) = Self::load_new_order_line(&txn, order_id, item_id).await?;

        let change = if request.quantity == 0 {
            Self::drop_line(&txn, order, item).await?
        } else {
            let delta = item.unit_price * Decimal::from(request.quantity - item.quantity);
            let mut active: order_item::ActiveModel = item.into();
            active.quantity = Set(request.quantity);
            let item = active.update(&txn).await?;
            adjust_order_total(&txn, order.id, delta).await?;
            OrderItemChange {
                order_id: order.id,
                order_deleted: false,
                total_price: order.total_price + delta,
                item: Some(item),
            }
        };
        txn.commit().await?;
        Ok(change)
    }

    /// NEW → CANCELLED; pending payments of the order fail with it.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderStatusChange, ServiceError> {
        self.update_status(
            order_id,
            UpdateOrderStatusRequest {
                status: "CANCELLED".to_string(),
                admin_id: None,
            },
        )
        .await
    }

    /// Recomputes Σ(quantity × unit_price) and compares it with the stored total.
    pub async fn reconcile_order(&self, order_id: Uuid) -> Result<OrderReconciliation, ServiceError> {
        let view = self.get_order_by_id(order_id).await?;
        let computed: Decimal = view.items.iter().map(|i| i.line_total).sum();
        let consistent = computed == view.order.total_price;
        if !consistent {
            warn!(
                order_id = %order_id,
                stored = %view.order.total_price,
                computed = %computed,
                "order total drifted from its items"
            );
        }
        Ok(OrderReconciliation {
            order_id,
            stored_total: view.order.total_price,
            computed_total: computed,
            consistent,
        })
    }
}

/// PENDING → FAILED for every payment of `order_ids`.
pub(crate) async fn fail_pending_payments<C>(conn: &C, order_ids: &[Uuid]) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    if order_ids.is_empty() {
        return Ok(0);
    }
    let result = payment::Entity::update_many()
        .col_expr(
            payment::Column::PaymentStatus,
            Expr::value(PaymentStatus::Failed),
        )
        .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(payment::Column::OrderId.is_in(order_ids.to_vec()))
        .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_item_lists_are_rejected() {
        assert_matches!(require_items(&[]), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn item_quantity_defaults_to_one() {
        let input: OrderItemInput = serde_json::from_value(serde_json::json!({
            "menuItemId": Uuid::nil(),
        }))
        .unwrap();
        assert_eq!(input.quantity, 1);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn nested_items_are_validated() {
        let request = CreateOrderRequest {
            qr_session_id: Uuid::nil(),
            items: vec![OrderItemInput {
                menu_item_id: Uuid::nil(),
                quantity: 0,
                note: None,
            }],
            note: None,
        };
        assert!(request.validate().is_err());
    }
}
