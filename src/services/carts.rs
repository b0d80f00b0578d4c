use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{lock_for_update, DbPool},
    entities::{
        cart::{self, CartStatus, Entity as CartEntity, Model as CartModel},
        cart_item::{self, CartItemStatus, Entity as CartItemEntity, Model as CartItemModel},
        menu_item, parse_enum, qr_session,
    },
    errors::ServiceError,
    events::{
        effects::{EffectRunner, PostCommitEffects},
        Event,
    },
    services::{
        orders::{OrderService, PlacedOrder},
        qr_sessions::require_active_session,
    },
};

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddToCartRequest {
    #[serde(alias = "qrSessionId", alias = "session_id")]
    pub qr_session_id: Uuid,
    #[serde(alias = "menuItemId")]
    pub menu_item_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: Option<i32>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateCartStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CheckoutCartRequest {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddToCartResult {
    pub cart_id: Uuid,
    pub item: CartItemModel,
}

/// Outcome of editing or removing one cart line.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemChange {
    pub id: Uuid,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<CartItemModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClearCartResult {
    pub cart_id: Uuid,
    pub deleted_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartItemView {
    #[serde(flatten)]
    pub item: CartItemModel,
    pub menu_item_name: Option<String>,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub qr_session_id: Uuid,
    /// None until the first item is added.
    pub cart: Option<CartModel>,
    pub items: Vec<CartItemView>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

async fn find_active_cart<C>(conn: &C, session_id: Uuid) -> Result<Option<CartModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(lock_for_update(
        CartEntity::find()
            .filter(cart::Column::QrSessionId.eq(session_id))
            .filter(cart::Column::Status.eq(CartStatus::Active)),
        conn,
    )
    .one(conn)
    .await?)
}

/// Loads an IN_CART line together with its cart, requiring the cart to be
/// ACTIVE.
async fn load_editable_line<C>(conn: &C, item_id: Uuid) -> Result<(CartModel, CartItemModel), ServiceError>
where
    C: ConnectionTrait,
{
    let item = lock_for_update(CartItemEntity::find_by_id(item_id), conn)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("cart item {item_id} not found")))?;
    let cart = item
        .find_related(CartEntity)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("cart {} not found", item.cart_id)))?;

    if cart.status != CartStatus::Active {
        return Err(ServiceError::Conflict(format!(
            "cart {} is {:?}, not ACTIVE",
            cart.id, cart.status
        )));
    }
    if item.status != CartItemStatus::InCart {
        return Err(ServiceError::Conflict(format!(
            "cart item {item_id} has already been ordered"
        )));
    }
    Ok((cart, item))
}

#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    orders: Arc<OrderService>,
    effects: EffectRunner,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, orders: Arc<OrderService>, effects: EffectRunner) -> Self {
        Self {
            db_pool,
            orders,
            effects,
        }
    }

    /// Adds a line to the session's ACTIVE cart, creating the cart on first use.
    #[instrument(skip(self, request), fields(session_id = %request.qr_session_id))]
    pub async fn add_to_cart(&self, request: AddToCartRequest) -> Result<AddToCartResult, ServiceError> {
        request.validate()?;
        let result = match self.try_add_to_cart(&request).await {
            Err(e) if e.is_unique_violation() => {
                info!("concurrent request created the cart first, retrying");
                self.try_add_to_cart(&request).await?
            }
            other => other?,
        };

        let mut effects = PostCommitEffects::new();
        effects.publish(Event::CartItemAdded {
            cart_id: result.cart_id,
            session_id: request.qr_session_id,
            menu_item_id: request.menu_item_id,
            quantity: request.quantity,
        });
        self.effects.run(effects).await;
        Ok(result)
    }

    async fn try_add_to_cart(&self, request: &AddToCartRequest) -> Result<AddToCartResult, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let session = require_active_session(&txn, request.qr_session_id).await?;

        let menu = menu_item::Entity::find_by_id(request.menu_item_id)
            .one(&txn)
            .await?
            .filter(menu_item::Model::is_orderable)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "menu item {} not found or unavailable",
                    request.menu_item_id
                ))
            })?;

        let cart = match find_active_cart(&txn, session.id).await? {
            Some(cart) => cart,
            None => {
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    qr_session_id: Set(session.id),
                    status: Set(CartStatus::Active),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            }
        };

        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            menu_item_id: Set(menu.id),
            quantity: Set(request.quantity),
            note: Set(request.note.clone().filter(|n| !n.trim().is_empty())),
            unit_price: Set(menu.price),
            status: Set(CartItemStatus::InCart),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, item_id = %item.id, "item added to cart");
        Ok(AddToCartResult {
            cart_id: cart.id,
            item,
        })
    }

    /// Quantity 0 deletes the line.
    #[instrument(skip(self, request))]
    pub async fn update_cart_item(
        &self,
        item_id: Uuid,
        request: UpdateCartItemRequest,
    ) -> Result<CartItemChange, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;
        let (_, item) = load_editable_line(&txn, item_id).await?;

        if request.quantity == Some(0) {
            item.delete(&txn).await?;
            txn.commit().await?;
            info!(item_id = %item_id, "cart item removed by zero quantity");
            return Ok(CartItemChange {
                id: item_id,
                deleted: true,
                item: None,
            });
        }

        let mut active: cart_item::ActiveModel = item.into();
        if let Some(quantity) = request.quantity {
            active.quantity = Set(quantity);
        }
        if let Some(note) = request.note {
            active.note = Set(Some(note).filter(|n| !n.trim().is_empty()));
        }
        let item = active.update(&txn).await?;
        txn.commit().await?;

        Ok(CartItemChange {
            id: item_id,
            deleted: false,
            item: Some(item),
        })
    }

    #[instrument(skip(self))]
    pub async fn remove_cart_item(&self, item_id: Uuid) -> Result<CartItemChange, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let (_, item) = load_editable_line(&txn, item_id).await?;
        item.delete(&txn).await?;
        txn.commit().await?;

        Ok(CartItemChange {
            id: item_id,
            deleted: true,
            item: None,
        })
    }

    /// Deletes every IN_CART line of the session's ACTIVE cart.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, session_id: Uuid) -> Result<ClearCartResult, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let cart = find_active_cart(&txn, session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no active cart for session {session_id}")))?;

        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::Status.eq(CartItemStatus::InCart))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, deleted = result.rows_affected, "cart cleared");
        Ok(ClearCartResult {
            cart_id: cart.id,
            deleted_count: result.rows_affected,
        })
    }

    /// ORDERED also marks the cart's IN_CART lines ORDERED.
    #[instrument(skip(self, request), fields(status = %request.status))]
    pub async fn update_cart_status(
        &self,
        cart_id: Uuid,
        request: UpdateCartStatusRequest,
    ) -> Result<CartModel, ServiceError> {
        let status: CartStatus = parse_enum(&request.status, "cart status")?;

        let txn = self.db_pool.begin().await?;
        let current = lock_for_update(CartEntity::find_by_id(cart_id), &txn)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {cart_id} not found")))?;

        let mut active: cart::ActiveModel = current.into();
        active.status = Set(status);
        let cart = match active.update(&txn).await.map_err(ServiceError::from) {
            Ok(cart) => cart,
            Err(e) if e.is_unique_violation() => {
                warn!(cart_id = %cart_id, "session already has an active cart");
                return Err(ServiceError::Conflict(
                    "session already has an active cart".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        if status == CartStatus::Ordered {
            CartItemEntity::update_many()
                .col_expr(cart_item::Column::Status, Expr::value(CartItemStatus::Ordered))
                .col_expr(cart_item::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
                .filter(cart_item::Column::CartId.eq(cart_id))
                .filter(cart_item::Column::Status.eq(CartItemStatus::InCart))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        info!(cart_id = %cart_id, ?status, "cart status changed");
        Ok(cart)
    }

    pub async fn get_cart(&self, session_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db_pool;
        qr_session::Entity::find_by_id(session_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;

        let Some(cart) = find_active_cart(db, session_id).await? else {
            return Ok(CartView {
                qr_session_id: session_id,
                cart: None,
                items: Vec::new(),
                item_count: 0,
                subtotal: Decimal::ZERO,
            });
        };

        let items: Vec<CartItemView> = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::Status.eq(CartItemStatus::InCart))
            .find_also_related(menu_item::Entity)
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(db)
            .await?
            .into_iter()
            .map(|(item, menu)| CartItemView {
                line_total: item.line_total(),
                menu_item_name: menu.map(|m| m.name),
                item,
            })
            .collect();

        Ok(CartView {
            qr_session_id: session_id,
            item_count: items.iter().map(|i| i.item.quantity).sum(),
            subtotal: items.iter().map(|i| i.line_total).sum(),
            cart: Some(cart),
            items,
        })
    }

    pub async fn checkout_cart(
        &self,
        session_id: Uuid,
        request: CheckoutCartRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        self.orders
            .create_order_from_cart(session_id, request.note)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_request_defaults_quantity_and_accepts_camel_case() {
        let request: AddToCartRequest = serde_json::from_value(serde_json::json!({
            "qrSessionId": Uuid::nil(),
            "menuItemId": Uuid::nil(),
        }))
        .unwrap();
        assert_eq!(request.quantity, 1);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let request = UpdateCartItemRequest {
            quantity: Some(-1),
            note: None,
        };
        assert!(request.validate().is_err());
        let zero = UpdateCartItemRequest {
            quantity: Some(0),
            note: None,
        };
        assert!(zero.validate().is_ok());
    }
}
