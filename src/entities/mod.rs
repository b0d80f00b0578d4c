//! Database entities for the dining floor: tables, sessions, carts, orders,
//! payments and the loyalty ledger held on customers.

pub mod cart;
pub mod cart_item;
pub mod customer;
pub mod dining_table;
pub mod menu_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod qr_session;

use crate::errors::ServiceError;
use sea_orm::ActiveEnum;

/// Parses a caller-supplied status or method name (case-insensitive) into
/// one of the string-backed column enums.
pub fn parse_enum<E>(raw: &str, what: &str) -> Result<E, ServiceError>
where
    E: ActiveEnum<Value = String>,
{
    let normalized = raw.trim().to_ascii_uppercase();
    E::try_from_value(&normalized)
        .map_err(|_| ServiceError::ValidationError(format!("invalid {what}: {raw}")))
}
