use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::customer::{self, Entity as CustomerEntity, Model as CustomerModel},
    errors::ServiceError,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpsertCustomerRequest {
    #[validate(length(min = 1, max = 32, message = "phone is required"))]
    pub phone: String,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    #[validate(email(message = "email is not valid"))]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpsertCustomerResult {
    pub customer: CustomerModel,
    pub is_new: bool,
}

/// Strips spaces, dashes, dots and parentheses, then requires 8-15 digits
/// with an optional leading `+`.
pub fn normalize_phone(raw: &str) -> Result<String, ServiceError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    if (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(cleaned)
    } else {
        Err(ServiceError::ValidationError(format!(
            "invalid phone number: {raw}"
        )))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) async fn find_live_by_phone<C>(
    conn: &C,
    phone: &str,
) -> Result<Option<CustomerModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(CustomerEntity::find()
        .filter(customer::Column::Phone.eq(phone))
        .filter(customer::Column::DeletedAt.is_null())
        .one(conn)
        .await?)
}

pub(crate) async fn find_live_customer<C>(conn: &C, id: Uuid) -> Result<CustomerModel, ServiceError>
where
    C: ConnectionTrait,
{
    CustomerEntity::find_by_id(id)
        .one(conn)
        .await?
        .filter(|c| c.deleted_at.is_none())
        .ok_or_else(|| ServiceError::NotFound(format!("customer {id} not found")))
}

#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
}

impl CustomerService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Registers a customer by phone, or updates name/email of the existing one.
    #[instrument(skip(self, request))]
    pub async fn create_or_update(
        &self,
        request: UpsertCustomerRequest,
    ) -> Result<UpsertCustomerResult, ServiceError> {
        request.validate()?;
        let phone = normalize_phone(&request.phone)?;
        let name = non_blank(request.name);
        let email = non_blank(request.email);

        let txn = self.db_pool.begin().await?;
        let existing = find_live_by_phone(&txn, &phone).await?;

        if let Some(email) = email.as_deref() {
            let mut clash = CustomerEntity::find()
                .filter(customer::Column::Email.eq(email))
                .filter(customer::Column::DeletedAt.is_null());
            if let Some(current) = existing.as_ref() {
                clash = clash.filter(customer::Column::Id.ne(current.id));
            }
            if clash.one(&txn).await?.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "email {email} already belongs to another customer"
                )));
            }
        }

        let (customer, is_new) = match existing {
            Some(current) => {
                let mut active: customer::ActiveModel = current.into();
                if name.is_some() {
                    active.name = Set(name);
                }
                if email.is_some() {
                    active.email = Set(email);
                }
                (active.update(&txn).await?, false)
            }
            None => {
                let active = customer::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    name: Set(name),
                    phone: Set(phone),
                    email: Set(email),
                    points: Set(0),
                    deleted_at: Set(None),
                    ..Default::default()
                };
                (active.insert(&txn).await?, true)
            }
        };
        txn.commit().await?;

        info!(customer_id = %customer.id, is_new, "customer upserted");
        Ok(UpsertCustomerResult { customer, is_new })
    }

    #[instrument(skip(self))]
    pub async fn get_customer(&self, id: Uuid) -> Result<CustomerModel, ServiceError> {
        find_live_customer(&*self.db_pool, id).await
    }

    #[instrument(skip(self))]
    pub async fn get_customer_by_phone(&self, phone: &str) -> Result<CustomerModel, ServiceError> {
        let phone = normalize_phone(phone)?;
        find_live_by_phone(&*self.db_pool, &phone)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("customer with phone {phone} not found")))
    }

    /// Soft delete; the loyalty balance stays on the row.
    #[instrument(skip(self))]
    pub async fn delete_customer(&self, id: Uuid) -> Result<(), ServiceError> {
        let current = find_live_customer(&*self.db_pool, id).await?;
        let mut active: customer::ActiveModel = current.into();
        active.deleted_at = Set(Some(Utc::now()));
        active.update(&*self.db_pool).await?;
        info!(customer_id = %id, "customer deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("0901 234 567", "0901234567")]
    #[case("(090) 123-4567", "0901234567")]
    #[case("+84.901.234.567", "+84901234567")]
    #[case("12345678", "12345678")]
    fn accepts_and_normalizes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_phone(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("1234567")]
    #[case("1234567890123456")]
    #[case("09012a4567")]
    #[case("++84901234567")]
    #[case("")]
    fn rejects_malformed(#[case] raw: &str) {
        assert_matches!(normalize_phone(raw), Err(ServiceError::ValidationError(_)));
    }
}
