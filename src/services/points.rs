use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::LoyaltyConfig,
    db::{lock_for_update, DbPool},
    entities::customer,
    errors::ServiceError,
};

/// Result of applying the all-in redemption policy to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionPlan {
    pub applied: bool,
    pub points_used: i32,
    pub discount: Decimal,
    pub remaining_balance: i32,
}

/// Redemption converts the whole balance at `redeem_value_per_point`,
/// capped at `total`. Balances under the minimum are left untouched. When
/// the cap bites, `points_used` is back-computed from the capped discount
/// but the balance is still zeroed.
pub fn plan_redemption(policy: &LoyaltyConfig, balance: i32, total: Decimal) -> RedemptionPlan {
    if balance < policy.min_redeem_points || balance <= 0 {
        return RedemptionPlan {
            applied: false,
            points_used: 0,
            discount: Decimal::ZERO,
            remaining_balance: balance,
        };
    }

    let value = policy.redeem_value();
    let full_discount = Decimal::from(balance) * value;
    let discount = full_discount.min(total.max(Decimal::ZERO));
    let points_used = if discount < full_discount {
        (discount / value).floor().to_i32().unwrap_or(balance)
    } else {
        balance
    };

    RedemptionPlan {
        applied: true,
        points_used,
        discount,
        remaining_balance: 0,
    }
}

/// Points earned for a settled amount: one per `currency_per_point`, zero
/// below `min_order_for_points`.
pub fn plan_accrual(policy: &LoyaltyConfig, amount: Decimal) -> i32 {
    if amount < policy.accrual_minimum() {
        return 0;
    }
    (amount / policy.accrual_unit())
        .floor()
        .to_i32()
        .unwrap_or(i32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RedemptionOutcome {
    pub customer_id: Uuid,
    pub points_used: i32,
    pub discount: Decimal,
    pub final_amount: Decimal,
    pub remaining_points: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccrualOutcome {
    pub customer_id: Uuid,
    pub points_earned: i32,
    pub new_balance: i32,
}

/// Locks the member row. A missing row is `NotFound`; a soft-deleted member
/// yields `None` so the surrounding settlement goes ahead without points.
async fn load_member_for_update<C>(
    conn: &C,
    customer_id: Uuid,
) -> Result<Option<customer::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let customer = lock_for_update(customer::Entity::find_by_id(customer_id), conn)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("customer {customer_id} not found")))?;
    if customer.deleted_at.is_some() {
        warn!(customer_id = %customer_id, "customer deleted; loyalty points skipped");
        return Ok(None);
    }
    Ok(Some(customer))
}

/// Converts the customer's whole balance into a discount against
/// `total_amount`. Runs on the caller's transaction.
#[instrument(skip(conn, policy))]
pub async fn redeem_all_points<C>(
    conn: &C,
    policy: &LoyaltyConfig,
    customer_id: Uuid,
    total_amount: Decimal,
) -> Result<Option<RedemptionOutcome>, ServiceError>
where
    C: ConnectionTrait,
{
    let Some(customer) = load_member_for_update(conn, customer_id).await? else {
        return Ok(None);
    };
    let plan = plan_redemption(policy, customer.points, total_amount);

    if plan.applied {
        let mut active: customer::ActiveModel = customer.into();
        active.points = Set(plan.remaining_balance);
        active.update(conn).await?;
        info!(
            customer_id = %customer_id,
            points_used = plan.points_used,
            discount = %plan.discount,
            "points redeemed"
        );
    }

    Ok(Some(RedemptionOutcome {
        customer_id,
        points_used: plan.points_used,
        discount: plan.discount,
        final_amount: total_amount - plan.discount,
        remaining_points: plan.remaining_balance,
    }))
}

/// Credits points for a settled amount. Runs on the caller's transaction.
#[instrument(skip(conn, policy))]
pub async fn earn_points_from_payment<C>(
    conn: &C,
    policy: &LoyaltyConfig,
    customer_id: Uuid,
    final_amount: Decimal,
) -> Result<Option<AccrualOutcome>, ServiceError>
where
    C: ConnectionTrait,
{
    let Some(customer) = load_member_for_update(conn, customer_id).await? else {
        return Ok(None);
    };
    let earned = plan_accrual(policy, final_amount);
    if earned == 0 {
        return Ok(Some(AccrualOutcome {
            customer_id,
            points_earned: 0,
            new_balance: customer.points,
        }));
    }

    let new_balance = customer.points.saturating_add(earned);
    let mut active: customer::ActiveModel = customer.into();
    active.points = Set(new_balance);
    active.update(conn).await?;
    info!(customer_id = %customer_id, earned, new_balance, "points earned");

    Ok(Some(AccrualOutcome {
        customer_id,
        points_earned: earned,
        new_balance,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CustomerPoints {
    pub customer_id: Uuid,
    pub name: Option<String>,
    pub phone: String,
    pub points: i32,
    /// Balance expressed in currency at the current redemption rate.
    pub points_value: Decimal,
    pub member_since: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PointsService {
    db_pool: Arc<DbPool>,
    policy: LoyaltyConfig,
}

impl PointsService {
    pub fn new(db_pool: Arc<DbPool>, policy: LoyaltyConfig) -> Self {
        Self { db_pool, policy }
    }

    pub fn policy(&self) -> &LoyaltyConfig {
        &self.policy
    }

    #[instrument(skip(self))]
    pub async fn get_customer_points(&self, customer_id: Uuid) -> Result<CustomerPoints, ServiceError> {
        let customer = customer::Entity::find_by_id(customer_id)
            .one(&*self.db_pool)
            .await?
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("customer {customer_id} not found")))?;

        Ok(CustomerPoints {
            customer_id: customer.id,
            points_value: Decimal::from(customer.points) * self.policy.redeem_value(),
            name: customer.name,
            phone: customer.phone,
            points: customer.points,
            member_since: customer.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn policy() -> LoyaltyConfig {
        LoyaltyConfig::default()
    }

    #[rstest]
    #[case(29, dec!(1_000_000), false, 0, dec!(0), 29)]
    #[case(30, dec!(1_000_000), true, 30, dec!(90_000), 0)]
    #[case(50, dec!(200_000), true, 50, dec!(150_000), 0)]
    #[case(100, dec!(250_000), true, 83, dec!(250_000), 0)]
    #[case(100, dec!(300_000), true, 100, dec!(300_000), 0)]
    #[case(40, dec!(0), true, 0, dec!(0), 0)]
    #[case(0, dec!(500_000), false, 0, dec!(0), 0)]
    fn redemption_boundaries(
        #[case] balance: i32,
        #[case] total: Decimal,
        #[case] applied: bool,
        #[case] used: i32,
        #[case] discount: Decimal,
        #[case] remaining: i32,
    ) {
        let plan = plan_redemption(&policy(), balance, total);
        assert_eq!(plan.applied, applied);
        assert_eq!(plan.points_used, used);
        assert_eq!(plan.discount, discount);
        assert_eq!(plan.remaining_balance, remaining);
    }

    #[rstest]
    #[case(dec!(0), 0)]
    #[case(dec!(299_999), 0)]
    #[case(dec!(300_000), 3)]
    #[case(dec!(450_000), 4)]
    #[case(dec!(1_250_000), 12)]
    fn accrual_boundaries(#[case] amount: Decimal, #[case] points: i32) {
        assert_eq!(plan_accrual(&policy(), amount), points);
    }

    #[test]
    fn policy_values_come_from_config() {
        let custom = LoyaltyConfig {
            redeem_value_per_point: 1000,
            min_redeem_points: 10,
            currency_per_point: 50_000,
            min_order_for_points: 100_000,
        };
        let plan = plan_redemption(&custom, 10, dec!(1_000_000));
        assert_eq!(plan.discount, dec!(10_000));
        assert_eq!(plan_accrual(&custom, dec!(100_000)), 2);
    }
}
