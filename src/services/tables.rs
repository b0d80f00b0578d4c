use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        dining_table::{self, Entity as TableEntity, Model as TableModel},
        order::{self, OrderStatus},
        qr_session::{self, SessionStatus},
    },
    errors::ServiceError,
    services::qr_token::QrTokenSigner,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateTableRequest {
    #[validate(length(min = 1, max = 20, message = "table number must be 1-20 characters"))]
    pub table_number: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateTableRequest {
    #[validate(length(min = 1, max = 20, message = "table number must be 1-20 characters"))]
    pub table_number: Option<String>,
    pub is_active: Option<bool>,
    /// Rotates the printed QR code; old codes stop validating.
    #[serde(default)]
    pub regenerate_qr: bool,
}

/// Loads a table that can take guests: present, active and not soft-deleted.
pub(crate) async fn find_usable_table<C>(conn: &C, table_id: Uuid) -> Result<TableModel, ServiceError>
where
    C: ConnectionTrait,
{
    TableEntity::find_by_id(table_id)
        .one(conn)
        .await?
        .filter(TableModel::is_usable)
        .ok_or_else(|| ServiceError::NotFound(format!("table {table_id} not found or inactive")))
}

#[derive(Clone)]
pub struct TableService {
    db_pool: Arc<DbPool>,
    signer: QrTokenSigner,
    order_page_url: String,
}

impl TableService {
    pub fn new(db_pool: Arc<DbPool>, signer: QrTokenSigner, order_page_url: String) -> Self {
        Self {
            db_pool,
            signer,
            order_page_url,
        }
    }

    #[instrument(skip(self, request), fields(table_number = %request.table_number))]
    pub async fn create_table(&self, request: CreateTableRequest) -> Result<TableModel, ServiceError> {
        request.validate()?;
        let id = Uuid::new_v4();
        let qr_code_url = self.signer.table_url(&self.order_page_url, id, 1)?;

        let table = dining_table::ActiveModel {
            id: Set(id),
            table_number: Set(request.table_number.trim().to_string()),
            is_active: Set(true),
            qr_code_url: Set(Some(qr_code_url)),
            qr_version: Set(1),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await?;

        info!(table_id = %table.id, "table created");
        Ok(table)
    }

    pub async fn get_table(&self, id: Uuid) -> Result<TableModel, ServiceError> {
        TableEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("table {id} not found")))
    }

    pub async fn list_tables(&self) -> Result<Vec<TableModel>, ServiceError> {
        Ok(TableEntity::find()
            .filter(dining_table::Column::DeletedAt.is_null())
            .order_by_asc(dining_table::Column::TableNumber)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self, request))]
    pub async fn update_table(
        &self,
        id: Uuid,
        request: UpdateTableRequest,
    ) -> Result<TableModel, ServiceError> {
        request.validate()?;
        let current = self.get_table(id).await?;
        let next_version = current.qr_version + 1;
        let mut active: dining_table::ActiveModel = current.into();

        if let Some(number) = request.table_number {
            active.table_number = Set(number.trim().to_string());
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        if request.regenerate_qr {
            let url = self.signer.table_url(&self.order_page_url, id, next_version)?;
            active.qr_version = Set(next_version);
            active.qr_code_url = Set(Some(url));
            info!(table_id = %id, qr_version = next_version, "table QR regenerated");
        }

        Ok(active.update(&*self.db_pool).await?)
    }

    /// Soft delete. Refused while guests are seated or orders are still open.
    #[instrument(skip(self))]
    pub async fn delete_table(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let current = TableEntity::find_by_id(id)
            .one(&txn)
            .await?
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("table {id} not found")))?;

        let active_sessions = qr_session::Entity::find()
            .filter(qr_session::Column::TableId.eq(id))
            .filter(qr_session::Column::Status.eq(SessionStatus::Active))
            .count(&txn)
            .await?;
        if active_sessions > 0 {
            return Err(ServiceError::Conflict(format!(
                "table {id} has an active session"
            )));
        }

        let open_orders = order::Entity::find()
            .join(JoinType::InnerJoin, order::Relation::QrSession.def())
            .filter(qr_session::Column::TableId.eq(id))
            .filter(order::Column::Status.is_in([
                OrderStatus::New,
                OrderStatus::InProgress,
                OrderStatus::Done,
            ]))
            .count(&txn)
            .await?;
        if open_orders > 0 {
            return Err(ServiceError::Conflict(format!(
                "table {id} still has {open_orders} open orders"
            )));
        }

        let mut active: dining_table::ActiveModel = current.into();
        active.is_active = Set(false);
        active.deleted_at = Set(Some(Utc::now()));
        active.update(&txn).await?;
        txn.commit().await?;

        info!(table_id = %id, "table deleted");
        Ok(())
    }

    pub fn signer(&self) -> &QrTokenSigner {
        &self.signer
    }
}
