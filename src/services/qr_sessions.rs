use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
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
        dining_table,
        order::{self, OrderStatus},
        qr_session::{self, Entity as SessionEntity, Model as SessionModel, SessionStatus},
    },
    errors::ServiceError,
    events::{
        effects::{EffectRunner, PostCommitEffects},
        Event,
    },
    notifications::{NotificationKind, NotificationPayload, NotificationTarget},
    services::{
        customers::find_live_customer, qr_token::QrTokenSigner, session_locks::SessionLocks,
        tables::find_usable_table,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ScanRequest {
    #[serde(alias = "tableId")]
    pub table_id: Uuid,
    #[serde(default, alias = "customerId")]
    pub customer_id: Option<Uuid>,
    /// Token from the printed QR code.
    #[serde(default, alias = "sessionToken", alias = "token")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionModel,
    pub table_number: String,
    /// False when an existing ACTIVE session was reused.
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionInvalidReason {
    SessionNotFound,
    SessionCompleted,
    TableInactive,
    SessionExpired,
}

/// Answer to "can the client keep using its cached session?"
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SessionInvalidReason>,
    pub should_clear: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionModel>,
}

impl SessionValidation {
    fn valid(session: SessionModel) -> Self {
        Self {
            valid: true,
            reason: None,
            should_clear: false,
            session: Some(session),
        }
    }

    fn invalid(reason: SessionInvalidReason, session: Option<SessionModel>) -> Self {
        Self {
            valid: false,
            should_clear: reason != SessionInvalidReason::SessionCompleted,
            reason: Some(reason),
            session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CloseSessionResult {
    pub id: Uuid,
    pub status: SessionStatus,
    /// False when the session was already COMPLETED.
    pub closed_now: bool,
}

/// Completes `session_id` if it is still ACTIVE. Returns whether a row changed.
pub(crate) async fn complete_session<C>(conn: &C, session_id: Uuid) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let result = SessionEntity::update_many()
        .col_expr(
            qr_session::Column::Status,
            sea_orm::sea_query::Expr::value(SessionStatus::Completed),
        )
        .col_expr(
            qr_session::Column::UpdatedAt,
            sea_orm::sea_query::Expr::value(Utc::now()),
        )
        .filter(qr_session::Column::Id.eq(session_id))
        .filter(qr_session::Column::Status.eq(SessionStatus::Active))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Orders of the session still waiting on the kitchen or on payment.
pub(crate) async fn count_open_orders<C>(conn: &C, session_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(order::Entity::find()
        .filter(order::Column::QrSessionId.eq(session_id))
        .filter(order::Column::Status.is_in(OrderStatus::OPEN))
        .count(conn)
        .await?)
}

/// Loads a session and requires it to be ACTIVE. Missing → NotFound,
/// completed → Conflict.
pub(crate) async fn require_active_session<C>(
    conn: &C,
    session_id: Uuid,
) -> Result<SessionModel, ServiceError>
where
    C: ConnectionTrait,
{
    let session = lock_for_update(SessionEntity::find_by_id(session_id), conn)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;
    if !session.is_active() {
        return Err(ServiceError::Conflict(format!(
            "session {session_id} is no longer active"
        )));
    }
    Ok(session)
}

async fn find_active_for_table<C>(conn: &C, table_id: Uuid) -> Result<Option<SessionModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(lock_for_update(
        SessionEntity::find()
            .filter(qr_session::Column::TableId.eq(table_id))
            .filter(qr_session::Column::Status.eq(SessionStatus::Active)),
        conn,
    )
    .one(conn)
    .await?)
}

#[derive(Clone)]
pub struct QrSessionService {
    db_pool: Arc<DbPool>,
    signer: QrTokenSigner,
    session_duration: Duration,
    effects: EffectRunner,
    locks: SessionLocks,
}

impl QrSessionService {
    pub fn new(
        db_pool: Arc<DbPool>,
        signer: QrTokenSigner,
        session_duration: Duration,
        effects: EffectRunner,
        locks: SessionLocks,
    ) -> Self {
        Self {
            db_pool,
            signer,
            session_duration,
            effects,
            locks,
        }
    }

    /// Handles a QR scan: reuses the table's ACTIVE session or opens one.
    #[instrument(skip(self, request), fields(table_id = %request.table_id))]
    pub async fn open_or_reuse(&self, request: ScanRequest) -> Result<SessionView, ServiceError> {
        let mut effects = PostCommitEffects::new();
        let txn = self.db_pool.begin().await?;

        let table = find_usable_table(&txn, request.table_id).await?;

        if let Some(token) = request
            .session_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            if !self.signer.verify(table.id, table.qr_version, token) {
                warn!(table_id = %table.id, "rejected scan with invalid token");
                return Err(ServiceError::ValidationError(
                    "invalid session token".to_string(),
                ));
            }
        }

        if let Some(customer_id) = request.customer_id {
            find_live_customer(&txn, customer_id).await?;
        }

        let now = Utc::now();
        let mut expired_session = None;
        if let Some(existing) = find_active_for_table(&txn, table.id).await? {
            if !existing.is_expired_at(now) {
                txn.commit().await?;
                return Ok(SessionView {
                    session: existing,
                    table_number: table.table_number,
                    is_new: false,
                });
            }
            complete_session(&txn, existing.id).await?;
            effects.publish(Event::SessionExpired(existing.id));
            info!(session_id = %existing.id, "expired session completed on scan");
            expired_session = Some(existing.id);
        }

        let candidate = qr_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            table_id: Set(table.id),
            customer_id: Set(request.customer_id),
            status: Set(SessionStatus::Active),
            created_at: Set(now),
            expired_at: Set(now + self.session_duration),
            ..Default::default()
        };

        let session = match candidate.insert(&txn).await.map_err(ServiceError::from) {
            Ok(session) => session,
            Err(e) if e.is_unique_violation() => {
                drop(txn);
                let winner = find_active_for_table(&*self.db_pool, table.id)
                    .await?
                    .ok_or(e)?;
                info!(session_id = %winner.id, "concurrent scan opened the session first");
                return Ok(SessionView {
                    session: winner,
                    table_number: table.table_number,
                    is_new: false,
                });
            }
            Err(e) => return Err(e),
        };
        txn.commit().await?;
        if let Some(expired_id) = expired_session {
            self.locks.release_idle(expired_id);
        }

        info!(session_id = %session.id, table_id = %table.id, "session opened");
        effects.publish(Event::SessionOpened {
            session_id: session.id,
            table_id: table.id,
        });
        self.effects.run(effects).await;

        Ok(SessionView {
            session,
            table_number: table.table_number,
            is_new: true,
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionView, ServiceError> {
        let (session, table) = SessionEntity::find_by_id(session_id)
            .find_also_related(dining_table::Entity)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;

        Ok(SessionView {
            session,
            table_number: table.map(|t| t.table_number).unwrap_or_default(),
            is_new: false,
        })
    }

    /// Checks a client-cached session. An ACTIVE session past its expiry is
    /// completed here.
    #[instrument(skip(self))]
    pub async fn validate_session(&self, session_id: Uuid) -> Result<SessionValidation, ServiceError> {
        let db = &*self.db_pool;
        let Some((session, table)) = SessionEntity::find_by_id(session_id)
            .find_also_related(dining_table::Entity)
            .one(db)
            .await?
        else {
            return Ok(SessionValidation::invalid(
                SessionInvalidReason::SessionNotFound,
                None,
            ));
        };

        if !session.is_active() {
            return Ok(SessionValidation::invalid(
                SessionInvalidReason::SessionCompleted,
                Some(session),
            ));
        }

        if !table.as_ref().is_some_and(|t| t.is_usable()) {
            return Ok(SessionValidation::invalid(
                SessionInvalidReason::TableInactive,
                Some(session),
            ));
        }

        if session.is_expired_at(Utc::now()) {
            if complete_session(db, session.id).await? {
                info!(session_id = %session.id, "session expired");
                let mut effects = PostCommitEffects::new();
                effects.publish(Event::SessionExpired(session.id));
                self.effects.run(effects).await;
                self.locks.release_idle(session.id);
            }
            let refreshed = SessionEntity::find_by_id(session.id).one(db).await?;
            return Ok(SessionValidation::invalid(
                SessionInvalidReason::SessionExpired,
                refreshed,
            ));
        }

        Ok(SessionValidation::valid(session))
    }

    #[instrument(skip(self))]
    pub async fn attach_customer(
        &self,
        session_id: Uuid,
        customer_id: Uuid,
    ) -> Result<SessionModel, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let session = require_active_session(&txn, session_id).await?;
        find_live_customer(&txn, customer_id).await?;

        let mut active: qr_session::ActiveModel = session.into();
        active.customer_id = Set(Some(customer_id));
        let session = active.update(&txn).await?;
        txn.commit().await?;

        info!(session_id = %session_id, customer_id = %customer_id, "customer attached");
        Ok(session)
    }

    /// ACTIVE → COMPLETED; closing a COMPLETED session is a no-op.
    #[instrument(skip(self))]
    pub async fn close_session(&self, session_id: Uuid) -> Result<CloseSessionResult, ServiceError> {
        let db = &*self.db_pool;
        let session = SessionEntity::find_by_id(session_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} not found")))?;

        let closed_now = session.is_active() && complete_session(db, session_id).await?;
        if closed_now {
            info!(session_id = %session_id, "session closed");
            let mut effects = PostCommitEffects::new();
            effects.notify(
                NotificationTarget::Session(session_id),
                NotificationPayload::new(
                    NotificationKind::SessionEnded,
                    "Your dining session has ended. Thank you!",
                )
                .with_data(serde_json::json!({ "qr_session_id": session_id })),
            );
            effects.publish(Event::SessionClosed(session_id));
            self.effects.run(effects).await;
            self.locks.release_idle(session_id);
        }

        Ok(CloseSessionResult {
            id: session_id,
            status: SessionStatus::Completed,
            closed_now,
        })
    }

    /// Closes the session once nothing in it is left to serve or pay for.
    #[instrument(skip(self))]
    pub async fn close_if_settled(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        let open = count_open_orders(&*self.db_pool, session_id).await?;
        if open > 0 {
            info!(session_id = %session_id, open, "session kept open");
            return Ok(false);
        }
        Ok(self.close_session(session_id).await?.closed_now)
    }
}
