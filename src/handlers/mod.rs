pub mod carts;
pub mod customers;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod points;
pub mod qr_sessions;
pub mod tables;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::{effects::EffectRunner, EventSender};
use crate::notifications::NotificationDispatcher;
use crate::services::{
    carts::CartService, customers::CustomerService, orders::OrderService,
    payments::PaymentService, points::PointsService, qr_sessions::QrSessionService,
    qr_token::QrTokenSigner, session_locks::SessionLocks, tables::TableService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub tables: Arc<TableService>,
    pub sessions: Arc<QrSessionService>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub points: Arc<PointsService>,
    pub customers: Arc<CustomerService>,
    /// Per-session merge locks shared by the services above.
    pub locks: SessionLocks,
}

impl AppServices {
    /// Wires every service over one pool, one effect runner and one lock table.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let effects = EffectRunner::new(notifier, event_sender);
        let locks = SessionLocks::new();
        let signer = QrTokenSigner::new(config.qr_token_secret.as_bytes());

        let tables = Arc::new(TableService::new(
            db_pool.clone(),
            signer.clone(),
            config.order_page_url.clone(),
        ));
        let sessions = Arc::new(QrSessionService::new(
            db_pool.clone(),
            signer,
            config.session_duration(),
            effects.clone(),
            locks.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            locks.clone(),
            sessions.clone(),
            effects.clone(),
        ));
        let carts = Arc::new(CartService::new(
            db_pool.clone(),
            orders.clone(),
            effects.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            config.bank.clone(),
            config.loyalty.clone(),
            sessions.clone(),
            locks.clone(),
            effects,
        ));
        let points = Arc::new(PointsService::new(db_pool.clone(), config.loyalty.clone()));
        let customers = Arc::new(CustomerService::new(db_pool));

        Self {
            tables,
            sessions,
            carts,
            orders,
            payments,
            points,
            customers,
            locks,
        }
    }
}
