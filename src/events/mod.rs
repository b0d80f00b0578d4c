use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{order::OrderStatus, payment::PaymentMethod};

pub mod effects;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing when the loop is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// One line on a kitchen ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitchenTicketLine {
    pub name: String,
    pub quantity: i32,
    pub note: Option<String>,
}

/// Printed for the kitchen when an order is confirmed (NEW -> IN_PROGRESS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitchenTicket {
    pub order_id: Uuid,
    pub table_number: String,
    pub note: Option<String>,
    pub lines: Vec<KitchenTicketLine>,
    pub requested_at: DateTime<Utc>,
}

impl KitchenTicket {
    pub fn render(&self) -> String {
        let mut out = format!(
            "TABLE {}\nORDER {}\n{}\n",
            self.table_number,
            self.order_id,
            self.requested_at.format("%Y-%m-%d %H:%M")
        );
        for line in &self.lines {
            out.push_str(&format!("{:>3} x {}\n", line.quantity, line.name));
            if let Some(note) = line.note.as_deref().filter(|n| !n.trim().is_empty()) {
                out.push_str(&format!("      - {}\n", note.trim()));
            }
        }
        if let Some(note) = self.note.as_deref().filter(|n| !n.trim().is_empty()) {
            out.push_str(&format!("NOTE: {}\n", note.trim()));
        }
        out
    }
}

/// Domain events published after a transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SessionOpened {
        session_id: Uuid,
        table_id: Uuid,
    },
    SessionClosed(Uuid),
    SessionExpired(Uuid),

    CartItemAdded {
        cart_id: Uuid,
        session_id: Uuid,
        menu_item_id: Uuid,
        quantity: i32,
    },

    OrderCreated {
        order_id: Uuid,
        session_id: Uuid,
    },
    OrderItemsMerged {
        order_id: Uuid,
        added_total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    KitchenTicketRequested(KitchenTicket),

    PaymentCreated {
        payment_id: Uuid,
        order_id: Uuid,
        method: PaymentMethod,
    },
    PaymentConfirmed {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentRefunded {
        payment_id: Uuid,
        amount: Decimal,
    },
    SessionSettled {
        session_id: Uuid,
        orders_confirmed: usize,
        final_amount: Decimal,
    },

    PointsRedeemed {
        customer_id: Uuid,
        points: i32,
        discount: Decimal,
    },
    PointsEarned {
        customer_id: Uuid,
        points: i32,
        new_balance: i32,
    },
}

/// Background loop draining the event channel.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::KitchenTicketRequested(ticket) => {
                info!(
                    order_id = %ticket.order_id,
                    table = %ticket.table_number,
                    lines = ticket.lines.len(),
                    "kitchen ticket\n{}",
                    ticket.render()
                );
            }
            Event::SessionSettled {
                session_id,
                orders_confirmed,
                final_amount,
            } => {
                info!(
                    session_id = %session_id,
                    orders_confirmed,
                    final_amount = %final_amount,
                    "session settled"
                );
            }
            Event::PaymentFailed {
                payment_id,
                order_id,
            } => {
                warn!(payment_id = %payment_id, order_id = %order_id, "payment failed");
            }
            other => debug!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
