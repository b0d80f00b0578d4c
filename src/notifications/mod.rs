//! Real-time notification dispatch to session and staff rooms.
//!
//! Delivery is at-most-once: no retries, no persistence, no replay. Callers
//! run emits after their transaction commits and only log failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

pub const STAFF_ROOM: &str = "STAFF";

/// Where a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationTarget {
    /// Everyone looking at one dining session.
    Session(Uuid),
    /// All staff screens.
    Staff,
}

impl NotificationTarget {
    pub fn room(&self) -> String {
        match self {
            NotificationTarget::Session(id) => format!("QR_SESSION_{id}"),
            NotificationTarget::Staff => STAFF_ROOM.to_string(),
        }
    }

    /// Inverse of [`NotificationTarget::room`].
    pub fn from_room(room: &str) -> Option<Self> {
        if room == STAFF_ROOM {
            return Some(NotificationTarget::Staff);
        }
        room.strip_prefix("QR_SESSION_")
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(NotificationTarget::Session)
    }
}

impl fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.room())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::AsRefStr,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
    SessionEnded,
    SessionPaid,
}

/// Wire payload pushed to room listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NotificationPayload {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn emit(
        &self,
        target: &NotificationTarget,
        payload: NotificationPayload,
    ) -> Result<(), NotificationError>;
}

/// In-process hub: one broadcast channel per room, created on first use.
pub struct RoomBroadcaster {
    rooms: DashMap<String, broadcast::Sender<NotificationPayload>>,
    capacity: usize,
}

impl RoomBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, room: &str) -> broadcast::Sender<NotificationPayload> {
        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .value()
            .clone()
    }

    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<NotificationPayload> {
        self.sender(room).subscribe()
    }

    pub fn listener_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drops rooms nobody listens to.
    pub fn prune(&self) {
        self.rooms.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for RoomBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl NotificationDispatcher for RoomBroadcaster {
    async fn emit(
        &self,
        target: &NotificationTarget,
        payload: NotificationPayload,
    ) -> Result<(), NotificationError> {
        let room = target.room();
        let Some(sender) = self.rooms.get(&room).map(|s| s.value().clone()) else {
            debug!(room = %room, kind = %payload.kind, "no listeners for room");
            return Ok(());
        };
        match sender.send(payload) {
            Ok(delivered) => debug!(room = %room, delivered, "notification emitted"),
            // Every receiver went away between lookup and send.
            Err(_) => debug!(room = %room, "room emptied before delivery"),
        }
        Ok(())
    }
}
