use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use utoipa::IntoParams;

use crate::{errors::ServiceError, notifications::NotificationTarget, AppState};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamQuery {
    /// `STAFF` or `QR_SESSION_{session_id}`
    pub room: String,
}

/// Server-Sent Events feed of one notification room.
#[utoipa::path(
    get,
    path = "/api/v1/notifications/stream",
    summary = "Subscribe to a notification room",
    params(StreamQuery),
    responses(
        (status = 200, description = "text/event-stream of notification payloads"),
        (status = 400, description = "Unknown room", body = crate::errors::ErrorResponse),
    ),
    tag = "Notifications"
)]
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ServiceError> {
    let target = NotificationTarget::from_room(query.room.trim()).ok_or_else(|| {
        ServiceError::ValidationError(format!("unknown notification room: {}", query.room))
    })?;
    let room = target.room();
    let receiver = state.notifications.subscribe(&room);
    info!(room = %room, "notification subscriber attached");

    let events = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(payload) => {
                    let event = SseEvent::default()
                        .event(payload.kind.as_ref())
                        .json_data(&payload);
                    return Some((event, receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
