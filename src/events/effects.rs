//! Side effects collected during a transaction and run after it commits.

use std::sync::Arc;

use metrics::counter;
use tracing::warn;

use super::{Event, EventSender};
use crate::notifications::{NotificationDispatcher, NotificationPayload, NotificationTarget};

#[derive(Debug, Clone)]
pub enum PostCommitEffect {
    Notify {
        target: NotificationTarget,
        payload: NotificationPayload,
    },
    Publish(Event),
}

/// Ordered list of effects owed once the surrounding transaction commits.
#[derive(Debug, Default, Clone)]
pub struct PostCommitEffects {
    effects: Vec<PostCommitEffect>,
}

impl PostCommitEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, target: NotificationTarget, payload: NotificationPayload) {
        self.effects.push(PostCommitEffect::Notify { target, payload });
    }

    pub fn publish(&mut self, event: Event) {
        self.effects.push(PostCommitEffect::Publish(event));
    }

    pub fn extend(&mut self, other: PostCommitEffects) {
        self.effects.extend(other.effects);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PostCommitEffect> {
        self.effects.iter()
    }
}

/// Runs post-commit effects. Each effect fails on its own: errors are logged
/// and counted, never returned.
#[derive(Clone)]
pub struct EffectRunner {
    notifier: Arc<dyn NotificationDispatcher>,
    events: EventSender,
}

impl EffectRunner {
    pub fn new(notifier: Arc<dyn NotificationDispatcher>, events: EventSender) -> Self {
        Self { notifier, events }
    }

    pub async fn run(&self, effects: PostCommitEffects) {
        for effect in effects.effects {
            match effect {
                PostCommitEffect::Notify { target, payload } => {
                    let kind = payload.kind;
                    if let Err(e) = self.notifier.emit(&target, payload).await {
                        counter!("tableside.notifications.failed", 1);
                        warn!(room = %target, kind = %kind, error = %e, "notification emit failed");
                    }
                }
                PostCommitEffect::Publish(event) => {
                    if let Err(e) = self.events.send(event).await {
                        counter!("tableside.events.dropped", 1);
                        warn!(error = %e, "domain event dropped");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{NotificationError, NotificationKind, RoomBroadcaster};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct FailingDispatcher {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationDispatcher for FailingDispatcher {
        async fn emit(
            &self,
            _target: &NotificationTarget,
            _payload: NotificationPayload,
        ) -> Result<(), NotificationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(NotificationError::Delivery("socket closed".into()))
        }
    }

    #[tokio::test]
    async fn a_failing_notification_does_not_stop_later_effects() {
        let dispatcher = Arc::new(FailingDispatcher {
            attempts: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(4);
        let runner = EffectRunner::new(dispatcher.clone(), EventSender::new(tx));

        let mut effects = PostCommitEffects::new();
        effects.notify(
            NotificationTarget::Staff,
            NotificationPayload::new(NotificationKind::Info, "first"),
        );
        effects.notify(
            NotificationTarget::Staff,
            NotificationPayload::new(NotificationKind::Info, "second"),
        );
        effects.publish(Event::SessionClosed(Uuid::nil()));
        assert_eq!(effects.len(), 3);

        runner.run(effects).await;

        assert_eq!(dispatcher.attempts.load(Ordering::SeqCst), 2);
        assert!(matches!(rx.try_recv(), Ok(Event::SessionClosed(_))));
    }

    #[tokio::test]
    async fn closed_event_channel_is_tolerated() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let runner = EffectRunner::new(Arc::new(RoomBroadcaster::default()), EventSender::new(tx));
        let mut effects = PostCommitEffects::new();
        effects.publish(Event::SessionExpired(Uuid::nil()));
        runner.run(effects).await;
    }
}
