//! Per-session fan-out.
//!
//! Publishing to a session goes through that session's publish slot, a FIFO
//! async mutex. The router takes the slot while it still holds the session
//! lease, then lets the lease go and delivers. Because the slot is fair,
//! slots are granted in lease order, so every subscriber sees messages in
//! persisted order without the lease being held across delivery.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{PrivateDelivery, SessionRegistry};
use crate::models::{
    Delivery, InteractionMessage, OutboundMessage, Session, SessionEventMessage, Topic,
};

/// Counts from one publish
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers in the snapshot taken for this publish.
    pub subscribers: usize,
    /// Subscribers with at least one connection that accepted the message.
    pub delivered: usize,
    /// Private-channel deliveries parked in an inbox.
    pub queued: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: SessionRegistry,
    slots: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Exclusive right to publish on a session's topics
pub struct PublishSlot {
    session_id: Uuid,
    registry: SessionRegistry,
    _guard: OwnedMutexGuard<()>,
}

impl Broadcaster {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Wait for the session's publish slot. Granted in request order.
    pub async fn slot(&self, session_id: Uuid) -> PublishSlot {
        let handle = self.slots.entry(session_id).or_default().value().clone();
        let guard = handle.lock_owned().await;
        PublishSlot {
            session_id,
            registry: self.registry.clone(),
            _guard: guard,
        }
    }

    /// Forget the slot of a session nobody is publishing to.
    pub fn release(&self, session_id: Uuid) -> bool {
        self.slots
            .remove_if(&session_id, |_, handle| Arc::strong_count(handle) == 1)
            .is_some()
    }
}

impl PublishSlot {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Deliver to the current subscribers of the session's interactions topic.
    pub fn publish_interaction(&self, message: InteractionMessage) -> DeliveryReport {
        let delivery = Delivery::new(
            Topic::SessionInteractions(self.session_id),
            OutboundMessage::Interaction(message),
        );
        self.fan_out(&delivery)
    }

    /// Deliver a lifecycle event to the session's events topic and to the
    /// private channel of both fixed roles, subscribed or not.
    pub fn announce(&self, session: &Session, event: SessionEventMessage) -> DeliveryReport {
        let delivery = Delivery::new(
            Topic::SessionEvents(self.session_id),
            OutboundMessage::SessionEvent(event),
        );
        let mut report = self.fan_out(&delivery);

        for participant_id in session.participants() {
            let private = delivery.readdressed(Topic::ParticipantQueue(participant_id));
            if self.registry.deliver_private(participant_id, private) == PrivateDelivery::Queued {
                report.queued += 1;
            }
        }
        report
    }

    fn fan_out(&self, delivery: &Delivery) -> DeliveryReport {
        // One snapshot per publish: a subscriber either gets this message or
        // joined after it.
        let subscribers = self.registry.list_subscribers(self.session_id);
        let mut report = DeliveryReport {
            subscribers: subscribers.len(),
            ..DeliveryReport::default()
        };

        for participant_id in subscribers {
            if self.registry.send_to_participant(participant_id, delivery) > 0 {
                report.delivered += 1;
            }
        }

        if report.delivered < report.subscribers {
            tracing::debug!(
                "Publish on {}: {} of {} subscribers had no live connection",
                delivery.topic,
                report.subscribers - report.delivered,
                report.subscribers
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageAction, NewSession, SessionEventType};
    use std::collections::HashMap;

    fn session() -> Session {
        Session::new(
            NewSession {
                interviewer_id: Uuid::new_v4(),
                candidate_id: Uuid::new_v4(),
                scheduled_time: None,
                session_type: "technical".into(),
                metadata: HashMap::new(),
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_only_session_subscribers() {
        let registry = SessionRegistry::new(8);
        let broadcaster = Broadcaster::new(registry.clone());
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (_, mut rx_alice) = registry.attach(alice, session_a);
        let (_, mut rx_bob) = registry.attach(bob, session_b);
        registry.subscribe(session_a, alice);
        registry.subscribe(session_b, bob);

        let report = broadcaster
            .slot(session_a)
            .await
            .publish_interaction(InteractionMessage::typing(session_a, alice, true));

        assert_eq!(report.subscribers, 1);
        assert_eq!(report.delivered, 1);
        let got = rx_alice.try_recv().unwrap();
        assert_eq!(got.topic, Topic::SessionInteractions(session_a));
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_announce_reaches_private_channels() {
        let registry = SessionRegistry::new(8);
        let broadcaster = Broadcaster::new(registry.clone());
        let session = session();

        // Interviewer online but not subscribed, candidate offline.
        let (_, mut rx_interviewer) = registry.attach(session.interviewer_id, session.id);

        let event = SessionEventMessage::new(&session, SessionEventType::SessionStarted, None);
        let report = broadcaster.slot(session.id).await.announce(&session, event);

        assert_eq!(report.subscribers, 0);
        assert_eq!(report.queued, 1);
        let private = rx_interviewer.try_recv().unwrap();
        assert_eq!(private.topic, Topic::ParticipantQueue(session.interviewer_id));
        assert_eq!(registry.pending_inbox(session.candidate_id), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slots_granted_in_request_order() {
        let registry = SessionRegistry::new(8);
        let broadcaster = Broadcaster::new(registry.clone());
        let session_id = Uuid::new_v4();
        let watcher = Uuid::new_v4();
        let (_, mut rx) = registry.attach(watcher, session_id);
        registry.subscribe(session_id, watcher);

        let first = broadcaster.slot(session_id).await;
        let waiting = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                let slot = broadcaster.slot(session_id).await;
                slot.publish_interaction(InteractionMessage::typing(session_id, watcher, false));
            })
        };
        tokio::task::yield_now().await;
        first.publish_interaction(InteractionMessage::typing(session_id, watcher, true));
        drop(first);
        waiting.await.unwrap();

        let actions: Vec<MessageAction> = [rx.recv().await.unwrap(), rx.recv().await.unwrap()]
            .iter()
            .map(|d| match d.message.as_ref() {
                OutboundMessage::Interaction(m) => m.action,
                OutboundMessage::SessionEvent(_) => unreachable!(),
            })
            .collect();
        assert_eq!(
            actions,
            vec![MessageAction::TypingStart, MessageAction::TypingStop]
        );
    }

    #[tokio::test]
    async fn test_release_keeps_held_slot() {
        let broadcaster = Broadcaster::new(SessionRegistry::new(8));
        let session_id = Uuid::new_v4();
        let slot = broadcaster.slot(session_id).await;
        assert!(!broadcaster.release(session_id));
        drop(slot);
        assert!(broadcaster.release(session_id));
    }
}
