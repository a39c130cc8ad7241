use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::models::Delivery;

pub mod broadcast;
pub mod message_types;

pub use broadcast::{Broadcaster, DeliveryReport, PublishSlot};

/// Unique identifier for one live client connection
///
/// A participant may hold several connections (tabs, devices). Each gets its
/// own id so a closing socket only removes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

struct Connection {
    id: ConnectionId,
    // Session the socket was opened for; only that session's topics reach it.
    session_id: Uuid,
    sender: UnboundedSender<Delivery>,
}

/// Outcome of a private-channel delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateDelivery {
    /// Handed to at least one live connection.
    Sent,
    /// No live connection; kept in the participant's inbox.
    Queued,
}

struct RegistryInner {
    // session_id -> subscribed participants
    topics: DashMap<Uuid, HashSet<Uuid>>,
    // participant_id -> sessions it is subscribed to
    memberships: DashMap<Uuid, HashSet<Uuid>>,
    // participant_id -> live connections
    connections: DashMap<Uuid, Vec<Connection>>,
    // participant_id -> private deliveries waiting for a connection
    inboxes: DashMap<Uuid, VecDeque<Delivery>>,
    inbox_capacity: usize,
}

/// Session subscriptions and participant connections
///
/// Subscriptions are `{session, participant}` pairs; connections are where a
/// participant's deliveries actually go. A connection receives the topic
/// deliveries of its own session and every private-queue delivery. Lock order when two maps are
/// touched together: inboxes, then connections.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                topics: DashMap::new(),
                memberships: DashMap::new(),
                connections: DashMap::new(),
                inboxes: DashMap::new(),
                inbox_capacity: inbox_capacity.max(1),
            }),
        }
    }

    /// Subscribe a participant to a session's topics.
    ///
    /// Returns false when the participant was already subscribed.
    pub fn subscribe(&self, session_id: Uuid, participant_id: Uuid) -> bool {
        let added = self
            .inner
            .topics
            .entry(session_id)
            .or_default()
            .insert(participant_id);
        self.inner
            .memberships
            .entry(participant_id)
            .or_default()
            .insert(session_id);

        if added {
            tracing::debug!(
                "Subscribed participant {} to session {}, total subscribers: {}",
                participant_id,
                session_id,
                self.subscriber_count(session_id)
            );
        }
        added
    }

    /// Remove a subscription. Unknown pairs are ignored.
    pub fn unsubscribe(&self, session_id: Uuid, participant_id: Uuid) -> bool {
        let removed = self
            .inner
            .topics
            .get_mut(&session_id)
            .map(|mut subscribers| subscribers.remove(&participant_id))
            .unwrap_or(false);
        self.inner
            .topics
            .remove_if(&session_id, |_, subscribers| subscribers.is_empty());

        if let Some(mut sessions) = self.inner.memberships.get_mut(&participant_id) {
            sessions.remove(&session_id);
        }
        self.inner
            .memberships
            .remove_if(&participant_id, |_, sessions| sessions.is_empty());

        if removed {
            tracing::debug!(
                "Unsubscribed participant {} from session {}, remaining: {}",
                participant_id,
                session_id,
                self.subscriber_count(session_id)
            );
        }
        removed
    }

    /// Remove every subscription of a participant.
    ///
    /// Returns the sessions it was subscribed to.
    pub fn disconnect(&self, participant_id: Uuid) -> Vec<Uuid> {
        let sessions: Vec<Uuid> = self
            .inner
            .memberships
            .get(&participant_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        sessions
            .into_iter()
            .filter(|session_id| self.unsubscribe(*session_id, participant_id))
            .collect()
    }

    pub fn list_subscribers(&self, session_id: Uuid) -> HashSet<Uuid> {
        self.inner
            .topics
            .get(&session_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, session_id: Uuid, participant_id: Uuid) -> bool {
        self.inner
            .topics
            .get(&session_id)
            .map(|s| s.contains(&participant_id))
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.inner.topics.get(&session_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Sessions that currently have at least one subscriber.
    pub fn live_sessions(&self) -> Vec<Uuid> {
        self.inner.topics.iter().map(|e| *e.key()).collect()
    }

    /// Register a live connection of a participant, opened for one session.
    ///
    /// Anything waiting in the participant's inbox is flushed to the new
    /// connection before it becomes visible to publishers.
    pub fn attach(
        &self,
        participant_id: Uuid,
        session_id: Uuid,
    ) -> (ConnectionId, UnboundedReceiver<Delivery>) {
        let (tx, rx) = unbounded_channel();
        let connection_id = ConnectionId::new();

        let mut inbox = self.inner.inboxes.entry(participant_id).or_default();
        let flushed = inbox.len();
        for delivery in inbox.drain(..) {
            // The receiver is still in scope, send cannot fail.
            let _ = tx.send(delivery);
        }
        self.inner
            .connections
            .entry(participant_id)
            .or_default()
            .push(Connection {
                id: connection_id,
                session_id,
                sender: tx,
            });
        drop(inbox);
        self.inner
            .inboxes
            .remove_if(&participant_id, |_, queued| queued.is_empty());

        tracing::debug!(
            "Attached connection {:?} for participant {} in session {}, flushed {} queued deliveries",
            connection_id,
            participant_id,
            session_id,
            flushed
        );
        (connection_id, rx)
    }

    /// Remove one connection.
    ///
    /// Returns true when it was the participant's last connection for the
    /// session it was opened for.
    pub fn detach(&self, participant_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut closed_session = None;
        let mut session_still_attached = false;

        if let Some(mut connections) = self.inner.connections.get_mut(&participant_id) {
            if let Some(pos) = connections.iter().position(|c| c.id == connection_id) {
                let session_id = connections.remove(pos).session_id;
                session_still_attached = connections.iter().any(|c| c.session_id == session_id);
                closed_session = Some(session_id);
            }
        }
        self.inner
            .connections
            .remove_if(&participant_id, |_, connections| connections.is_empty());

        let last_for_session = closed_session.is_some() && !session_still_attached;
        tracing::debug!(
            "Detached connection {:?} for participant {} from session {:?}, last for session: {}",
            connection_id,
            participant_id,
            closed_session,
            last_for_session
        );
        last_for_session
    }

    pub fn is_online(&self, participant_id: Uuid) -> bool {
        self.inner
            .connections
            .get(&participant_id)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// Whether the participant has a live connection opened for the session.
    pub fn is_attached(&self, participant_id: Uuid, session_id: Uuid) -> bool {
        self.inner
            .connections
            .get(&participant_id)
            .map(|c| c.iter().any(|c| c.session_id == session_id))
            .unwrap_or(false)
    }

    pub fn pending_inbox(&self, participant_id: Uuid) -> usize {
        self.inner
            .inboxes
            .get(&participant_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Send to the live connections of a participant the delivery's topic is
    /// meant for: connections of that session, or all of them for the
    /// private queue.
    ///
    /// Connections whose receiver is gone are dropped on the way. Returns how
    /// many connections accepted the delivery.
    pub(crate) fn send_to_participant(&self, participant_id: Uuid, delivery: &Delivery) -> usize {
        let Some(mut connections) = self.inner.connections.get_mut(&participant_id) else {
            return 0;
        };

        let target = delivery.topic.session_id();
        let before = connections.len();
        let mut accepted = 0;
        connections.retain(|c| {
            if target.is_some_and(|session_id| session_id != c.session_id) {
                return true;
            }
            let alive = c.sender.send(delivery.clone()).is_ok();
            if alive {
                accepted += 1;
            }
            alive
        });
        let after = connections.len();
        drop(connections);

        if before != after {
            tracing::debug!(
                "Delivery to participant {}: {} dead connections cleaned up, {} active",
                participant_id,
                before - after,
                after
            );
            self.inner
                .connections
                .remove_if(&participant_id, |_, connections| connections.is_empty());
        }
        accepted
    }

    /// Deliver on a participant's private channel, queueing when offline.
    pub(crate) fn deliver_private(&self, participant_id: Uuid, delivery: Delivery) -> PrivateDelivery {
        let mut inbox = self.inner.inboxes.entry(participant_id).or_default();
        if self.send_to_participant(participant_id, &delivery) > 0 {
            drop(inbox);
            self.inner
                .inboxes
                .remove_if(&participant_id, |_, queued| queued.is_empty());
            return PrivateDelivery::Sent;
        }

        if inbox.len() >= self.inner.inbox_capacity {
            inbox.pop_front();
            tracing::warn!(
                "Inbox of participant {} full ({} entries), dropped oldest delivery",
                participant_id,
                self.inner.inbox_capacity
            );
        }
        inbox.push_back(delivery);
        PrivateDelivery::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InteractionMessage, OutboundMessage, Topic};

    fn delivery(session_id: Uuid) -> Delivery {
        Delivery::new(
            Topic::SessionInteractions(session_id),
            OutboundMessage::Interaction(InteractionMessage::typing(
                session_id,
                Uuid::new_v4(),
                true,
            )),
        )
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let registry = SessionRegistry::new(8);
        let session = Uuid::new_v4();
        let participant = Uuid::new_v4();

        assert!(registry.subscribe(session, participant));
        assert!(!registry.subscribe(session, participant));
        assert_eq!(registry.subscriber_count(session), 1);
        assert!(registry.is_subscribed(session, participant));
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry = SessionRegistry::new(8);
        assert!(!registry.unsubscribe(Uuid::new_v4(), Uuid::new_v4()));
        assert!(registry.live_sessions().is_empty());
    }

    #[test]
    fn test_participant_in_many_sessions() {
        let registry = SessionRegistry::new(8);
        let participant = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        registry.subscribe(first, participant);
        registry.subscribe(second, participant);

        let mut left = registry.disconnect(participant);
        left.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(left, expected);
        assert!(registry.live_sessions().is_empty());
    }

    #[test]
    fn test_empty_session_entries_removed() {
        let registry = SessionRegistry::new(8);
        let session = Uuid::new_v4();
        let participant = Uuid::new_v4();
        registry.subscribe(session, participant);
        registry.unsubscribe(session, participant);
        assert!(registry.list_subscribers(session).is_empty());
        assert!(registry.live_sessions().is_empty());
    }

    fn private(participant_id: Uuid, session_id: Uuid) -> Delivery {
        delivery(session_id).readdressed(Topic::ParticipantQueue(participant_id))
    }

    #[tokio::test]
    async fn test_dead_connection_removed_on_send() {
        let registry = SessionRegistry::new(8);
        let participant = Uuid::new_v4();
        let session = Uuid::new_v4();
        let (_, rx_dead) = registry.attach(participant, session);
        let (_, mut rx_live) = registry.attach(participant, session);
        drop(rx_dead);

        let d = delivery(session);
        assert_eq!(registry.send_to_participant(participant, &d), 1);
        assert!(rx_live.recv().await.is_some());
        assert!(registry.is_online(participant));
    }

    #[test]
    fn test_topic_delivery_stays_on_its_session() {
        let registry = SessionRegistry::new(8);
        let participant = Uuid::new_v4();
        let session_x = Uuid::new_v4();
        let session_y = Uuid::new_v4();
        let (_, mut rx_x) = registry.attach(participant, session_x);
        let (_, mut rx_y) = registry.attach(participant, session_y);

        assert_eq!(registry.send_to_participant(participant, &delivery(session_x)), 1);
        assert_eq!(
            rx_x.try_recv().unwrap().topic,
            Topic::SessionInteractions(session_x)
        );
        assert!(rx_y.try_recv().is_err());

        // Private queue reaches every connection.
        assert_eq!(
            registry.deliver_private(participant, private(participant, session_x)),
            PrivateDelivery::Sent
        );
        assert!(rx_x.try_recv().is_ok());
        assert!(rx_y.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_private_delivery_queued_then_flushed() {
        let registry = SessionRegistry::new(8);
        let participant = Uuid::new_v4();
        let session = Uuid::new_v4();

        assert_eq!(
            registry.deliver_private(participant, private(participant, session)),
            PrivateDelivery::Queued
        );
        assert_eq!(registry.pending_inbox(participant), 1);

        let (_, mut rx) = registry.attach(participant, Uuid::new_v4());
        assert_eq!(registry.pending_inbox(participant), 0);
        let flushed = rx.recv().await.unwrap();
        assert_eq!(flushed.topic, Topic::ParticipantQueue(participant));

        assert_eq!(
            registry.deliver_private(participant, private(participant, session)),
            PrivateDelivery::Sent
        );
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_inbox_drops_oldest_when_full() {
        let registry = SessionRegistry::new(2);
        let participant = Uuid::new_v4();
        let sessions: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for session in &sessions {
            registry.deliver_private(participant, private(participant, *session));
        }
        assert_eq!(registry.pending_inbox(participant), 2);

        let (_, mut rx) = registry.attach(participant, sessions[0]);
        let first = rx.try_recv().unwrap();
        match first.message.as_ref() {
            OutboundMessage::Interaction(m) => assert_eq!(m.session_id, sessions[1]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_detach_reports_last_connection_per_session() {
        let registry = SessionRegistry::new(8);
        let participant = Uuid::new_v4();
        let session_x = Uuid::new_v4();
        let session_y = Uuid::new_v4();
        let (first_x, _rx1) = registry.attach(participant, session_x);
        let (second_x, _rx2) = registry.attach(participant, session_x);
        let (only_y, _rx3) = registry.attach(participant, session_y);

        assert!(!registry.detach(participant, first_x));
        assert!(registry.is_attached(participant, session_x));
        assert!(registry.detach(participant, second_x));
        assert!(!registry.is_attached(participant, session_x));
        assert!(registry.is_online(participant));

        assert!(registry.detach(participant, only_y));
        assert!(!registry.is_online(participant));
        // Unknown connection
        assert!(!registry.detach(participant, only_y));
    }
}
