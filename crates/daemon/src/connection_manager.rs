//! Registry of connected WebSocket sessions and fan-out of outbound messages.
//!
//! The registry is owned by the acquisition loop, so it is never shared or
//! locked. Each session has its own bounded queue; a push never waits, and a
//! session whose queue is closed or persistently overflowing is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use eeg_types::{Mode, ServerMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::outbound::{Delivery, OutboundMessage, OutboundSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which sessions a broadcast is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Sessions that sent `subscribe`
    Subscribed,
    /// Every registered session
    Everyone,
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Disconnected,
    QueueClosed,
    Stalled,
    Shutdown,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemovalReason::Disconnected => "disconnected",
            RemovalReason::QueueClosed => "queue closed",
            RemovalReason::Stalled => "stalled",
            RemovalReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// A connected client.
pub struct Subscriber {
    outbound: OutboundSender,
    subscribed: bool,
    /// Last mode this connection asked for. The session mode itself is shared.
    requested_mode: Mode,
    consecutive_overflows: u32,
}

/// Summary of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: Vec<(SubscriberId, RemovalReason)>,
}

pub struct SessionRegistry {
    subscribers: HashMap<SubscriberId, Subscriber>,
    max_consecutive_overflows: u32,
}

impl SessionRegistry {
    pub fn new(max_consecutive_overflows: u32) -> Self {
        Self {
            subscribers: HashMap::new(),
            max_consecutive_overflows,
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn subscribed_count(&self) -> usize {
        self.subscribers.values().filter(|s| s.subscribed).count()
    }

    pub fn get(&self, id: &SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(id)
    }

    /// Adds a connection and sends it a `hello` with the current mode.
    ///
    /// Returns false if the connection was already gone before the hello
    /// could be queued; it is not registered in that case.
    pub fn register(&mut self, id: SubscriberId, outbound: OutboundSender, mode: Mode) -> bool {
        let hello = match encode(&ServerMessage::Hello { mode }) {
            Some(hello) => hello,
            None => return false,
        };
        if outbound.push(hello).is_err() {
            debug!(subscriber_id = %id, "Connection closed before hello");
            return false;
        }
        self.subscribers.insert(
            id,
            Subscriber {
                outbound,
                subscribed: false,
                requested_mode: mode,
                consecutive_overflows: 0,
            },
        );
        info!(subscriber_id = %id, sessions = self.subscribers.len(), "Client connected");
        true
    }

    /// Removes a connection and ends its stream. Idempotent.
    ///
    /// A session that failed delivery is hung up so its socket is dropped
    /// even if a send is blocked on the peer; otherwise the queue is closed
    /// and flushed.
    pub fn unregister(&mut self, id: &SubscriberId, reason: RemovalReason) -> bool {
        match self.subscribers.remove(id) {
            Some(subscriber) => {
                match reason {
                    RemovalReason::Stalled | RemovalReason::QueueClosed => {
                        subscriber.outbound.hang_up()
                    }
                    RemovalReason::Disconnected | RemovalReason::Shutdown => {
                        subscriber.outbound.close()
                    }
                }
                info!(
                    subscriber_id = %id,
                    %reason,
                    last_requested_mode = %subscriber.requested_mode,
                    sessions = self.subscribers.len(),
                    "Client removed"
                );
                true
            }
            None => false,
        }
    }

    /// Opts a connection in to the engagement stream. Idempotent.
    pub fn subscribe(&mut self, id: &SubscriberId) -> bool {
        match self.subscribers.get_mut(id) {
            Some(subscriber) => {
                if !subscriber.subscribed {
                    subscriber.subscribed = true;
                    info!(subscriber_id = %id, "Client subscribed to engagement stream");
                }
                true
            }
            None => false,
        }
    }

    pub fn note_requested_mode(&mut self, id: &SubscriberId, mode: Mode) {
        if let Some(subscriber) = self.subscribers.get_mut(id) {
            subscriber.requested_mode = mode;
        }
    }

    /// Serializes `message` once and queues it for every session in
    /// `audience`. Sessions that fail are removed before returning.
    pub fn broadcast(&mut self, message: &ServerMessage, audience: Audience) -> BroadcastReport {
        match encode(message) {
            Some(encoded) => self.broadcast_encoded(encoded, audience),
            None => BroadcastReport::default(),
        }
    }

    pub fn broadcast_encoded(
        &mut self,
        message: OutboundMessage,
        audience: Audience,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (id, subscriber) in self.subscribers.iter_mut() {
            if audience == Audience::Subscribed && !subscriber.subscribed {
                continue;
            }
            match subscriber.outbound.push(message.clone()) {
                Ok(Delivery::Queued) => {
                    subscriber.consecutive_overflows = 0;
                    report.delivered += 1;
                }
                Ok(Delivery::DroppedOldest) => {
                    subscriber.consecutive_overflows += 1;
                    report.delivered += 1;
                    if subscriber.consecutive_overflows > self.max_consecutive_overflows {
                        warn!(
                            subscriber_id = %id,
                            overflows = subscriber.consecutive_overflows,
                            "Client is not draining its queue; disconnecting"
                        );
                        report.removed.push((*id, RemovalReason::Stalled));
                    } else {
                        debug!(subscriber_id = %id, "Outbound queue full, dropped oldest message");
                    }
                }
                Err(_) => {
                    warn!(subscriber_id = %id, "Failed to send message, client disconnected");
                    report.removed.push((*id, RemovalReason::QueueClosed));
                }
            }
        }

        for (id, reason) in &report.removed {
            self.unregister(id, *reason);
        }
        report
    }

    /// Closes every session. Their writer tasks flush what is queued and
    /// close the socket.
    pub fn close_all(&mut self) {
        let ids: Vec<SubscriberId> = self.subscribers.keys().copied().collect();
        for id in ids {
            self.unregister(&id, RemovalReason::Shutdown);
        }
    }
}

fn encode(message: &ServerMessage) -> Option<OutboundMessage> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{self, OutboundReceiver};
    use eeg_types::EngagementPacket;

    fn connect(registry: &mut SessionRegistry, capacity: usize) -> (SubscriberId, OutboundReceiver) {
        let id = SubscriberId::new();
        let (tx, rx) = outbound::channel(capacity);
        assert!(registry.register(id, tx, Mode::Normal));
        (id, rx)
    }

    fn packet() -> ServerMessage {
        ServerMessage::Engagement(EngagementPacket {
            ts: 0,
            fs: 125,
            e: 1.0,
            e_norm: 0.5,
            alpha: 1.0,
            theta: 1.0,
            beta: 2.0,
            e_min: Some(1.0),
            e_max: Some(1.0),
            mode: Mode::Normal,
        })
    }

    fn parse(raw: &str) -> ServerMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn register_sends_hello() {
        let mut registry = SessionRegistry::new(4);
        let (_id, mut rx) = connect(&mut registry, 4);
        let hello = rx.try_recv().unwrap();
        assert_eq!(parse(&hello), ServerMessage::Hello { mode: Mode::Normal });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_skips_connections_already_gone() {
        let mut registry = SessionRegistry::new(4);
        let (tx, rx) = outbound::channel(4);
        drop(rx);
        assert!(!registry.register(SubscriberId::new(), tx, Mode::Normal));
        assert!(registry.is_empty());
    }

    #[test]
    fn engagement_only_reaches_subscribed_sessions() {
        let mut registry = SessionRegistry::new(4);
        let (a, mut rx_a) = connect(&mut registry, 4);
        let (_b, mut rx_b) = connect(&mut registry, 4);
        rx_a.try_recv();
        rx_b.try_recv();

        assert!(registry.subscribe(&a));
        assert!(registry.subscribe(&a));
        assert_eq!(registry.subscribed_count(), 1);

        let report = registry.broadcast(&packet(), Audience::Subscribed);
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_some());
        assert!(rx_b.try_recv().is_none());

        let report = registry.broadcast(
            &ServerMessage::Calibration { mode: Mode::Relax, e_min: None, e_max: None },
            Audience::Everyone,
        );
        assert_eq!(report.delivered, 2);
        assert!(rx_b.try_recv().is_some());
    }

    #[test]
    fn one_encoding_is_shared_by_every_subscriber() {
        let mut registry = SessionRegistry::new(4);
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (id, mut rx) = connect(&mut registry, 4);
            rx.try_recv();
            registry.subscribe(&id);
            receivers.push(rx);
        }

        registry.broadcast(&packet(), Audience::Subscribed);
        let first = receivers[0].try_recv().unwrap();
        for rx in &mut receivers[1..] {
            assert!(Arc::ptr_eq(&first, &rx.try_recv().unwrap()));
        }
    }

    #[test]
    fn closed_connection_is_removed_and_others_still_receive() {
        let mut registry = SessionRegistry::new(4);
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let (id, mut rx) = connect(&mut registry, 4);
            rx.try_recv();
            registry.subscribe(&id);
            ids.push(id);
            receivers.push(rx);
        }
        let closed = receivers.remove(1);
        drop(closed);

        let report = registry.broadcast(&packet(), Audience::Subscribed);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.removed, vec![(ids[1], RemovalReason::QueueClosed)]);
        assert_eq!(registry.len(), 3);
        for rx in &mut receivers {
            assert!(matches!(parse(&rx.try_recv().unwrap()), ServerMessage::Engagement(_)));
        }
    }

    #[test]
    fn stalled_connection_is_disconnected_after_repeated_overflow() {
        let mut registry = SessionRegistry::new(2);
        let (id, rx) = connect(&mut registry, 1);
        let hangup = rx.hangup();
        registry.subscribe(&id);

        // hello fills the single slot; every broadcast now overflows
        for _ in 0..2 {
            let report = registry.broadcast(&packet(), Audience::Subscribed);
            assert!(report.removed.is_empty());
        }
        let report = registry.broadcast(&packet(), Audience::Subscribed);
        assert_eq!(report.removed, vec![(id, RemovalReason::Stalled)]);
        assert!(registry.is_empty());
        assert!(hangup.is_cancelled());
    }

    #[test]
    fn draining_resets_the_overflow_count() {
        let mut registry = SessionRegistry::new(1);
        let (id, mut rx) = connect(&mut registry, 1);
        registry.subscribe(&id);
        for _ in 0..10 {
            registry.broadcast(&packet(), Audience::Subscribed);
            rx.try_recv();
            registry.broadcast(&packet(), Audience::Subscribed);
            rx.try_recv();
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let mut registry = SessionRegistry::new(4);
        let (_a, mut rx_a) = connect(&mut registry, 4);
        let (_b, mut rx_b) = connect(&mut registry, 4);
        registry.close_all();
        assert!(registry.is_empty());
        assert!(!rx_a.hangup().is_cancelled());
        assert!(rx_a.recv().await.is_some());
        assert_eq!(rx_a.recv().await, None);
        assert!(rx_b.recv().await.is_some());
        assert_eq!(rx_b.recv().await, None);
    }
}
