//! Message bus implementation
//!
//! Every process owns one unbounded mailbox, so `send` never blocks. A single
//! channel per recipient keeps delivery FIFO per sender→recipient pair; no
//! ordering holds across different senders. Messages are never duplicated.
//! Once a recipient is marked dead, anything addressed to it is dropped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use coordsim_core::{Message, ProcessId, Recipient};

struct Endpoint {
    tx: mpsc::UnboundedSender<Message>,
    alive: AtomicBool,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

struct BusInner {
    endpoints: BTreeMap<ProcessId, Endpoint>,
    counters: Counters,
}

/// Bus statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages handed to `send`
    pub sent: u64,
    /// Mailbox deliveries (a broadcast counts once per recipient)
    pub delivered: u64,
    /// Deliveries discarded because the recipient was dead or unknown
    pub dropped: u64,
}

impl BusStats {
    pub fn loss_rate(&self) -> f64 {
        let attempts = self.delivered + self.dropped;
        if attempts == 0 {
            0.0
        } else {
            self.dropped as f64 / attempts as f64
        }
    }
}

/// In-process message bus shared by all processes
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus with one mailbox per id.
    ///
    /// Returns the bus and the mailboxes, in ascending id order.
    pub fn new(ids: impl IntoIterator<Item = ProcessId>) -> (Self, Vec<Mailbox>) {
        let mut endpoints = BTreeMap::new();
        let mut mailboxes = Vec::new();

        for id in ids {
            if endpoints.contains_key(&id) {
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            endpoints.insert(
                id,
                Endpoint {
                    tx,
                    alive: AtomicBool::new(true),
                },
            );
            mailboxes.push(Mailbox { owner: id, rx });
        }
        mailboxes.sort_by_key(|m| m.owner);

        let bus = MessageBus {
            inner: Arc::new(BusInner {
                endpoints,
                counters: Counters::default(),
            }),
        };
        (bus, mailboxes)
    }

    /// Enqueue a message and return immediately.
    ///
    /// Returns the number of mailboxes the message reached; zero means it
    /// was lost to a dead or unknown recipient.
    pub fn send(&self, message: Message) -> usize {
        let counters = &self.inner.counters;
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match message.recipient() {
            Recipient::One(to) => usize::from(self.deliver(to, message)),
            Recipient::Broadcast => {
                let sender = message.sender();
                let targets: Vec<ProcessId> = self
                    .inner
                    .endpoints
                    .keys()
                    .copied()
                    .filter(|id| *id != sender)
                    .collect();
                targets
                    .into_iter()
                    .filter(|to| self.deliver(*to, message.clone()))
                    .count()
            }
        }
    }

    fn deliver(&self, to: ProcessId, message: Message) -> bool {
        let counters = &self.inner.counters;
        let delivered = match self.inner.endpoints.get(&to) {
            Some(endpoint) if endpoint.alive.load(Ordering::Acquire) => {
                endpoint.tx.send(message).is_ok()
            }
            Some(_) => {
                tracing::trace!(%to, kind = ?message.kind(), "dropping message to dead process");
                false
            }
            None => {
                tracing::trace!(%to, "dropping message to unknown process");
                false
            }
        };

        if delivered {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    /// Stop delivering to `id`. Returns false if it was already dead or unknown.
    pub fn mark_dead(&self, id: ProcessId) -> bool {
        self.inner
            .endpoints
            .get(&id)
            .map(|e| e.alive.swap(false, Ordering::AcqRel))
            .unwrap_or(false)
    }

    pub fn is_alive(&self, id: ProcessId) -> bool {
        self.inner
            .endpoints
            .get(&id)
            .map(|e| e.alive.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// All registered ids, ascending
    pub fn members(&self) -> Vec<ProcessId> {
        self.inner.endpoints.keys().copied().collect()
    }

    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        BusStats {
            sent: counters.sent.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Result of a bounded receive
#[derive(Debug, PartialEq)]
pub enum Received {
    Message(Message),
    Timeout,
    /// The bus is gone; nothing will arrive again
    Closed,
}

impl Received {
    pub fn into_message(self) -> Option<Message> {
        match self {
            Received::Message(m) => Some(m),
            Received::Timeout | Received::Closed => None,
        }
    }
}

/// Receiving half owned by exactly one process
pub struct Mailbox {
    owner: ProcessId,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    /// Wait up to `limit` for the next message
    pub async fn receive(&mut self, limit: Duration) -> Received {
        match timeout(limit, self.rx.recv()).await {
            Ok(Some(message)) => Received::Message(message),
            Ok(None) => Received::Closed,
            Err(_) => Received::Timeout,
        }
    }

    /// Wait until `deadline` for the next message
    pub async fn receive_until(&mut self, deadline: Instant) -> Received {
        self.receive(deadline.saturating_duration_since(Instant::now()))
            .await
    }

    /// Wait without bound; cancel-safe, for use inside `select!`
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued
    pub fn try_receive(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Take everything already queued
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_receive()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u32) -> Vec<ProcessId> {
        (1..=n).map(ProcessId::new).collect()
    }

    #[tokio::test]
    async fn test_unicast_delivery() {
        let (bus, mut mailboxes) = MessageBus::new(ids(3));
        let delivered = bus.send(Message::time_request(ProcessId(1), ProcessId(2), 1));
        assert_eq!(delivered, 1);

        let received = mailboxes[1].receive(Duration::from_millis(100)).await;
        let message = received.into_message().unwrap();
        assert_eq!(message.sender(), ProcessId(1));
        assert_eq!(mailboxes[1].owner(), ProcessId(2));
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let (_bus, mut mailboxes) = MessageBus::new(ids(2));
        let received = mailboxes[0].receive(Duration::from_millis(20)).await;
        assert_eq!(received, Received::Timeout);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (bus, mut mailboxes) = MessageBus::new(ids(4));
        let delivered = bus.send(Message::coordinator_broadcast(ProcessId(2), ProcessId(4), 1));
        assert_eq!(delivered, 3);

        assert!(mailboxes[1].try_receive().is_none());
        for i in [0, 2, 3] {
            assert!(mailboxes[i].try_receive().is_some());
        }
    }

    #[tokio::test]
    async fn test_dead_recipient_drops_silently() {
        let (bus, mut mailboxes) = MessageBus::new(ids(3));
        assert!(bus.mark_dead(ProcessId(3)));
        assert!(!bus.mark_dead(ProcessId(3)));
        assert!(!bus.is_alive(ProcessId(3)));

        assert_eq!(bus.send(Message::ack(ProcessId(1), ProcessId(3), 1)), 0);
        assert_eq!(
            bus.send(Message::coordinator_broadcast(ProcessId(1), ProcessId(2), 1)),
            1
        );
        assert!(mailboxes[2].try_receive().is_none());

        let stats = bus.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 2);
    }

    #[tokio::test]
    async fn test_fifo_per_pair() {
        let (bus, mut mailboxes) = MessageBus::new(ids(2));
        for round in 0..50 {
            bus.send(Message::ack(ProcessId(1), ProcessId(2), round));
        }

        let rounds: Vec<bool> = mailboxes[1]
            .drain()
            .iter()
            .enumerate()
            .map(|(i, m)| m.acknowledges(i as u64))
            .collect();
        assert_eq!(rounds.len(), 50);
        assert!(rounds.into_iter().all(|ok| ok));
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let (bus, _mailboxes) = MessageBus::new(ids(2));
        assert_eq!(bus.send(Message::ack(ProcessId(1), ProcessId(9), 0)), 0);
        assert!(!bus.is_alive(ProcessId(9)));
        assert_eq!(bus.members(), ids(2));
    }
}
