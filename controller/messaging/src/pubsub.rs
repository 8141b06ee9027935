//! Topic-keyed publish/subscribe buses with bounded, drop-oldest buffers.

use ahash::AHashMap;
use mesh_controller_core::PubSubMessage;
use parking_lot::{Mutex, RwLock};
use prometheus_client::metrics::counter::Counter;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

/// Subscription buffers hold at most this many undelivered messages.
pub const DEFAULT_CAPACITY: usize = 10 * 1024;

/// A bus fans each publication out to every subscription of its topic.
#[derive(Debug)]
pub struct PubSub {
    name: &'static str,
    capacity: usize,
    next_id: AtomicU64,
    topics: RwLock<AHashMap<String, Vec<Arc<Shared>>>>,
    dropped: Counter,
}

/// The receiving end of a subscription to one or more topics.
#[derive(Debug)]
pub struct Subscription {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    topics: Vec<String>,
    capacity: usize,
    buffer: Mutex<VecDeque<PubSubMessage>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

// === impl PubSub ===

impl PubSub {
    pub fn new(name: &'static str, capacity: usize, dropped: Counter) -> Self {
        Self {
            name,
            capacity,
            next_id: AtomicU64::new(0),
            topics: RwLock::default(),
            dropped,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe<S: AsRef<str>>(&self, topics: &[S]) -> Subscription {
        let topics = topics
            .iter()
            .map(|t| t.as_ref().to_string())
            .collect::<Vec<_>>();
        let shared = Arc::new(Shared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            topics: topics.clone(),
            capacity: self.capacity,
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        let mut index = self.topics.write();
        for topic in topics {
            let subs = index.entry(topic).or_default();
            if !subs.iter().any(|s| Arc::ptr_eq(s, &shared)) {
                subs.push(shared.clone());
            }
        }
        tracing::debug!(bus = self.name, subscriber = shared.id, topics = ?shared.topics, "Subscribed");

        Subscription { shared }
    }

    /// Delivers `msg` to each subscriber of `topic`. Never blocks.
    pub fn publish(&self, topic: &str, msg: &PubSubMessage) {
        let index = self.topics.read();
        let Some(subs) = index.get(topic) else {
            return;
        };
        for sub in subs {
            if sub.push(msg.clone()) {
                self.dropped.inc();
                tracing::warn!(
                    bus = self.name,
                    %topic,
                    subscriber = sub.id,
                    "Subscriber is not keeping up; dropped its oldest message"
                );
            }
        }
    }

    /// Removes the subscription and closes it. Buffered messages are drained
    /// by a background task.
    pub fn unsubscribe(&self, sub: Subscription) {
        {
            let mut index = self.topics.write();
            for topic in &sub.shared.topics {
                if let Some(subs) = index.get_mut(topic) {
                    subs.retain(|s| !Arc::ptr_eq(s, &sub.shared));
                    if subs.is_empty() {
                        index.remove(topic);
                    }
                }
            }
        }
        sub.shared.close();
        tracing::debug!(bus = self.name, subscriber = sub.shared.id, "Unsubscribed");

        tokio::spawn(async move {
            let mut sub = sub;
            while sub.recv().await.is_some() {}
        });
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }
}

// === impl Subscription ===

impl Subscription {
    /// Receives the next message, or `None` once the subscription is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(msg) = self.shared.buffer.lock().pop_front() {
                return Some(msg);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&mut self) -> Option<PubSubMessage> {
        self.shared.buffer.lock().pop_front()
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of messages dropped because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

// === impl Shared ===

impl Shared {
    /// Appends `msg`, evicting the oldest message when full. Returns true if
    /// a message was evicted.
    fn push(&self, msg: PubSubMessage) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut buffer = self.buffer.lock();
        let evicted = if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        buffer.push_back(msg);
        drop(buffer);
        self.notify.notify_one();
        evicted
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}
