//! Topic-based pub/sub event bus, built on `flume` channels the way
//! `EventBus::publish` prunes its subscriber list on every `at-bridge`
//! fan-out call.
//!
//! Each subscriber gets its own bounded `flume` channel keyed by the topic it
//! subscribed to (`board:<id>`, `user:<id>`, or `global`). A slow subscriber
//! never blocks a publisher: once a subscriber's channel is at capacity, the
//! oldest queued event is dropped to make room for the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cq_core::types::{Event, EventPublisher};

struct Subscriber {
    id: u64,
    tx: flume::Sender<Event>,
    /// A receiver clone kept only so `publish` can pop the oldest queued
    /// event off a full channel; the subscriber's own `Subscription` holds
    /// the receiver it actually consumes from.
    drain: flume::Receiver<Event>,
}

/// A handle returned by [`EventBus::subscribe`]. Dropping it unregisters the
/// subscriber from its topic.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: flume::Receiver<Event>,
    bus: EventBus,
}

impl Subscription {
    /// Wait for and return the next event on this subscription's topic.
    ///
    /// Returns `None` only if the bus itself is gone, which doesn't happen in
    /// practice since `Subscription` holds a clone of it.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv_async().await.ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.topic, self.id);
    }
}

#[derive(Clone)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
    default_capacity: usize,
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            default_capacity,
        }
    }

    /// Subscribe to a topic (`"global"`, `board_topic(board_id)`, or a
    /// user-scoped topic string). Uses the bus's configured default capacity.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(self.default_capacity.max(1));

        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        topics.entry(topic.clone()).or_default().push(Subscriber {
            id,
            tx,
            drain: rx.clone(),
        });

        Subscription {
            topic,
            id,
            rx,
            bus: self.clone(),
        }
    }

    /// Publish an event to every subscriber of `topic`. Subscribers whose
    /// channel is full have their oldest event dropped to make room;
    /// subscribers whose receiver has disconnected are pruned, mirroring the
    /// teacher's `senders.retain(|tx| tx.send(msg.clone()).is_ok())` pattern.
    pub fn publish(&self, topic: &str, event: Event) {
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        let Some(subs) = topics.get_mut(topic) else {
            return;
        };
        subs.retain(|sub| {
            let mut pending = event.clone();
            loop {
                match sub.tx.try_send(pending) {
                    Ok(()) => return true,
                    Err(flume::TrySendError::Full(back)) => {
                        let _ = sub.drain.try_recv();
                        pending = back;
                    }
                    Err(flume::TrySendError::Disconnected(_)) => return false,
                }
            }
        });
        let now_empty = subs.is_empty();
        if now_empty {
            topics.remove(topic);
        }
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Number of active subscribers across all topics, for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        let topics = self.topics.lock().expect("event bus lock poisoned");
        topics.values().map(|v| v.len()).sum()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, topic: &str, event: Event) {
        EventBus::publish(self, topic, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_core::types::Event;
    use uuid::Uuid;

    fn sample_event() -> Event {
        Event::WorkerOnline {
            worker_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_topic_subscriber() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe("global");
        bus.publish("global", sample_event());
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn does_not_deliver_to_other_topics() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe("board:a");
        bus.publish("board:b", sample_event());

        // give any spurious wake a chance, then confirm nothing arrived.
        tokio::select! {
            _ = sub.recv() => panic!("received event meant for a different topic"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
    }

    #[tokio::test]
    async fn drops_oldest_when_queue_full() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe("global");

        let w1 = Uuid::new_v4();
        let w2 = Uuid::new_v4();
        let w3 = Uuid::new_v4();
        bus.publish("global", Event::WorkerOnline { worker_id: w1 });
        bus.publish("global", Event::WorkerOnline { worker_id: w2 });
        bus.publish("global", Event::WorkerOnline { worker_id: w3 });

        let first = sub.recv().await.unwrap();
        match first {
            Event::WorkerOnline { worker_id } => assert_eq!(worker_id, w2),
            _ => panic!("unexpected event"),
        }
        let second = sub.recv().await.unwrap();
        match second {
            Event::WorkerOnline { worker_id } => assert_eq!(worker_id, w3),
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_on_drop_removes_subscriber() {
        let bus = EventBus::new(10);
        let sub = bus.subscribe("global");
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
