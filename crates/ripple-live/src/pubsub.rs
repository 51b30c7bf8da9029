use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub type Subscriber = Arc<dyn Fn(&Value) + Send + Sync>;

/// Topic-based broadcast hub shared by every session of a server.
///
/// There is no process-wide instance; the hub is constructed by the embedding
/// application and handed to each session explicitly. Subscriptions are keyed
/// by a token so a session can release exactly the ones it owns.
#[derive(Default)]
pub struct PubSub {
    topics: RwLock<HashMap<String, HashMap<u64, Subscriber>>>,
    next_token: AtomicU64,
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Registers `subscriber` on `topic` and returns the token that releases
    /// the subscription.
    pub fn subscribe(&self, topic: &str, subscriber: Subscriber) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut topics) = self.topics.write() {
            topics
                .entry(topic.to_string())
                .or_default()
                .insert(token, subscriber);
        }
        token
    }

    pub fn unsubscribe(&self, topic: &str, token: u64) {
        if let Ok(mut topics) = self.topics.write() {
            if let Some(subscribers) = topics.get_mut(topic) {
                subscribers.remove(&token);
                if subscribers.is_empty() {
                    topics.remove(topic);
                }
            }
        }
    }

    /// Delivers `message` to every current subscriber of `topic`, including
    /// the broadcaster's own subscriptions.
    pub fn broadcast(&self, topic: &str, message: &Value) {
        let subscribers: Vec<Subscriber> = match self.topics.read() {
            Ok(topics) => topics
                .get(topic)
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for subscriber in subscribers {
            subscriber(message);
        }
    }

    /// Drops every subscription on every topic. Used when the embedding
    /// process shuts down so no callback outlives its server.
    pub fn shutdown(&self) {
        if let Ok(mut topics) = self.topics.write() {
            topics.clear();
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .ok()
            .and_then(|topics| topics.get(topic).map(|subs| subs.len()))
            .unwrap_or(0)
    }
}
