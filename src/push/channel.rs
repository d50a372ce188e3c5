//! In-process push broker
//!
//! Topics are `/`-separated levels. Subscription filters use MQTT wildcards:
//! `+` matches exactly one level, a trailing `#` matches any remaining levels
//! (zero included).

use crate::error::{PushError, PushResult};
use crate::push::{PushConnector, PushMessage, Subscription};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

struct Subscriber {
    id: u64,
    filter: String,
    sender: Sender<PushMessage>,
}

#[derive(Default)]
struct BrokerState {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    refuse_connects: AtomicU32,
}

impl BrokerState {
    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// Broker living inside the process, cloneable across threads
#[derive(Clone, Default)]
pub struct ChannelBroker {
    state: Arc<BrokerState>,
}

impl ChannelBroker {
    /// Create a broker without subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message to every matching subscriber; returns the delivery count
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let message = PushMessage::new(topic, payload);
        let mut subscribers = self.state.subscribers.lock();

        // Subscribers whose receiving side is gone are pruned here
        subscribers.retain(|s| !(topic_matches(&s.filter, topic) && s.sender.send(message.clone()).is_err()));

        let delivered = subscribers
            .iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .count();
        trace!(topic = topic, delivered = delivered, "Published");
        delivered
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().len()
    }

    /// Drop every open session; their next read reports a disconnect
    pub fn disconnect_all(&self) {
        self.state.subscribers.lock().clear();
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_connects(&self, count: u32) {
        self.state.refuse_connects.store(count, Ordering::SeqCst);
    }
}

impl PushConnector for ChannelBroker {
    fn broker(&self) -> String {
        "channel://local".to_string()
    }

    fn subscribe(&self, topic: &str, client_id: &str) -> PushResult<Box<dyn Subscription>> {
        let refused = self
            .state
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(PushError::Connect {
                broker: self.broker(),
                reason: "connection refused".into(),
            });
        }

        let (sender, receiver) = unbounded();
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.subscribers.lock().push(Subscriber {
            id,
            filter: topic.to_string(),
            sender,
        });
        trace!(client = client_id, topic = topic, "Subscribed");

        Ok(Box::new(ChannelSubscription {
            id,
            receiver,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session on a [`ChannelBroker`]
pub struct ChannelSubscription {
    id: u64,
    receiver: Receiver<PushMessage>,
    state: Arc<BrokerState>,
}

impl Subscription for ChannelSubscription {
    fn next_message(&mut self, timeout: Duration) -> PushResult<Option<PushMessage>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PushError::Disconnected {
                reason: "broker closed the session".into(),
            }),
        }
    }

    fn close(&mut self) -> PushResult<()> {
        self.state.remove(self.id);
        Ok(())
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.state.remove(self.id);
    }
}

/// Match a topic against a subscription filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("x/#", "x/y1"));
        assert!(topic_matches("x/#", "x"));
        assert!(topic_matches("x/#", "x/a/b"));
        assert!(topic_matches("x/+/c", "x/b/c"));
        assert!(!topic_matches("x/+/c", "x/b/d"));
        assert!(!topic_matches("x/+", "x/a/b"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/bc"));
    }

    #[test]
    fn test_publish_and_receive() {
        let broker = ChannelBroker::new();
        let mut sub = broker.subscribe("x/#", "test").unwrap();

        assert_eq!(broker.publish("x/y", "hello"), 1);
        assert_eq!(broker.publish("other", "ignored"), 0);

        let msg = sub.next_message(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(msg.topic, "x/y");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(sub.next_message(Duration::from_millis(10)).unwrap(), None);

        sub.close().unwrap();
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_disconnect_and_refusal() {
        let broker = ChannelBroker::new();
        let mut sub = broker.subscribe("x/#", "test").unwrap();

        broker.disconnect_all();
        assert!(matches!(
            sub.next_message(Duration::from_millis(10)),
            Err(PushError::Disconnected { .. })
        ));

        broker.refuse_connects(1);
        assert!(broker.subscribe("x/#", "test").is_err());
        assert!(broker.subscribe("x/#", "test").is_ok());
    }
}
