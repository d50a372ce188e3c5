//! Push acquisition
//!
//! Some sources announce new files instead of exposing a tree that can be
//! polled. The [`PushAdapter`] subscribes to a topic derived from the listing
//! root, collects messages for a bounded wall-clock window and maps each one
//! onto a [`RawEntry`] with its metadata already known. The collected entries
//! are then listed through the normal scheduler pipeline via a
//! [`SnapshotEnumerator`].
//!
//! Transports implement [`PushConnector`] / [`Subscription`]:
//! - [`channel::ChannelBroker`]: in-process broker with MQTT-style wildcards
//! - `redis::RedisConnector` (feature `redis`): Redis pub/sub

pub mod channel;
#[cfg(feature = "redis")]
pub mod redis;
pub mod rule;

pub use channel::ChannelBroker;
pub use rule::{FieldRules, Template};

use crate::error::{EnumResult, PushError, PushResult, SetupError};
use crate::source::{Metadata, RawEntry, ResourceEnumerator};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default collection window
pub const DEFAULT_WAIT: Duration = Duration::from_secs(60);

/// Default maximum number of messages per window
pub const DEFAULT_MAX_MESSAGES: usize = 1_000_000;

/// Default number of connection attempts
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Longest single wait on the subscription, so a stop request is seen promptly
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// Topic or channel the message was published on
    pub topic: String,

    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl PushMessage {
    /// Build a message
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// An open subscription
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next message
    ///
    /// `Ok(None)` when nothing arrived in time, `Err` when the session dropped.
    fn next_message(&mut self, timeout: Duration) -> PushResult<Option<PushMessage>>;

    /// Unsubscribe and release the session
    fn close(&mut self) -> PushResult<()>;
}

/// Factory for subscriptions on one broker
pub trait PushConnector: Send + Sync {
    /// Broker address for logs and errors
    fn broker(&self) -> String;

    /// Open a session and subscribe to `topic`
    fn subscribe(&self, topic: &str, client_id: &str) -> PushResult<Box<dyn Subscription>>;
}

/// Connection retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Total connection attempts, at least one
    pub attempts: u32,

    /// Wait before the second attempt; doubled after each failure
    pub initial_backoff: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl ConnectPolicy {
    /// Wait before attempt `attempt` (1-based, the first attempt never waits)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.initial_backoff.saturating_mul(1 << shift)
    }

    /// Subscribe, retrying with exponential backoff
    pub fn connect(
        &self,
        connector: &dyn PushConnector,
        topic: &str,
        client_id: &str,
    ) -> PushResult<Box<dyn Subscription>> {
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let wait = self.backoff(attempt);
            if !wait.is_zero() {
                debug!(attempt = attempt, backoff_ms = wait.as_millis() as u64, "Retrying push connection");
                thread::sleep(wait);
            }

            match connector.subscribe(topic, client_id) {
                Ok(subscription) => return Ok(subscription),
                Err(e) => {
                    warn!(
                        broker = %connector.broker(),
                        attempt = attempt,
                        error = %e,
                        "Push connection attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PushError::Connect {
            broker: connector.broker(),
            reason: "no connection attempt made".into(),
        }))
    }
}

/// Push-mode settings of one listing request
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Explicit topic; derived from the root when unset
    pub topic: Option<String>,

    /// Wall-clock collection window
    pub wait: Duration,

    /// Stop after this many messages
    pub max_messages: usize,

    /// Message to entry mapping
    pub rules: FieldRules,

    /// Client identifier; a random one is generated when unset
    pub client_id: Option<String>,

    /// Connection retry policy
    pub connect: ConnectPolicy,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            topic: None,
            wait: DEFAULT_WAIT,
            max_messages: DEFAULT_MAX_MESSAGES,
            rules: FieldRules::default(),
            client_id: None,
            connect: ConnectPolicy::default(),
        }
    }
}

impl PushConfig {
    /// Settings with the given field rules and defaults elsewhere
    pub fn new(rules: FieldRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Set the topic
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the collection window
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Set the message cap
    pub fn max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    /// Set the client identifier
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the retry policy
    pub fn connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect = policy;
        self
    }

    /// Topic to subscribe to for `root`
    pub fn topic_for(&self, root: &str) -> String {
        match &self.topic {
            Some(topic) if !topic.is_empty() => topic.clone(),
            _ => derive_topic(root),
        }
    }
}

/// Topic covering everything announced below `root`
pub fn derive_topic(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        "#".to_string()
    } else {
        format!("{}/#", trimmed)
    }
}

/// Why a collection window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowEnd {
    /// The wall-clock window elapsed
    Deadline,
    /// The message cap was reached
    MaxMessages,
    /// The caller cancelled
    Stopped,
    /// The session dropped and could not be re-established
    Disconnected,
}

/// Statistics of one collection window
#[derive(Debug, Clone, Serialize)]
pub struct PushStats {
    /// Topic subscribed to
    pub topic: String,
    /// Messages received, malformed ones included
    pub received: u64,
    /// Messages mapped to an entry
    pub accepted: u64,
    /// Messages whose href was empty
    pub skipped: u64,
    /// Messages that could not be mapped
    pub malformed: u64,
    /// Successful reconnections
    pub reconnects: u64,
    /// Why the window ended
    pub ended: WindowEnd,
    /// Time spent collecting
    pub elapsed: Duration,
}

/// Collects pushed entries for one listing call
pub struct PushAdapter<'a> {
    connector: &'a dyn PushConnector,
    config: &'a PushConfig,
}

impl<'a> PushAdapter<'a> {
    /// Adapter over `connector`
    pub fn new(connector: &'a dyn PushConnector, config: &'a PushConfig) -> Self {
        Self { connector, config }
    }

    /// Run one collection window for `root`
    ///
    /// Only failing to establish the first session is an error.
    pub fn collect(
        &self,
        root: &str,
        stop: &AtomicBool,
    ) -> Result<(Vec<RawEntry>, PushStats), SetupError> {
        let topic = self.config.topic_for(root);
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("remote-walker-{}", uuid::Uuid::new_v4()));

        let mut subscription = self
            .config
            .connect
            .connect(self.connector, &topic, &client_id)
            .map_err(|e| SetupError::PushSession {
                broker: self.connector.broker(),
                reason: e.to_string(),
            })?;

        // The window opens once the subscription is live
        let start = Instant::now();
        info!(
            broker = %self.connector.broker(),
            topic = %topic,
            wait_secs = self.config.wait.as_secs(),
            max_messages = self.config.max_messages,
            "Collecting pushed entries"
        );

        let deadline = start + self.config.wait;
        let mut entries = Vec::new();
        let mut stats = PushStats {
            topic: topic.clone(),
            received: 0,
            accepted: 0,
            skipped: 0,
            malformed: 0,
            reconnects: 0,
            ended: WindowEnd::Deadline,
            elapsed: Duration::ZERO,
        };

        loop {
            if stats.received >= self.config.max_messages as u64 {
                stats.ended = WindowEnd::MaxMessages;
                break;
            }
            if stop.load(Ordering::SeqCst) {
                stats.ended = WindowEnd::Stopped;
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            match subscription.next_message((deadline - now).min(POLL_INTERVAL)) {
                Ok(Some(message)) => {
                    stats.received += 1;
                    match self.config.rules.extract(&message, now_millis()) {
                        Ok(Some(entry)) => {
                            stats.accepted += 1;
                            entries.push(entry);
                        }
                        Ok(None) => stats.skipped += 1,
                        Err(e) => {
                            stats.malformed += 1;
                            debug!(topic = %message.topic, error = %e, "Skipping push message");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Push session dropped, reconnecting");
                    match self.config.connect.connect(self.connector, &topic, &client_id) {
                        Ok(fresh) => {
                            subscription = fresh;
                            stats.reconnects += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "Could not re-establish push session, ending window");
                            stats.ended = WindowEnd::Disconnected;
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = subscription.close() {
            debug!(error = %e, "Push session did not close cleanly");
        }
        stats.elapsed = start.elapsed();

        info!(
            received = stats.received,
            accepted = stats.accepted,
            malformed = stats.malformed,
            ended = ?stats.ended,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Push window closed"
        );

        Ok((entries, stats))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Enumerator that answers the root with a collected snapshot
///
/// Any other directory, and every probe, goes to `fallback`.
pub struct SnapshotEnumerator {
    root: String,
    entries: Vec<RawEntry>,
    fallback: Arc<dyn ResourceEnumerator>,
}

impl SnapshotEnumerator {
    /// Serve `entries` as the children of `root`
    pub fn new(root: &str, entries: Vec<RawEntry>, fallback: Arc<dyn ResourceEnumerator>) -> Self {
        Self {
            root: root.to_string(),
            entries,
            fallback,
        }
    }

    /// Number of entries in the snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceEnumerator for SnapshotEnumerator {
    fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
        if directory == self.root {
            Ok(self.entries.clone())
        } else {
            self.fallback.enumerate(directory)
        }
    }

    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        self.fallback.probe(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnumerationError;
    use crate::source::EntryKind;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_derive_topic() {
        assert_eq!(derive_topic("/x"), "x/#");
        assert_eq!(derive_topic("/x/y/"), "x/y/#");
        assert_eq!(derive_topic("/"), "#");
        assert_eq!(PushConfig::default().topic("a/b").topic_for("/x"), "a/b");
    }

    #[test]
    fn test_backoff() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(400));
    }

    /// Refuses every connection
    struct Unreachable {
        attempts: AtomicU32,
    }

    impl PushConnector for Unreachable {
        fn broker(&self) -> String {
            "test://unreachable".into()
        }

        fn subscribe(&self, _topic: &str, _client_id: &str) -> PushResult<Box<dyn Subscription>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(PushError::Connect {
                broker: self.broker(),
                reason: "refused".into(),
            })
        }
    }

    #[test]
    fn test_unreachable_broker_is_fatal() {
        let connector = Unreachable {
            attempts: AtomicU32::new(0),
        };
        let config = PushConfig::default().connect_policy(ConnectPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
        });

        let result = PushAdapter::new(&connector, &config).collect("/x", &AtomicBool::new(false));

        assert!(matches!(result, Err(SetupError::PushSession { .. })));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_ends_window() {
        let broker = ChannelBroker::new();
        let config = PushConfig::default().wait(Duration::from_secs(30));
        let stop = AtomicBool::new(true);

        let (entries, stats) = PushAdapter::new(&broker, &config).collect("/x", &stop).unwrap();

        assert!(entries.is_empty());
        assert_eq!(stats.ended, WindowEnd::Stopped);
        assert_eq!(broker.subscriber_count(), 0);
    }

    fn wait_for_subscribers(broker: &ChannelBroker, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while broker.subscriber_count() != count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn quick_retry(attempts: u32) -> ConnectPolicy {
        ConnectPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_dropped_session_is_reestablished() {
        let broker = ChannelBroker::new();
        let config = PushConfig::default()
            .max_messages(2)
            .wait(Duration::from_secs(5))
            .connect_policy(quick_retry(3));

        let publisher = {
            let broker = broker.clone();
            thread::spawn(move || {
                wait_for_subscribers(&broker, 1);
                broker.publish("x/a", r#"{"href":"/x/a","size":1}"#);
                broker.disconnect_all();
                wait_for_subscribers(&broker, 1);
                broker.publish("x/b", r#"{"href":"/x/b","size":2}"#);
            })
        };

        let (entries, stats) = PushAdapter::new(&broker, &config)
            .collect("/x", &AtomicBool::new(false))
            .unwrap();
        publisher.join().unwrap();

        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.ended, WindowEnd::MaxMessages);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].full_path(), "/x/a");
        assert_eq!(entries[1].full_path(), "/x/b");
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_lost_session_keeps_collected_entries() {
        let broker = ChannelBroker::new();
        let config = PushConfig::default()
            .max_messages(5)
            .wait(Duration::from_secs(5))
            .connect_policy(quick_retry(2));

        let publisher = {
            let broker = broker.clone();
            thread::spawn(move || {
                wait_for_subscribers(&broker, 1);
                broker.publish("x/a", r#"{"href":"/x/a","size":1}"#);
                broker.refuse_connects(10);
                broker.disconnect_all();
            })
        };

        let start = Instant::now();
        let (entries, stats) = PushAdapter::new(&broker, &config)
            .collect("/x", &AtomicBool::new(false))
            .unwrap();
        publisher.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.ended, WindowEnd::Disconnected);
        assert_eq!(stats.reconnects, 0);
        assert_eq!(stats.received, 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].full_path(), "/x/a");
    }

    #[test]
    fn test_window_opens_after_connect_retries() {
        let broker = ChannelBroker::new();
        broker.refuse_connects(1);
        let config = PushConfig::default()
            .wait(Duration::from_millis(200))
            .connect_policy(ConnectPolicy {
                attempts: 2,
                initial_backoff: Duration::from_millis(300),
            });

        let publisher = {
            let broker = broker.clone();
            thread::spawn(move || {
                wait_for_subscribers(&broker, 1);
                broker.publish("x/late", r#"{"href":"/x/late","size":3}"#);
            })
        };

        let start = Instant::now();
        let (entries, stats) = PushAdapter::new(&broker, &config)
            .collect("/x", &AtomicBool::new(false))
            .unwrap();
        publisher.join().unwrap();

        // The 300 ms retry wait does not count against the 200 ms window
        assert_eq!(stats.ended, WindowEnd::Deadline);
        assert_eq!(entries.len(), 1);
        assert!(stats.elapsed >= Duration::from_millis(200));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    struct Empty;

    impl ResourceEnumerator for Empty {
        fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
            Err(EnumerationError::NotFound {
                path: directory.into(),
            })
        }
    }

    #[test]
    fn test_snapshot_enumerator() {
        let snapshot = SnapshotEnumerator::new(
            "/x",
            vec![RawEntry::new("", "/x/y1", EntryKind::File).with_size(5)],
            Arc::new(Empty),
        );

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.enumerate("/x").unwrap()[0].full_path(), "/x/y1");
        assert!(snapshot.enumerate("/other").is_err());
    }
}
