//! Redis pub/sub transport
//!
//! Topic filters are translated to Redis channel patterns: `#` and `+` become
//! `*` and the subscription uses PSUBSCRIBE; a plain topic uses SUBSCRIBE.

use crate::error::{PushError, PushResult};
use crate::push::{PushConnector, PushMessage, Subscription};
use redis::{Client, Connection, Msg};
use std::time::Duration;
use tracing::debug;

/// Default Redis URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Shortest read timeout passed to the socket (zero means "block forever")
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Connector for one Redis server
pub struct RedisConnector {
    url: String,
    client: Client,
}

impl RedisConnector {
    /// Create a connector; the connection itself is opened on subscribe
    pub fn open(url: &str) -> PushResult<Self> {
        let client = Client::open(url).map_err(|e| PushError::Connect {
            broker: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

/// Translate an MQTT-style filter into a Redis channel and its subscribe command
pub fn channel_pattern(topic: &str) -> (&'static str, String) {
    if topic.contains(['#', '+', '*']) {
        ("PSUBSCRIBE", topic.replace(['#', '+'], "*"))
    } else {
        ("SUBSCRIBE", topic.to_string())
    }
}

impl PushConnector for RedisConnector {
    fn broker(&self) -> String {
        self.url.clone()
    }

    fn subscribe(&self, topic: &str, client_id: &str) -> PushResult<Box<dyn Subscription>> {
        let mut connection = self.client.get_connection().map_err(|e| PushError::Connect {
            broker: self.url.clone(),
            reason: e.to_string(),
        })?;

        // The client name only shows up in CLIENT LIST; failing to set it is harmless
        if let Err(e) = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(client_id)
            .query::<()>(&mut connection)
        {
            debug!(error = %e, "Could not set Redis client name");
        }

        let (command, channel) = channel_pattern(topic);
        let subscribe_error = |e: redis::RedisError| PushError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        };
        connection
            .send_packed_command(&redis::cmd(command).arg(&channel).get_packed_command())
            .map_err(subscribe_error)?;
        connection.recv_response().map_err(subscribe_error)?;

        debug!(command = command, channel = %channel, "Subscribed to Redis");

        Ok(Box::new(RedisSubscription {
            connection,
            command,
            channel,
        }))
    }
}

/// One Redis pub/sub session
pub struct RedisSubscription {
    connection: Connection,
    command: &'static str,
    channel: String,
}

impl Subscription for RedisSubscription {
    fn next_message(&mut self, timeout: Duration) -> PushResult<Option<PushMessage>> {
        self.connection
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))
            .map_err(|e| PushError::Disconnected {
                reason: e.to_string(),
            })?;

        match self.connection.recv_response() {
            Ok(value) => Ok(Msg::from_value(&value).map(|msg| PushMessage {
                topic: msg.get_channel_name().to_string(),
                payload: msg.get_payload_bytes().to_vec(),
            })),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(PushError::Disconnected {
                reason: e.to_string(),
            }),
        }
    }

    fn close(&mut self) -> PushResult<()> {
        let unsubscribe = if self.command == "PSUBSCRIBE" {
            "PUNSUBSCRIBE"
        } else {
            "UNSUBSCRIBE"
        };
        self.connection
            .send_packed_command(&redis::cmd(unsubscribe).arg(&self.channel).get_packed_command())
            .map_err(|e| PushError::Disconnected {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_pattern() {
        assert_eq!(channel_pattern("x/#"), ("PSUBSCRIBE", "x/*".to_string()));
        assert_eq!(channel_pattern("x/+/y"), ("PSUBSCRIBE", "x/*/y".to_string()));
        assert_eq!(channel_pattern("x/y"), ("SUBSCRIBE", "x/y".to_string()));
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(matches!(
            RedisConnector::open("not a url"),
            Err(PushError::Connect { .. })
        ));
    }
}
