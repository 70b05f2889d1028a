//! Redis Streams implementation of the message bus.
//!
//! Layout:
//! - `bus:{topic}` — the topic stream, trimmed approximately. Subscriptions
//!   are consumer groups; competing consumers read with `XREADGROUP`.
//! - `bus:{topic}:session:{sessionId}` — per-session stream for
//!   session-keyed publishes. Session receivers replay it from the start.
//!   The key expires a while after the last publish, which doubles as the
//!   short replay buffer for late SSE subscribers.
//! - `bus:{topic}:dead:{subscription}` — dead-letter stream fed once a
//!   message exceeds the maximum delivery count.
//!
//! Receivers use a dedicated connection so blocking reads cannot stall the
//! shared publisher connection.

use super::{
    BusError, BusMessage, Delivery, DeliveryToken, MessageBus, SessionStream,
    SubscriptionReceiver, TopicPublisher,
};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::Client;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const FIELD_MESSAGE_ID: &str = "message_id";
const FIELD_SESSION_ID: &str = "session_id";
const FIELD_BODY: &str = "body";

/// Approximate cap on retained topic entries.
const TOPIC_MAXLEN: usize = 100_000;

#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub url: String,
    /// Deliveries beyond this count dead-letter the message.
    pub max_delivery_count: u32,
    /// How long an unacknowledged delivery stays locked to a consumer
    /// before another consumer may claim it.
    pub redelivery_idle: Duration,
    /// Retention of per-session streams after the last publish.
    pub session_ttl: Duration,
}

impl RedisBusConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_delivery_count: 10,
            redelivery_idle: Duration::from_secs(30),
            session_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    manager: ConnectionManager,
    config: RedisBusConfig,
    consumer_name: String,
}

fn topic_key(topic: &str) -> String {
    format!("bus:{}", topic)
}

fn session_key(topic: &str, session_id: &str) -> String {
    format!("bus:{}:session:{}", topic, session_id)
}

fn dead_letter_key(topic: &str, subscription: &str) -> String {
    format!("bus:{}:dead:{}", topic, subscription)
}

fn message_fields(message: &BusMessage) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_MESSAGE_ID, message.message_id.clone()),
        (
            FIELD_SESSION_ID,
            message.session_id.clone().unwrap_or_default(),
        ),
        (FIELD_BODY, message.body.clone()),
    ]
}

fn message_from_entry(entry: &StreamId) -> Result<BusMessage, BusError> {
    let field = |name: &str| -> Result<String, BusError> {
        let value = entry
            .map
            .get(name)
            .ok_or_else(|| BusError::Malformed(format!("missing field '{}'", name)))?;
        redis::from_redis_value(value)
            .map_err(|e| BusError::Malformed(format!("field '{}': {}", name, e)))
    };

    let session_id = field(FIELD_SESSION_ID)?;
    Ok(BusMessage {
        message_id: field(FIELD_MESSAGE_ID)?,
        session_id: if session_id.is_empty() {
            None
        } else {
            Some(session_id)
        },
        body: field(FIELD_BODY)?,
    })
}

impl RedisBus {
    pub async fn connect(config: RedisBusConfig) -> Result<Self, BusError> {
        tracing::info!(url = %config.url, "Connecting to Redis bus");
        let client = Client::open(config.url.clone())?;
        let manager = client.get_connection_manager().await?;
        let consumer_name = format!("consumer-{}", uuid::Uuid::new_v4());
        tracing::info!(consumer = %consumer_name, "Successfully connected to Redis bus");
        Ok(Self {
            client,
            manager,
            config,
            consumer_name,
        })
    }
}

#[async_trait]
impl TopicPublisher for RedisBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let fields = message_fields(&message);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic_key(topic))
            .arg("MAXLEN")
            .arg("~")
            .arg(TOPIC_MAXLEN)
            .arg("*");
        for (name, value) in &fields {
            cmd.arg(*name).arg(value);
        }
        cmd.query_async::<_, String>(&mut conn).await?;

        if let Some(session_id) = &message.session_id {
            let key = session_key(topic, session_id);
            let mut cmd = redis::cmd("XADD");
            cmd.arg(&key).arg("*");
            for (name, value) in &fields {
                cmd.arg(*name).arg(value);
            }
            cmd.query_async::<_, String>(&mut conn).await?;
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.config.session_ttl.as_secs())
                .query_async::<_, ()>(&mut conn)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Arc<dyn SubscriptionReceiver>, BusError> {
        let mut conn = self.manager.clone();
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic_key(topic))
            .arg(subscription)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(e) = created {
            // The group surviving restarts is the normal case.
            if !e.to_string().contains("BUSYGROUP") {
                return Err(BusError::from(e));
            }
        }

        let read_conn = self.client.get_multiplexed_async_connection().await?;

        Ok(Arc::new(RedisReceiver {
            read_conn: Mutex::new(read_conn),
            settle_conn: self.manager.clone(),
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            consumer_name: self.consumer_name.clone(),
            config: self.config.clone(),
        }))
    }

    async fn open_session(&self, topic: &str, session_id: &str) -> Result<SessionStream, BusError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        let key = session_key(topic, session_id);

        let stream = futures::stream::unfold(
            SessionCursor {
                conn,
                key,
                last_id: "0".to_string(),
                buffer: VecDeque::new(),
            },
            |mut cursor| async move {
                loop {
                    if let Some(message) = cursor.buffer.pop_front() {
                        return Some((message, cursor));
                    }

                    let reply: Result<Option<StreamReadReply>, redis::RedisError> =
                        redis::cmd("XREAD")
                            .arg("COUNT")
                            .arg(64)
                            .arg("BLOCK")
                            .arg(5_000)
                            .arg("STREAMS")
                            .arg(&cursor.key)
                            .arg(&cursor.last_id)
                            .query_async(&mut cursor.conn)
                            .await;

                    match reply {
                        Ok(Some(reply)) => {
                            for stream_key in reply.keys {
                                for entry in stream_key.ids {
                                    cursor.last_id = entry.id.clone();
                                    cursor.buffer.push_back(message_from_entry(&entry));
                                }
                            }
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(BusError::from(e)), cursor)),
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

struct SessionCursor {
    conn: MultiplexedConnection,
    key: String,
    last_id: String,
    buffer: VecDeque<Result<BusMessage, BusError>>,
}

struct RedisReceiver {
    read_conn: Mutex<MultiplexedConnection>,
    settle_conn: ConnectionManager,
    topic: String,
    subscription: String,
    consumer_name: String,
    config: RedisBusConfig,
}

impl RedisReceiver {
    /// Claim idle pending entries left by crashed or abandoning consumers.
    /// Entries past the delivery cap are dead-lettered instead of returned.
    async fn claim_stale(
        &self,
        conn: &mut MultiplexedConnection,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, BusError> {
        let key = topic_key(&self.topic);
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&key)
            .arg(&self.subscription)
            .arg("-")
            .arg("+")
            .arg(16)
            .query_async(conn)
            .await?;

        let idle_ms = self.config.redelivery_idle.as_millis() as u64;
        let mut deliveries = Vec::new();

        for entry in pending.ids {
            if deliveries.len() >= max_messages {
                break;
            }
            if entry.last_delivered_ms < idle_ms as usize {
                continue;
            }

            let claimed: StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&key)
                .arg(&self.subscription)
                .arg(&self.consumer_name)
                .arg(idle_ms)
                .arg(&entry.id)
                .query_async(conn)
                .await?;

            for claimed_entry in claimed.ids {
                let message = message_from_entry(&claimed_entry)?;
                let delivery_count = entry.times_delivered as u32 + 1;

                if delivery_count > self.config.max_delivery_count {
                    tracing::warn!(
                        topic = %self.topic,
                        subscription = %self.subscription,
                        message_id = %message.message_id,
                        delivery_count,
                        "Max delivery count exceeded, dead-lettering message"
                    );
                    self.dead_letter(&message, &claimed_entry.id).await?;
                    continue;
                }

                deliveries.push(Delivery {
                    message,
                    delivery_count,
                    token: DeliveryToken::Redis {
                        entry_id: claimed_entry.id.clone(),
                    },
                });
            }
        }

        Ok(deliveries)
    }

    async fn dead_letter(&self, message: &BusMessage, entry_id: &str) -> Result<(), BusError> {
        let mut conn = self.settle_conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(dead_letter_key(&self.topic, &self.subscription)).arg("*");
        for (name, value) in message_fields(message) {
            cmd.arg(name).arg(value);
        }
        cmd.query_async::<_, String>(&mut conn).await?;

        redis::cmd("XACK")
            .arg(topic_key(&self.topic))
            .arg(&self.subscription)
            .arg(entry_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionReceiver for RedisReceiver {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut conn = self.read_conn.lock().await;

        let claimed = self.claim_stale(&mut conn, max_messages).await?;
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.subscription)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(max_messages)
            .arg("BLOCK")
            .arg(wait.as_millis() as u64)
            .arg("STREAMS")
            .arg(topic_key(&self.topic))
            .arg(">")
            .query_async(&mut *conn)
            .await?;

        let mut deliveries = Vec::new();
        if let Some(reply) = reply {
            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    deliveries.push(Delivery {
                        message: message_from_entry(&entry)?,
                        delivery_count: 1,
                        token: DeliveryToken::Redis {
                            entry_id: entry.id.clone(),
                        },
                    });
                }
            }
        }
        Ok(deliveries)
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), BusError> {
        let DeliveryToken::Redis { entry_id } = &delivery.token else {
            return Err(BusError::Malformed("foreign delivery token".to_string()));
        };
        let mut conn = self.settle_conn.clone();
        redis::cmd("XACK")
            .arg(topic_key(&self.topic))
            .arg(&self.subscription)
            .arg(entry_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery) -> Result<(), BusError> {
        // Leaving the entry pending is the abandon: once it has been idle
        // for `redelivery_idle` any consumer may claim it again.
        tracing::debug!(
            topic = %self.topic,
            subscription = %self.subscription,
            message_id = %delivery.message.message_id,
            "Message left pending for redelivery"
        );
        Ok(())
    }
}
