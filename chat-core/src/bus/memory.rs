//! In-process bus with the same delivery semantics as the Redis backend.
//!
//! Used by unit and workflow tests: competing-consumer groups with pending
//! entry tracking, abandon/redelivery counting, dead-lettering, and
//! replayable per-session streams.

use super::{
    BusError, BusMessage, Delivery, DeliveryToken, MessageBus, SessionStream,
    SubscriptionReceiver, TopicPublisher,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

struct PendingDelivery {
    count: u32,
    available: bool,
}

struct GroupState {
    cursor: usize,
    pending: HashMap<usize, PendingDelivery>,
    dead: Vec<BusMessage>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            cursor: 0,
            pending: HashMap::new(),
            dead: Vec::new(),
        }
    }
}

struct SessionState {
    entries: Vec<BusMessage>,
    len_tx: watch::Sender<usize>,
}

impl SessionState {
    fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            entries: Vec::new(),
            len_tx,
        }
    }
}

struct TopicState {
    entries: Vec<BusMessage>,
    version_tx: watch::Sender<u64>,
    groups: HashMap<String, GroupState>,
    sessions: HashMap<String, SessionState>,
}

impl TopicState {
    fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            entries: Vec::new(),
            version_tx,
            groups: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn bump(&self) {
        self.version_tx.send_modify(|v| *v += 1);
    }
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicState>,
}

impl BusState {
    fn topic(&mut self, name: &str) -> &mut TopicState {
        self.topics
            .entry(name.to_string())
            .or_insert_with(TopicState::new)
    }
}

#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    max_delivery_count: u32,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_max_delivery_count(DEFAULT_MAX_DELIVERY_COUNT)
    }

    pub fn with_max_delivery_count(max_delivery_count: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            max_delivery_count,
        }
    }

    /// Test inspection: dead-lettered messages of a subscription.
    pub fn dead_letters(&self, topic: &str, subscription: &str) -> Vec<BusMessage> {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .and_then(|t| t.groups.get(subscription))
            .map(|g| g.dead.clone())
            .unwrap_or_default()
    }

    /// Test inspection: total number of messages published to a topic.
    pub fn published_count(&self, topic: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.topics.get(topic).map(|t| t.entries.len()).unwrap_or(0)
    }

    /// Test inspection: everything published to one session of a topic.
    pub fn session_entries(&self, topic: &str, session_id: &str) -> Vec<BusMessage> {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .and_then(|t| t.sessions.get(session_id))
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TopicPublisher for MemoryBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        let topic_state = state.topic(topic);

        if let Some(session_id) = message.session_id.clone() {
            let session = topic_state
                .sessions
                .entry(session_id)
                .or_insert_with(SessionState::new);
            session.entries.push(message.clone());
            let len = session.entries.len();
            session.len_tx.send_replace(len);
        }

        topic_state.entries.push(message);
        topic_state.bump();
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Arc<dyn SubscriptionReceiver>, BusError> {
        {
            let mut state = self.state.lock().unwrap();
            state
                .topic(topic)
                .groups
                .entry(subscription.to_string())
                .or_insert_with(GroupState::new);
        }
        Ok(Arc::new(MemoryReceiver {
            state: self.state.clone(),
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            max_delivery_count: self.max_delivery_count,
        }))
    }

    async fn open_session(&self, topic: &str, session_id: &str) -> Result<SessionStream, BusError> {
        let len_rx = {
            let mut state = self.state.lock().unwrap();
            let topic_state = state.topic(topic);
            let session = topic_state
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(SessionState::new);
            session.len_tx.subscribe()
        };

        let state = self.state.clone();
        let topic = topic.to_string();
        let session_id = session_id.to_string();

        let stream = futures::stream::unfold(
            (state, topic, session_id, 0usize, len_rx),
            |(state, topic, session_id, index, mut len_rx)| async move {
                loop {
                    let next = {
                        let guard = state.lock().unwrap();
                        guard
                            .topics
                            .get(&topic)
                            .and_then(|t| t.sessions.get(&session_id))
                            .and_then(|s| s.entries.get(index))
                            .cloned()
                    };
                    if let Some(message) = next {
                        return Some((Ok(message), (state, topic, session_id, index + 1, len_rx)));
                    }
                    if len_rx.changed().await.is_err() {
                        return None;
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

struct MemoryReceiver {
    state: Arc<Mutex<BusState>>,
    topic: String,
    subscription: String,
    max_delivery_count: u32,
}

#[async_trait]
impl SubscriptionReceiver for MemoryReceiver {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, BusError> {
        let deadline = Instant::now() + wait;

        loop {
            let (deliveries, mut version_rx) = {
                let mut state = self.state.lock().unwrap();
                let topic = state.topic(&self.topic);
                let version_rx = topic.version_tx.subscribe();
                let entries = topic.entries.clone();
                let group = topic
                    .groups
                    .entry(self.subscription.clone())
                    .or_insert_with(GroupState::new);

                let mut out = Vec::new();

                // Redeliver abandoned entries first, oldest first.
                let mut available: Vec<usize> = group
                    .pending
                    .iter()
                    .filter(|(_, p)| p.available)
                    .map(|(seq, _)| *seq)
                    .collect();
                available.sort_unstable();

                for seq in available {
                    if out.len() >= max_messages {
                        break;
                    }
                    let pending = group.pending.get_mut(&seq).expect("pending entry exists");
                    pending.available = false;
                    pending.count += 1;
                    if pending.count > self.max_delivery_count {
                        group.pending.remove(&seq);
                        let message = entries[seq].clone();
                        tracing::warn!(
                            topic = %self.topic,
                            subscription = %self.subscription,
                            message_id = %message.message_id,
                            "Max delivery count exceeded, dead-lettering message"
                        );
                        group.dead.push(message);
                        continue;
                    }
                    out.push((seq, pending.count));
                }

                while out.len() < max_messages && group.cursor < entries.len() {
                    let seq = group.cursor;
                    group.cursor += 1;
                    group.pending.insert(
                        seq,
                        PendingDelivery {
                            count: 1,
                            available: false,
                        },
                    );
                    out.push((seq, 1));
                }

                let deliveries: Vec<Delivery> = out
                    .into_iter()
                    .map(|(seq, count)| Delivery {
                        message: entries[seq].clone(),
                        delivery_count: count,
                        token: DeliveryToken::Memory { seq: seq as u64 },
                    })
                    .collect();

                (deliveries, version_rx)
            };

            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let remaining = deadline - now;
            if tokio::time::timeout(remaining, version_rx.changed())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), BusError> {
        let DeliveryToken::Memory { seq } = &delivery.token else {
            return Err(BusError::Malformed("foreign delivery token".to_string()));
        };
        let mut state = self.state.lock().unwrap();
        if let Some(group) = state.topic(&self.topic).groups.get_mut(&self.subscription) {
            group.pending.remove(&(*seq as usize));
        }
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery) -> Result<(), BusError> {
        let DeliveryToken::Memory { seq } = &delivery.token else {
            return Err(BusError::Malformed("foreign delivery token".to_string()));
        };
        let mut state = self.state.lock().unwrap();
        let topic = state.topic(&self.topic);
        if let Some(group) = topic.groups.get_mut(&self.subscription) {
            if let Some(pending) = group.pending.get_mut(&(*seq as usize)) {
                pending.available = true;
            }
        }
        topic.bump();
        Ok(())
    }
}
