use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::protocol::{
    ShadowDelta, ShadowDeltaMessage, ShadowDocument, ShadowState, ShadowStatus,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

const CHANNEL_CAPACITY: usize = 64;
/// Publishes and shadow updates kept for inspection; older entries are dropped.
pub const RECORD_LIMIT: usize = 256;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is not connected")]
    NotConnected,
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("broker transport failure: {0}")]
    Transport(String),
    #[error("invalid broker payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowResponse {
    pub status: ShadowStatus,
    pub payload: Value,
}

/// The slice of a managed broker client the shadow driver needs. Reconnects and
/// backoff are the implementation's business; callers bound every call with a timeout.
#[async_trait]
pub trait RemoteBroker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
    async fn get_shadow(&self) -> Result<ShadowResponse, BrokerError>;
    async fn update_shadow(&self, document: &ShadowDocument) -> Result<(), BrokerError>;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<BrokerMessage>, BrokerError>;
    /// Raw `{ "state": { ... } }` delta messages.
    fn subscribe_deltas(&self) -> broadcast::Receiver<Value>;
}

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    reported: Option<ShadowState>,
    topics: HashMap<String, broadcast::Sender<BrokerMessage>>,
    published: VecDeque<BrokerMessage>,
    shadow_updates: VecDeque<ShadowDocument>,
}

fn record<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == RECORD_LIMIT {
        log.pop_front();
    }
    log.push_back(entry);
}

/// In-process broker: keeps the shadow in memory and fans published messages out to
/// local subscribers. Backs local runs and tests.
pub struct LoopbackBroker {
    state: Mutex<LoopbackState>,
    deltas: broadcast::Sender<Value>,
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBroker {
    pub fn new() -> Self {
        let (deltas, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(LoopbackState::default()),
            deltas,
        }
    }

    pub fn with_reported(reported: ShadowState) -> Self {
        let broker = Self::new();
        broker.lock().reported = Some(reported);
        broker
    }

    pub fn set_desired(&self, delta: ShadowDelta) -> Result<(), BrokerError> {
        let message = serde_json::to_value(ShadowDeltaMessage { state: delta })?;
        let _ = self.deltas.send(message);
        Ok(())
    }

    pub fn inject(&self, topic: &str, payload: Vec<u8>) {
        let sender = self.lock().topics.get(topic).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(BrokerMessage {
                topic: topic.to_string(),
                payload,
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn reported(&self) -> Option<ShadowState> {
        self.lock().reported.clone()
    }

    pub fn published(&self) -> Vec<BrokerMessage> {
        self.lock().published.iter().cloned().collect()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Value> {
        self.lock()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .filter_map(|message| serde_json::from_slice(&message.payload).ok())
            .collect()
    }

    pub fn shadow_updates(&self) -> Vec<ShadowDocument> {
        self.lock().shadow_updates.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connected(&self) -> Result<MutexGuard<'_, LoopbackState>, BrokerError> {
        let state = self.lock();
        if state.connected {
            Ok(state)
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait]
impl RemoteBroker for LoopbackBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.lock().connected = true;
        info!("loopback broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.connected = false;
        state.topics.clear();
        info!("loopback broker disconnected");
        Ok(())
    }

    async fn get_shadow(&self) -> Result<ShadowResponse, BrokerError> {
        let state = self.connected()?;
        Ok(match &state.reported {
            Some(reported) => ShadowResponse {
                status: ShadowStatus::Accepted,
                payload: serde_json::to_value(ShadowDocument::reported(reported.clone()))?,
            },
            None => ShadowResponse {
                status: ShadowStatus::Rejected,
                payload: json!({ "code": 404, "message": "No shadow exists" }),
            },
        })
    }

    async fn update_shadow(&self, document: &ShadowDocument) -> Result<(), BrokerError> {
        let mut state = self.connected()?;
        state.reported = Some(document.state.reported.clone());
        record(&mut state.shadow_updates, document.clone());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let message = BrokerMessage {
            topic: topic.to_string(),
            payload,
        };
        let sender = {
            let mut state = self.connected()?;
            record(&mut state.published, message.clone());
            state.topics.get(topic).cloned()
        };
        debug!(%topic, "loopback publish");
        if let Some(sender) = sender {
            let _ = sender.send(message);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<BrokerMessage>, BrokerError> {
        let mut state = self.connected()?;
        Ok(state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe())
    }

    fn subscribe_deltas(&self) -> broadcast::Receiver<Value> {
        self.deltas.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;
