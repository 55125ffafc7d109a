use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

/// A display instruction: the stage that should handle it plus whatever data that
/// stage understands. On the wire the payload keys sit next to `stage` in one object:
/// `{"stage": "text", "message": "hi"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Event {
    pub stage: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn message(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage).with("message", message.into())
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| EventError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let Value::Object(object) = value else {
            return Err(EventError::NotAnObject(json_type_name(&value)));
        };

        let mut stage = None;
        let mut payload = Map::new();
        for (key, value) in object {
            if key == "stage" {
                stage = Some(value);
            } else {
                payload.insert(key, value);
            }
        }

        let stage = match stage {
            Some(Value::String(stage)) => stage,
            Some(other) => return Err(EventError::InvalidStageType(json_type_name(&other))),
            None => return Err(EventError::MissingStage),
        };

        Ok(Self { stage, payload })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl TryFrom<Value> for Event {
    type Error = EventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Which inbound path delivered an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Http,
    Subscription,
    Broker,
    #[default]
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub source: EventSource,
    pub received_at: DateTime<Utc>,
}

impl EventContext {
    pub fn new(source: EventSource) -> Self {
        Self {
            source,
            received_at: Utc::now(),
        }
    }

    pub fn local() -> Self {
        Self::new(EventSource::Local)
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
