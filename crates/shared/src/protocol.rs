use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub fn display_input_topic(client_id: &str) -> String {
    format!("display/{client_id}/input")
}

pub fn producer_topic(stage: &str) -> String {
    format!("display/producers/{stage}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowStatus {
    Accepted,
    Rejected,
}

/// Last known merged view of the device shadow's `reported` section.
///
/// Keys other than `stage` and `data` are carried through untouched in `extra` so a
/// republished document never drops state written by someone else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ShadowState {
    pub fn new(stage: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            stage: Some(stage.into()),
            data,
            extra: Map::new(),
        }
    }

    /// Top-level overwrite, last delta wins per key. A delta that names a stage
    /// clears `data` before its own `data` lands, so per-stage parameters never
    /// leak across a stage change. `data` itself is replaced, never deep-merged.
    pub fn apply_delta(&mut self, delta: ShadowDelta) {
        if let Some(stage) = delta.stage {
            if stage.is_empty() {
                self.stage = None;
            } else {
                self.data = Map::new();
                self.stage = Some(stage);
            }
        }

        if let Some(data) = delta.data {
            self.data = data;
        }

        for (key, value) in delta.extra {
            self.extra.insert(key, value);
        }
    }
}

/// Changed keys pushed from outside the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ShadowDelta {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

/// `{ "state": { ...delta } }` as delivered on the delta channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowDeltaMessage {
    pub state: ShadowDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportedState {
    #[serde(default)]
    pub reported: ShadowState,
}

/// `{ "state": { "reported": { "stage"?, "data"? } } }`, used both for shadow get
/// responses and for acknowledging updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    #[serde(default)]
    pub state: ReportedState,
}

impl ShadowDocument {
    pub fn reported(state: ShadowState) -> Self {
        Self {
            state: ReportedState { reported: state },
        }
    }
}

/// Body published to `display/producers/<stage>` asking for fresh stage data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub client_id: String,
    pub data: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
