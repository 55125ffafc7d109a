use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use shared::domain::{Event, EventContext};

use super::center;
use crate::{
    device::{Frame, SharedDevice},
    Stage,
};

const TILES: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub label: Option<String>,
}

/// `metrics`: up to four value/label tiles side by side.
pub struct MetricsStage {
    device: SharedDevice,
    tiles: Vec<Metric>,
}

impl MetricsStage {
    pub const NAME: &'static str = "metrics";

    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            tiles: Vec::new(),
        }
    }

    fn update(&mut self, metrics: Vec<Metric>) {
        self.tiles = metrics.into_iter().take(TILES).collect();
    }

    fn refresh(&self) {
        let columns = self.device.columns();
        let width = (columns / TILES).max(1);
        let mut values = String::with_capacity(columns);
        let mut labels = String::with_capacity(columns);

        for index in 0..TILES {
            let tile = self.tiles.get(index);
            let value = tile
                .and_then(|tile| tile.value.as_ref())
                .map(display_value)
                .unwrap_or_default();
            let label = tile.and_then(|tile| tile.label.clone()).unwrap_or_default();
            values.push_str(&center(&value, width));
            labels.push_str(&center(&label, width));
        }

        self.device.render(Frame::fit(
            [values.trim_end().to_string(), labels.trim_end().to_string()],
            columns,
            self.device.rows(),
        ));
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Stage for MetricsStage {
    async fn handle(&mut self, event: &Event, _context: &EventContext) -> anyhow::Result<()> {
        let raw = event
            .get("metrics")
            .cloned()
            .context("`metrics` event requires a `metrics` array")?;
        let metrics: Vec<Metric> =
            serde_json::from_value(raw).context("`metrics` must be a list of {value, label}")?;
        self.update(metrics);
        self.refresh();
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/metrics_tests.rs"]
mod tests;
