use std::sync::Arc;

use super::*;
use crate::device::MemoryDevice;
use serde_json::json;

#[tokio::test]
async fn renders_values_and_labels_in_tiles() {
    let device = Arc::new(MemoryDevice::new(16, 2));
    let mut stage = MetricsStage::new(device.clone());

    let event = Event::new("metrics").with(
        "metrics",
        json!([
            { "value": 42, "label": "cpu" },
            { "value": "ok", "label": "db" }
        ]),
    );
    stage
        .handle(&event, &EventContext::local())
        .await
        .expect("handle");

    let frame = device.last_frame().expect("frame");
    assert_eq!(frame.lines, [" 42  ok", "cpu  db"]);
}

#[tokio::test]
async fn extra_metrics_beyond_four_tiles_are_ignored() {
    let device = Arc::new(MemoryDevice::new(8, 2));
    let mut stage = MetricsStage::new(device.clone());

    let metrics: Vec<_> = (1..=6).map(|n| json!({ "value": n, "label": "" })).collect();
    stage
        .handle(
            &Event::new("metrics").with("metrics", metrics),
            &EventContext::local(),
        )
        .await
        .expect("handle");

    assert_eq!(device.last_frame().expect("frame").lines[0], "1 2 3 4");
}

#[tokio::test]
async fn missing_metrics_field_is_an_error() {
    let device = Arc::new(MemoryDevice::new(8, 2));
    let mut stage = MetricsStage::new(device);

    let err = stage
        .handle(&Event::new("metrics"), &EventContext::local())
        .await
        .expect_err("missing metrics");
    assert!(err.to_string().contains("metrics"));
}
