use super::*;
use serde_json::json;

fn map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn stage_change_discards_previous_stage_data() {
    let mut state = ShadowState::new("a", map(json!({ "x": 1 })));
    state.apply_delta(ShadowDelta::stage("b").with_data(map(json!({ "y": 2 }))));

    assert_eq!(state, ShadowState::new("b", map(json!({ "y": 2 }))));
}

#[test]
fn data_only_delta_replaces_data_under_same_stage() {
    let mut state = ShadowState::new("a", map(json!({ "x": 1 })));
    state.apply_delta(ShadowDelta::data(map(json!({ "y": 3 }))));

    assert_eq!(state, ShadowState::new("a", map(json!({ "y": 3 }))));
}

#[test]
fn stage_only_delta_leaves_data_empty() {
    let mut state = ShadowState::new("a", map(json!({ "x": 1 })));
    state.apply_delta(ShadowDelta::stage("a"));

    assert_eq!(state.stage.as_deref(), Some("a"));
    assert!(state.data.is_empty());
}

#[test]
fn unknown_top_level_keys_overwrite_individually() {
    let mut state: ShadowState =
        serde_json::from_value(json!({ "stage": "a", "brightness": 3, "rotation": 0 }))
            .expect("state");
    let delta: ShadowDelta = serde_json::from_value(json!({ "brightness": 7 })).expect("delta");
    state.apply_delta(delta);

    assert_eq!(state.extra.get("brightness"), Some(&json!(7)));
    assert_eq!(state.extra.get("rotation"), Some(&json!(0)));
    assert_eq!(state.stage.as_deref(), Some("a"));
}

#[test]
fn shadow_document_round_trips_reported_section() {
    let raw = json!({
        "state": { "reported": { "stage": "metrics", "data": { "feed": "cpu" } } },
        "version": 12
    });
    let document: ShadowDocument = serde_json::from_value(raw).expect("document");
    assert_eq!(document.state.reported.stage.as_deref(), Some("metrics"));

    let encoded = serde_json::to_value(&document).expect("encode");
    assert_eq!(
        encoded,
        json!({ "state": { "reported": { "stage": "metrics", "data": { "feed": "cpu" } } } })
    );
}

#[test]
fn null_data_in_reported_state_is_empty() {
    let document: ShadowDocument =
        serde_json::from_value(json!({ "state": { "reported": { "stage": "a", "data": null } } }))
            .expect("document");
    assert!(document.state.reported.data.is_empty());
}

#[test]
fn topics_are_scoped_by_client_and_stage() {
    assert_eq!(display_input_topic("pi-1"), "display/pi-1/input");
    assert_eq!(producer_topic("metrics"), "display/producers/metrics");
}
