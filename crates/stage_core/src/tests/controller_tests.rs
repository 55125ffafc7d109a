use std::sync::{Arc, Mutex as StdMutex};

use super::*;
use crate::{device::MemoryDevice, registry::StageDescriptor};
use anyhow::bail;
use async_trait::async_trait;

type Journal = Arc<StdMutex<Vec<String>>>;

/// Records every lifecycle call as `<stage>#<instance>:<call>`.
struct RecordingStage {
    label: String,
    journal: Journal,
}

impl RecordingStage {
    fn record(&self, call: &str) {
        self.journal
            .lock()
            .expect("journal")
            .push(format!("{}:{call}", self.label));
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn start(&mut self) {
        self.record("start");
    }

    fn stop(&mut self) {
        self.record("stop");
    }

    async fn handle(&mut self, event: &Event, _context: &EventContext) -> anyhow::Result<()> {
        self.record("handle");
        match event.get_str("fault") {
            Some("error") => bail!("bad payload"),
            Some("panic") => panic!("stage exploded"),
            _ => Ok(()),
        }
    }
}

fn recording_descriptor(name: &'static str, journal: &Journal) -> StageDescriptor {
    let journal = journal.clone();
    let built = Arc::new(StdMutex::new(0usize));
    StageDescriptor::new(name, move |_| {
        let mut built = built.lock().expect("counter");
        *built += 1;
        Box::new(RecordingStage {
            label: format!("{name}#{built}"),
            journal: journal.clone(),
        })
    })
}

fn controller_with(names: &[&'static str]) -> (StageController, Journal, Arc<MemoryDevice>) {
    let journal: Journal = Arc::new(StdMutex::new(Vec::new()));
    let mut registry = StageRegistry::new();
    for &name in names {
        registry
            .register(recording_descriptor(name, &journal))
            .expect("register");
    }
    let device = Arc::new(MemoryDevice::new(64, 4));
    (
        StageController::new(registry, device.clone()),
        journal,
        device,
    )
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal").clone()
}

#[tokio::test]
async fn first_event_constructs_starts_then_handles() {
    let (controller, journal, _device) = controller_with(&["a"]);

    controller
        .dispatch(&Event::new("a"), &EventContext::local())
        .await;

    assert_eq!(entries(&journal), ["a#1:start", "a#1:handle"]);
    assert_eq!(controller.active_stage_name().await.as_deref(), Some("a"));
}

#[tokio::test]
async fn same_stage_twice_only_handles_again() {
    let (controller, journal, _device) = controller_with(&["a"]);
    let ctx = EventContext::local();

    controller.dispatch(&Event::new("a"), &ctx).await;
    controller.dispatch(&Event::new("a"), &ctx).await;

    assert_eq!(
        entries(&journal),
        ["a#1:start", "a#1:handle", "a#1:handle"]
    );
}

#[tokio::test]
async fn switching_stops_previous_before_starting_next() {
    let (controller, journal, _device) = controller_with(&["a", "b"]);
    let ctx = EventContext::local();

    controller.dispatch(&Event::new("a"), &ctx).await;
    controller.dispatch(&Event::new("b"), &ctx).await;
    controller.dispatch(&Event::new("a"), &ctx).await;

    assert_eq!(
        entries(&journal),
        [
            "a#1:start",
            "a#1:handle",
            "a#1:stop",
            "b#1:start",
            "b#1:handle",
            "b#1:stop",
            "a#2:start",
            "a#2:handle",
        ]
    );
    assert_eq!(controller.active_stage_name().await.as_deref(), Some("a"));
}

#[tokio::test]
async fn unknown_stage_shows_notice_and_adopts_nothing() {
    let (controller, journal, device) = controller_with(&["a"]);
    let ctx = EventContext::local();

    controller.dispatch(&Event::new("a"), &ctx).await;
    controller.dispatch(&Event::new("nope"), &ctx).await;

    assert_eq!(entries(&journal), ["a#1:start", "a#1:handle", "a#1:stop"]);
    assert_eq!(controller.active_stage_name().await, None);
    assert!(device.last_text().contains("Invalid stage: nope is not registered."));

    controller.dispatch(&Event::new("a"), &ctx).await;
    assert_eq!(
        entries(&journal)[3..],
        ["a#2:start".to_string(), "a#2:handle".to_string()]
    );
}

#[tokio::test]
async fn blank_or_padded_stage_names_take_the_unknown_path() {
    let (controller, journal, device) = controller_with(&["a"]);
    let ctx = EventContext::local();

    controller.dispatch(&Event::new(""), &ctx).await;
    assert!(device.last_text().contains("Invalid stage:  is not registered."));
    controller.dispatch(&Event::new(" a "), &ctx).await;
    assert!(device.last_text().contains("Invalid stage:  a  is not registered."));

    assert!(entries(&journal).is_empty());
    assert_eq!(controller.active_stage_name().await, None);
}

#[tokio::test]
async fn handler_error_keeps_stage_active() {
    let (controller, journal, _device) = controller_with(&["a"]);
    let ctx = EventContext::local();

    controller
        .dispatch(&Event::new("a").with("fault", "error"), &ctx)
        .await;
    controller.dispatch(&Event::new("a"), &ctx).await;

    assert_eq!(
        entries(&journal),
        ["a#1:start", "a#1:handle", "a#1:handle"]
    );
    assert_eq!(controller.active_stage_name().await.as_deref(), Some("a"));
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let (controller, journal, _device) = controller_with(&["a"]);
    let ctx = EventContext::local();

    controller.dispatch(&Event::new("a"), &ctx).await;
    controller
        .dispatch(&Event::new("a").with("fault", "panic"), &ctx)
        .await;
    controller.dispatch(&Event::new("a"), &ctx).await;

    assert_eq!(
        entries(&journal),
        ["a#1:start", "a#1:handle", "a#1:handle", "a#1:handle"]
    );
    assert_eq!(controller.active_stage_name().await.as_deref(), Some("a"));
}

#[tokio::test]
async fn shutdown_stops_active_stage() {
    let (controller, journal, _device) = controller_with(&["a"]);

    controller
        .dispatch(&Event::new("a"), &EventContext::local())
        .await;
    controller.shutdown().await;
    controller.shutdown().await;

    assert_eq!(entries(&journal), ["a#1:start", "a#1:handle", "a#1:stop"]);
    assert_eq!(controller.active_stage_name().await, None);
}

#[tokio::test]
async fn concurrent_dispatches_never_overlap_stages() {
    let (controller, journal, _device) = controller_with(&["a", "b"]);
    let controller = Arc::new(controller);

    let mut tasks = Vec::new();
    for i in 0..32 {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            let stage = if i % 3 == 0 { "a" } else { "b" };
            controller
                .dispatch(&Event::new(stage), &EventContext::local())
                .await;
        }));
    }
    for task in tasks {
        task.await.expect("dispatch task");
    }

    let mut running: Option<String> = None;
    for entry in entries(&journal) {
        let (instance, call) = entry.split_once(':').expect("entry");
        match call {
            "start" => {
                assert!(running.is_none(), "{instance} started while {running:?} ran");
                running = Some(instance.to_string());
            }
            "stop" => {
                assert_eq!(running.as_deref(), Some(instance));
                running = None;
            }
            _ => assert_eq!(running.as_deref(), Some(instance)),
        }
    }
}
