use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use shared::domain::{Event, EventContext};
use stage_core::{
    stages::TerminalStage, MemoryDevice, SharedDevice, Stage, StageController, StageDescriptor,
    StageRegistry,
};

#[derive(Default)]
struct Counters {
    built: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

struct CountedText {
    inner: TerminalStage,
    counters: Arc<Counters>,
}

#[async_trait]
impl Stage for CountedText {
    fn start(&mut self) {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        self.inner.start();
    }

    fn stop(&mut self) {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        self.inner.stop();
    }

    async fn handle(&mut self, event: &Event, context: &EventContext) -> anyhow::Result<()> {
        self.inner.handle(event, context).await
    }
}

#[tokio::test]
async fn text_then_unknown_then_text_builds_a_fresh_stage() {
    let counters = Arc::new(Counters::default());
    let mut registry = StageRegistry::new();
    let factory_counters = counters.clone();
    registry
        .register(StageDescriptor::new("text", move |device: SharedDevice| {
            factory_counters.built.fetch_add(1, Ordering::SeqCst);
            Box::new(CountedText {
                inner: TerminalStage::new(device),
                counters: factory_counters.clone(),
            })
        }))
        .expect("register text");

    let device = Arc::new(MemoryDevice::new(48, 3));
    let controller = StageController::new(registry, device.clone());
    let ctx = EventContext::local();

    controller
        .dispatch(&Event::message("text", "hi"), &ctx)
        .await;
    assert_eq!(counters.built.load(Ordering::SeqCst), 1);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(device.last_text(), "hi");

    controller.dispatch(&Event::new("unknown"), &ctx).await;
    assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(controller.active_stage_name().await, None);
    assert!(device.last_text().contains("unknown is not registered"));

    controller
        .dispatch(&Event::message("text", "again"), &ctx)
        .await;
    assert_eq!(counters.built.load(Ordering::SeqCst), 2);
    assert_eq!(counters.started.load(Ordering::SeqCst), 2);
    assert_eq!(controller.active_stage_name().await.as_deref(), Some("text"));
    assert_eq!(device.last_text(), "again");
}
