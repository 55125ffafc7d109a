use std::{any::Any, panic::AssertUnwindSafe};

use futures::FutureExt;
use shared::domain::{Event, EventContext};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{device::SharedDevice, registry::StageRegistry, stages::TerminalStage, Stage};

pub const FALLBACK_STAGE_NAME: &str = "error";

struct ActiveStage {
    name: String,
    stage: Box<dyn Stage>,
}

pub struct StageController {
    registry: StageRegistry,
    device: SharedDevice,
    active: Mutex<Option<ActiveStage>>,
}

impl StageController {
    pub fn new(registry: StageRegistry, device: SharedDevice) -> Self {
        Self {
            registry,
            device,
            active: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub async fn active_stage_name(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|active| active.name.clone())
    }

    // Stage faults end here; the faulting stage stays active.
    pub async fn dispatch(&self, event: &Event, context: &EventContext) {
        let mut guard = self.active.lock().await;

        if let Some(active) = guard.as_mut() {
            if active.name != event.stage {
                info!(
                    from = %active.name,
                    to = %event.stage,
                    "different stage encountered; stopping current stage"
                );
                active.stage.stop();
                *guard = None;
            }
        }

        if guard.is_none() {
            let Some(factory) = self.registry.get(&event.stage) else {
                drop(guard);
                self.show_unknown_stage(&event.stage, context).await;
                return;
            };

            info!(stage = %event.stage, "creating and starting stage");
            let mut stage = factory(self.device.clone());
            stage.start();
            *guard = Some(ActiveStage {
                name: event.stage.clone(),
                stage,
            });
        }

        if let Some(active) = guard.as_mut() {
            run_isolated(&active.name, active.stage.as_mut(), event, context).await;
        }
    }

    pub async fn shutdown(&self) {
        if let Some(mut active) = self.active.lock().await.take() {
            info!(stage = %active.name, "stopping stage for shutdown");
            active.stage.stop();
        }
    }

    async fn show_unknown_stage(&self, name: &str, context: &EventContext) {
        let message = format!("Invalid stage: {name} is not registered.");
        error!(stage = %name, "{message}");

        let mut fallback = TerminalStage::new(self.device.clone());
        fallback.start();
        let notice = Event::message(FALLBACK_STAGE_NAME, message);
        run_isolated(FALLBACK_STAGE_NAME, &mut fallback, &notice, context).await;
        fallback.stop();
    }
}

async fn run_isolated(name: &str, stage: &mut dyn Stage, event: &Event, context: &EventContext) {
    match AssertUnwindSafe(stage.handle(event, context))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(stage = %name, error = %format!("{error:#}"), "stage failed to handle event");
        }
        Err(panic) => {
            error!(
                stage = %name,
                panic = %panic_message(panic.as_ref()),
                "stage panicked while handling event"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
