//! Stage lifecycle and dispatch for a single display.

mod controller;
pub mod device;
mod registry;
pub mod stages;

pub use controller::{StageController, FALLBACK_STAGE_NAME};
pub use device::{ConsoleDevice, Device, Frame, MemoryDevice, SharedDevice};
pub use registry::{RegistryError, StageDescriptor, StageFactory, StageRegistry};

use async_trait::async_trait;
use shared::domain::{Event, EventContext};

/// A swappable screen layout.
///
/// The controller guarantees the call order `start`, any number of `handle`, `stop`.
/// `stop` is a signal: a stage that runs its own redraw task must make that task exit,
/// but the controller does not wait for it.
#[async_trait]
pub trait Stage: Send {
    fn start(&mut self) {}

    fn stop(&mut self) {}

    async fn handle(&mut self, event: &Event, context: &EventContext) -> anyhow::Result<()>;
}
