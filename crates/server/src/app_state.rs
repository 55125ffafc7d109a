use std::sync::Arc;

use shadow_sync::{LoopbackBroker, ShadowSyncDriver};
use stage_core::StageController;

#[derive(Clone)]
pub(crate) struct LoopbackControl {
    pub(crate) broker: Arc<LoopbackBroker>,
    pub(crate) driver: ShadowSyncDriver,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) controller: Arc<StageController>,
    pub(crate) loopback: Option<LoopbackControl>,
}
