//! Keeps a local mirror of the device shadow and asks producers for fresh stage data
//! on a timer. Data answers come back as ordinary display events on the input topic.

pub mod broker;
pub mod scheduler;

use std::{
    future::Future,
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
    time::Duration,
};

use serde_json::Value;
use shared::{
    domain::{Event, EventContext, EventSource},
    protocol::{
        display_input_topic, producer_topic, DataRequest, ShadowDelta, ShadowDeltaMessage,
        ShadowDocument, ShadowState, ShadowStatus,
    },
};
use stage_core::{stages::TerminalStage, StageController};
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub use broker::{BrokerError, BrokerMessage, LoopbackBroker, RemoteBroker, ShadowResponse};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TimerTask, TokioScheduler};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_INITIAL_REFRESH_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHADOW_GET_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SHADOW_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

pub const WELCOME_MESSAGE: &str = "Hello, new device!!!\nGo to the app to display something.";

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub client_id: String,
    pub refresh_interval: Duration,
    pub initial_refresh_delay: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub shadow_get_timeout: Duration,
    pub shadow_update_timeout: Duration,
}

impl DriverConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            initial_refresh_delay: DEFAULT_INITIAL_REFRESH_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            shadow_get_timeout: DEFAULT_SHADOW_GET_TIMEOUT,
            shadow_update_timeout: DEFAULT_SHADOW_UPDATE_TIMEOUT,
        }
    }

    pub fn display_topic(&self) -> String {
        display_input_topic(&self.client_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Disconnected,
    Connecting,
    ShadowRequested,
    Rejected,
    Accepted,
    Synced,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BrokerError),
    #[error("failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("failed to fetch device shadow: {0}")]
    ShadowGet(#[source] BrokerError),
}

pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct PendingRefresh {
    generation: u64,
    handle: Box<dyn TimerHandle>,
}

struct DriverState {
    phase: DriverPhase,
    shadow: ShadowState,
    refresh: Option<PendingRefresh>,
    generation: u64,
}

struct DriverShared {
    config: DriverConfig,
    broker: Arc<dyn RemoteBroker>,
    scheduler: Arc<dyn Scheduler>,
    controller: Arc<StageController>,
    state: Mutex<DriverState>,
    status: StdMutex<Option<StatusCallback>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

// Shadow mirror and refresh timer only change under `state`, so deltas and ticks
// never interleave.
#[derive(Clone)]
pub struct ShadowSyncDriver {
    shared: Arc<DriverShared>,
}

impl ShadowSyncDriver {
    pub fn new(
        config: DriverConfig,
        broker: Arc<dyn RemoteBroker>,
        scheduler: Arc<dyn Scheduler>,
        controller: Arc<StageController>,
    ) -> Self {
        Self {
            shared: Arc::new(DriverShared {
                config,
                broker,
                scheduler,
                controller,
                state: Mutex::new(DriverState {
                    phase: DriverPhase::Disconnected,
                    shadow: ShadowState::default(),
                    refresh: None,
                    generation: 0,
                }),
                status: StdMutex::new(None),
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    pub fn register_text_updates_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub async fn phase(&self) -> DriverPhase {
        self.shared.state.lock().await.phase
    }

    pub async fn shadow(&self) -> ShadowState {
        self.shared.state.lock().await.shadow.clone()
    }

    pub async fn has_pending_refresh(&self) -> bool {
        self.shared.state.lock().await.refresh.is_some()
    }

    pub async fn start(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        self.show_text("Starting...");
        shared.state.lock().await.phase = DriverPhase::Connecting;

        bounded("connect", shared.config.connect_timeout, shared.broker.connect())
            .await
            .map_err(DriverError::Connect)?;

        let topic = shared.config.display_topic();
        let inbound = bounded(
            "subscribe",
            shared.config.operation_timeout,
            shared.broker.subscribe(&topic),
        )
        .await
        .map_err(|source| DriverError::Subscribe {
            topic: topic.clone(),
            source,
        })?;
        info!(%topic, "listening for display events");
        let forward = tokio::spawn(forward_display_events(inbound, shared.controller.clone()));

        let deltas = shared.broker.subscribe_deltas();
        let reconcile = tokio::spawn(apply_deltas(deltas, Arc::downgrade(shared)));
        {
            let mut state = shared.state.lock().await;
            if state.phase == DriverPhase::Disconnected {
                info!("driver stopped while starting");
                forward.abort();
                reconcile.abort();
                return Ok(());
            }
            self.track(forward);
            self.track(reconcile);
            state.phase = DriverPhase::ShadowRequested;
        }
        self.show_text("Fetching shadow...");
        let response = bounded(
            "shadow get",
            shared.config.shadow_get_timeout,
            shared.broker.get_shadow(),
        )
        .await
        .map_err(DriverError::ShadowGet)?;

        self.on_shadow_response(response.status, response.payload)
            .await;
        Ok(())
    }

    pub async fn on_shadow_response(&self, status: ShadowStatus, payload: Value) {
        info!(?status, "got shadow response");
        match status {
            ShadowStatus::Rejected => {
                self.shared.state.lock().await.phase = DriverPhase::Rejected;
                self.show_text(WELCOME_MESSAGE);
                let welcome = Event::message(TerminalStage::NAME, WELCOME_MESSAGE);
                self.shared
                    .controller
                    .dispatch(&welcome, &EventContext::local())
                    .await;
            }
            ShadowStatus::Accepted => {
                let reported = match serde_json::from_value::<ShadowDocument>(payload) {
                    Ok(document) => document.state.reported,
                    Err(error) => {
                        warn!(%error, "accepted shadow has no usable reported state");
                        ShadowState::default()
                    }
                };
                self.show_text("Got device shadow.");

                let mut state = self.shared.state.lock().await;
                if state.phase == DriverPhase::Disconnected {
                    debug!("driver stopped; shadow response ignored");
                    return;
                }
                state.shadow = reported;
                state.phase = DriverPhase::Accepted;
                self.arm_refresh(&mut state, self.shared.config.initial_refresh_delay);
                state.phase = DriverPhase::Synced;
            }
        }
    }

    pub async fn on_shadow_delta(&self, delta: ShadowDelta) {
        info!("got shadow update");
        let mut state = self.shared.state.lock().await;
        if state.phase == DriverPhase::Disconnected {
            debug!("driver stopped; shadow update ignored");
            return;
        }
        cancel_refresh(&mut state);
        state.shadow.apply_delta(delta);

        info!("acknowledging shadow update");
        let document = ShadowDocument::reported(state.shadow.clone());
        match bounded(
            "shadow update",
            self.shared.config.shadow_update_timeout,
            self.shared.broker.update_shadow(&document),
        )
        .await
        {
            Ok(()) => debug!("shadow update acknowledged"),
            Err(error) => warn!(%error, "failed to acknowledge shadow update"),
        }

        self.arm_refresh(&mut state, self.shared.config.initial_refresh_delay);
        state.phase = DriverPhase::Synced;
    }

    pub async fn on_refresh_tick(&self) {
        self.refresh_tick(None).await;
    }

    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock().await;
            cancel_refresh(&mut state);
            state.phase = DriverPhase::Disconnected;
            let tasks = std::mem::take(
                &mut *self
                    .shared
                    .tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            for task in tasks {
                task.abort();
            }
        }

        if let Err(error) = bounded(
            "disconnect",
            self.shared.config.connect_timeout,
            self.shared.broker.disconnect(),
        )
        .await
        {
            warn!(%error, "broker disconnect failed");
        }
    }

    async fn refresh_tick(&self, generation: Option<u64>) {
        let mut state = self.shared.state.lock().await;
        if state.phase == DriverPhase::Disconnected {
            debug!("driver stopped; refresh tick ignored");
            return;
        }
        match generation {
            Some(generation) => {
                let current = state.refresh.as_ref().map(|pending| pending.generation);
                if current != Some(generation) {
                    debug!(generation, "stale refresh tick ignored");
                    return;
                }
                // Dropped, not cancelled: under tokio the fired timer is the task
                // running this tick.
                drop(state.refresh.take());
            }
            None => cancel_refresh(&mut state),
        }

        self.send_data_request(&state.shadow).await;
        self.arm_refresh(&mut state, self.shared.config.refresh_interval);
        state.phase = DriverPhase::Synced;
    }

    async fn send_data_request(&self, shadow: &ShadowState) {
        let Some(stage) = shadow.stage.as_deref().filter(|stage| !stage.is_empty()) else {
            warn!("shadow has no stage; skipping data request");
            return;
        };
        let topic = producer_topic(stage);
        let request = DataRequest {
            client_id: self.shared.config.client_id.clone(),
            data: shadow.data.clone(),
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(error) => {
                error!(%error, "failed to encode data request");
                return;
            }
        };

        info!(%topic, "requesting stage data");
        if let Err(error) = bounded(
            "publish",
            self.shared.config.operation_timeout,
            self.shared.broker.publish(&topic, payload),
        )
        .await
        {
            warn!(%topic, %error, "data request publish failed");
        }
    }

    fn arm_refresh(&self, state: &mut DriverState, delay: Duration) {
        cancel_refresh(state);
        state.generation += 1;
        let generation = state.generation;
        let weak = Arc::downgrade(&self.shared);
        let handle = self.shared.scheduler.schedule(
            delay,
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    ShadowSyncDriver { shared }
                        .refresh_tick(Some(generation))
                        .await;
                }
            }),
        );
        debug!(generation, ?delay, "refresh timer armed");
        state.refresh = Some(PendingRefresh { generation, handle });
    }

    fn show_text(&self, text: &str) {
        let callback = self
            .shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            debug!(%text, "echo to device");
            callback(text);
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

fn cancel_refresh(state: &mut DriverState) {
    if let Some(pending) = state.refresh.take() {
        pending.handle.cancel();
    }
}

async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    future: impl Future<Output = Result<T, BrokerError>>,
) -> Result<T, BrokerError> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout { operation, timeout }),
    }
}

async fn forward_display_events(
    mut inbound: tokio::sync::broadcast::Receiver<BrokerMessage>,
    controller: Arc<StageController>,
) {
    loop {
        match inbound.recv().await {
            Ok(message) => {
                info!(topic = %message.topic, "got display event");
                match Event::from_json(&message.payload) {
                    Ok(event) => {
                        controller
                            .dispatch(&event, &EventContext::new(EventSource::Broker))
                            .await
                    }
                    Err(error) => warn!(%error, "dropping malformed display event"),
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "display events lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    debug!("display event subscription closed");
}

async fn apply_deltas(
    mut deltas: tokio::sync::broadcast::Receiver<Value>,
    driver: Weak<DriverShared>,
) {
    loop {
        let payload = match deltas.recv().await {
            Ok(payload) => payload,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "shadow deltas lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(shared) = driver.upgrade() else {
            break;
        };
        match serde_json::from_value::<ShadowDeltaMessage>(payload) {
            Ok(message) => ShadowSyncDriver { shared }.on_shadow_delta(message.state).await,
            Err(error) => warn!(%error, "dropping malformed shadow delta"),
        }
    }
    debug!("shadow delta subscription closed");
}

#[cfg(test)]
#[path = "tests/driver_tests.rs"]
mod tests;
