use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context;
use clap::Parser;
use shadow_sync::{LoopbackBroker, ShadowSyncDriver, TokioScheduler};
use stage_core::{stages::Terminal, ConsoleDevice, SharedDevice, StageController, StageRegistry};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod subscriber;

use app_state::{AppState, LoopbackControl};
use config::{load_settings, BrokerMode, Settings};

#[derive(Parser, Debug)]
#[command(name = "displayd", about = "Drives a character display from stage events")]
struct Args {
    /// Settings file; missing files are ignored.
    #[arg(long, env = "DISPLAY_CONFIG", default_value = "display.toml")]
    config: PathBuf,
    #[arg(long)]
    http_bind: Option<String>,
    /// Websocket endpoint that streams display events.
    #[arg(long)]
    subscribe_url: Option<String>,
    #[arg(long, value_enum)]
    broker: Option<BrokerMode>,
    #[arg(long)]
    client_id: Option<String>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.http_bind {
            settings.http_bind = v;
        }
        if let Some(v) = self.subscribe_url {
            settings.subscribe_url = Some(v);
        }
        if let Some(v) = self.broker {
            settings.broker = v;
        }
        if let Some(v) = self.client_id {
            settings.client_id = v;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings(&args.config);
    args.apply(&mut settings);

    let device: SharedDevice = Arc::new(ConsoleDevice::new(
        settings.display_columns,
        settings.display_rows,
    ));
    let registry = StageRegistry::with_builtin_stages();
    info!(
        device = device.name(),
        columns = device.columns(),
        rows = device.rows(),
        stages = ?registry.names(),
        "display ready"
    );
    let controller = Arc::new(StageController::new(registry, device.clone()));

    let addr: SocketAddr = settings
        .http_bind
        .parse()
        .with_context(|| format!("invalid http_bind: {}", settings.http_bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "display server listening");

    let mut banner = Terminal::new(device.clone());
    banner.println(&format!("Listening on http://{addr}/display"));

    let subscription = match settings.subscribe_url.as_deref() {
        Some(raw) => {
            let url = subscriber::parse_subscribe_url(raw)?;
            banner.println(&format!("Subscribed to {url}"));
            Some(subscriber::spawn_subscriber(url, controller.clone()))
        }
        None => None,
    };

    let loopback = match settings.broker {
        BrokerMode::Loopback => {
            let broker = Arc::new(LoopbackBroker::new());
            let driver = ShadowSyncDriver::new(
                settings.driver_config(),
                broker.clone(),
                Arc::new(TokioScheduler),
                controller.clone(),
            );
            let status = Mutex::new(Terminal::new(device.clone()));
            driver.register_text_updates_callback(move |text| {
                status
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .println(text);
            });
            if let Err(error) = driver.start().await {
                error!(%error, "shadow sync failed to start");
                banner.println(&format!("Shadow sync unavailable: {error}"));
            }
            banner.println(&format!("Desired state: http://{addr}/shadow/desired"));
            Some(LoopbackControl { broker, driver })
        }
        BrokerMode::None => None,
    };
    let driver = loopback.as_ref().map(|control| control.driver.clone());

    let app = api::build_router(Arc::new(AppState {
        controller: controller.clone(),
        loopback,
    }));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    if let Some(driver) = driver {
        driver.stop().await;
    }
    if let Some(subscription) = subscription {
        subscription.abort();
    }
    controller.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
