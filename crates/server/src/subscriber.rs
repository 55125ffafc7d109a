use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use futures::StreamExt;
use shared::domain::{Event, EventContext, EventSource};
use stage_core::StageController;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

pub(crate) const MIN_BACKOFF: Duration = Duration::from_secs(1);
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Accepts `ws://` and `wss://` urls only.
pub(crate) fn parse_subscribe_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid subscribe url: {raw}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(anyhow!(
            "subscribe url must start with ws:// or wss://, got {other}://"
        )),
    }
}

pub(crate) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Parses one text frame as an event and dispatches it. Returns false for frames that
/// are not events.
pub(crate) async fn dispatch_frame(controller: &StageController, text: &str) -> bool {
    match Event::from_json(text.as_bytes()) {
        Ok(event) => {
            info!(stage = %event.stage, "display event from subscription");
            controller
                .dispatch(&event, &EventContext::new(EventSource::Subscription))
                .await;
            true
        }
        Err(error) => {
            warn!(%error, "skipping malformed subscription frame");
            false
        }
    }
}

/// Keeps a websocket subscription to `url` open for the life of the task, reconnecting
/// with exponential backoff. Abort the handle to stop it.
pub(crate) fn spawn_subscriber(url: Url, controller: Arc<StageController>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = MIN_BACKOFF;
        loop {
            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!(%url, "subscribed to display events");
                    backoff = MIN_BACKOFF;
                    let (_, mut ws_reader) = ws_stream.split();
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(Message::Text(text)) => {
                                dispatch_frame(&controller, &text).await;
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(error) => {
                                warn!(%error, "subscription read failed");
                                break;
                            }
                        }
                    }
                    warn!(%url, "subscription closed");
                }
                Err(error) => warn!(%url, %error, "failed to connect subscription"),
            }

            debug!(?backoff, "reconnecting subscription after backoff");
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    })
}

#[cfg(test)]
#[path = "tests/subscriber_tests.rs"]
mod tests;
