use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use shared::domain::{Event, EventContext};
use tokio::{sync::watch, task::JoinHandle};

use super::{center, spawn_redraw};
use crate::{
    device::{Frame, SharedDevice},
    Stage,
};

pub const DEPARTURE_ROWS: usize = 4;
const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

// Column widths sized for "00:00", "Plat 88" and "Exp 00:00".
const TIME_WIDTH: usize = 5;
const PLATFORM_WIDTH: usize = 7;
const STATUS_WIDTH: usize = 9;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Departure {
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `train-display-board`: four departure rows over a ticking clock, fed by
/// `data.departures`.
///
/// ```text
/// 00:00  Edinburgh Waverley        Plat 2    On time
///                   20:00:00
/// ```
pub struct DepartureBoardStage {
    device: SharedDevice,
    board: watch::Sender<Vec<Departure>>,
    redraw: Option<JoinHandle<()>>,
}

impl DepartureBoardStage {
    pub const NAME: &'static str = "train-display-board";

    pub fn new(device: SharedDevice) -> Self {
        let (board, _) = watch::channel(Vec::new());
        Self {
            device,
            board,
            redraw: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.redraw
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn text(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or_default()
}

fn departure_row(departure: &Departure, columns: usize) -> String {
    let destination_width =
        columns.saturating_sub(TIME_WIDTH + 2 + 1 + PLATFORM_WIDTH + 1 + STATUS_WIDTH);
    let destination: String = text(&departure.destination)
        .chars()
        .take(destination_width)
        .collect();
    format!(
        "{time:<tw$}  {destination:<dw$} {platform:<pw$} {status:>sw$}",
        time = text(&departure.departure_time),
        platform = text(&departure.platform),
        status = text(&departure.status),
        tw = TIME_WIDTH,
        dw = destination_width,
        pw = PLATFORM_WIDTH,
        sw = STATUS_WIDTH,
    )
}

fn draw(device: &SharedDevice, departures: &[Departure]) {
    let columns = device.columns();
    let rows = device.rows();
    let slots = DEPARTURE_ROWS.min(rows.saturating_sub(1));

    let mut lines: Vec<String> = (0..slots)
        .map(|slot| {
            departures
                .get(slot)
                .map(|departure| departure_row(departure, columns))
                .unwrap_or_default()
        })
        .collect();
    let clock = Local::now().format("%H:%M:%S").to_string();
    lines.push(center(&clock, columns).trim_end().to_string());
    device.render(Frame::fit(lines, columns, rows));
}

#[async_trait]
impl Stage for DepartureBoardStage {
    fn start(&mut self) {
        let device = self.device.clone();
        self.redraw = Some(spawn_redraw(
            Self::NAME,
            self.board.subscribe(),
            REDRAW_INTERVAL,
            move |departures| draw(&device, departures),
        ));
    }

    fn stop(&mut self) {
        if let Some(handle) = self.redraw.take() {
            handle.abort();
        }
    }

    async fn handle(&mut self, event: &Event, _context: &EventContext) -> anyhow::Result<()> {
        let raw = event
            .get("data")
            .and_then(|data| data.get("departures"))
            .cloned()
            .context("`train-display-board` event requires `data.departures`")?;
        let departures: Vec<Departure> =
            serde_json::from_value(raw).context("`data.departures` must be a list of departures")?;
        self.board
            .send_replace(departures.into_iter().take(DEPARTURE_ROWS).collect());
        Ok(())
    }
}

impl Drop for DepartureBoardStage {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "../tests/departures_tests.rs"]
mod tests;
