use std::{fmt::Write as _, time::Duration};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{
    format::{Item, StrftimeItems},
    Local,
};
use shared::domain::{Event, EventContext};
use tokio::{sync::watch, task::JoinHandle};

use super::spawn_redraw;
use crate::{
    device::{Frame, SharedDevice},
    Stage,
};

const DEFAULT_FORMAT: &str = "%H:%M:%S";
const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClockFace {
    format: String,
    label: Option<String>,
}

impl Default for ClockFace {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            label: None,
        }
    }
}

/// `clock`: redraws the local time every second on its own task until stopped.
/// Events may change the `format` (strftime) and an optional `label` line.
pub struct ClockStage {
    device: SharedDevice,
    face: watch::Sender<ClockFace>,
    redraw: Option<JoinHandle<()>>,
}

impl ClockStage {
    pub const NAME: &'static str = "clock";

    pub fn new(device: SharedDevice) -> Self {
        let (face, _) = watch::channel(ClockFace::default());
        Self {
            device,
            face,
            redraw: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.redraw
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn draw(device: &SharedDevice, face: &ClockFace) {
    let mut now = String::new();
    if write!(now, "{}", Local::now().format(&face.format)).is_err() {
        now = "--:--:--".to_string();
    }
    let mut lines = vec![now];
    if let Some(label) = &face.label {
        lines.push(label.clone());
    }
    device.render(Frame::fit(lines, device.columns(), device.rows()));
}

#[async_trait]
impl Stage for ClockStage {
    fn start(&mut self) {
        let device = self.device.clone();
        self.redraw = Some(spawn_redraw(
            Self::NAME,
            self.face.subscribe(),
            REDRAW_INTERVAL,
            move |face| draw(&device, face),
        ));
    }

    fn stop(&mut self) {
        if let Some(handle) = self.redraw.take() {
            handle.abort();
        }
    }

    async fn handle(&mut self, event: &Event, _context: &EventContext) -> anyhow::Result<()> {
        let mut face = self.face.borrow().clone();
        if let Some(format) = event.get_str("format") {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                bail!("invalid clock format `{format}`");
            }
            face.format = format.to_string();
        }
        if let Some(label) = event.get("label") {
            face.label = label.as_str().map(str::to_string);
        }
        self.face.send_replace(face);
        Ok(())
    }
}

impl Drop for ClockStage {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "../tests/clock_tests.rs"]
mod tests;
