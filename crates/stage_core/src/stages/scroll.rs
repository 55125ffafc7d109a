use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use shared::domain::{Event, EventContext};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    device::{Frame, SharedDevice},
    Stage,
};

pub const SCROLL_STEP: Duration = Duration::from_millis(25);

/// `scroll`: slides `message` in from the right edge of the top row and off the left.
/// A new message or `stop` ends the scroll in progress.
pub struct ScrollStage {
    device: SharedDevice,
    scroll: Option<JoinHandle<()>>,
}

impl ScrollStage {
    pub const NAME: &'static str = "scroll";

    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            scroll: None,
        }
    }

    pub fn is_scrolling(&self) -> bool {
        self.scroll
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Every window the top row shows while `message` crosses a `columns` wide display,
/// moving `speed` cells per step.
pub fn scroll_frames(message: &str, columns: usize, speed: usize) -> Vec<String> {
    let text: Vec<char> = message.chars().collect();
    let blank = std::iter::repeat(' ').take(columns);
    let track: Vec<char> = blank
        .clone()
        .chain(text.iter().copied())
        .chain(blank)
        .collect();

    (0..columns + text.len())
        .step_by(speed.max(1))
        .map(|offset| track[offset..offset + columns].iter().collect())
        .collect()
}

#[async_trait]
impl Stage for ScrollStage {
    fn stop(&mut self) {
        if let Some(handle) = self.scroll.take() {
            handle.abort();
        }
    }

    async fn handle(&mut self, event: &Event, _context: &EventContext) -> anyhow::Result<()> {
        let message = event
            .get_str("message")
            .context("`scroll` event requires a `message` string")?;
        let speed = match event.get("speed") {
            None => 1,
            Some(speed) => match speed.as_u64() {
                Some(speed) if speed > 0 => usize::try_from(speed)?,
                _ => bail!("`speed` must be a positive integer"),
            },
        };

        self.stop();
        let frames = scroll_frames(message, self.device.columns(), speed);
        let device = self.device.clone();
        debug!(steps = frames.len(), "scrolling message");
        self.scroll = Some(tokio::spawn(async move {
            let rows = device.rows();
            let columns = device.columns();
            for line in frames {
                device.render(Frame::fit([line], columns, rows));
                tokio::time::sleep(SCROLL_STEP).await;
            }
        }));
        Ok(())
    }
}

impl Drop for ScrollStage {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "../tests/scroll_tests.rs"]
mod tests;
