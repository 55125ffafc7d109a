use std::collections::VecDeque;

use anyhow::anyhow;
use async_trait::async_trait;
use shared::domain::{Event, EventContext};

use crate::{
    device::{Frame, SharedDevice},
    Stage,
};

/// Scrolling text console: new lines push old ones off the top.
pub struct Terminal {
    device: SharedDevice,
    lines: VecDeque<String>,
}

impl Terminal {
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            lines: VecDeque::new(),
        }
    }

    /// Wraps `text` at the device width, one row per embedded newline, and redraws.
    pub fn println(&mut self, text: &str) {
        let columns = self.device.columns().max(1);
        for raw in text.split('\n') {
            for row in wrap(raw, columns) {
                self.lines.push_back(row);
            }
        }
        while self.lines.len() > self.device.rows() {
            self.lines.pop_front();
        }
        self.flush();
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.flush();
    }

    pub fn flush(&self) {
        self.device.render(Frame::fit(
            self.lines.iter().cloned(),
            self.device.columns(),
            self.device.rows(),
        ));
    }
}

fn wrap(line: &str, columns: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(columns)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// `text`: prints `message` on a terminal. Also used to show the invalid stage notice.
pub struct TerminalStage {
    terminal: Terminal,
}

impl TerminalStage {
    pub const NAME: &'static str = "text";

    pub fn new(device: SharedDevice) -> Self {
        Self {
            terminal: Terminal::new(device),
        }
    }
}

#[async_trait]
impl Stage for TerminalStage {
    async fn handle(&mut self, event: &Event, _context: &EventContext) -> anyhow::Result<()> {
        let message = event
            .get_str("message")
            .ok_or_else(|| anyhow!("`{}` event requires a string `message`", event.stage))?;
        self.terminal.println(message);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/terminal_tests.rs"]
mod tests;
