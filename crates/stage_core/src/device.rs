use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

/// One full redraw of a character-cell display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub lines: Vec<String>,
}

impl Frame {
    /// Clips `lines` to the device geometry; anything past the last row or column is dropped.
    pub fn fit(lines: impl IntoIterator<Item = String>, columns: usize, rows: usize) -> Self {
        Self {
            lines: lines
                .into_iter()
                .take(rows)
                .map(|line| line.chars().take(columns).collect())
                .collect(),
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// The physical (or emulated) display a stage draws on.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    fn columns(&self) -> usize;
    fn rows(&self) -> usize;
    fn render(&self, frame: Frame);
}

pub type SharedDevice = Arc<dyn Device>;

/// Keeps every rendered frame. Used headless and in tests.
pub struct MemoryDevice {
    columns: usize,
    rows: usize,
    frames: Mutex<Vec<Frame>>,
}

impl MemoryDevice {
    pub fn new(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn last_text(&self) -> String {
        self.last_frame().map(|frame| frame.text()).unwrap_or_default()
    }
}

impl Device for MemoryDevice {
    fn name(&self) -> &str {
        "memory"
    }

    fn columns(&self) -> usize {
        self.columns
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn render(&self, frame: Frame) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }
}

/// Emulated display that writes each frame to the log.
pub struct ConsoleDevice {
    columns: usize,
    rows: usize,
}

impl ConsoleDevice {
    pub fn new(columns: usize, rows: usize) -> Self {
        Self { columns, rows }
    }
}

impl Device for ConsoleDevice {
    fn name(&self) -> &str {
        "console"
    }

    fn columns(&self) -> usize {
        self.columns
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn render(&self, frame: Frame) {
        let border = "-".repeat(self.columns + 2);
        let mut out = String::with_capacity((self.columns + 3) * (self.rows + 2));
        out.push_str(&border);
        for row in 0..self.rows {
            let line = frame.lines.get(row).map(String::as_str).unwrap_or_default();
            out.push_str(&format!("\n|{line:<width$}|", width = self.columns));
        }
        out.push('\n');
        out.push_str(&border);
        info!(target: "display", "\n{out}");
    }
}
