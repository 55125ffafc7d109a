//! Built-in stages.

mod clock;
mod departures;
mod metrics;
mod scroll;
mod terminal;

use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

pub use clock::ClockStage;
pub use departures::{Departure, DepartureBoardStage};
pub use metrics::{Metric, MetricsStage};
pub use scroll::{scroll_frames, ScrollStage};
pub use terminal::{Terminal, TerminalStage};

// Redraws on every tick and whenever `feed` changes; ends when the sender is dropped.
fn spawn_redraw<T, F>(
    stage: &'static str,
    mut feed: watch::Receiver<T>,
    every: Duration,
    draw: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = feed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let current = feed.borrow_and_update().clone();
            draw(&current);
        }
        debug!(stage, "redraw loop finished");
    })
}

fn center(text: &str, width: usize) -> String {
    let clipped: String = text.chars().take(width).collect();
    let len = clipped.chars().count();
    let left = (width - len) / 2;
    format!("{}{clipped}{}", " ".repeat(left), " ".repeat(width - len - left))
}
