//! Event line rendering

use owo_colors::OwoColorize;
use serde_json::json;
use watcher::WatchEvent;

/// How events are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `path<TAB>(MASK)`
    Plain,
    /// Plain with the mask highlighted
    Color,
    /// One JSON object per line
    Json,
}

impl Format {
    pub fn render(self, event: &WatchEvent) -> String {
        match self {
            Format::Plain => format!("{}\t({})", event.path.display(), event.mask),
            Format::Color => {
                let mask = format!("({})", event.mask);
                if event.is_dir() {
                    format!("{}\t{}", event.path.display(), mask.cyan())
                } else {
                    format!("{}\t{}", event.path.display(), mask.yellow())
                }
            }
            Format::Json => json!({
                "time": chrono::Local::now().to_rfc3339(),
                "watch": event.watch.as_raw(),
                "path": event.path.to_string_lossy(),
                "mask": event.mask.to_string(),
                "cookie": event.cookie,
                "dir": event.is_dir(),
            })
            .to_string(),
        }
    }
}
