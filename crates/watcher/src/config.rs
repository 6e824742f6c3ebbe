//! Watcher configuration
//!
//! ```toml
//! roots = ["/home/user1", "/home/user2/"]
//! events = ["create", "delete", "move"]
//! timeout_ms = 5000
//! coalesce_delay_ms = 100
//! ```

use crate::dispatch::MAX_COALESCE_DELAY;
use crate::error::{Result, WatchError};
use crate::mask::EventMask;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Watcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directories to watch; a trailing `/` watches immediate children only
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Event names to report (default: all events)
    #[serde(default)]
    pub events: Vec<String>,

    /// How long one read waits; absent means forever
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Delay between readiness and reading, 0-1000 ms (default: 0)
    #[serde(default)]
    pub coalesce_delay_ms: u64,
}

impl WatchConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| WatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Check value ranges and event names
    pub fn validate(&self) -> Result<()> {
        if self.coalesce_delay() > MAX_COALESCE_DELAY {
            return Err(WatchError::Config(format!(
                "coalesce_delay_ms must be 0-1000, got {}",
                self.coalesce_delay_ms
            )));
        }
        self.interest()?;
        Ok(())
    }

    /// Interest mask built from `events`
    pub fn interest(&self) -> Result<EventMask> {
        if self.events.is_empty() {
            return Ok(EventMask::ALL_EVENTS);
        }
        EventMask::parse_list(self.events.iter().map(String::as_str))
            .map_err(|name| WatchError::Config(format!("unknown event name '{}'", name)))
    }

    /// Read timeout; `None` blocks
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Coalescing delay
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }
}
