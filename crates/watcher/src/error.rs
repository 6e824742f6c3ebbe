//! Error types for the watcher
//!
//! Per-path install failures are not errors: they are logged and reported
//! as `Ok(None)` by [`Watcher::add_watch`](crate::Watcher::add_watch).
//! Everything here is either a stream failure, after which the instance
//! should be rebuilt, or a local misuse such as an unknown id.

use crate::registry::WatchId;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors raised by [`Watcher`](crate::Watcher)
#[derive(Debug, Error)]
pub enum WatchError {
    /// inotify instance could not be created
    #[error("failed to initialize inotify: {0}")]
    Init(#[source] io::Error),

    /// Waiting for the inotify descriptor to become readable failed
    #[error("poll() failed: {0}")]
    Poll(#[source] io::Error),

    /// Reading the inotify descriptor failed
    #[error("read() failed: {0}")]
    Read(#[source] io::Error),

    /// The kernel returned zero bytes, possibly because too many events
    /// occurred at once
    #[error("read() returned no data (event queue overflow?)")]
    EmptyRead,

    /// A record claims more bytes than the buffer holds
    #[error("incomplete event record at offset {offset} (buffer holds {len} bytes)")]
    Truncated { offset: usize, len: usize },

    /// The kernel dropped events because its queue filled up
    #[error("inotify event queue overflowed; watches must be rebuilt")]
    QueueOverflow,

    /// A record references a watch the registry does not know, which means
    /// the kernel dropped events
    #[error("event for unknown watch {0} (possibly IN_Q_OVERFLOW)")]
    UnknownWatch(WatchId),

    /// Synthetic create records did not fit in the event buffer
    #[error("event buffer overflow: {needed} bytes needed, capacity {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },

    /// `lookup_path` on an id that is not registered
    #[error("watch {0} not found")]
    NotFound(WatchId),

    /// Coalescing delay outside 0..=1000 ms
    #[error("coalescing delay {0:?} exceeds 1000 ms")]
    InvalidCoalesceDelay(Duration),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WatchError {
    /// Whether this error leaves the event stream unusable
    ///
    /// Fatal errors mean the kernel queue may have silently lost data; the
    /// caller must re-create the watcher and re-register its roots.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WatchError::NotFound(_)
                | WatchError::InvalidCoalesceDelay(_)
                | WatchError::Config(_)
        )
    }
}
