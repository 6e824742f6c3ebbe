//! Recursive directory watching for Treewatch
//!
//! inotify only reports changes to the immediate children of a watched
//! directory. This crate builds recursive subtree monitoring on top of it:
//! - Watches follow newly created and moved-in subdirectories
//! - Watches are dropped for moved-out subtrees
//! - Renamed directories keep their watch (the kernel recycles the id)
//! - Trees copied in faster than watches can be installed are still
//!   reported, at least once per entry
//!
//! A path without a trailing `/` is watched recursively; `dir/` watches only
//! the immediate children of `dir`.
//!
//! ```no_run
//! use std::time::Duration;
//! use watcher::Watcher;
//!
//! let mut watcher = Watcher::init()?;
//! watcher.add_watch("/home/user1", true)?; // /home/user1/**/
//! watcher.add_watch("/home/user2/", true)?; // /home/user2/*/
//! while let Some(event) = watcher.read(Some(Duration::from_secs(5)), Duration::ZERO)? {
//!     println!("{}\t({})", event.path.display(), event.mask);
//! }
//! # Ok::<(), watcher::WatchError>(())
//! ```
//!
//! A watcher is single-threaded: one owner calls [`Watcher::read`] in a
//! loop, and nothing runs in the background.

#[cfg(not(target_os = "linux"))]
compile_error!("the watcher crate is built on Linux inotify");

pub mod buffer;
pub mod config;
mod dispatch;
pub mod error;
mod install;
pub mod kernel;
pub mod mask;
pub mod registry;
pub mod sink;

pub use config::WatchConfig;
pub use dispatch::MAX_COALESCE_DELAY;
pub use error::{Result, WatchError};
pub use mask::EventMask;
pub use registry::WatchId;
pub use sink::{LogSink, SyslogSink, TracingSink};

use buffer::EventBuffer;
use kernel::Inotify;
use registry::WatchRegistry;
use smallvec::SmallVec;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Recursive inotify watcher
///
/// Owns the inotify descriptor, the registry of live watches and the event
/// buffer. Dropping it closes the descriptor and with it every watch.
#[derive(Debug)]
pub struct Watcher<L: LogSink = TracingSink> {
    log: L,
    inotify: Inotify,
    /// Bits the caller wants reported; applied to every watch
    interest: EventMask,
    registry: WatchRegistry,
    buffer: EventBuffer,
}

impl Watcher<TracingSink> {
    /// Watcher reporting every event kind, logging through `tracing`
    pub fn init() -> Result<Self> {
        Self::new(TracingSink, EventMask::ALL_EVENTS)
    }
}

impl<L: LogSink> Watcher<L> {
    /// Create a watcher that reports events matching `interest`
    ///
    /// There is a single interest mask for all watches: subdirectories are
    /// picked up implicitly, so they could not carry masks of their own.
    pub fn new(log: L, interest: EventMask) -> Result<Self> {
        let inotify = match Inotify::init() {
            Ok(inotify) => inotify,
            Err(err) => {
                log.log(format_args!("Error: inotify_init1() - {}", err));
                return Err(WatchError::Init(err));
            }
        };

        Ok(Self {
            log,
            inotify,
            interest,
            registry: WatchRegistry::new(),
            buffer: EventBuffer::new(),
        })
    }

    /// Create a watcher from configuration and watch every configured root
    pub fn from_config(config: &WatchConfig, log: L) -> Result<Self> {
        config.validate()?;
        let mut watcher = Self::new(log, config.interest()?)?;
        for root in &config.roots {
            watcher.add_watch(root, true)?;
        }
        Ok(watcher)
    }

    /// Watch the directory at `path`
    ///
    /// `path` must be an existing, readable directory; anything else is
    /// logged and reported as `Ok(None)`. Without a trailing `/` the whole
    /// subtree is watched.
    ///
    /// With `in_move` set, existing subdirectories are watched silently
    /// before anything is reported. This is right both for directories
    /// that already existed and for ones that were just moved in. Without
    /// it, the current children are queued as `CREATE` events for the next
    /// [`read`](Self::read), possibly duplicating events the kernel reports
    /// on its own.
    ///
    /// Only the id of `path` itself is returned.
    pub fn add_watch(&mut self, path: impl AsRef<Path>, in_move: bool) -> Result<Option<WatchId>> {
        Ok(self
            .install(path.as_ref(), in_move)?
            .map(|(id, _)| id))
    }

    /// Ask the kernel to remove a watch
    ///
    /// The registry entry goes away once the matching `IGNORED` record has
    /// been read; until then it is no longer matched by path. Failures are
    /// logged, never returned.
    pub fn remove_watch(&mut self, id: WatchId) {
        self.registry.mark_removing(id);
        if let Err(err) = self.inotify.rm_watch(id) {
            self.log.log(format_args!(
                "Warning: inotify_rm_watch():{} - {}",
                err.raw_os_error().unwrap_or(0),
                err
            ));
        }
    }

    /// Remove every tracked watch; the watcher stays usable
    pub fn remove_all_watches(&mut self) {
        let ids: SmallVec<[WatchId; 16]> = self.registry.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.remove_watch(id);
        }
    }

    /// Directory watched by `id`
    pub fn lookup_path(&self, id: WatchId) -> Result<&Path> {
        self.registry.lookup(id).ok_or(WatchError::NotFound(id))
    }

    /// Every live watch and its path
    pub fn watches(&self) -> impl Iterator<Item = (WatchId, &Path)> {
        self.registry.iter().map(|(id, entry)| (id, entry.path.as_path()))
    }

    /// Number of live watches
    pub fn watch_count(&self) -> usize {
        self.registry.len()
    }

    /// Id watching `path`, whichever its recursion class
    pub fn find_watch(&self, path: impl AsRef<Path>) -> Option<WatchId> {
        self.registry.find_path(path.as_ref())
    }

    /// Event kinds reported by [`read`](Self::read)
    pub fn interest(&self) -> EventMask {
        self.interest
    }

    /// Log a fatal condition and hand it back for returning
    fn fail(&self, err: WatchError) -> WatchError {
        self.log.log(format_args!("Error: {}", err));
        debug!(error = %err, "watcher stream failure");
        err
    }
}

/// One reported change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Watch the event arrived on
    pub watch: WatchId,
    /// Change bits, including `ISDIR` for directories
    pub mask: EventMask,
    /// Pairs `MOVED_FROM` with `MOVED_TO`, zero otherwise
    pub cookie: u32,
    /// Child name, empty for events about the watched directory itself
    pub name: OsString,
    /// Watched directory joined with `name`, resolved when the event was read
    pub path: PathBuf,
}

impl WatchEvent {
    /// Whether the subject is a directory
    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }

    /// Primary kind of this event
    pub fn kind(&self) -> EventKind {
        EventKind::from_mask(self.mask)
    }
}

/// Type of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Entry created
    Create,
    /// File modified
    Modify,
    /// Entry deleted
    Delete,
    /// Entry moved out of a watched directory
    MoveFrom,
    /// Entry moved into a watched directory
    MoveTo,
    /// Watched directory itself moved
    MoveSelf,
    /// Watched directory itself deleted
    DeleteSelf,
    /// Metadata changed
    Attrib,
    /// File read
    Access,
    /// File opened
    Open,
    /// File closed
    Close,
    /// Watch removed
    Ignored,
    /// Kernel queue overflowed
    Overflow,
    /// Filesystem unmounted
    Unmount,
    /// No known bit set
    Other,
}

impl EventKind {
    /// Classify a mask by its most significant change bit
    pub fn from_mask(mask: EventMask) -> Self {
        const ORDER: [(EventMask, EventKind); 14] = [
            (EventMask::Q_OVERFLOW, EventKind::Overflow),
            (EventMask::IGNORED, EventKind::Ignored),
            (EventMask::UNMOUNT, EventKind::Unmount),
            (EventMask::CREATE, EventKind::Create),
            (EventMask::DELETE, EventKind::Delete),
            (EventMask::MOVED_FROM, EventKind::MoveFrom),
            (EventMask::MOVED_TO, EventKind::MoveTo),
            (EventMask::MOVE_SELF, EventKind::MoveSelf),
            (EventMask::DELETE_SELF, EventKind::DeleteSelf),
            (EventMask::MODIFY, EventKind::Modify),
            (EventMask::ATTRIB, EventKind::Attrib),
            (EventMask::CLOSE, EventKind::Close),
            (EventMask::OPEN, EventKind::Open),
            (EventMask::ACCESS, EventKind::Access),
        ];

        ORDER
            .iter()
            .find(|(bits, _)| mask.intersects(*bits))
            .map(|(_, kind)| *kind)
            .unwrap_or(EventKind::Other)
    }
}
