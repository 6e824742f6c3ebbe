//! Watch registry: kernel watch id -> watched directory
//!
//! The trailing separator of a stored path encodes how the watch behaves:
//! `/srv/data` is recursive (every current and future subdirectory gets its
//! own watch), `/srv/data/` is shallow (immediate children only). Every
//! descendant of a recursive watch is itself recursive.
//!
//! Entries are only erased when the kernel confirms a watch is gone
//! (`IN_IGNORED`); removal requests never touch the registry directly.

use ahash::AHashMap;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Kernel watch descriptor
///
/// Valid only while the watch is active. The kernel keeps the same id when
/// a watched directory is renamed in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(i32);

impl WatchId {
    /// Wrap a raw descriptor as returned by `inotify_add_watch`
    pub const fn from_raw(wd: i32) -> Self {
        Self(wd)
    }

    /// Raw descriptor value
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Whether `path` names a shallow watch (ends with `/`)
pub fn is_shallow(path: &Path) -> bool {
    path.as_os_str().as_bytes().last() == Some(&b'/')
}

/// One registered watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    /// Absolute directory path, trailing `/` for shallow watches
    pub path: PathBuf,

    /// Set when a move-in recycled this watch; suppresses exactly one
    /// following `IN_MOVE_SELF` removal
    pub recycled_by_move: bool,

    /// Removal was requested and the kernel's `IN_IGNORED` is pending; the
    /// recorded path may already belong to another watch
    pub removing: bool,
}

impl WatchEntry {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            recycled_by_move: false,
            removing: false,
        }
    }

    /// Whether descendants of this directory are watched too
    pub fn is_recursive(&self) -> bool {
        !is_shallow(&self.path)
    }
}

/// Mapping of live watch ids to their entries
///
/// Holds at most one entry per id. Not synchronized: a registry belongs to
/// exactly one watcher instance.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    entries: AHashMap<WatchId, WatchEntry>,
}

impl WatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Path recorded for `id`
    pub fn lookup(&self, id: WatchId) -> Option<&Path> {
        self.entries.get(&id).map(|entry| entry.path.as_path())
    }

    /// Full entry for `id`
    pub fn get(&self, id: WatchId) -> Option<&WatchEntry> {
        self.entries.get(&id)
    }

    /// Record a freshly created watch
    pub fn insert(&mut self, id: WatchId, path: PathBuf) {
        self.entries.insert(id, WatchEntry::new(path));
    }

    /// Rewrite the path of an existing watch in place
    ///
    /// Used when the kernel hands back an id we already know under a
    /// different path: the directory was renamed and its watch followed it.
    /// Returns the previous path, or `None` if `id` is unknown.
    pub fn reassociate(&mut self, id: WatchId, path: PathBuf) -> Option<PathBuf> {
        self.entries
            .get_mut(&id)
            .map(|entry| std::mem::replace(&mut entry.path, path))
    }

    /// Erase the entry for `id`
    pub fn remove(&mut self, id: WatchId) -> Option<WatchEntry> {
        self.entries.remove(&id)
    }

    /// Flag `id` as recycled by a move-in
    pub fn mark_recycled(&mut self, id: WatchId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.recycled_by_move = true;
        }
    }

    /// Flag `id` as waiting for its `IN_IGNORED`
    pub fn mark_removing(&mut self, id: WatchId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.removing = true;
        }
    }

    /// Clear the recycle flag of `id`, returning whether it was set
    pub fn take_recycled(&mut self, id: WatchId) -> bool {
        self.entries
            .get_mut(&id)
            .map(|entry| std::mem::take(&mut entry.recycled_by_move))
            .unwrap_or(false)
    }

    /// Live ids whose recorded path lies at or below `root`
    ///
    /// Membership is decided on recorded paths alone: a moved-out directory
    /// may no longer exist where the registry last saw it. Entries already
    /// being removed are skipped.
    pub fn ids_under(&self, root: &Path) -> impl Iterator<Item = WatchId> + '_ {
        let root = root.to_path_buf();
        self.entries
            .iter()
            .filter(move |(_, entry)| !entry.removing && entry.path.starts_with(&root))
            .map(|(id, _)| *id)
    }

    /// Live id watching `path`, ignoring a trailing separator
    pub fn find_path(&self, path: &Path) -> Option<WatchId> {
        self.entries
            .iter()
            .find(|(_, entry)| !entry.removing && same_directory(&entry.path, path))
            .map(|(id, _)| *id)
    }

    /// Iterate every entry
    pub fn iter(&self) -> impl Iterator<Item = (WatchId, &WatchEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Number of registered watches
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no watches are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether two recorded paths name the same directory, whatever their
/// recursion class
fn same_directory(a: &Path, b: &Path) -> bool {
    trim_separator(a) == trim_separator(b)
}

fn trim_separator(path: &Path) -> &[u8] {
    let bytes = path.as_os_str().as_bytes();
    match bytes {
        [rest @ .., b'/'] if !rest.is_empty() => rest,
        _ => bytes,
    }
}
