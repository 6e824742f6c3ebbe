//! Recursive watch installation
//!
//! Installing a watch classifies the result as new, duplicate or moved,
//! then either attaches watches to every existing subdirectory without
//! reporting anything (moved-in or pre-existing trees) or queues synthetic
//! `CREATE` records for the current children (freshly created
//! directories).
//!
//! A directory copied into a recursive watch can be populated before its
//! own watch exists, and inotify never reports those children. Listing
//! them once the watch is in place closes that gap, at the cost of
//! duplicates for children the kernel reports as well: delivery is at
//! least once.
//!
//! Listing a directory opens, reads and closes it, which its own watch and
//! its parent's would report. While an install runs, every watch it lists
//! through is held at a mask without those bits and restored afterwards.
//! Opens and reads by other processes inside that window are not reported.

use crate::error::Result;
use crate::mask::EventMask;
use crate::registry::{is_shallow, WatchId};
use crate::sink::LogSink;
use crate::Watcher;
use smallvec::SmallVec;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Bits raised by listing a watched directory
const LISTING_NOISE: EventMask =
    EventMask::from_bits_retain(libc::IN_OPEN | libc::IN_ACCESS | libc::IN_CLOSE_NOWRITE);

/// Watches running without the listing bits until an install finishes
type Lowered = SmallVec<[WatchId; 8]>;

/// How an install resolved against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    /// Kernel created a new watch
    Created,
    /// Path was already watched under the same name
    Duplicate,
    /// Kernel returned a known id under another path; the watch followed a
    /// rename or became recursive
    Reassociated,
}

impl<L: LogSink> Watcher<L> {
    /// Install a watch on `path` and bring up its subtree
    ///
    /// `None` means the path could not be watched; the reason has been
    /// logged. Errors are fatal for the current read cycle.
    pub(crate) fn install(&mut self, path: &Path, in_move: bool) -> Result<Option<(WatchId, Attach)>> {
        let mut lowered = Lowered::new();
        if self.quiet_listing() {
            let parent = path.parent().and_then(|parent| self.registry.find_path(parent));
            if let Some(id) = parent.and_then(|parent| self.set_mask(parent, true)) {
                lowered.push(id);
            }
        }

        let result = self.bring_up(path, in_move, &mut lowered);

        // every listing handle is closed by now
        for id in lowered {
            self.set_mask(id, false);
        }
        result
    }

    fn bring_up(
        &mut self,
        path: &Path,
        in_move: bool,
        lowered: &mut Lowered,
    ) -> Result<Option<(WatchId, Attach)>> {
        let Some((id, outcome)) = self.attach(path, lowered) else {
            return Ok(None);
        };
        if outcome == Attach::Duplicate {
            return Ok(Some((id, outcome)));
        }

        let recursive = !is_shallow(path);
        if in_move {
            // Children of a moved-in tree arrive together with it, so the
            // kernel will never report them. Watch the subdirectories now,
            // silently, before anything below them can be reported.
            if recursive {
                self.attach_descendants(path, lowered);
            }
        } else {
            self.queue_children(id, path, recursive)?;
        }

        Ok(Some((id, outcome)))
    }

    /// Whether listings would be reported under the current interest
    fn quiet_listing(&self) -> bool {
        self.interest.intersects(LISTING_NOISE)
    }

    /// Kernel mask for a watch of the given class
    ///
    /// Shallow watches never hear about created or moved-in children unless
    /// the caller asked for those bits, so their subdirectories are never
    /// picked up.
    fn watch_mask(&self, recursive: bool, quiet: bool) -> u32 {
        let mut interest = self.interest & EventMask::ALL_EVENTS;
        if quiet {
            interest.remove(LISTING_NOISE);
        }

        let mut mask = interest.bits() | libc::IN_ONLYDIR | libc::IN_MOVE_SELF;
        if recursive {
            mask |= libc::IN_CREATE | libc::IN_MOVED_TO;
        }
        mask
    }

    /// Re-issue the kernel watch recorded as `id` with the quiet or the full
    /// mask, returning the id the kernel answered with
    ///
    /// Lowering replaces the mask, restoring adds to it. If the recorded
    /// path names another directory by now, that directory's watch is what
    /// got changed and it is registered like any other.
    fn set_mask(&mut self, id: WatchId, quiet: bool) -> Option<WatchId> {
        let entry = self.registry.get(id)?;
        let path = entry.path.clone();
        let mut mask = self.watch_mask(entry.is_recursive(), quiet);
        if !quiet {
            mask |= libc::IN_MASK_ADD;
        }

        match self.inotify.add_watch(&path, mask) {
            Ok(got) => {
                trace!("{} {} {}", got, path.display(), if quiet { "lowered" } else { "restored" });
                if got != id && self.registry.get(got).is_none() {
                    debug!("{} {} created", got, path.display());
                    self.registry.insert(got, path);
                }
                Some(got)
            }
            Err(err) => {
                self.log.log(format_args!("Warning: Cannot watch \"{}\": {}", path.display(), err));
                None
            }
        }
    }

    /// Add or refresh the kernel watch for `path` and update the registry
    fn attach(&mut self, path: &Path, lowered: &mut Lowered) -> Option<(WatchId, Attach)> {
        if path.as_os_str().is_empty() {
            self.log.log(format_args!("Warning: Cannot watch \"\": empty path"));
            return None;
        }

        let quiet = self.quiet_listing();
        let mask = self.watch_mask(!is_shallow(path), quiet) | libc::IN_MASK_ADD;

        let id = match self.inotify.add_watch(path, mask) {
            Ok(id) => id,
            Err(err) => {
                // non-directory, missing, or unreadable
                self.log.log(format_args!("Warning: Cannot watch \"{}\": {}", path.display(), err));
                return None;
            }
        };

        let Some(entry) = self.registry.get(id) else {
            debug!("{} {} created", id, path.display());
            self.registry.insert(id, path.to_path_buf());
            if quiet {
                lowered.push(id);
            }
            return Some((id, Attach::Created));
        };

        let old = entry.path.as_os_str().as_bytes();
        let new = path.as_os_str().as_bytes();
        if is_same_watch(old, new) {
            debug!("{} {} ignored as a duplicate", id, path.display());
            return Some((id, Attach::Duplicate));
        }

        if old.len() == new.len() + 1 && old.starts_with(new) {
            debug!("{} {} changed to recursive", id, path.display());
        } else {
            debug!("{} {} moved from {}", id, path.display(), entry.path.display());
        }
        self.registry.reassociate(id, path.to_path_buf());

        // the add above only widened an existing mask
        if quiet {
            if let Some(id) = self.set_mask(id, true) {
                lowered.push(id);
            }
        }
        Some((id, Attach::Reassociated))
    }

    /// Watch every subdirectory below `root`, top-down and without events
    ///
    /// Iterative, so tree depth does not grow the call stack. A directory
    /// that cannot be watched, or is already watched under the same path,
    /// is not descended into.
    fn attach_descendants(&mut self, root: &Path, lowered: &mut Lowered) {
        let mut walker = WalkDir::new(root).min_depth(1).follow_links(false).into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.log.log(format_args!("Warning: Cannot scan \"{}\": {}", root.display(), err));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            match self.attach(entry.path(), lowered) {
                Some((_, Attach::Created | Attach::Reassociated)) => {}
                Some((_, Attach::Duplicate)) | None => walker.skip_current_dir(),
            }
        }
    }

    /// Queue a synthetic `CREATE` record for each current child of `dir`
    ///
    /// Records carry `dir`'s own watch id, exactly as if its watch had been
    /// in place when the children appeared. Device nodes, fifos and sockets
    /// are skipped. Subdirectories are queued even when the caller is not
    /// interested in creates, so that their watches still get installed
    /// when the records are dispatched.
    fn queue_children(&mut self, id: WatchId, dir: &Path, recursive: bool) -> Result<()> {
        let wants_creates = self.interest.contains(EventMask::CREATE);

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.log.log(format_args!("Warning: Cannot scan \"{}\": {}", dir.display(), err));
                    continue;
                }
            };

            let file_type = entry.file_type();
            let is_dir = file_type.is_dir();
            if !(is_dir || file_type.is_file() || file_type.is_symlink()) {
                continue;
            }
            if !wants_creates && !(is_dir && recursive) {
                continue;
            }

            let mask = if is_dir {
                EventMask::CREATE | EventMask::ISDIR
            } else {
                EventMask::CREATE
            };
            if let Err(err) = self.buffer.push(id, mask, 0, entry.file_name()) {
                // no partial listing is left behind
                self.buffer.clear();
                return Err(self.fail(err));
            }
        }

        Ok(())
    }
}

/// `new` re-adds the watch recorded as `old`: identical, or the shallow
/// spelling of a path already watched recursively
fn is_same_watch(old: &[u8], new: &[u8]) -> bool {
    old == new || (new.len() == old.len() + 1 && new.starts_with(old) && new.last() == Some(&b'/'))
}
