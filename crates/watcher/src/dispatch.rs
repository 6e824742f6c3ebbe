//! Event read loop
//!
//! [`Watcher::read`] refills the buffer when it is drained, then walks it
//! record by record. Each record may change the registry before it is
//! considered for reporting:
//! - a directory created or moved in under a recursive watch gets a watch
//! - a watch whose directory moved away is removed, with its whole subtree
//!   when recursive
//! - `IGNORED` erases the entry (the only place entries are erased)
//!
//! The first record matching the interest mask is returned; the rest stay
//! buffered for the next call.
//!
//! The kernel emits a directory's `MOVED_TO` before the `MOVE_SELF` of the
//! same move. The recycle flag set on `MOVED_TO` relies on that order to
//! keep the following `MOVE_SELF` from removing a watch that merely
//! changed parents.

use crate::buffer::RawEvent;
use crate::error::{Result, WatchError};
use crate::install::Attach;
use crate::mask::EventMask;
use crate::registry::WatchId;
use crate::sink::LogSink;
use crate::{WatchEvent, Watcher};
use smallvec::SmallVec;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest accepted coalescing delay
pub const MAX_COALESCE_DELAY: Duration = Duration::from_millis(1000);

impl<L: LogSink> Watcher<L> {
    /// Read one event, waiting at most `timeout` (`None` waits forever)
    ///
    /// `coalesce_delay` (at most one second) is slept after the descriptor
    /// becomes readable and before reading, giving the kernel a chance to
    /// merge similar events. Returns `Ok(None)` when the timeout expires
    /// without an event of interest.
    ///
    /// Errors other than [`WatchError::InvalidCoalesceDelay`] are fatal:
    /// events may have been lost, and the watcher should be rebuilt.
    pub fn read(&mut self, timeout: Option<Duration>, coalesce_delay: Duration) -> Result<Option<WatchEvent>> {
        if coalesce_delay > MAX_COALESCE_DELAY {
            return Err(self.fail(WatchError::InvalidCoalesceDelay(coalesce_delay)));
        }

        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut drained = false;

        loop {
            if self.buffer.is_drained() {
                let wait = match (timeout, deadline) {
                    (None, _) | (Some(_), None) => None,
                    (Some(_), Some(deadline)) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        if drained && left.is_zero() {
                            return Ok(None);
                        }
                        Some(left)
                    }
                };
                if !self.refill(wait, coalesce_delay)? {
                    return Ok(None);
                }
            }

            loop {
                let raw = match self.buffer.next_record() {
                    Ok(Some(raw)) => raw,
                    Ok(None) => break,
                    Err(err) => return Err(self.fail(err)),
                };
                if let Some(event) = self.dispatch(raw)? {
                    return Ok(Some(event));
                }
            }

            // Everything read so far was internal bookkeeping; try again
            // with whatever time is left.
            drained = true;
        }
    }

    /// Wait for the kernel and read one batch; `false` on timeout
    fn refill(&mut self, wait: Option<Duration>, coalesce_delay: Duration) -> Result<bool> {
        match self.inotify.wait_readable(wait) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(err) => return Err(self.fail(WatchError::Poll(err))),
        }

        if !coalesce_delay.is_zero() {
            std::thread::sleep(coalesce_delay);
        }

        let inotify = &self.inotify;
        let count = self
            .buffer
            .refill(|bytes| inotify.read(bytes).map_err(WatchError::Read));
        match count {
            Ok(0) => Err(self.fail(WatchError::EmptyRead)),
            Ok(count) => {
                trace!(bytes = count, "read inotify batch");
                Ok(true)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Apply one record to the registry; return it if it is of interest
    fn dispatch(&mut self, raw: RawEvent) -> Result<Option<WatchEvent>> {
        if raw.mask.contains(EventMask::Q_OVERFLOW) {
            self.buffer.clear();
            if self.interest.contains(EventMask::Q_OVERFLOW) {
                return Ok(Some(WatchEvent {
                    watch: raw.wd,
                    mask: raw.mask,
                    cookie: raw.cookie,
                    name: raw.name,
                    path: PathBuf::new(),
                }));
            }
            return Err(self.fail(WatchError::QueueOverflow));
        }

        let Some(entry) = self.registry.get(raw.wd) else {
            self.buffer.clear();
            return Err(self.fail(WatchError::UnknownWatch(raw.wd)));
        };
        let recursive = entry.is_recursive();
        let path = if raw.name.is_empty() {
            entry.path.clone()
        } else {
            entry.path.join(&raw.name)
        };
        trace!("- {} {} ({:#x})", raw.wd, path.display(), raw.mask.bits());

        // A subdirectory appeared under a recursive watch. Every descendant
        // of a recursive watch is recursive, so `path` carries no trailing
        // separator.
        if raw.mask.contains(EventMask::ISDIR)
            && raw.mask.intersects(EventMask::CREATE | EventMask::MOVED_TO)
            && recursive
        {
            let moved_in = raw.mask.contains(EventMask::MOVED_TO);
            if let Some((id, outcome)) = self.install(&path, moved_in)? {
                // A moved-in directory that was already watched keeps its
                // id, and its MOVE_SELF for this very move is still to come:
                // the kernel queues both records for the same rename, so the
                // flag is consumed within this drain. A watch created here
                // missed the move and gets no MOVE_SELF for it.
                if moved_in && outcome != Attach::Created {
                    self.registry.mark_recycled(id);
                }
            }
        }

        if raw.mask.contains(EventMask::MOVE_SELF) {
            self.handle_move_self(raw.wd);
        }

        if raw.mask.contains(EventMask::IGNORED) {
            if let Some(entry) = self.registry.remove(raw.wd) {
                debug!("{} {} deleted", raw.wd, entry.path.display());
            }
        }

        if raw.mask.intersects(self.interest) {
            return Ok(Some(WatchEvent {
                watch: raw.wd,
                mask: raw.mask,
                cookie: raw.cookie,
                name: raw.name,
                path,
            }));
        }
        Ok(None)
    }

    /// The directory of watch `wd` was renamed or moved
    ///
    /// Unless a move-in just recycled the watch, the directory has left
    /// watched territory: remove its watch, and for recursive watches every
    /// watch recorded below it. Entries stay until the kernel confirms with
    /// `IGNORED`.
    ///
    /// A watch already being removed is left alone. Its recorded path may
    /// have been watched again since (a directory renamed away and back),
    /// and those new watches must survive.
    fn handle_move_self(&mut self, wd: WatchId) {
        if self.registry.take_recycled(wd) {
            debug!("{} kept across move", wd);
            return;
        }
        let Some(entry) = self.registry.get(wd) else {
            return;
        };
        if entry.removing {
            trace!("{} already being removed", wd);
            return;
        }

        if !entry.is_recursive() {
            self.remove_watch(wd);
            return;
        }

        let doomed: SmallVec<[WatchId; 8]> = self.registry.ids_under(&entry.path).collect();
        debug!("{} {} moved out with {} watches", wd, entry.path.display(), doomed.len());
        for id in doomed {
            self.remove_watch(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::fs;
    use tempfile::TempDir;

    fn interested_in_everything() -> Watcher {
        Watcher::new(crate::TracingSink, EventMask::ALL_EVENTS | EventMask::IGNORED).unwrap()
    }

    #[test]
    fn test_coalesce_delay_is_bounded() {
        let mut watcher = Watcher::init().unwrap();
        let err = watcher
            .read(Some(Duration::ZERO), Duration::from_millis(1001))
            .unwrap_err();
        assert!(matches!(err, WatchError::InvalidCoalesceDelay(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_zero_timeout_without_activity() {
        let mut watcher = Watcher::init().unwrap();
        let event = watcher.read(Some(Duration::ZERO), Duration::ZERO).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_unknown_watch_is_fatal() {
        let mut watcher = Watcher::init().unwrap();
        watcher
            .buffer
            .push(WatchId::from_raw(999), EventMask::CREATE, 0, OsStr::new("x"))
            .unwrap();

        let err = watcher.read(Some(Duration::ZERO), Duration::ZERO).unwrap_err();
        assert!(matches!(err, WatchError::UnknownWatch(id) if id.as_raw() == 999));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_overflow_record() {
        let overflow = WatchId::from_raw(-1);

        let mut watcher = Watcher::init().unwrap();
        watcher.buffer.push(overflow, EventMask::Q_OVERFLOW, 0, OsStr::new("")).unwrap();
        let err = watcher.read(Some(Duration::ZERO), Duration::ZERO).unwrap_err();
        assert!(matches!(err, WatchError::QueueOverflow));

        let mut watcher =
            Watcher::new(crate::TracingSink, EventMask::ALL_EVENTS | EventMask::Q_OVERFLOW).unwrap();
        watcher.buffer.push(overflow, EventMask::Q_OVERFLOW, 0, OsStr::new("")).unwrap();
        let event = watcher.read(Some(Duration::ZERO), Duration::ZERO).unwrap().unwrap();
        assert_eq!(event.kind(), crate::EventKind::Overflow);
    }

    #[test]
    fn test_uninteresting_records_are_consumed() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = Watcher::new(crate::TracingSink, EventMask::DELETE)?;
        let id = watcher.add_watch(temp_dir.path(), true)?.unwrap();

        watcher.buffer.push(id, EventMask::MODIFY, 0, OsStr::new("a"))?;
        watcher.buffer.push(id, EventMask::DELETE, 0, OsStr::new("b"))?;

        let event = watcher.read(Some(Duration::ZERO), Duration::ZERO)?.unwrap();
        assert_eq!(event.name, "b");
        assert_eq!(event.path, temp_dir.path().join("b"));
        assert!(watcher.buffer.is_drained());
        Ok(())
    }

    #[test]
    fn test_recycled_watch_survives_one_move_self() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = interested_in_everything();
        let id = watcher.add_watch(temp_dir.path(), true)?.unwrap();

        watcher.registry.mark_recycled(id);
        watcher.buffer.push(id, EventMask::MOVE_SELF, 0, OsStr::new(""))?;

        let event = watcher.read(Some(Duration::ZERO), Duration::ZERO)?.unwrap();
        assert_eq!(event.kind(), crate::EventKind::MoveSelf);
        assert!(!watcher.registry.get(id).unwrap().recycled_by_move);

        // nothing was removed, so the kernel stays quiet
        assert!(watcher.read(Some(Duration::from_millis(50)), Duration::ZERO)?.is_none());
        assert_eq!(watcher.watch_count(), 1);

        // a second MOVE_SELF is a real departure
        watcher.buffer.push(id, EventMask::MOVE_SELF, 0, OsStr::new(""))?;
        watcher.read(Some(Duration::ZERO), Duration::ZERO)?;
        let ignored = watcher.read(Some(Duration::from_secs(2)), Duration::ZERO)?.unwrap();
        assert_eq!(ignored.kind(), crate::EventKind::Ignored);
        assert_eq!(ignored.watch, id);
        assert_eq!(watcher.watch_count(), 0);
        Ok(())
    }

    #[test]
    fn test_move_self_removes_recorded_subtree() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        fs::create_dir_all(temp_dir.path().join("ab")).unwrap();

        let mut watcher = interested_in_everything();
        watcher.add_watch(temp_dir.path(), true)?;
        let a = watcher.find_watch(temp_dir.path().join("a")).unwrap();
        assert_eq!(watcher.watch_count(), 4);

        // pretend "a" left; the disk is not consulted
        watcher.buffer.push(a, EventMask::MOVE_SELF, 0, OsStr::new(""))?;
        watcher.read(Some(Duration::ZERO), Duration::ZERO)?;

        let mut ignored = 0;
        while let Some(event) = watcher.read(Some(Duration::from_millis(200)), Duration::ZERO)? {
            if event.kind() == crate::EventKind::Ignored {
                ignored += 1;
            }
        }
        assert_eq!(ignored, 2);
        assert_eq!(watcher.watch_count(), 2);
        assert!(watcher.find_watch(temp_dir.path().join("ab")).is_some());
        Ok(())
    }

    #[test]
    fn test_second_move_self_spares_rewatched_path() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let x = temp_dir.path().join("x");
        fs::create_dir_all(x.join("inner")).unwrap();

        let mut watcher = interested_in_everything();
        watcher.add_watch(temp_dir.path(), true)?;
        let old = watcher.find_watch(&x).unwrap();
        let old_inner = watcher.find_watch(x.join("inner")).unwrap();

        watcher.buffer.push(old, EventMask::MOVE_SELF, 0, OsStr::new(""))?;
        watcher.buffer.push(old, EventMask::MOVE_SELF, 0, OsStr::new(""))?;
        watcher.read(Some(Duration::ZERO), Duration::ZERO)?;

        // the old marks are gone from the kernel, so this watches afresh
        let fresh = watcher.add_watch(&x, true)?.unwrap();
        assert_ne!(fresh, old);

        let mut ignored = Vec::new();
        while let Some(event) = watcher.read(Some(Duration::from_millis(200)), Duration::ZERO)? {
            if event.kind() == crate::EventKind::Ignored {
                ignored.push(event.watch);
            }
        }
        ignored.sort();
        let mut expected = vec![old, old_inner];
        expected.sort();
        assert_eq!(ignored, expected);

        assert_eq!(watcher.find_watch(&x), Some(fresh));
        assert!(watcher.find_watch(x.join("inner")).is_some_and(|id| id != old_inner));
        assert_eq!(watcher.watch_count(), 3);
        Ok(())
    }

    #[test]
    fn test_interesting_record_leaves_rest_buffered() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = Watcher::init()?;
        let id = watcher.add_watch(temp_dir.path(), true)?.unwrap();

        watcher.buffer.push(id, EventMask::CREATE, 0, OsStr::new("one"))?;
        watcher.buffer.push(id, EventMask::CREATE, 0, OsStr::new("two"))?;

        let first = watcher.read(Some(Duration::ZERO), Duration::ZERO)?.unwrap();
        assert_eq!(first.name, "one");
        assert!(!watcher.buffer.is_drained());
        let second = watcher.read(Some(Duration::ZERO), Duration::ZERO)?.unwrap();
        assert_eq!(second.name, "two");
        Ok(())
    }
}
