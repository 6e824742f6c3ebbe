//! inotify event bits
//!
//! `EventMask` doubles as the caller's interest mask and as the change-kind
//! bitset carried by every record. Bit values are the kernel's.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Kinds of change reported for a watched directory
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct EventMask: u32 {
        /// File was accessed
        const ACCESS = libc::IN_ACCESS;
        /// File was modified
        const MODIFY = libc::IN_MODIFY;
        /// Metadata changed
        const ATTRIB = libc::IN_ATTRIB;
        /// Writable file was closed
        const CLOSE_WRITE = libc::IN_CLOSE_WRITE;
        /// Unwritable file was closed
        const CLOSE_NOWRITE = libc::IN_CLOSE_NOWRITE;
        /// File was opened
        const OPEN = libc::IN_OPEN;
        /// Child moved out of the watched directory
        const MOVED_FROM = libc::IN_MOVED_FROM;
        /// Child moved into the watched directory
        const MOVED_TO = libc::IN_MOVED_TO;
        /// Child created
        const CREATE = libc::IN_CREATE;
        /// Child deleted
        const DELETE = libc::IN_DELETE;
        /// Watched directory itself was deleted
        const DELETE_SELF = libc::IN_DELETE_SELF;
        /// Watched directory itself was moved
        const MOVE_SELF = libc::IN_MOVE_SELF;
        /// Backing filesystem was unmounted
        const UNMOUNT = libc::IN_UNMOUNT;
        /// Kernel event queue overflowed
        const Q_OVERFLOW = libc::IN_Q_OVERFLOW;
        /// Watch was removed, explicitly or implicitly
        const IGNORED = libc::IN_IGNORED;
        /// Subject of the event is a directory
        const ISDIR = libc::IN_ISDIR;
    }
}

impl EventMask {
    /// Every change kind a watch can subscribe to (`IN_ALL_EVENTS`)
    pub const ALL_EVENTS: Self = Self::from_bits_retain(libc::IN_ALL_EVENTS);

    /// Both close variants
    pub const CLOSE: Self = Self::from_bits_retain(libc::IN_CLOSE);

    /// Both move variants
    pub const MOVE: Self = Self::from_bits_retain(libc::IN_MOVE);

    /// Look up a mask by its lowercase config name
    ///
    /// Accepts the single-flag names (`"create"`, `"moved_to"`, ...) plus
    /// the groups `"all"`, `"close"` and `"move"`.
    pub fn lookup_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "all" | "all_events" => return Some(Self::ALL_EVENTS),
            "close" => return Some(Self::CLOSE),
            "move" => return Some(Self::MOVE),
            _ => {}
        }

        Self::all()
            .iter_names()
            .find(|(flag, _)| flag.eq_ignore_ascii_case(&name))
            .map(|(_, mask)| mask)
    }

    /// Parse a comma-separated list of names into one mask
    ///
    /// Returns the first unknown name on failure.
    pub fn parse_list<'a, I>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut mask = Self::empty();
        for name in names {
            if name.trim().is_empty() {
                continue;
            }
            mask |= Self::lookup_name(name).ok_or_else(|| name.trim().to_string())?;
        }
        Ok(mask)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "0");
        }

        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }

        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{:#x}", unknown)?;
        }
        Ok(())
    }
}
