//! Fixed-capacity buffer of packed inotify records
//!
//! Records use the kernel layout: a 16 byte header (`wd`, `mask`, `cookie`,
//! `len`) followed by `len` bytes of NUL-padded name. The buffer is filled
//! either by one bulk kernel read or by the installer appending synthetic
//! records, and is drained strictly front to back. Once placed here the two
//! kinds of record are indistinguishable.

use crate::error::{Result, WatchError};
use crate::mask::EventMask;
use crate::registry::WatchId;
use std::ffi::{OsStr, OsString};
use std::mem;
use std::os::unix::ffi::OsStrExt;

/// Default capacity, enough for one kernel batch
///
/// The kernel keeps its own queue (`/proc/sys/fs/inotify/max_queued_events`),
/// so a bigger buffer buys little.
pub const BUFFER_CAPACITY: usize = 4096;

/// Size of one record header
pub const HEADER_LEN: usize = mem::size_of::<libc::inotify_event>();

/// Synthetic names are padded to this boundary, NUL included
const NAME_ALIGN: usize = mem::size_of::<i32>();

/// One record taken out of the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub wd: WatchId,
    pub mask: EventMask,
    pub cookie: u32,
    /// Child name; empty for events about the watched directory itself
    pub name: OsString,
}

/// Byte region holding a batch of records
#[derive(Debug)]
pub struct EventBuffer {
    bytes: Box<[u8]>,
    /// Offset of the next unparsed record
    handled: usize,
    /// Number of valid bytes
    filled: usize,
}

impl EventBuffer {
    /// Buffer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    /// Buffer holding `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            handled: 0,
            filled: 0,
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Whether every valid byte has been parsed
    pub fn is_drained(&self) -> bool {
        self.handled == self.filled
    }

    /// Bytes still waiting to be parsed
    pub fn pending(&self) -> usize {
        self.filled - self.handled
    }

    /// Refill a drained buffer with `read`, which returns the byte count
    pub fn refill<F>(&mut self, read: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> Result<usize>,
    {
        debug_assert!(self.is_drained(), "refill with unparsed records");
        self.handled = 0;
        self.filled = 0;

        let count = read(&mut self.bytes[..])?;
        self.filled = count.min(self.bytes.len());
        Ok(self.filled)
    }

    /// Append a synthetic record after everything already buffered
    ///
    /// The consumed prefix is reclaimed first. If the record still does not
    /// fit, the whole batch is considered lost and `BufferOverflow` is
    /// returned; nothing is partially written.
    pub fn push(&mut self, wd: WatchId, mask: EventMask, cookie: u32, name: &OsStr) -> Result<()> {
        let name = name.as_bytes();
        let len = padded_len(name.len());
        let needed = HEADER_LEN + len;

        if self.filled + needed > self.bytes.len() {
            self.compact();
        }
        if self.filled + needed > self.bytes.len() {
            return Err(WatchError::BufferOverflow {
                needed: self.filled + needed,
                capacity: self.bytes.len(),
            });
        }

        let record = &mut self.bytes[self.filled..self.filled + needed];
        record[0..4].copy_from_slice(&wd.as_raw().to_ne_bytes());
        record[4..8].copy_from_slice(&mask.bits().to_ne_bytes());
        record[8..12].copy_from_slice(&cookie.to_ne_bytes());
        record[12..16].copy_from_slice(&(len as u32).to_ne_bytes());
        record[HEADER_LEN..HEADER_LEN + name.len()].copy_from_slice(name);
        record[HEADER_LEN + name.len()..].fill(0);

        self.filled += needed;
        Ok(())
    }

    /// Take the next record, or `None` once the buffer is drained
    ///
    /// A record that claims bytes past the valid length means the batch is
    /// corrupt; the buffer is reset so the caller can rebuild.
    pub fn next_record(&mut self) -> Result<Option<RawEvent>> {
        if self.is_drained() {
            self.handled = 0;
            self.filled = 0;
            return Ok(None);
        }

        let offset = self.handled;
        if self.filled - offset < HEADER_LEN {
            return Err(self.truncated(offset));
        }

        let header = &self.bytes[offset..offset + HEADER_LEN];
        let wd = i32::from_ne_bytes(word(header, 0));
        let mask = u32::from_ne_bytes(word(header, 4));
        let cookie = u32::from_ne_bytes(word(header, 8));
        let len = u32::from_ne_bytes(word(header, 12)) as usize;

        let end = offset + HEADER_LEN + len;
        if end > self.filled {
            return Err(self.truncated(offset));
        }

        let raw_name = &self.bytes[offset + HEADER_LEN..end];
        let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = OsStr::from_bytes(&raw_name[..name_len]).to_os_string();

        self.handled = end;
        if self.handled == self.filled {
            self.handled = 0;
            self.filled = 0;
        }

        Ok(Some(RawEvent {
            wd: WatchId::from_raw(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name,
        }))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.handled = 0;
        self.filled = 0;
    }

    fn truncated(&mut self, offset: usize) -> WatchError {
        let len = self.filled;
        self.clear();
        WatchError::Truncated { offset, len }
    }

    /// Move unparsed bytes to the front
    fn compact(&mut self) {
        if self.handled == 0 {
            return;
        }
        self.bytes.copy_within(self.handled..self.filled, 0);
        self.filled -= self.handled;
        self.handled = 0;
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Name length including the terminating NUL, rounded up to `NAME_ALIGN`
fn padded_len(name_len: usize) -> usize {
    (name_len + NAME_ALIGN) / NAME_ALIGN * NAME_ALIGN
}

fn word(header: &[u8], at: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&header[at..at + 4]);
    out
}
