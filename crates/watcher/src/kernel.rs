//! Thin wrapper over the inotify system calls
//!
//! Four primitives: add a watch, remove a watch, wait for readiness and
//! read a batch of records. Everything else lives above this module.

use crate::registry::WatchId;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

/// An inotify instance; the descriptor is closed on drop
#[derive(Debug)]
pub struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    /// Create a non-blocking, close-on-exec inotify instance
    pub fn init() -> io::Result<Self> {
        // Blocking is managed with poll(), so the descriptor itself never
        // blocks.
        // SAFETY: plain syscall with no pointer arguments.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by inotify_init1 and is owned by no
        // one else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    /// Add a watch, or update and return the existing one for the same inode
    pub fn add_watch(&self, path: &Path, mask: u32) -> io::Result<WatchId> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: `c_path` is NUL-terminated and outlives the call; the
        // descriptor stays open for the lifetime of `self`.
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WatchId::from_raw(wd))
    }

    /// Ask the kernel to drop a watch; an `IN_IGNORED` record follows
    pub fn rm_watch(&self, id: WatchId) -> io::Result<()> {
        // SAFETY: plain syscall on a descriptor owned by `self`; an unknown
        // id is reported as EINVAL.
        let ret = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), id.as_raw()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait until records can be read
    ///
    /// `None` waits forever. Returns `false` on timeout. Signal
    /// interruptions restart the wait.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = match timeout {
            None => -1,
            // rounded up, so a wait never ends before `timeout`
            Some(timeout) => timeout
                .as_nanos()
                .div_ceil(1_000_000)
                .min(libc::c_int::MAX as u128) as libc::c_int,
        };

        loop {
            let mut fds = [PollFd::new(&self.fd, PollFlags::POLLIN)];
            match poll(&mut fds, timeout_ms) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    /// Read as many whole records as fit into `buf`
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(self.fd.as_raw_fd(), buf) {
                Ok(count) => return Ok(count),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }
}

impl AsFd for Inotify {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Inotify {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}
