//! Diagnostic log sinks
//!
//! The watcher reports per-path failures and stream errors through a
//! single-method sink. Messages are fire-and-forget: a sink never changes
//! what the watcher does or returns.

use std::ffi::CString;
use std::fmt;

/// Destination for watcher diagnostics
pub trait LogSink {
    /// Record one formatted message
    fn log(&self, args: fmt::Arguments<'_>);
}

/// Any `Fn(fmt::Arguments)` is a sink, e.g. `|args| eprintln!("{args}")`
impl<F> LogSink for F
where
    F: Fn(fmt::Arguments<'_>),
{
    fn log(&self, args: fmt::Arguments<'_>) {
        self(args)
    }
}

/// Forwards messages to `tracing` at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "watcher", "{}", args);
    }
}

/// Writes messages to the system logger
///
/// `openlog` settings are process-wide, so keep a single instance around.
/// Messages go out with the configured priority (`LOG_ERR` unless changed).
#[derive(Debug)]
pub struct SyslogSink {
    // syslog keeps the pointer, so the ident must outlive the sink
    _ident: CString,
    priority: libc::c_int,
}

impl SyslogSink {
    /// Open the system logger with `ident` and `facility` (e.g. `LOG_DAEMON`)
    pub fn open(ident: &str, facility: libc::c_int) -> Self {
        let ident = CString::new(ident.replace('\0', "")).unwrap_or_default();
        // SAFETY: `ident` is NUL-terminated and its heap buffer moves into
        // the sink unchanged, so the pointer syslog keeps stays valid until
        // `closelog` in `drop`.
        unsafe { libc::openlog(ident.as_ptr(), libc::LOG_PID | libc::LOG_ODELAY, facility) };
        Self {
            _ident: ident,
            priority: libc::LOG_ERR,
        }
    }

    /// Use `priority` instead of `LOG_ERR`
    pub fn with_priority(mut self, priority: libc::c_int) -> Self {
        self.priority = priority;
        self
    }
}

impl LogSink for SyslogSink {
    fn log(&self, args: fmt::Arguments<'_>) {
        let message = CString::new(args.to_string().replace('\0', "")).unwrap_or_default();
        // "%s" keeps the message from being interpreted as a format string
        // SAFETY: both the format and `message` are NUL-terminated and live
        // across the call, and "%s" consumes exactly the one argument.
        unsafe {
            libc::syslog(
                self.priority,
                b"%s\0".as_ptr() as *const libc::c_char,
                message.as_ptr(),
            )
        };
    }
}

impl Drop for SyslogSink {
    fn drop(&mut self) {
        // SAFETY: no arguments; later syslog calls from elsewhere reopen
        // the connection on their own.
        unsafe { libc::closelog() };
    }
}
