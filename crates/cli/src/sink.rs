//! Where watcher diagnostics go

use std::fmt;
use watcher::{LogSink, SyslogSink, TracingSink};

/// Diagnostics destination chosen on the command line
#[derive(Debug)]
pub enum Sink {
    /// Through the `tracing` subscriber, i.e. stderr and the log file
    Tracing(TracingSink),
    /// To the system logger under the `treewatch` ident
    Syslog(SyslogSink),
}

impl Sink {
    pub fn syslog() -> Self {
        Sink::Syslog(SyslogSink::open("treewatch", libc::LOG_DAEMON))
    }
}

impl Default for Sink {
    fn default() -> Self {
        Sink::Tracing(TracingSink)
    }
}

impl LogSink for Sink {
    fn log(&self, args: fmt::Arguments<'_>) {
        match self {
            Sink::Tracing(sink) => sink.log(args),
            Sink::Syslog(sink) => sink.log(args),
        }
    }
}
