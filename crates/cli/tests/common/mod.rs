//! Helpers for driving the `treewatch` binary
//!
//! Commands run in the background so a test can modify the watched tree
//! while the watcher is reading.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Pause long enough for the watcher to install its watches
pub const SETTLE: Duration = Duration::from_millis(300);

/// `treewatch` invocation builder
pub struct TwCommand {
    args: Vec<String>,
}

impl TwCommand {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Add a path argument
    pub fn path(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Start the binary with captured output
    pub fn spawn(&self) -> Result<Running> {
        let child = Command::new(env!("CARGO_BIN_EXE_treewatch"))
            .args(&self.args)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn treewatch")?;
        Ok(Running { child, started: Instant::now() })
    }

    /// Run to completion
    pub fn execute(&self) -> Result<CommandResult> {
        self.spawn()?.wait()
    }
}

/// A `treewatch` process still running
pub struct Running {
    child: Child,
    started: Instant,
}

impl Running {
    /// Wait for exit and collect output
    pub fn wait(self) -> Result<CommandResult> {
        let output = self.child.wait_with_output().context("Failed to wait for treewatch")?;
        Ok(CommandResult::new(output, self.started.elapsed()))
    }
}

/// Captured result of one run
#[derive(Debug)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    fn new(output: Output, duration: Duration) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
