//! Treewatch CLI - treewatch command
//!
//! Watches directory trees and prints one line per event until the read
//! timeout expires, the event limit is reached, or the stream fails.

use anyhow::{bail, Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use watcher::{WatchConfig, Watcher};

mod output;
mod sink;

use output::Format;
use sink::Sink;

/// Treewatch - recursive inotify watcher
#[derive(Parser, Debug)]
#[command(name = "treewatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directories to watch; a trailing `/` watches immediate children only
    paths: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated event names to report (default: all)
    #[arg(short, long, value_delimiter = ',')]
    events: Vec<String>,

    /// Exit after this many milliseconds without an event
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Delay between readiness and reading, 0-1000 ms
    #[arg(short = 'd', long)]
    coalesce_ms: Option<u64>,

    /// Exit after printing this many events
    #[arg(short = 'n', long)]
    max_events: Option<u64>,

    /// Send watcher diagnostics to syslog instead of stderr
    #[arg(long)]
    syslog: bool,

    /// Print events as JSON lines
    #[arg(long, conflicts_with = "color")]
    json: bool,

    /// Colorize event masks
    #[arg(long)]
    color: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// Configuration file (if any) overridden by command-line values
    fn watch_config(&self) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::load(path)?,
            None => WatchConfig::default(),
        };

        config.roots.extend(self.paths.iter().cloned());
        if !self.events.is_empty() {
            config.events = self.events.clone();
        }
        if self.timeout_ms.is_some() {
            config.timeout_ms = self.timeout_ms;
        }
        if let Some(coalesce_ms) = self.coalesce_ms {
            config.coalesce_delay_ms = coalesce_ms;
        }

        config.validate()?;
        if config.roots.is_empty() {
            bail!("No directories to watch (pass paths or set `roots` in the config file)");
        }
        Ok(config)
    }

    fn format(&self) -> Format {
        if self.json {
            Format::Json
        } else if self.color {
            Format::Color
        } else {
            Format::Plain
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref())?;

    if let Err(err) = run(&cli) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.watch_config()?;
    let sink = if cli.syslog {
        Sink::syslog()
    } else {
        Sink::default()
    };

    let mut watcher = Watcher::from_config(&config, sink).context("Failed to start watcher")?;
    if watcher.watch_count() == 0 {
        bail!("None of the requested directories could be watched");
    }
    tracing::info!(watches = watcher.watch_count(), "watching");

    let format = cli.format();
    let timeout = config.timeout();
    let coalesce_delay = config.coalesce_delay();
    let mut printed = 0u64;

    while let Some(event) = watcher.read(timeout, coalesce_delay)? {
        println!("{}", format.render(&event));
        printed += 1;
        if cli.max_events.is_some_and(|max| printed >= max) {
            break;
        }
    }

    tracing::debug!(events = printed, "done");
    Ok(())
}

/// Stderr logging filtered by `RUST_LOG` (default `warn`), optionally
/// mirrored to a file
fn init_logging(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;
    let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    use tracing_subscriber::fmt::writer::MakeWriterExt;
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_ansi(false)
        .with_writer(std::io::stderr.and(writer))
        .init();
    Ok(Some(guard))
}
