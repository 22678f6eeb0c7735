//! The activity log: every `tracing` event rendered as one
//! `[YYYY-MM-DD HH:MM:SS.mmm] (<tag>) <message>` line, appended to the
//! runtime directory's log file and mirrored on stderr.

use anyhow::Context;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Line format shared by the file and stderr layers.
#[derive(Debug, Clone)]
pub struct ActivityFormat {
    tag: String,
}

impl ActivityFormat {
    /// Prefix every line with `(tag)`.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl<S, N> FormatEvent<S, N> for ActivityFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "[{}] ({}) ", now.format(TIMESTAMP_FORMAT), self.tag)?;
        match *event.metadata().level() {
            Level::ERROR => write!(writer, "ERROR ")?,
            Level::WARN => write!(writer, "WARN ")?,
            _ => {}
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Open `path` for appending, creating it if needed. Existing content is
/// never truncated.
///
/// # Errors
///
/// Propagates the open error.
pub fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn env_filter(verbose: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already set.
pub fn init(log_path: &Path, tag: &str, verbose: u8) -> anyhow::Result<()> {
    let file = open_append(log_path)
        .with_context(|| format!("failed to open activity log {}", log_path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(ActivityFormat::new(tag))
        .with_writer(Mutex::new(file))
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .event_format(ActivityFormat::new(tag))
        .with_writer(std::io::stderr)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}
