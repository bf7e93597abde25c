//! Log output for the bridge binaries.
//!
//! Call [`init_daemon`] or [`init_cli`] once at startup. Everything else
//! just uses the `tracing` macros with structured fields (`peer`, `worker`,
//! `job_id`, `height`, ...).
//!
//! Under systemd the daemon logs straight to the journal, so fields survive
//! as journal fields. Otherwise events go to stderr, one line per event,
//! with fields on an indented second line.

use std::fmt;
use std::io::{self, IsTerminal};

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

#[cfg(target_os = "linux")]
use nix::sys::stat::fstat;

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Own module paths are shown without this prefix.
const CRATE_PREFIX: &str = "stratum_bridge::";

/// Whether stderr is the stream systemd set up for this unit.
///
/// `JOURNAL_STREAM` holds `device:inode` of that stream; comparing it with
/// stderr's own device and inode catches redirection.
#[cfg(target_os = "linux")]
fn stderr_is_journal() -> bool {
    let Ok(value) = std::env::var("JOURNAL_STREAM") else {
        return false;
    };
    let Some((dev, ino)) = value.split_once(':') else {
        return false;
    };
    let (Ok(dev), Ok(ino)) = (dev.parse::<u64>(), ino.parse::<u64>()) else {
        return false;
    };

    match fstat(io::stderr().as_raw_fd()) {
        Ok(stat) => stat.st_dev as u64 == dev && stat.st_ino as u64 == ino,
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn stderr_is_journal() -> bool {
    false
}

fn env_filter(default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

/// Logging for the daemon: journald under systemd, stderr otherwise.
/// `RUST_LOG` filters; the default level is INFO.
pub fn init_daemon() {
    if stderr_is_journal() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(env_filter(LevelFilter::INFO))
                    .with(layer)
                    .init();
                return;
            }
            Err(e) => eprintln!("journald unavailable ({}), logging to stderr", e),
        }
    }

    init_stderr(LevelFilter::INFO);
}

/// Logging for the command-line tool: stderr, WARN unless `RUST_LOG` says
/// otherwise.
pub fn init_cli() {
    init_stderr(LevelFilter::WARN);
}

fn init_stderr(default: LevelFilter) {
    let ansi = io::stderr().is_terminal();

    tracing_subscriber::registry()
        .with(env_filter(default))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(ansi)
                .fmt_fields(DefaultFields::new())
                .event_format(LineFormatter { ansi }),
        )
        .init();
}

/// Local wall-clock time to the second.
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now.format(TIMESTAMP).map_err(|_| fmt::Error)?;
        w.write_str(&stamp)
    }
}

/// Collects an event's message and fields as display strings.
#[derive(Default)]
struct Fields {
    message: String,
    pairs: Vec<(&'static str, String)>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.pairs.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{:?}", value);
        if field.name() == "message" {
            self.message = text;
        } else {
            self.pairs.push((field.name(), unwrap_some(&text).to_string()));
        }
    }
}

/// `Some(x)` -> `x`, so optional fields read naturally.
fn unwrap_some(text: &str) -> &str {
    text.strip_prefix("Some(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(text)
        .trim_matches('"')
}

/// `YYYY-MM-DD HH:MM:SS LEVEL target: message`, with fields on a second line.
struct LineFormatter {
    ansi: bool,
}

impl LineFormatter {
    fn paint(&self, w: &mut Writer<'_>, color: &str, text: &str) -> fmt::Result {
        if self.ansi {
            write!(w, "\x1b[{}m{}\x1b[0m", color, text)
        } else {
            w.write_str(text)
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut w: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);

        LocalTime.format_time(&mut w)?;
        w.write_char(' ')?;

        let (color, level) = match *event.metadata().level() {
            Level::ERROR => ("31", "ERROR"),
            Level::WARN => ("33", "WARN "),
            Level::INFO => ("32", "INFO "),
            Level::DEBUG => ("34", "DEBUG"),
            Level::TRACE => ("35", "TRACE"),
        };
        self.paint(&mut w, color, level)?;

        let target = event.metadata().target();
        let target = target.strip_prefix(CRATE_PREFIX).unwrap_or(target);
        write!(w, " {}: {}", target, fields.message)?;

        if !fields.pairs.is_empty() {
            let line = fields
                .pairs
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join(" ");
            w.write_str("\n    ")?;
            self.paint(&mut w, "90", &line)?;
        }

        writeln!(w)
    }
}
