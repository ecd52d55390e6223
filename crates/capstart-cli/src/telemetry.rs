//! Diagnostic output for the launcher itself.
//!
//! Events go to stderr so they never mix with anything the target writes
//! before the hand-off. Once the loader runs, the subscriber is gone with the
//! rest of the process image.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use strum::{Display, EnumString};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static ACTIVE_FORMAT: OnceCell<LogFormat> = OnceCell::new();

/// Shape of the launcher's log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Single-line text for terminals.
    #[default]
    Compact,
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// The subscriber that owns the launcher's diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTelemetry {
    format: LogFormat,
}

impl ActiveTelemetry {
    /// Format chosen by the call that installed the subscriber.
    #[must_use]
    pub const fn format(self) -> LogFormat {
        self.format
    }
}

/// Installs the global subscriber on first use.
///
/// Later calls leave the installed subscriber alone and report the format it
/// was installed with, whatever `format` they pass.
///
/// ```rust
/// use capstart_cli::telemetry::{self, LogFormat};
///
/// # fn main() -> Result<(), telemetry::TelemetryError> {
/// let first = telemetry::initialise("warn", LogFormat::Json)?;
/// let again = telemetry::initialise("debug", LogFormat::Compact)?;
/// assert_eq!(again.format(), first.format());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`TelemetryError`] when `filter` is invalid or a foreign
/// subscriber is already registered.
pub fn initialise(filter: &str, format: LogFormat) -> Result<ActiveTelemetry, TelemetryError> {
    ACTIVE_FORMAT
        .get_or_try_init(|| install(filter, format).map(|()| format))
        .map(|installed| ActiveTelemetry { format: *installed })
}

fn install(filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer(format))
        .with(filter);
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn stderr_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}
