//! Failures of the launcher itself, as opposed to sandbox construction.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to read loader table {}: {source}", path.display())]
    ReadLoaderTable { path: PathBuf, source: io::Error },
    #[error("failed to parse loader table {}: {source}", path.display())]
    ParseLoaderTable {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to open target binary {}: {source}", path.display())]
    OpenBinary { path: PathBuf, source: io::Error },
}
