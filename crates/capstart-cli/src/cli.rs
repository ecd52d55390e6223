//! Command-line arguments for the launcher.

use std::path::PathBuf;

use clap::Parser;

use crate::telemetry::LogFormat;

/// Run a binary inside a Capsicum capability-mode sandbox.
///
/// Everything the target may touch is opened up front: the binary, its
/// run-time loader, the library directories and any extra files. The
/// launcher then enters capability mode and executes the loader.
#[derive(Parser, Debug)]
#[command(name = "capstart", version)]
pub(crate) struct Cli {
    /// Library directory for the loader to search. Repeat to add more;
    /// directories are searched in the order given.
    #[arg(long = "lib-path", value_name = "DIR")]
    pub(crate) lib_paths: Vec<PathBuf>,
    /// File the target inherits read-only.
    #[arg(long = "file", value_name = "PATH")]
    pub(crate) files: Vec<PathBuf>,
    /// Caller variables to pass through, separated by `,` or `:`. A trailing
    /// `*` matches a prefix.
    #[arg(long = "env-whitelist", value_name = "LIST")]
    pub(crate) env_whitelist: Option<String>,
    /// Sets a variable in the target's environment.
    #[arg(long = "set-env", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub(crate) set_env: Vec<(String, String)>,
    /// JSON file with `foreign`, `native` and `compat32` loader paths.
    #[arg(long = "loader-table", value_name = "PATH")]
    pub(crate) loader_table: Option<PathBuf>,
    /// Loader for native binaries.
    #[arg(long = "native-loader", value_name = "PATH")]
    pub(crate) native_loader: Option<PathBuf>,
    /// Loader for 32-bit binaries on a 64-bit host.
    #[arg(long = "compat32-loader", value_name = "PATH")]
    pub(crate) compat32_loader: Option<PathBuf>,
    /// Loader for Linux binaries.
    #[arg(long = "foreign-loader", value_name = "PATH")]
    pub(crate) foreign_loader: Option<PathBuf>,
    /// Filter for the launcher's own diagnostics.
    #[arg(long = "log-filter", value_name = "FILTER", default_value = "warn")]
    pub(crate) log_filter: String,
    /// Format of the launcher's own diagnostics.
    #[arg(long = "log-format", value_name = "FORMAT", default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,
    /// Binary to run.
    #[arg(value_name = "PROGRAM")]
    pub(crate) program: PathBuf,
    /// Arguments passed to the binary.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) arguments: Vec<String>,
}

pub(crate) fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}
