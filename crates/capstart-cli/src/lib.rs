//! Command-line front end for the `capstart` sandbox launcher.
//!
//! The runtime parses arguments, installs telemetry, resolves the loader
//! table and drives one sandbox through its whole lifecycle. Every
//! construction step is attempted even after an earlier one fails, so that a
//! failed launch reports the complete list of problems on stderr. The target
//! is only handed off when construction recorded no errors.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::process::ExitCode;

use capstart::{EnvCopyMode, LoaderKind, LoaderTable, Rights, Sandbox, SandboxError};
use clap::Parser;
use clap::error::ErrorKind;
use tracing::{debug, info};

mod cli;
mod errors;
pub mod telemetry;

use cli::Cli;
use errors::AppError;

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Runs the launcher using the provided arguments and IO handles.
///
/// Only returns when the target could not be started.
#[must_use]
pub fn run<I, T, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{}", AppError::CliUsage(error));
            return ExitCode::FAILURE;
        }
    };

    match launch(&cli) {
        Ok(sandbox) => {
            write_error_report(stderr, &sandbox);
            let closed = sandbox.release();
            debug!(target: CLI_TARGET, closed, "sandbox released after failed launch");
            ExitCode::FAILURE
        }
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

/// Builds the sandbox and attempts the hand-off. A returned sandbox means the
/// hand-off failed or was never attempted; its error log explains why.
fn launch(cli: &Cli) -> Result<Sandbox, AppError> {
    let telemetry = telemetry::initialise(&cli.log_filter, cli.log_format)?;
    debug!(target: CLI_TARGET, format = %telemetry.format(), "telemetry ready");
    let loaders = loader_table(cli)?;
    let binary = File::open(&cli.program).map_err(|source| AppError::OpenBinary {
        path: cli.program.clone(),
        source,
    })?;

    let mut sandbox = Sandbox::with_loaders(loaders);
    for dir in &cli.lib_paths {
        keep_going(sandbox.add_path(dir, 0, Rights::library_directory()));
    }
    for file in &cli.files {
        keep_going(sandbox.add_file(file, libc::O_RDONLY, Rights::read_only()));
    }
    if let Some(whitelist) = &cli.env_whitelist {
        keep_going(sandbox.copy_env(whitelist, EnvCopyMode::Overwrite));
    }
    for (name, value) in &cli.set_env {
        keep_going(sandbox.set_env(name, value));
    }
    keep_going(sandbox.set_target(&binary));
    drop(binary);

    if !sandbox.error_log().is_empty() {
        info!(
            target: CLI_TARGET,
            errors = sandbox.error_log().len(),
            "construction failed; skipping the hand-off"
        );
        return Ok(sandbox);
    }

    let argv = target_argv(cli);
    info!(
        target: CLI_TARGET,
        program = %cli.program.display(),
        descriptors = sandbox.resources().descriptor_count(),
        "handing off to run-time loader"
    );
    let Err(error) = sandbox.exec(argv.as_slice());
    debug!(target: CLI_TARGET, %error, "hand-off failed");
    Ok(sandbox)
}

fn keep_going<T>(result: Result<T, SandboxError>) {
    if let Err(error) = result {
        debug!(target: CLI_TARGET, %error, "continuing after failed step");
    }
}

pub(crate) fn loader_table(cli: &Cli) -> Result<LoaderTable, AppError> {
    let mut table = match &cli.loader_table {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|source| AppError::ReadLoaderTable {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| AppError::ParseLoaderTable {
                path: path.clone(),
                source,
            })?
        }
        None => LoaderTable::default(),
    };
    for (kind, path) in [
        (LoaderKind::Native, &cli.native_loader),
        (LoaderKind::Compat32, &cli.compat32_loader),
        (LoaderKind::Foreign, &cli.foreign_loader),
    ] {
        if let Some(path) = path {
            table = table.with_path(kind, path);
        }
    }
    Ok(table)
}

pub(crate) fn target_argv(cli: &Cli) -> Vec<String> {
    std::iter::once(cli.program.to_string_lossy().into_owned())
        .chain(cli.arguments.iter().cloned())
        .collect()
}

pub(crate) fn write_error_report<E: Write>(stderr: &mut E, sandbox: &Sandbox) {
    let (entries, count) = sandbox.errors();
    let _ = writeln!(stderr, "{count} errors");
    for entry in entries {
        let _ = writeln!(stderr, " - {entry}");
    }
}
