//! CLI entrypoint for launching binaries under Capsicum.
//!
//! The binary delegates to [`capstart_cli::run`], which parses arguments,
//! installs telemetry, builds the sandbox and hands control to the run-time
//! loader.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    capstart_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
