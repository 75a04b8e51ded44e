use std::process::ExitCode;

use recourse_core::cli;

fn main() -> anyhow::Result<ExitCode> {
    cli::run_cli().map(ExitCode::from)
}
