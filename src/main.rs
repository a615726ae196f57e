//! CLI entry point for the mirrorer tool.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod app;
mod cli;

use cli::Args;

/// How the process should exit once a command finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    /// Some downloads failed or were marked for re-download.
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(2),
            ProcessExit::Failure => ExitCode::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let exit = app::runtime::run(args).await?;
    Ok(exit.into())
}
