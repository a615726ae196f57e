//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

/// Resumable mirroring of a remote content library.
///
/// Mirrorer keeps a state file describing everything it has seen and
/// downloaded, so a run can be interrupted and resumed without fetching
/// unchanged files again.
#[derive(Parser, Debug)]
#[command(name = "mirrorer")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// State file to load and save [default: state.json]
    #[arg(long, global = true, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Directory downloads are written under [default: .]
    #[arg(long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Config file to read instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register URLs and download everything still pending
    Mirror(MirrorArgs),

    /// Inspect or export the state file
    #[command(subcommand)]
    State(StateCommand),

    /// Re-hash completed downloads and mark damaged ones for re-download
    Verify,
}

#[derive(ClapArgs, Debug, Default)]
pub struct MirrorArgs {
    /// URLs to mirror (reads stdin when omitted and stdin is not a terminal)
    pub urls: Vec<String>,

    /// Maximum concurrent downloads (0 uses the number of CPUs, max 256)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(0..=256))]
    pub concurrency: Option<u16>,

    /// Base URL that relative media links in cached entities resolve against
    #[arg(long, value_name = "URL")]
    pub base_url: Option<Url>,

    /// Register URLs and save state without downloading
    #[arg(long)]
    pub no_download: bool,

    /// User-Agent header sent with every request
    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCommand {
    /// Print the state document with all downloads marked incomplete
    Export,
    /// Print entity and download counts
    Stats,
}
