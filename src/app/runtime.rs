use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use mirrorer_core::download::{CONNECT_TIMEOUT_SECS, ItemCallback, READ_TIMEOUT_SECS};
use mirrorer_core::{
    DownloadEngine, EngineOptions, HttpClient, MirrorSession, Notification, RunOutcome,
    default_user_agent, forward_os_signals,
};
use reqwest::header::HeaderValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::ProcessExit;
use crate::app::config::{self, FileConfig};
use crate::app::{exit, progress, terminal};
use crate::cli::{Args, Command, MirrorArgs, StateCommand};

const DEFAULT_STATE_FILE: &str = "state.json";

/// Global settings after merging CLI flags over the config file.
#[derive(Debug)]
struct Resolved {
    state_file: PathBuf,
    output_dir: PathBuf,
    quiet: bool,
    file: FileConfig,
}

pub(crate) async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = config::load_config(args.config.as_deref())?;
    let resolved = resolve(&args, loaded.config);

    let (verbose, quiet) = effective_verbosity(&args, &resolved.file);
    terminal::init_tracing(terminal::default_log_level(verbose, quiet));
    debug!(?args, config = ?loaded.path, from_file = loaded.loaded_from_file, "CLI arguments parsed");

    match args.command {
        Command::Mirror(mirror) => run_mirror(&resolved, mirror).await,
        Command::State(StateCommand::Export) => run_export(&resolved),
        Command::State(StateCommand::Stats) => run_stats(&resolved),
        Command::Verify => run_verify(&resolved).await,
    }
}

fn resolve(args: &Args, file: FileConfig) -> Resolved {
    let state_file = args
        .state_file
        .clone()
        .or_else(|| file.state_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    Resolved {
        state_file,
        output_dir,
        quiet: args.quiet,
        file,
    }
}

/// Explicit `-v`/`-q` flags win over the configured verbosity.
fn effective_verbosity(args: &Args, file: &FileConfig) -> (u8, bool) {
    if args.verbose > 0 || args.quiet {
        return (args.verbose, args.quiet);
    }
    file.verbosity.map_or((0, false), config::VerbositySetting::as_flags)
}

async fn run_mirror(resolved: &Resolved, args: MirrorArgs) -> Result<ProcessExit> {
    let mut session = MirrorSession::open(&resolved.state_file)?;

    let input = read_input(&args.urls)?;
    let urls: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    let accepted = session.register(urls.iter().copied());
    info!(accepted, rejected = urls.len() - accepted, "registered input URLs");

    let base_url: Option<&Url> = args.base_url.as_ref().or(resolved.file.base_url.as_ref());
    let assets = session.register_entity_assets(base_url);
    if assets > 0 {
        info!(assets, "registered media from cached entities");
    }

    if args.no_download {
        session.save()?;
        info!(state = %resolved.state_file.display(), "state saved, skipping downloads");
        return Ok(ProcessExit::Success);
    }

    let pending = session.document().downloads.pending().len();
    if pending == 0 {
        session.save()?;
        info!("nothing to download");
        return Ok(ProcessExit::Success);
    }

    // Registered URLs must reach the state file even if setup fails.
    let (tx, mut rx) = mpsc::channel::<Notification>(8);
    let setup = build_engine(resolved, &args, pending).and_then(|(engine, bar)| {
        let signals = forward_os_signals(tx).context("failed to install signal handlers")?;
        Ok((engine, bar, signals))
    });
    let (engine, bar, signals) = match setup {
        Ok(parts) => parts,
        Err(error) => return Err(save_after_failure(&session, error)),
    };

    let (outcome, result) = session.download(&engine, &mut rx).await;
    signals.abort();
    if let Some((bar, _)) = bar {
        bar.finish_and_clear();
    }

    report_failures(&outcome);
    result?;
    Ok(exit::determine_exit_outcome(outcome.completed, outcome.failed()))
}

type ProgressParts = (ProgressBar, ItemCallback);

fn build_engine(
    resolved: &Resolved,
    args: &MirrorArgs,
    pending: usize,
) -> Result<(DownloadEngine, Option<ProgressParts>)> {
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| resolved.file.user_agent.clone())
        .unwrap_or_else(default_user_agent);
    HeaderValue::from_str(&user_agent)
        .with_context(|| format!("invalid user agent {user_agent:?}"))?;

    let transport = HttpClient::with_timeouts(
        resolved
            .file
            .connect_timeout_secs
            .unwrap_or(CONNECT_TIMEOUT_SECS),
        resolved.file.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
    )
    .context("failed to build HTTP client")?;

    let bar = progress::progress_callback(terminal::progress_bar_enabled(resolved.quiet), pending);
    let options = EngineOptions {
        concurrency: usize::from(
            args.concurrency
                .or(resolved.file.concurrency)
                .unwrap_or_default(),
        ),
        user_agent,
        output_root: resolved.output_dir.clone(),
        on_item: bar.as_ref().map(|(_, callback)| Arc::clone(callback)),
    };
    Ok((DownloadEngine::new(Arc::new(transport), options), bar))
}

/// Saves state after `error`, keeping `error` as the reported failure.
fn save_after_failure(session: &MirrorSession, error: anyhow::Error) -> anyhow::Error {
    match session.save() {
        Ok(()) => {
            info!(state = %session.state_path().display(), "state saved after setup failure");
            error
        }
        Err(save) => error.context(format!("saving state also failed: {save}")),
    }
}

fn report_failures(outcome: &RunOutcome) {
    for error in outcome.item_errors.iter().flatten() {
        warn!(url = %error.url(), error = %error, "download failed");
    }
    info!(
        completed = outcome.completed,
        skipped = outcome.skipped,
        failed = outcome.failed(),
        "mirror finished"
    );
}

/// URLs from the command line, or stdin when it is piped.
fn read_input(urls: &[String]) -> Result<String> {
    if !urls.is_empty() {
        return Ok(urls.join("\n"));
    }
    if io::stdin().is_terminal() {
        return Ok(String::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read URLs from stdin")?;
    Ok(buffer)
}

fn run_export(resolved: &Resolved) -> Result<ProcessExit> {
    let session = MirrorSession::open(&resolved.state_file)?;
    let bytes = session.document().export()?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&bytes)?;
    writeln!(stdout)?;
    Ok(ProcessExit::Success)
}

fn run_stats(resolved: &Resolved) -> Result<ProcessExit> {
    let session = MirrorSession::open(&resolved.state_file)?;
    println!("{}", session.document().stats());
    Ok(ProcessExit::Success)
}

async fn run_verify(resolved: &Resolved) -> Result<ProcessExit> {
    let session = MirrorSession::open(&resolved.state_file)?;
    let report = session.verify(&resolved.output_dir).await;
    session.save()?;

    println!("checked {}, marked for re-download {}", report.checked, report.demoted.len());
    for url in &report.demoted {
        println!("  {url}");
    }
    if report.demoted.is_empty() {
        Ok(ProcessExit::Success)
    } else {
        Ok(ProcessExit::Partial)
    }
}
