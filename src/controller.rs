//! Run loop that drives a download batch under checkpoint and interrupt control.
//!
//! A run moves through four phases:
//!
//! | phase                | entered on   | effect                                   |
//! |----------------------|--------------|------------------------------------------|
//! | `Running`            | start        | workers take items in order              |
//! | `StoppingNew`        | interrupt #1 | no new items; in-flight items finish     |
//! | `CancellingInFlight` | interrupt #2 | in-flight transfers are dropped          |
//! | `Aborted`            | interrupt #3 | the run returns without waiting          |
//!
//! A checkpoint notification saves state without changing phase. Notifications
//! come from any `mpsc` sender: tests inject them directly and the binary
//! forwards OS signals with [`forward_os_signals`].

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadEngine, RunError, RunOutcome};
use crate::registry::DescriptorHandle;
use crate::state::StateError;

/// Control message delivered to a running batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Persist state now; keep running.
    Checkpoint,
    /// Escalate shutdown by one phase.
    Interrupt,
}

/// Shutdown phase of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Running,
    StoppingNew,
    CancellingInFlight,
    Aborted,
}

impl RunPhase {
    /// The phase after one more interrupt.
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            Self::Running => Self::StoppingNew,
            Self::StoppingNew => Self::CancellingInFlight,
            Self::CancellingInFlight | Self::Aborted => Self::Aborted,
        }
    }
}

impl DownloadEngine {
    /// Processes `descriptors` with no external control.
    pub async fn run(&self, descriptors: &[DescriptorHandle]) -> RunOutcome {
        let (_tx, mut rx) = mpsc::channel(1);
        self.run_supervised(descriptors, &mut rx, || Ok(())).await
    }

    /// Processes `descriptors` while reacting to `notifications`.
    ///
    /// `checkpoint` is called for every [`Notification::Checkpoint`]. It may
    /// block on file IO; on a multi-thread runtime it runs in
    /// [`block_in_place`](tokio::task::block_in_place) so other tasks keep
    /// moving. A failed checkpoint is logged and the run continues.
    ///
    /// The outcome's `error` is [`RunError::NoSpace`] if the batch was
    /// cancelled for lack of space, [`RunError::Aborted`] after the third
    /// interrupt, and [`RunError::Interrupted`] after one or two.
    #[instrument(skip_all, fields(items = descriptors.len()))]
    pub async fn run_supervised<F>(
        &self,
        descriptors: &[DescriptorHandle],
        notifications: &mut mpsc::Receiver<Notification>,
        mut checkpoint: F,
    ) -> RunOutcome
    where
        F: FnMut() -> Result<(), StateError>,
    {
        let mut batch = self.start(descriptors);
        let mut phase = RunPhase::Running;
        let mut listening = true;

        loop {
            tokio::select! {
                joined = batch.workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(error)) => warn!(error = %error, "download worker panicked"),
                    None => break,
                },
                notification = notifications.recv(), if listening => match notification {
                    None => listening = false,
                    Some(Notification::Checkpoint) => match run_blocking(&mut checkpoint) {
                        Ok(()) => info!("checkpoint saved"),
                        Err(error) => warn!(error = %error, "checkpoint failed, continuing"),
                    },
                    Some(Notification::Interrupt) => {
                        phase = phase.escalate();
                        match phase {
                            RunPhase::StoppingNew => {
                                info!("interrupt received, stopping new downloads");
                                info!("interrupt 2 more times to stop current downloads");
                                batch.stop_dispatch();
                            }
                            RunPhase::CancellingInFlight => {
                                info!("interrupt received, cancelling current downloads");
                                batch.cancel_transfers();
                            }
                            RunPhase::Aborted => {
                                warn!("interrupt received, aborting");
                                batch.workers.abort_all();
                                return batch.into_outcome(Some(RunError::Aborted));
                            }
                            RunPhase::Running => {}
                        }
                    }
                },
            }
        }

        debug!(?phase, "all workers finished");
        let error = batch.no_space().or_else(|| {
            (phase != RunPhase::Running).then_some(RunError::Interrupted)
        });
        batch.into_outcome(error)
    }
}

/// Calls `f` in place, telling a multi-thread runtime that this worker blocks.
///
/// `block_in_place` panics on a current-thread runtime, where the call is made
/// directly instead.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// Forwards OS signals to `sender` until the receiver is dropped.
///
/// SIGINT and SIGTERM become [`Notification::Interrupt`], SIGUSR1 becomes
/// [`Notification::Checkpoint`]. Off Unix only Ctrl-C is forwarded.
///
/// # Errors
///
/// Returns the IO error if a signal handler cannot be installed.
pub fn forward_os_signals(sender: mpsc::Sender<Notification>) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut user1 = signal(SignalKind::user_defined1())?;

        Ok(tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    Some(()) = interrupt.recv() => Notification::Interrupt,
                    Some(()) = terminate.recv() => Notification::Interrupt,
                    Some(()) = user1.recv() => Notification::Checkpoint,
                    else => break,
                };
                debug!(?notification, "signal received");
                if sender.send(notification).await.is_err() {
                    break;
                }
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if sender.send(Notification::Interrupt).await.is_err() {
                    break;
                }
            }
        }))
    }
}
