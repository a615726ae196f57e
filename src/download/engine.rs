//! Bounded-concurrency download engine.
//!
//! The engine takes a fixed batch of descriptor handles and processes it with
//! a pool of N worker tasks pulling from a shared cursor, so items are
//! dispatched in batch order. Each item is fetched once, streamed through a
//! [`HashingWriter`] into `<out_path>.part`, verified, and renamed into place.
//! Progress is recorded directly on the shared descriptor.
//!
//! # Cancellation
//!
//! Two [`CancellationToken`]s drive shutdown. The dispatch token stops workers
//! from taking new items; the transfer token (its parent) additionally drops
//! every in-flight transfer. Running out of disk space on any item cancels the
//! transfer token for the whole batch.
//!
//! The run loop that reacts to interrupts and checkpoints lives in
//! [`crate::controller`].

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::{PARTIAL_SUFFIX, WRITE_BUFFER_BYTES};
use super::error::DownloadError;
use super::transport::{FetchRequest, Transport};
use crate::integrity::{HashingWriter, file_matches_digest};
use crate::registry::{DescriptorHandle, DownloadDescriptor};
use crate::user_agent;

/// Callback invoked once per processed item with its final descriptor state.
pub type ItemCallback = Arc<dyn Fn(&DownloadDescriptor, Option<&DownloadError>) + Send + Sync>;

/// Engine configuration.
#[derive(Clone)]
pub struct EngineOptions {
    /// Number of workers. `0` uses the host's available parallelism.
    pub concurrency: usize,
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Directory that descriptor output paths are relative to.
    pub output_root: PathBuf,
    /// Called after each item finishes, successfully or not.
    pub on_item: Option<ItemCallback>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: 0,
            user_agent: user_agent::default_user_agent(),
            output_root: PathBuf::from("."),
            on_item: None,
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("concurrency", &self.concurrency)
            .field("user_agent", &self.user_agent)
            .field("output_root", &self.output_root)
            .field("on_item", &self.on_item.is_some())
            .finish()
    }
}

/// Batch-level failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// The output device filled up; the batch was cancelled.
    #[error("no space left on device writing {url} to {path}")]
    NoSpace {
        /// The item whose write failed.
        url: String,
        /// Its output path.
        path: PathBuf,
    },

    /// The run was interrupted before every item was processed.
    #[error("download run interrupted")]
    Interrupted,

    /// The run was aborted without waiting for in-flight transfers.
    #[error("download run aborted")]
    Aborted,
}

/// Result of a run.
///
/// `item_errors` is parallel to the input batch. An entry is `None` when the
/// item succeeded, was already complete, or was never dispatched.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Batch-level failure, if any.
    pub error: Option<RunError>,
    /// Per-item failures, in input order.
    pub item_errors: Vec<Option<DownloadError>>,
    /// Items fetched and verified during this run.
    pub completed: usize,
    /// Items that needed no request.
    pub skipped: usize,
}

impl RunOutcome {
    /// Number of items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.item_errors.iter().filter(|e| e.is_some()).count()
    }

    /// Whether the run finished without any batch or item failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed() == 0
    }
}

/// Counters updated by workers.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl DownloadStats {
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Concurrent download executor.
#[derive(Clone)]
pub struct DownloadEngine {
    transport: Arc<dyn Transport>,
    options: EngineOptions,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine that fetches through `transport`.
    pub fn new(transport: Arc<dyn Transport>, options: EngineOptions) -> Self {
        Self { transport, options }
    }

    /// Effective worker count.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        if self.options.concurrency == 0 {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            self.options.concurrency
        }
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Spawns the worker pool over `descriptors`.
    #[instrument(skip(self, descriptors), fields(items = descriptors.len()))]
    pub(crate) fn start(&self, descriptors: &[DescriptorHandle]) -> RunningBatch {
        let transfers = CancellationToken::new();
        let shared = Arc::new(Batch {
            transport: Arc::clone(&self.transport),
            user_agent: self.options.user_agent.clone(),
            output_root: self.options.output_root.clone(),
            on_item: self.options.on_item.clone(),
            items: descriptors.to_vec(),
            cursor: AtomicUsize::new(0),
            slots: Mutex::new((0..descriptors.len()).map(|_| Slot::Waiting).collect()),
            no_space: Mutex::new(None),
            stats: DownloadStats::default(),
            dispatch: transfers.child_token(),
            transfers,
        });

        let workers = self.concurrency().min(descriptors.len());
        info!(workers, items = descriptors.len(), "starting downloads");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            set.spawn(async move { shared.work(worker).await });
        }

        RunningBatch {
            shared,
            workers: set,
        }
    }
}

enum Slot {
    Waiting,
    Done(Option<DownloadError>),
}

struct Batch {
    transport: Arc<dyn Transport>,
    user_agent: String,
    output_root: PathBuf,
    on_item: Option<ItemCallback>,
    items: Vec<DescriptorHandle>,
    cursor: AtomicUsize,
    slots: Mutex<Vec<Slot>>,
    no_space: Mutex<Option<(String, PathBuf)>>,
    stats: DownloadStats,
    dispatch: CancellationToken,
    transfers: CancellationToken,
}

enum ItemStatus {
    Skipped,
    Downloaded,
}

impl Batch {
    async fn work(&self, worker: usize) {
        loop {
            if self.dispatch.is_cancelled() {
                debug!(worker, "dispatch stopped");
                break;
            }
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(handle) = self.items.get(index) else {
                break;
            };

            let result = tokio::select! {
                biased;
                () = self.transfers.cancelled() => {
                    let descriptor = handle.snapshot();
                    Err(DownloadError::cancelled(
                        descriptor.url,
                        self.output_root.join(&descriptor.out_path),
                    ))
                }
                result = self.process(handle) => result,
            };

            self.finish_item(index, handle, result);
        }
    }

    fn finish_item(
        &self,
        index: usize,
        handle: &DescriptorHandle,
        result: Result<ItemStatus, DownloadError>,
    ) {
        let descriptor = handle.snapshot();
        let error = match result {
            Ok(ItemStatus::Skipped) => {
                self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                None
            }
            Ok(ItemStatus::Downloaded) => {
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                info!(url = %descriptor.url, out_path = %descriptor.out_path, size = descriptor.size, "download completed");
                None
            }
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                if error.is_no_space() {
                    warn!(url = %descriptor.url, error = %error, "output device full, cancelling batch");
                    lock(&self.no_space)
                        .get_or_insert_with(|| (error.url().to_string(), error.path().to_path_buf()));
                    self.transfers.cancel();
                } else {
                    warn!(url = %descriptor.url, error = %error, "download failed");
                }
                Some(error)
            }
        };

        if let Some(callback) = &self.on_item {
            callback(&descriptor, error.as_ref());
        }
        if let Some(slot) = lock(&self.slots).get_mut(index) {
            *slot = Slot::Done(error);
        }
    }

    async fn process(&self, handle: &DescriptorHandle) -> Result<ItemStatus, DownloadError> {
        let descriptor = handle.snapshot();
        if descriptor.completed {
            return Ok(ItemStatus::Skipped);
        }

        let url = descriptor.url.as_str();
        let final_path = self.output_root.join(&descriptor.out_path);

        if let Some(expected) = descriptor.digest()
            && let Some(found) = file_matches_digest(&final_path, expected).await
        {
            debug!(url, path = %final_path.display(), "already downloaded");
            handle.update(|d| d.mark_completed(found.size, found.sha256));
            return Ok(ItemStatus::Skipped);
        }

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(url, parent, e))?;
        }

        let request = FetchRequest {
            url: url.to_string(),
            user_agent: self.user_agent.clone(),
        };
        let response = self
            .transport
            .get(&request)
            .await
            .map_err(|e| DownloadError::transport(url, &final_path, e))?;
        if !response.is_success() {
            return Err(DownloadError::http_status(url, &final_path, response.status));
        }
        if let Some(length) = response.content_length {
            handle.update(|d| d.content_length = Some(length));
        }

        let partial = partial_path(&final_path);
        let file = File::create(&partial)
            .await
            .map_err(|e| DownloadError::io(url, &partial, e))?;
        let mut writer = HashingWriter::new(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file));

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| DownloadError::transport(url, &final_path, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(url, &partial, e))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(url, &partial, e))?;
        writer
            .get_ref()
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(url, &partial, e))?;

        let size = writer.current_size();
        let sha256 = writer.current_hash();
        drop(writer);

        if let Some(expected) = descriptor.digest()
            && !expected.eq_ignore_ascii_case(&sha256)
        {
            discard(&partial).await;
            return Err(DownloadError::checksum_mismatch(url, &final_path, expected, sha256));
        }
        if let Some(expected) = response.content_length
            && expected != size
        {
            discard(&partial).await;
            return Err(DownloadError::size_mismatch(url, &final_path, expected, size));
        }

        tokio::fs::rename(&partial, &final_path)
            .await
            .map_err(|e| DownloadError::io(url, &final_path, e))?;
        handle.update(|d| d.mark_completed(size, sha256));
        Ok(ItemStatus::Downloaded)
    }
}

/// Handle to a batch whose workers are running.
pub(crate) struct RunningBatch {
    shared: Arc<Batch>,
    pub(crate) workers: JoinSet<()>,
}

impl RunningBatch {
    /// Stops workers from taking new items.
    pub(crate) fn stop_dispatch(&self) {
        self.shared.dispatch.cancel();
    }

    /// Drops every in-flight transfer.
    pub(crate) fn cancel_transfers(&self) {
        self.shared.transfers.cancel();
    }

    /// The item whose write ran out of space, if any.
    pub(crate) fn no_space(&self) -> Option<RunError> {
        lock(&self.shared.no_space)
            .clone()
            .map(|(url, path)| RunError::NoSpace { url, path })
    }

    /// Collects per-item results.
    ///
    /// Dispatched items that never finished (the batch was aborted) report
    /// [`DownloadError::Cancelled`]; undispatched items report `None`.
    pub(crate) fn into_outcome(self, error: Option<RunError>) -> RunOutcome {
        let dispatched = self.shared.cursor.load(Ordering::SeqCst);
        let slots = std::mem::take(&mut *lock(&self.shared.slots));

        let item_errors = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Slot::Done(error) => error,
                Slot::Waiting if index < dispatched => {
                    let descriptor = self.shared.items[index].snapshot();
                    Some(DownloadError::cancelled(
                        descriptor.url,
                        self.shared.output_root.join(&descriptor.out_path),
                    ))
                }
                Slot::Waiting => None,
            })
            .collect();

        let outcome = RunOutcome {
            error,
            item_errors,
            completed: self.shared.stats.completed(),
            skipped: self.shared.stats.skipped(),
        };
        info!(
            completed = outcome.completed,
            skipped = outcome.skipped,
            failed = outcome.failed(),
            error = ?outcome.error,
            "download run finished"
        );
        outcome
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `<path>.part`
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn discard(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %error, "failed to remove partial file");
    }
}
