// Download queue - ordered items, bounded-concurrency workers, per-item cancellation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::{IndexMap, IndexSet};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::diagnostics::{describe_failure, diagnose_error};
use super::errors::DownloadError;
use super::metadata::MetadataFetcher;
use super::models::{
    DownloadId, DownloadItem, DownloadSettings, DownloadStatus, NetworkConfig, QueueEvent,
    SearchResult, VideoInfo, UNKNOWN_TITLE,
};
use super::tools::ToolPaths;
use super::traits::{CommandRunner, EventEmitter};
use super::utils::{stderr_excerpt, stderr_is_warnings_only};
use crate::ytdlp;

/// yt-dlp prints no "extraction started" line we can rely on; past this the
/// transfer is treated as done and the item shows as converting.
const CONVERTING_THRESHOLD: f64 = 99.0;

/// Terminal tallies of one `process_queue` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueRunSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

struct Slot {
    item: DownloadItem,
    cancel: CancellationToken,
    /// Owned by a running worker
    claimed: bool,
}

struct QueueInner {
    runner: Arc<dyn CommandRunner>,
    fetcher: MetadataFetcher,
    slots: Mutex<IndexMap<DownloadId, Slot>>,
    events: EventEmitter,
}

/// The download queue. Cheap to clone; clones share the same items.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

impl DownloadQueue {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths) -> Self {
        let fetcher = MetadataFetcher::new(Arc::clone(&runner), tools, NetworkConfig::default());
        Self {
            inner: Arc::new(QueueInner {
                runner,
                fetcher,
                slots: Mutex::new(IndexMap::new()),
                events: EventEmitter::default(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub fn tools(&self) -> &ToolPaths {
        self.inner.fetcher.tools()
    }

    /// Accept one URL as a new `Pending` item.
    ///
    /// A title skips metadata resolution for the item.
    pub fn submit(&self, url: &str, title: Option<String>) -> Result<DownloadId, DownloadError> {
        let url = url.trim();
        if !ytdlp::is_supported_url(url) {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }

        let mut slots = self.inner.lock();
        if slots
            .values()
            .any(|slot| slot.item.url == url && !slot.item.status.is_terminal())
        {
            return Err(DownloadError::AlreadyQueued(url.to_string()));
        }

        let item = DownloadItem::new(url, title);
        let id = item.id;
        self.inner.events.added(&item);
        slots.insert(
            id,
            Slot {
                item,
                cancel: CancellationToken::new(),
                claimed: false,
            },
        );

        tracing::debug!(id = %id, url, "Queued");
        Ok(id)
    }

    /// Enqueue a search hit under its composed "artist - track" title
    pub fn submit_search_result(&self, result: &SearchResult) -> Result<DownloadId, DownloadError> {
        self.submit(&result.url, Some(result.queue_title()))
    }

    /// Submit a batch of user input, expanding playlists when enabled.
    ///
    /// Blank and repeated lines are dropped; rejected URLs are logged and skipped.
    pub async fn add_urls<I, S>(&self, urls: I, settings: &DownloadSettings) -> Vec<DownloadId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: IndexSet<String> = urls
            .into_iter()
            .map(|u| u.as_ref().trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        let mut ids = Vec::new();
        for url in unique {
            let entries = if settings.download_playlist
                && ytdlp::is_supported_url(&url)
                && ytdlp::is_playlist_url(&url)
            {
                self.expand_playlist(&url, &settings.network).await
            } else {
                vec![url]
            };

            for entry in entries {
                match self.submit(&entry, None) {
                    Ok(id) => ids.push(id),
                    Err(e) => tracing::warn!(url = %entry, error = %e, "Skipping URL"),
                }
            }
        }
        ids
    }

    async fn expand_playlist(&self, url: &str, network: &NetworkConfig) -> Vec<String> {
        let fetcher = self.inner.fetcher.with_network(network.clone());
        match fetcher.fetch_playlist_urls(url, &CancellationToken::new()).await {
            Ok(entries) if !entries.is_empty() => {
                tracing::info!(url, entries = entries.len(), "Expanded playlist");
                entries
            }
            Ok(_) => {
                tracing::warn!(url, "Playlist has no entries, queueing the URL itself");
                vec![url.to_string()]
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "Playlist expansion failed, queueing the URL itself");
                vec![url.to_string()]
            }
        }
    }

    /// Submit `urls` and run the queue until every item has settled.
    pub async fn start_queue<I, S>(
        &self,
        urls: I,
        settings: &DownloadSettings,
    ) -> Result<Vec<DownloadId>, DownloadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tools().ensure_present()?;
        let ids = self.add_urls(urls, settings).await;
        self.process_queue(settings).await?;
        Ok(ids)
    }

    /// Drive every unclaimed `Pending` item to a terminal state.
    ///
    /// At most `settings.concurrency_limit()` items transfer at once. Only a
    /// missing tool fails the run; per-item failures land on the items.
    pub async fn process_queue(
        &self,
        settings: &DownloadSettings,
    ) -> Result<QueueRunSummary, DownloadError> {
        self.tools().ensure_present()?;

        let ids = self.inner.claim_pending();
        if ids.is_empty() {
            return Ok(QueueRunSummary::default());
        }

        let limit = settings.concurrency_limit();
        tracing::info!(items = ids.len(), concurrency = limit, "Processing download queue");

        let permits = Arc::new(Semaphore::new(limit));
        let settings = Arc::new(settings.clone());
        let mut workers = JoinSet::new();

        for &id in &ids {
            let inner = Arc::clone(&self.inner);
            let permits = Arc::clone(&permits);
            let settings = Arc::clone(&settings);
            workers.spawn(inner.run_item(id, permits, settings));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Download worker aborted");
            }
        }

        let summary = self.inner.settle(&ids);
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Download queue finished"
        );
        Ok(summary)
    }

    /// Cancel a non-terminal item. Returns false for unknown or finished items.
    pub fn cancel(&self, id: DownloadId) -> bool {
        let mut slots = self.inner.lock();
        let Some(slot) = slots.get_mut(&id) else {
            return false;
        };
        if slot.item.status.is_terminal() {
            return false;
        }

        slot.cancel.cancel();
        slot.item.status = DownloadStatus::Cancelled;
        self.inner.events.updated(&slot.item);
        tracing::info!(id = %id, "Download cancelled");
        true
    }

    /// Drop every terminal item; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        let mut slots = self.inner.lock();
        let before = slots.len();
        let events = &self.inner.events;
        slots.retain(|id, slot| {
            let finished = slot.item.status.is_terminal();
            if finished {
                events.removed(*id);
            }
            !finished
        });
        before - slots.len()
    }

    pub fn get(&self, id: DownloadId) -> Option<DownloadItem> {
        self.inner.lock().get(&id).map(|slot| slot.item.clone())
    }

    /// Snapshot in submission order
    pub fn items(&self) -> Vec<DownloadItem> {
        self.inner.lock().values().map(|slot| slot.item.clone()).collect()
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, IndexMap<DownloadId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim_pending(&self) -> Vec<DownloadId> {
        let mut slots = self.lock();
        slots
            .values_mut()
            .filter(|slot| slot.item.status == DownloadStatus::Pending && !slot.claimed)
            .map(|slot| {
                slot.claimed = true;
                slot.item.id
            })
            .collect()
    }

    /// Apply `change` to a live item; emits when `change` reports a modification.
    /// Finished items are never touched again.
    fn update(&self, id: DownloadId, change: impl FnOnce(&mut DownloadItem) -> bool) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(&id) else {
            return false;
        };
        if slot.item.status.is_terminal() || !change(&mut slot.item) {
            return false;
        }
        self.events.updated(&slot.item);
        true
    }

    fn set_status(&self, id: DownloadId, status: DownloadStatus) -> bool {
        self.update(id, |item| {
            if item.status == status {
                return false;
            }
            item.status = status;
            true
        })
    }

    fn report_progress(&self, id: DownloadId, percent: f64) {
        self.update(id, |item| {
            if !item.status.is_transferring() || percent <= item.progress {
                return false;
            }
            item.progress = percent;
            if percent >= CONVERTING_THRESHOLD {
                item.status = DownloadStatus::Converting;
            }
            true
        });
    }

    fn finish(&self, id: DownloadId, outcome: Result<Option<std::path::PathBuf>, DownloadError>) {
        match outcome {
            Ok(output_path) => {
                let completed = self.update(id, |item| {
                    item.progress = 100.0;
                    item.output_path = output_path.clone();
                    item.status = DownloadStatus::Completed;
                    true
                });
                if completed {
                    match &output_path {
                        Some(path) => {
                            tracing::info!(id = %id, path = %path.display(), "Download completed")
                        }
                        None => tracing::warn!(
                            id = %id,
                            "Download completed but yt-dlp did not name the output file"
                        ),
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                self.set_status(id, DownloadStatus::Cancelled);
            }
            Err(e) => {
                let message = e.to_string();
                let retryable = diagnose_error(&message).map_or(false, |r| r.is_retryable());
                tracing::warn!(id = %id, error = %message, retryable, "Download failed");
                self.update(id, |item| {
                    item.status = DownloadStatus::Error;
                    item.error_message = Some(message);
                    true
                });
            }
        }
    }

    /// One worker per item: wait for a permit, then resolve, download and settle.
    async fn run_item(
        self: Arc<Self>,
        id: DownloadId,
        permits: Arc<Semaphore>,
        settings: Arc<DownloadSettings>,
    ) {
        let (cancel, url, needs_metadata) = {
            let slots = self.lock();
            let Some(slot) = slots.get(&id) else {
                return;
            };
            (
                slot.cancel.clone(),
                slot.item.url.clone(),
                slot.item.needs_metadata(),
            )
        };

        // Dropped on every exit path, including unwinding
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.set_status(id, DownloadStatus::Cancelled);
                return;
            }
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish(id, Err(DownloadError::Io("permit pool closed".to_string())));
                    return;
                }
            },
        };

        let outcome = self
            .download(id, &url, needs_metadata, &settings, &cancel)
            .await;
        self.finish(id, outcome);
    }

    async fn download(
        &self,
        id: DownloadId,
        url: &str,
        needs_metadata: bool,
        settings: &DownloadSettings,
        cancel: &CancellationToken,
    ) -> Result<Option<std::path::PathBuf>, DownloadError> {
        if needs_metadata {
            self.set_status(id, DownloadStatus::FetchingInfo);
            let title = self.resolve_title(id, url, settings, cancel).await;
            self.update(id, |item| {
                item.title = title;
                true
            });
        }

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tokio::fs::create_dir_all(&settings.output_dir).await?;

        self.set_status(id, DownloadStatus::Downloading);
        let tools = self.fetcher.tools();
        let args = ytdlp::download_args(url, settings, tools.converter());

        let mut on_line = |line: &str| match ytdlp::parse_progress(line) {
            Some(percent) => self.report_progress(id, percent),
            None => tracing::trace!(id = %id, line, "yt-dlp"),
        };

        let output = self
            .runner
            .run_streaming(tools.extractor(), &args, &mut on_line, cancel)
            .await?;

        if output.success() || stderr_is_warnings_only(&output.stderr) {
            if !output.success() {
                tracing::debug!(id = %id, exit_code = ?output.exit_code, "Non-zero exit with warnings only");
            }
            Ok(ytdlp::resolve_output_path(&output.stdout))
        } else {
            Err(DownloadError::Subprocess {
                code: output.exit_code,
                message: describe_failure(&stderr_excerpt(&output.stderr)),
            })
        }
    }

    /// Display title for an item; metadata failures degrade to a placeholder.
    async fn resolve_title(
        &self,
        id: DownloadId,
        url: &str,
        settings: &DownloadSettings,
        cancel: &CancellationToken,
    ) -> String {
        let fetcher = self.fetcher.with_network(settings.network.clone());
        match fetcher.fetch_one(url, cancel).await {
            Ok(Some(info)) => compose_title(&info, settings.use_artist_title_naming),
            Ok(None) => {
                tracing::warn!(id = %id, url, "No metadata, using placeholder title");
                UNKNOWN_TITLE.to_string()
            }
            Err(e) => {
                tracing::warn!(id = %id, url, error = %e, "Metadata fetch failed, using placeholder title");
                UNKNOWN_TITLE.to_string()
            }
        }
    }

    /// Mark anything a vanished worker left behind, then tally.
    fn settle(&self, ids: &[DownloadId]) -> QueueRunSummary {
        let mut slots = self.lock();
        let mut summary = QueueRunSummary::default();

        for id in ids {
            let Some(slot) = slots.get_mut(id) else {
                continue;
            };
            slot.claimed = false;
            if !slot.item.status.is_terminal() {
                slot.item.status = DownloadStatus::Error;
                slot.item.error_message = Some("Worker stopped unexpectedly".to_string());
                self.events.updated(&slot.item);
            }
            match slot.item.status {
                DownloadStatus::Completed => summary.completed += 1,
                DownloadStatus::Cancelled => summary.cancelled += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }
}

fn compose_title(info: &VideoInfo, artist_naming: bool) -> String {
    if artist_naming && info.has_known_artist() {
        format!("{} - {}", info.artist, info.display_track())
    } else {
        info.title.clone()
    }
}
