pub mod downloader;
pub mod ytdlp;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use downloader::search::DEFAULT_MAX_RESULTS;
pub use downloader::{
    CommandRunner, DownloadError, DownloadId, DownloadItem, DownloadQueue, DownloadSettings,
    DownloadStatus, DuckDuckGoSearch, MetadataFetcher, NetworkConfig, QueueEvent,
    QueueRunSummary, SearchAggregator, SearchResult, SystemRunner, ToolPaths, WebSearch,
};

/// Upper bound on a single buffered yt-dlp call (metadata, search listings)
const BUFFERED_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Entry points for a presentation layer: one queue, one search, shared tools.
#[derive(Clone)]
pub struct Engine {
    queue: DownloadQueue,
    search: SearchAggregator,
    last_results: Arc<Mutex<Vec<SearchResult>>>,
}

impl Engine {
    pub fn new(tools: ToolPaths, network: NetworkConfig) -> Result<Self, DownloadError> {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemRunner::new().with_timeout(BUFFERED_CALL_TIMEOUT));
        let web: Arc<dyn WebSearch> = Arc::new(DuckDuckGoSearch::new(&network)?);
        Ok(Self::with_parts(runner, web, tools, network))
    }

    /// Wire the engine around caller-supplied process and web seams
    pub fn with_parts(
        runner: Arc<dyn CommandRunner>,
        web: Arc<dyn WebSearch>,
        tools: ToolPaths,
        network: NetworkConfig,
    ) -> Self {
        let fetcher = MetadataFetcher::new(Arc::clone(&runner), tools.clone(), network);
        Self {
            queue: DownloadQueue::new(runner, tools),
            search: SearchAggregator::new(fetcher, web),
            last_results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    /// Queue `urls` and run until every queued item has settled.
    /// Returns the ids of the items that were accepted.
    pub async fn start_queue<I, S>(
        &self,
        urls: I,
        settings: &DownloadSettings,
    ) -> Result<Vec<DownloadId>, DownloadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.queue.start_queue(urls, settings).await
    }

    pub fn cancel(&self, id: DownloadId) -> bool {
        self.queue.cancel(id)
    }

    pub fn enqueue_search_result(&self, result: &SearchResult) -> Result<DownloadId, DownloadError> {
        self.queue.submit_search_result(result)
    }

    pub fn items(&self) -> Vec<DownloadItem> {
        self.queue.items()
    }

    pub fn clear_finished(&self) -> usize {
        self.queue.clear_finished()
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, DownloadError> {
        self.search_with_limit(query, DEFAULT_MAX_RESULTS, &CancellationToken::new())
            .await
    }

    /// Run a search and remember its results as the latest ones
    pub async fn search_with_limit(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, DownloadError> {
        let results = self.search.search(query, max_results, cancel).await?;
        *self
            .last_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = results.clone();
        Ok(results)
    }

    pub fn last_search_results(&self) -> Vec<SearchResult> {
        self.last_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
