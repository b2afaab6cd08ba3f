// Search aggregation - three lookup phases, id union, parallel enrichment, ranking

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexSet;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::metadata::MetadataFetcher;
use super::models::{NetworkConfig, SearchResult};
use super::traits::WebSearch;
use crate::ytdlp;

pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const DEFAULT_ENRICHMENT_LIMIT: usize = 8;

/// Cap on flat candidates asked of the platform search
const PLATFORM_CANDIDATE_CAP: usize = 20;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

lazy_static::lazy_static! {
    // Plain links and the percent-encoded form used in redirect hrefs
    static ref WATCH_ID_RE: Regex =
        Regex::new(r"(?i)youtube\.com(?:/|%2F)watch(?:\?|%3F)v(?:=|%3D)([a-z0-9_-]{11})").unwrap();
}

/// Video ids linked from a page of search-engine markup, first occurrence order
pub fn extract_watch_ids(markup: &str) -> Vec<String> {
    let ids: IndexSet<String> = WATCH_ID_RE
        .captures_iter(markup)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    ids.into_iter().collect()
}

/// DuckDuckGo's HTML endpoint, scoped to label-provided uploads
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new(network: &NetworkConfig) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder().user_agent(BROWSER_USER_AGENT);

        if let Some(timeout) = network.timeout {
            builder = builder.timeout(Duration::from_secs(u64::from(timeout)));
        }
        if let Some(proxy_url) = network.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    fn scoped_query(query: &str) -> String {
        format!("site:youtube.com {} \"Provided to YouTube\"", query)
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn find_video_ids(&self, query: &str) -> Result<Vec<String>, DownloadError> {
        let markup = self
            .client
            .get(DUCKDUCKGO_HTML_URL)
            .query(&[("q", Self::scoped_query(query))])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(extract_watch_ids(&markup))
    }
}

/// Official audio first, then title A-Z. Ties resolve by exact title, then id.
pub fn rank_results(mut results: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.is_official_audio
            .cmp(&a.is_official_audio)
            .then_with(|| compare_titles(&a.title, &b.title))
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(max_results);
    results
}

fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Fans a query out to every lookup source and merges the answers
#[derive(Clone)]
pub struct SearchAggregator {
    fetcher: MetadataFetcher,
    web: Arc<dyn WebSearch>,
    enrichment_limit: usize,
}

impl SearchAggregator {
    pub fn new(fetcher: MetadataFetcher, web: Arc<dyn WebSearch>) -> Self {
        Self {
            fetcher,
            web,
            enrichment_limit: DEFAULT_ENRICHMENT_LIMIT,
        }
    }

    /// Bound on simultaneous metadata calls during enrichment
    pub fn with_enrichment_limit(mut self, limit: usize) -> Self {
        self.enrichment_limit = limit.max(1);
        self
    }

    /// Ranked results for `query`, at most `max_results` of them.
    ///
    /// A failing lookup phase or candidate only shrinks the result. Errors
    /// are reserved for a missing extractor and for cancellation.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, DownloadError> {
        let query = query.trim();
        if query.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        self.fetcher.tools().ensure_present()?;

        let ids = self.collect_ids(query, max_results, cancel).await;
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tracing::debug!(query, candidates = ids.len(), "Enriching search candidates");

        let results = self.enrich(ids, cancel).await;
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let ranked = rank_results(results, max_results);
        tracing::info!(
            query,
            results = ranked.len(),
            official = ranked.iter().filter(|r| r.is_official_audio).count(),
            "Search finished"
        );
        Ok(ranked)
    }

    /// Run the three lookup phases concurrently and union their ids
    async fn collect_ids(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> IndexSet<String> {
        let network = self.fetcher.network();
        let platform_count = (max_results * 2).min(PLATFORM_CANDIDATE_CAP);

        let web = async {
            tokio::select! {
                _ = cancel.cancelled() => Err(DownloadError::Cancelled),
                found = self.web.find_video_ids(query) => found,
            }
        };
        let platform = self.fetcher.fetch_flat_ids(
            ytdlp::platform_search_args(query, platform_count, network),
            cancel,
        );
        let music = self
            .fetcher
            .fetch_flat_ids(ytdlp::music_search_args(query, network), cancel);

        let (web, platform, music) = tokio::join!(web, platform, music);

        let mut ids = IndexSet::new();
        for (phase, outcome) in [
            (self.web.name(), web),
            ("platform", platform),
            ("music", music),
        ] {
            match outcome {
                Ok(found) => {
                    tracing::debug!(phase, found = found.len(), "Search phase finished");
                    ids.extend(found.into_iter().filter(|id| ytdlp::is_video_id(id)));
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!(phase, error = %e, "Search phase failed"),
            }
        }
        ids
    }

    /// Full metadata for each id; candidates that fail are dropped
    async fn enrich(&self, ids: IndexSet<String>, cancel: &CancellationToken) -> Vec<SearchResult> {
        let permits = Arc::new(Semaphore::new(self.enrichment_limit));
        let mut slots: Vec<Option<SearchResult>> = vec![None; ids.len()];
        let mut tasks = JoinSet::new();

        for (slot, id) in ids.into_iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                match fetcher.fetch_search_details(&id, &cancel).await {
                    Ok(Some(result)) => Some((slot, result)),
                    Ok(None) => {
                        tracing::debug!(id = %id, "No details for search candidate");
                        None
                    }
                    Err(e) if e.is_cancelled() => None,
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "Search candidate lookup failed");
                        None
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((slot, result))) => slots[slot] = Some(result),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Search enrichment task aborted"),
            }
        }

        slots.into_iter().flatten().collect()
    }
}
