// Downloader module - queue orchestration, metadata and search over yt-dlp

pub mod diagnostics;
pub mod errors;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod search;
pub mod tools;
pub mod traits;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::DownloadError;
pub use metadata::MetadataFetcher;
pub use models::{
    AudioFormat, DownloadId, DownloadItem, DownloadSettings, DownloadStatus, NetworkConfig,
    QueueEvent, SearchResult, VideoInfo,
};
pub use orchestrator::{DownloadQueue, QueueRunSummary};
pub use process::SystemRunner;
pub use search::{DuckDuckGoSearch, SearchAggregator};
pub use tools::ToolPaths;
pub use traits::{CommandRunner, EventEmitter, WebSearch};
