// Error types for the download engine

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// yt-dlp or ffmpeg is missing from the configured location
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// URL is not something the extractor can take
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL already has an item in flight
    #[error("Already queued: {0}")]
    AlreadyQueued(String),

    /// The OS refused to start the process
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    /// Process exited unsuccessfully with a substantive stderr
    #[error("{message}")]
    Subprocess { code: Option<i32>, message: String },

    /// HTTP lookup failed
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Cooperative cancellation, not a failure
    #[error("Cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Setup-level failures abort a whole operation instead of one item.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::ToolNotFound(_))
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Network(format!("request timed out: {}", e));
        }
        Self::Network(e.to_string())
    }
}
