// Common data models for the download engine

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title an item carries until its metadata has been resolved.
pub const PLACEHOLDER_TITLE: &str = "Fetching info...";
pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Stable identifier of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    FetchingInfo,
    Downloading,
    Converting,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Holding a concurrency permit (or about to).
    pub fn is_transferring(&self) -> bool {
        matches!(self, Self::Downloading | Self::Converting)
    }
}

/// One requested download tracked through the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: DownloadId,
    pub url: String,
    pub title: String,
    pub status: DownloadStatus,
    /// Percentage in [0, 100]
    pub progress: f64,
    /// Set only in the `Error` state
    pub error_message: Option<String>,
    /// Set only on `Completed`, and even then only if yt-dlp named the file
    pub output_path: Option<PathBuf>,
}

impl DownloadItem {
    pub fn new(url: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: DownloadId::new(),
            url: url.into(),
            title: title.unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            status: DownloadStatus::Pending,
            progress: 0.0,
            error_message: None,
            output_path: None,
        }
    }

    pub fn needs_metadata(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    pub fn status_text(&self) -> String {
        match self.status {
            DownloadStatus::Pending => "Pending".to_string(),
            DownloadStatus::FetchingInfo => "Fetching info...".to_string(),
            DownloadStatus::Downloading => format!("Downloading {:.0}%", self.progress),
            DownloadStatus::Converting => "Converting...".to_string(),
            DownloadStatus::Completed => "Completed".to_string(),
            DownloadStatus::Error => format!(
                "Error: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            DownloadStatus::Cancelled => "Cancelled".to_string(),
        }
    }
}

/// Target audio container/codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Flac,
    Opus,
    Aac,
    Wav,
}

impl AudioFormat {
    /// Value for yt-dlp `--audio-format`
    pub fn as_ytdlp_format(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Opus => "opus",
            Self::Aac => "m4a",
            Self::Wav => "wav",
        }
    }

    /// Bitrate only means something for lossy codecs
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Mp3 | Self::Aac | Self::Opus)
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "flac" => Ok(Self::Flac),
            "opus" => Ok(Self::Opus),
            "aac" | "m4a" => Ok(Self::Aac),
            "wav" => Ok(Self::Wav),
            other => Err(format!("unsupported audio format: {}", other)),
        }
    }
}

/// Network configuration forwarded to yt-dlp and the web lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// SOCKS5/HTTP proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
        }
    }
}

/// Read-only snapshot of user settings consumed by a queue run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub audio_format: AudioFormat,
    /// kbps, ignored for lossless formats
    pub audio_bitrate: u32,
    pub download_playlist: bool,
    pub embed_metadata: bool,
    pub embed_thumbnail: bool,
    pub max_concurrent_downloads: usize,
    pub use_artist_title_naming: bool,
    /// Overrides the naming template derived from `use_artist_title_naming`
    pub file_name_pattern: Option<String>,
    pub network: NetworkConfig,
}

impl DownloadSettings {
    pub const AVAILABLE_BITRATES: [u32; 4] = [128, 192, 256, 320];

    /// Full yt-dlp `-o` template, rooted in the output directory
    pub fn output_template(&self) -> String {
        let pattern = match &self.file_name_pattern {
            Some(p) if !p.trim().is_empty() => p.as_str(),
            _ if self.use_artist_title_naming => "%(artist,uploader)s - %(track,title)s.%(ext)s",
            _ => "%(title)s.%(ext)s",
        };
        self.output_dir.join(pattern).to_string_lossy().to_string()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let base = dirs::audio_dir()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            output_dir: base.join("YouTube Downloads"),
            audio_format: AudioFormat::Mp3,
            audio_bitrate: 320,
            download_playlist: true,
            embed_metadata: true,
            embed_thumbnail: true,
            max_concurrent_downloads: 3,
            use_artist_title_naming: true,
            file_name_pattern: None,
            network: NetworkConfig::default(),
        }
    }
}

/// Normalized single-item record from `--dump-json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    /// Clean song name when the platform knows it
    pub track: Option<String>,
    pub artist: String,
    /// `M:SS` or `H:MM:SS`
    pub duration: String,
    pub thumbnail: String,
    pub description: String,
}

impl VideoInfo {
    pub fn display_track(&self) -> &str {
        self.track.as_deref().unwrap_or(&self.title)
    }

    pub fn has_known_artist(&self) -> bool {
        !self.artist.is_empty() && self.artist != UNKNOWN_ARTIST
    }
}

/// One ranked search candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub track: Option<String>,
    pub artist: String,
    pub url: String,
    pub duration: String,
    pub thumbnail: String,
    /// At most 200 characters plus an ellipsis
    pub description: String,
    /// Uploaded by the rights holder ("Provided to YouTube by ...")
    pub is_official_audio: bool,
}

impl SearchResult {
    pub fn display_track(&self) -> &str {
        self.track.as_deref().unwrap_or(&self.title)
    }

    /// Title to pre-fill when this result is queued
    pub fn queue_title(&self) -> String {
        format!("{} - {}", self.artist, self.display_track())
    }

    pub fn provenance_label(&self) -> &'static str {
        if self.is_official_audio {
            "Official Audio"
        } else {
            "Upload"
        }
    }
}

/// State changes pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Added(DownloadItem),
    Updated(DownloadItem),
    Removed(DownloadId),
}
