// Metadata fetcher - single-shot yt-dlp `--dump-json` invocations
//
// Records are parsed defensively: every field is optional and a missing or
// wrong-typed field falls back to a documented default. Unparseable output
// means "not found", never an error.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{NetworkConfig, SearchResult, VideoInfo, UNKNOWN_ARTIST, UNKNOWN_TITLE};
use super::tools::ToolPaths;
use super::traits::{CommandRunner, ProcessOutput};
use super::utils::stderr_excerpt;
use crate::ytdlp;

const DESCRIPTION_MAX_CHARS: usize = 200;
const OFFICIAL_AUDIO_PREFIX: &str = "Provided to YouTube by";

/// One loosely-typed structured record as emitted by yt-dlp
#[derive(Debug, Clone)]
pub struct ToolRecord {
    fields: Map<String, Value>,
}

impl ToolRecord {
    /// `None` unless `line` is a JSON object
    pub fn parse(line: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Object(fields)) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Non-empty string value of `key`
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whole seconds from an integer or float field; 0 when absent or negative
    pub fn whole_seconds(&self, key: &str) -> u64 {
        match self.fields.get(key).and_then(Value::as_f64) {
            Some(secs) if secs.is_finite() && secs > 0.0 => secs.floor() as u64,
            _ => 0,
        }
    }

    pub fn to_video_info(&self) -> VideoInfo {
        VideoInfo {
            id: self.str_field("id").unwrap_or_default().to_string(),
            title: self.str_field("title").unwrap_or(UNKNOWN_TITLE).to_string(),
            track: self.str_field("track").map(str::to_string),
            artist: self
                .str_field("artist")
                .or_else(|| self.str_field("uploader"))
                .unwrap_or(UNKNOWN_ARTIST)
                .to_string(),
            duration: format_duration(self.whole_seconds("duration")),
            thumbnail: self.str_field("thumbnail").unwrap_or_default().to_string(),
            // Kept verbatim: the official-audio check reads its first bytes
            description: self
                .fields
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Watch URL for a flat playlist entry, expanding bare ids
    fn entry_url(&self) -> Option<String> {
        if let Some(url) = self.str_field("url") {
            if url.starts_with("http") {
                return Some(url.to_string());
            }
            return Some(ytdlp::watch_url(url));
        }
        self.str_field("id").map(ytdlp::watch_url)
    }
}

/// `M:SS` below an hour, `H:MM:SS` from an hour up
pub fn format_duration(total_seconds: u64) -> String {
    let total = time::Duration::seconds(i64::try_from(total_seconds).unwrap_or(i64::MAX));
    let hours = total.whole_hours();
    let minutes = total.whole_minutes() % 60;
    let seconds = total.whole_seconds() % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

pub fn truncate_description(description: &str) -> String {
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        let cut: String = description.chars().take(DESCRIPTION_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        description.to_string()
    }
}

/// Label-provided uploads open their description with a fixed credit line.
pub fn is_official_audio(description: &str) -> bool {
    description
        .get(..OFFICIAL_AUDIO_PREFIX.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(OFFICIAL_AUDIO_PREFIX))
}

/// Single record from `--dump-json` stdout
pub fn parse_video_info(stdout: &str) -> Option<VideoInfo> {
    ToolRecord::parse(stdout)
        .or_else(|| {
            stdout
                .lines()
                .find(|l| !l.trim().is_empty())
                .and_then(ToolRecord::parse)
        })
        .map(|record| record.to_video_info())
}

/// Issues metadata invocations through a [`CommandRunner`]
#[derive(Clone)]
pub struct MetadataFetcher {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
    network: NetworkConfig,
}

impl MetadataFetcher {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths, network: NetworkConfig) -> Self {
        Self {
            runner,
            tools,
            network,
        }
    }

    /// Same runner and tools, different network settings
    pub fn with_network(&self, network: NetworkConfig) -> Self {
        Self {
            network,
            ..self.clone()
        }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn run(
        &self,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError> {
        let extractor: &Path = self.tools.extractor();
        self.runner.run(extractor, &args, cancel).await
    }

    /// Describe one item. `Ok(None)` when the tool produced no usable record.
    pub async fn fetch_one(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<VideoInfo>, DownloadError> {
        let output = self.run(ytdlp::info_args(url, &self.network), cancel).await?;
        let info = parse_video_info(&output.stdout);

        if info.is_none() {
            tracing::debug!(
                url,
                exit_code = ?output.exit_code,
                stderr = %stderr_excerpt(&output.stderr),
                "No metadata record in yt-dlp output"
            );
        }

        Ok(info)
    }

    /// Entry URLs of a playlist, in playlist order. Malformed lines are skipped.
    pub async fn fetch_playlist_urls(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DownloadError> {
        let output = self.run(ytdlp::playlist_args(url, &self.network), cancel).await?;

        let urls: Vec<String> = output
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(ToolRecord::parse)
            .filter_map(|record| record.entry_url())
            .collect();

        if urls.is_empty() && !output.success() {
            return Err(DownloadError::Subprocess {
                code: output.exit_code,
                message: stderr_excerpt(&output.stderr),
            });
        }

        Ok(urls)
    }

    /// Video ids from a flat listing (search or playlist). Non-video ids are dropped.
    pub async fn fetch_flat_ids(
        &self,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DownloadError> {
        let output = self.run(args, cancel).await?;

        let ids: Vec<String> = output
            .stdout
            .lines()
            .filter_map(ToolRecord::parse)
            .filter_map(|record| record.str_field("id").map(str::to_string))
            .filter(|id| ytdlp::is_video_id(id))
            .collect();

        if ids.is_empty() && !output.success() {
            return Err(DownloadError::Subprocess {
                code: output.exit_code,
                message: stderr_excerpt(&output.stderr),
            });
        }

        Ok(ids)
    }

    /// Full record for a search candidate, classified and trimmed for display
    pub async fn fetch_search_details(
        &self,
        video_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SearchResult>, DownloadError> {
        let url = ytdlp::watch_url(video_id);
        let Some(info) = self.fetch_one(&url, cancel).await? else {
            return Ok(None);
        };

        Ok(Some(SearchResult {
            id: video_id.to_string(),
            is_official_audio: is_official_audio(&info.description),
            description: truncate_description(&info.description),
            title: info.title,
            track: info.track,
            artist: info.artist,
            url,
            duration: info.duration,
            thumbnail: info.thumbnail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testing::{fake_tools, Reply, ScriptedRunner};
    use serde_json::json;

    fn fetcher(runner: ScriptedRunner) -> (tempfile::TempDir, MetadataFetcher) {
        let (dir, tools) = fake_tools();
        let network = NetworkConfig { proxy: None, timeout: None };
        (dir, MetadataFetcher::new(Arc::new(runner), tools, network))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(3599), "59:59");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3725), "1:02:05");
    }

    #[test]
    fn test_record_defaults() {
        let info = parse_video_info(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(info.title, UNKNOWN_TITLE);
        assert_eq!(info.artist, UNKNOWN_ARTIST);
        assert_eq!(info.duration, "0:00");
        assert_eq!(info.thumbnail, "");
        assert_eq!(info.track, None);
    }

    #[test]
    fn test_record_artist_falls_back_to_uploader() {
        let info = parse_video_info(r#"{"title": "t", "uploader": "Some Channel"}"#).unwrap();
        assert_eq!(info.artist, "Some Channel");

        let info = parse_video_info(r#"{"artist": "Band", "uploader": "Band - Topic"}"#).unwrap();
        assert_eq!(info.artist, "Band");
    }

    #[test]
    fn test_record_wrong_types_use_defaults() {
        let info =
            parse_video_info(r#"{"title": 42, "artist": null, "duration": "long"}"#).unwrap();
        assert_eq!(info.title, UNKNOWN_TITLE);
        assert_eq!(info.artist, UNKNOWN_ARTIST);
        assert_eq!(info.duration, "0:00");
    }

    #[test]
    fn test_record_float_duration() {
        let info = parse_video_info(r#"{"duration": 3725.6}"#).unwrap();
        assert_eq!(info.duration, "1:02:05");
    }

    #[test]
    fn test_malformed_output_is_not_found() {
        assert!(parse_video_info("ERROR: nope").is_none());
        assert!(parse_video_info("").is_none());
        assert!(parse_video_info("[1, 2]").is_none());
    }

    #[test]
    fn test_official_audio_prefix() {
        assert!(is_official_audio("Provided to YouTube by Sony Music\n\nSong"));
        assert!(is_official_audio("PROVIDED TO YOUTUBE BY label"));
        assert!(!is_official_audio("Official video. Provided to YouTube by X"));
        assert!(!is_official_audio(""));
        assert!(!is_official_audio("  Provided to YouTube by label"));
    }

    #[test]
    fn test_truncate_description() {
        let long = "é".repeat(250);
        let cut = truncate_description(&long);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_description("short"), "short");
    }

    #[tokio::test]
    async fn test_fetch_one_uses_single_item_mode() {
        let runner = ScriptedRunner::new(|_| {
            Reply::lines([json!({
                "id": "dQw4w9WgXcQ",
                "title": "Never Gonna Give You Up",
                "artist": "Rick Astley",
                "duration": 213
            })
            .to_string()])
        });
        let calls = runner.calls();
        let (_dir, fetcher) = fetcher(runner);

        let info = fetcher
            .fetch_one("https://youtu.be/dQw4w9WgXcQ", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.artist, "Rick Astley");
        assert_eq!(info.duration, "3:33");

        let args = calls.lock().unwrap()[0].clone();
        assert!(args.contains(&"--dump-json".to_string()));
        assert!(args.contains(&"--no-playlist".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_one_garbage_is_none() {
        let runner = ScriptedRunner::new(|_| Reply::failed(1, "ERROR: Unsupported URL"));
        let (_dir, fetcher) = fetcher(runner);
        let info = fetcher
            .fetch_one("https://youtu.be/x", &CancellationToken::new())
            .await
            .unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_playlist_skips_bad_lines_and_expands_ids() {
        let runner = ScriptedRunner::new(|_| {
            Reply::lines([
                json!({"url": "https://www.youtube.com/watch?v=aaaaaaaaaaa"}).to_string(),
                "not json at all".to_string(),
                json!({"url": "bbbbbbbbbbb", "id": "bbbbbbbbbbb"}).to_string(),
                json!({"id": "ccccccccccc"}).to_string(),
                json!({"title": "no id or url"}).to_string(),
            ])
        });
        let (_dir, fetcher) = fetcher(runner);

        let urls = fetcher
            .fetch_playlist_urls("https://www.youtube.com/playlist?list=PL1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/watch?v=aaaaaaaaaaa",
                "https://www.youtube.com/watch?v=bbbbbbbbbbb",
                "https://www.youtube.com/watch?v=ccccccccccc",
            ]
        );
    }

    #[tokio::test]
    async fn test_playlist_failure_without_entries_is_error() {
        let runner = ScriptedRunner::new(|_| Reply::failed(1, "ERROR: playlist does not exist"));
        let (_dir, fetcher) = fetcher(runner);
        let result = fetcher
            .fetch_playlist_urls("https://www.youtube.com/playlist?list=PLx", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DownloadError::Subprocess { .. })));
    }

    #[tokio::test]
    async fn test_flat_ids_drop_channel_ids() {
        let runner = ScriptedRunner::new(|_| {
            Reply::lines([
                json!({"id": "dQw4w9WgXcQ"}).to_string(),
                json!({"id": "UCuAXFkgsw1L7xaCfnd5JJOw"}).to_string(),
                json!({"id": "MPREb_abcdefghijk"}).to_string(),
            ])
        });
        let (_dir, fetcher) = fetcher(runner);
        let ids = fetcher
            .fetch_flat_ids(vec!["x".to_string()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids, vec!["dQw4w9WgXcQ"]);
    }

    #[tokio::test]
    async fn test_search_details_classifies_and_truncates() {
        let description = format!("Provided to YouTube by Label\n\n{}", "x".repeat(300));
        let runner = ScriptedRunner::new(move |_| {
            Reply::lines([json!({
                "title": "Song",
                "track": "Song (Remastered)",
                "uploader": "Artist - Topic",
                "description": description.clone()
            })
            .to_string()])
        });
        let (_dir, fetcher) = fetcher(runner);

        let result = fetcher
            .fetch_search_details("dQw4w9WgXcQ", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_official_audio);
        assert_eq!(result.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(result.display_track(), "Song (Remastered)");
        assert_eq!(result.description.chars().count(), 203);
    }

    #[tokio::test]
    async fn test_indented_credit_line_is_not_official() {
        let runner = ScriptedRunner::new(|_| {
            Reply::lines([json!({
                "title": "Song",
                "uploader": "Fan Channel",
                "description": "\n Provided to YouTube by Label"
            })
            .to_string()])
        });
        let (_dir, fetcher) = fetcher(runner);

        let result = fetcher
            .fetch_search_details("dQw4w9WgXcQ", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!result.is_official_audio);
    }
}
