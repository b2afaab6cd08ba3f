//! yt-dlp command-line contract.
//!
//! Argument vectors for every invocation mode the engine uses, and the
//! line patterns recognised in the tool's output. Output parsing is
//! best-effort: lines that match nothing are ignored.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::downloader::models::{DownloadSettings, NetworkConfig};
use crate::downloader::utils::{get_proxy_args, get_timeout_args};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const MUSIC_SEARCH_URL: &str = "https://music.youtube.com/search";

/// Platform video ids are exactly this long; channel/playlist ids are longer.
pub const VIDEO_ID_LEN: usize = 11;

lazy_static::lazy_static! {
    // [download]  42.5% of 10.00MiB at 1.2MiB/s ETA 00:07
    static ref PROGRESS_RE: Regex = Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").unwrap();
    static ref EXTRACT_DEST_RE: Regex =
        Regex::new(r"(?m)\[ExtractAudio\] Destination: (.+?)\r?$").unwrap();
    static ref MERGER_DEST_RE: Regex =
        Regex::new(r#"(?m)\[Merger\] Merging formats into "(.+)"\r?$"#).unwrap();
}

/// Canonical watch URL for a bare video id
pub fn watch_url(id: &str) -> String {
    format!("{}{}", WATCH_URL_PREFIX, id)
}

const SUPPORTED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// An http(s) link on a platform host or one of its subdomains
pub fn is_supported_url(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    SUPPORTED_HOSTS.iter().any(|supported| {
        host == *supported
            || host
                .strip_suffix(*supported)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

pub fn is_playlist_url(url: &str) -> bool {
    url.to_lowercase().contains("list=")
}

pub fn is_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn network_args(network: &NetworkConfig) -> Vec<String> {
    let mut args = get_timeout_args(network);
    args.extend(get_proxy_args(network));
    args
}

/// Single item, full structured record on stdout
pub fn info_args(url: &str, network: &NetworkConfig) -> Vec<String> {
    let mut args = vec![
        "--dump-json".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
    ];
    args.extend(network_args(network));
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// One minimal record per playlist entry, newline-delimited
pub fn playlist_args(url: &str, network: &NetworkConfig) -> Vec<String> {
    let mut args = vec!["--flat-playlist".to_string(), "--dump-json".to_string()];
    args.extend(network_args(network));
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// Direct platform search, ids only
pub fn platform_search_args(query: &str, count: usize, network: &NetworkConfig) -> Vec<String> {
    let mut args = vec![
        "--dump-json".to_string(),
        "--flat-playlist".to_string(),
        "--no-download".to_string(),
    ];
    args.extend(network_args(network));
    args.push("--".to_string());
    args.push(format!("ytsearch{}:{}", count, query));
    args
}

/// Music-flavoured search, surfaces label "Topic" uploads
pub fn music_search_args(query: &str, network: &NetworkConfig) -> Vec<String> {
    let url = reqwest::Url::parse_with_params(MUSIC_SEARCH_URL, &[("q", query)])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}?q={}", MUSIC_SEARCH_URL, query));

    let mut args = vec![
        "--dump-json".to_string(),
        "--flat-playlist".to_string(),
        "--no-download".to_string(),
    ];
    args.extend(network_args(network));
    args.push("--".to_string());
    args.push(url);
    args
}

/// Extract-to-audio invocation with line-buffered progress
pub fn download_args(url: &str, settings: &DownloadSettings, converter: &Path) -> Vec<String> {
    let mut args = vec![
        "-x".to_string(),
        "--audio-format".to_string(),
        settings.audio_format.as_ytdlp_format().to_string(),
    ];

    if settings.audio_format.is_lossy() {
        args.push("--audio-quality".to_string());
        args.push(format!("{}K", settings.audio_bitrate));
    }

    args.extend([
        "--ffmpeg-location".to_string(),
        converter.to_string_lossy().to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        settings.output_template(),
        "--newline".to_string(),
    ]);

    if settings.embed_metadata {
        args.push("--embed-metadata".to_string());
        args.push("--add-metadata".to_string());
    }

    if settings.embed_thumbnail {
        args.push("--embed-thumbnail".to_string());
        args.push("--convert-thumbnails".to_string());
        args.push("jpg".to_string());
    }

    // Strip characters that are illegal in file names on any platform
    args.push("--windows-filenames".to_string());

    args.extend(network_args(&settings.network));
    // Everything after the separator is a positional URL, never an option
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// Percentage from a `[download] NN.N%` line, anywhere in the line
pub fn parse_progress(line: &str) -> Option<f64> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(percent.clamp(0.0, 100.0))
}

/// Final file named in the accumulated stdout of a finished download.
///
/// The audio-extraction destination wins; the merger destination is the
/// fallback. `None` means yt-dlp succeeded without naming a file we recognise.
pub fn resolve_output_path(stdout: &str) -> Option<PathBuf> {
    EXTRACT_DEST_RE
        .captures(stdout)
        .or_else(|| MERGER_DEST_RE.captures(stdout))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}
