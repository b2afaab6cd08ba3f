// Helper functions shared by the metadata, download and search paths

use crate::downloader::models::NetworkConfig;

/// Longest stderr excerpt surfaced on an item
const EXCERPT_MAX_CHARS: usize = 300;

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(proxy) = &config.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    args
}

/// Build timeout arguments for yt-dlp
pub fn get_timeout_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(timeout) = config.timeout {
        args.push("--socket-timeout".to_string());
        args.push(timeout.to_string());
    }

    args
}

/// True when stderr carries nothing but yt-dlp warnings (or nothing at all)
pub fn stderr_is_warnings_only(stderr: &str) -> bool {
    stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .all(|l| l.starts_with("WARNING"))
}

/// Short reason for the UI: the `ERROR:` lines if any, else the last non-empty line.
pub fn stderr_excerpt(stderr: &str) -> String {
    let important: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .take(2)
        .collect();

    let excerpt = if !important.is_empty() {
        important.join(" | ")
    } else {
        stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("Unknown error")
            .to_string()
    };

    if excerpt.chars().count() > EXCERPT_MAX_CHARS {
        let cut: String = excerpt.chars().take(EXCERPT_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        excerpt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_and_timeout_args() {
        let config = NetworkConfig {
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            timeout: Some(15),
        };
        assert_eq!(get_proxy_args(&config), vec!["--proxy", "socks5://127.0.0.1:1080"]);
        assert_eq!(get_timeout_args(&config), vec!["--socket-timeout", "15"]);

        let empty = NetworkConfig { proxy: None, timeout: None };
        assert!(get_proxy_args(&empty).is_empty());
        assert!(get_timeout_args(&empty).is_empty());
    }

    #[test]
    fn test_warnings_only() {
        assert!(stderr_is_warnings_only(""));
        assert!(stderr_is_warnings_only("WARNING: [youtube] nsig extraction failed\n\n"));
        assert!(!stderr_is_warnings_only(
            "WARNING: something\nERROR: [youtube] abc: Video unavailable"
        ));
    }

    #[test]
    fn test_excerpt_prefers_error_lines() {
        let stderr = "WARNING: slow\nERROR: HTTP Error 403: Forbidden\nTraceback blah";
        assert_eq!(stderr_excerpt(stderr), "ERROR: HTTP Error 403: Forbidden");
        assert_eq!(stderr_excerpt("first\nlast line\n\n"), "last line");
        assert_eq!(stderr_excerpt(""), "Unknown error");
    }
}
