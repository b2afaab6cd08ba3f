// Failure diagnostics - turns yt-dlp stderr into a reason a person can act on

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The platform refused the media request
    Forbidden,
    /// Needs a signed-in, age-verified account
    AgeGated,
    /// Blocked in the caller's region
    RegionLocked,
    /// HTTP 429 and friends
    Throttled,
    Private,
    /// Removed, terminated or never existed
    Gone,
    /// Paid or DRM-wrapped stream
    Protected,
    /// Socket-level trouble reaching the host
    Unreachable,
    /// Post-processing (ffmpeg/ffprobe) broke
    ConversionFailed,
}

/// Checked top to bottom; permanent conditions come before transient ones
/// so "private video ... 403" reads as private, not forbidden.
const SIGNATURES: &[(FailureReason, &[&str])] = &[
    (
        FailureReason::Protected,
        &["drm", "widevine", "requires purchase", "requires payment"],
    ),
    (FailureReason::Private, &["private video", "video is private"]),
    (
        FailureReason::Gone,
        &[
            "video unavailable",
            "video is unavailable",
            "has been removed",
            "no longer available",
            "account associated with this video has been terminated",
        ],
    ),
    (
        FailureReason::AgeGated,
        &["age-restricted", "confirm your age", "inappropriate for some users"],
    ),
    (
        FailureReason::RegionLocked,
        &["not available in your country", "blocked in your country", "geo restrict"],
    ),
    (
        FailureReason::Throttled,
        &["429", "too many requests", "rate limit", "rate-limit"],
    ),
    (FailureReason::Forbidden, &["403", "forbidden"]),
    (
        FailureReason::ConversionFailed,
        &["ffmpeg", "ffprobe", "postprocessing"],
    ),
    (
        FailureReason::Unreachable,
        &[
            "timed out",
            "timeout",
            "connection refused",
            "connection reset",
            "network is unreachable",
            "name or service not known",
        ],
    ),
];

impl FailureReason {
    /// Worth trying again later, possibly through another proxy
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Forbidden | Self::Throttled | Self::Unreachable)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::AgeGated => "Age-restricted content",
            Self::RegionLocked => "Not available in your region",
            Self::Throttled => "Rate limited by YouTube",
            Self::Private => "Private video",
            Self::Gone => "Video unavailable",
            Self::Protected => "DRM-protected content",
            Self::Unreachable => "Network problem",
            Self::ConversionFailed => "Audio conversion failed",
        }
    }
}

pub fn diagnose_error(stderr: &str) -> Option<FailureReason> {
    let haystack = stderr.to_lowercase();
    SIGNATURES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| haystack.contains(n)))
        .map(|(reason, _)| *reason)
}

/// Message attached to an item that ended in `Error`
pub fn describe_failure(stderr_excerpt: &str) -> String {
    match diagnose_error(stderr_excerpt) {
        Some(reason) => format!("{}: {}", reason.description(), stderr_excerpt),
        None => stderr_excerpt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden() {
        assert_eq!(
            diagnose_error("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            Some(FailureReason::Forbidden)
        );
    }

    #[test]
    fn test_permanent_reason_wins() {
        let stderr = "ERROR: [youtube] xyz: Private video. HTTP Error 403";
        assert_eq!(diagnose_error(stderr), Some(FailureReason::Private));
    }

    #[test]
    fn test_removed_video() {
        let stderr = "ERROR: [youtube] xyz: Video unavailable. This video has been removed";
        assert_eq!(diagnose_error(stderr), Some(FailureReason::Gone));
    }

    #[test]
    fn test_throttled() {
        assert_eq!(
            diagnose_error("HTTP Error 429: Too Many Requests"),
            Some(FailureReason::Throttled)
        );
        assert!(FailureReason::Throttled.is_retryable());
        assert!(!FailureReason::Protected.is_retryable());
    }

    #[test]
    fn test_conversion_failure() {
        assert_eq!(
            diagnose_error("ERROR: Postprocessing: ffprobe and ffmpeg not found"),
            Some(FailureReason::ConversionFailed)
        );
    }

    #[test]
    fn test_unknown_message_passes_through() {
        assert_eq!(diagnose_error("ERROR: something odd"), None);
        assert_eq!(describe_failure("ERROR: something odd"), "ERROR: something odd");
    }

    #[test]
    fn test_describe_prefixes_reason() {
        assert_eq!(
            describe_failure("ERROR: Private video"),
            "Private video: ERROR: Private video"
        );
    }
}
