use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use super::errors::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn env_override(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "YTDLP_PATH",
            ToolType::Ffmpeg => "FFMPEG_PATH",
        }
    }

    fn binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

/// Locations of the extractor (yt-dlp) and converter (ffmpeg).
///
/// Provisioning the binaries is someone else's job; a `ToolPaths` only
/// exists once both files have been seen on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    extractor: PathBuf,
    converter: PathBuf,
}

impl ToolPaths {
    pub fn new(
        extractor: impl Into<PathBuf>,
        converter: impl Into<PathBuf>,
    ) -> Result<Self, DownloadError> {
        let paths = Self {
            extractor: extractor.into(),
            converter: converter.into(),
        };
        paths.ensure_present()?;
        Ok(paths)
    }

    /// Find both tools: env override, then common install paths, then PATH
    pub fn discover() -> Result<Self, DownloadError> {
        let extractor = detect_tool(ToolType::YtDlp)
            .ok_or_else(|| DownloadError::ToolNotFound(ToolType::YtDlp.as_str().to_string()))?;
        let converter = detect_tool(ToolType::Ffmpeg)
            .ok_or_else(|| DownloadError::ToolNotFound(ToolType::Ffmpeg.as_str().to_string()))?;
        Self::new(extractor, converter)
    }

    pub fn extractor(&self) -> &Path {
        &self.extractor
    }

    pub fn converter(&self) -> &Path {
        &self.converter
    }

    /// Re-check before launching anything; the files may have been removed since.
    pub fn ensure_present(&self) -> Result<(), DownloadError> {
        for (tool, path) in [
            (ToolType::YtDlp, &self.extractor),
            (ToolType::Ffmpeg, &self.converter),
        ] {
            if !path.is_file() {
                return Err(DownloadError::ToolNotFound(format!(
                    "{} not found at {}",
                    tool.as_str(),
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

fn detect_tool(tool_type: ToolType) -> Option<PathBuf> {
    // 1. Explicit override
    if let Ok(path) = std::env::var(tool_type.env_override()) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        tracing::warn!(
            tool = tool_type.as_str(),
            path = %path.display(),
            "Override path does not exist, probing elsewhere"
        );
    }

    // 2. Common install locations
    let binary_name = tool_type.binary_name();
    let common_dirs = ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];
    for dir in common_dirs {
        let path = Path::new(dir).join(&binary_name);
        if path.is_file() {
            return Some(path);
        }
    }

    // 3. PATH
    let which = if cfg!(windows) { "where" } else { "which" };
    if let Ok(output) = Command::new(which).arg(&binary_name).output() {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(first) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
                return Some(PathBuf::from(first));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = dir.path().join("yt-dlp");
        let ffmpeg = dir.path().join("ffmpeg");
        std::fs::write(&ytdlp, b"").unwrap();
        std::fs::write(&ffmpeg, b"").unwrap();

        let tools = ToolPaths::new(&ytdlp, &ffmpeg).unwrap();
        assert_eq!(tools.extractor(), ytdlp.as_path());
        assert_eq!(tools.converter(), ffmpeg.as_path());
    }

    #[test]
    fn test_missing_converter_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = dir.path().join("yt-dlp");
        std::fs::write(&ytdlp, b"").unwrap();

        let err = ToolPaths::new(&ytdlp, dir.path().join("ffmpeg")).unwrap_err();
        match err {
            DownloadError::ToolNotFound(msg) => assert!(msg.starts_with("ffmpeg")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_directory_is_not_a_tool() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ToolPaths::new(dir.path(), dir.path()).is_err());
    }

    #[test]
    fn test_ensure_present_notices_removal() {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = dir.path().join("yt-dlp");
        let ffmpeg = dir.path().join("ffmpeg");
        std::fs::write(&ytdlp, b"").unwrap();
        std::fs::write(&ffmpeg, b"").unwrap();
        let tools = ToolPaths::new(&ytdlp, &ffmpeg).unwrap();

        std::fs::remove_file(&ytdlp).unwrap();
        assert!(tools.ensure_present().is_err());
    }
}
