use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(target_os = "windows")]
const FFMPEG_NAME: &str = "ffmpeg.exe";
#[cfg(target_os = "windows")]
const FFPROBE_NAME: &str = "ffprobe.exe";
#[cfg(target_os = "windows")]
const GIFSKI_NAME: &str = "gifski.exe";

#[cfg(not(target_os = "windows"))]
const FFMPEG_NAME: &str = "ffmpeg";
#[cfg(not(target_os = "windows"))]
const FFPROBE_NAME: &str = "ffprobe";
#[cfg(not(target_os = "windows"))]
const GIFSKI_NAME: &str = "gifski";

/// Decoder diagnostics that show up when the encoder stops reading early.
pub const DEFAULT_BENIGN_PATTERNS: &[&str] = &["Broken pipe", "Error writing trailer of pipe"];

fn default_benign_patterns() -> Vec<String> {
    DEFAULT_BENIGN_PATTERNS
        .iter()
        .map(|pattern| pattern.to_string())
        .collect()
}

/// Tool settings as written in a config file or given on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub gifski: Option<PathBuf>,
    pub benign_decoder_patterns: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: None,
            ffprobe: None,
            gifski: None,
            benign_decoder_patterns: default_benign_patterns(),
        }
    }
}

impl ToolConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Fields set in `overrides` win over the ones in `self`.
    pub fn merge(mut self, overrides: ToolConfig) -> Self {
        if overrides.ffmpeg.is_some() {
            self.ffmpeg = overrides.ffmpeg;
        }
        if overrides.ffprobe.is_some() {
            self.ffprobe = overrides.ffprobe;
        }
        if overrides.gifski.is_some() {
            self.gifski = overrides.gifski;
        }
        self
    }
}

/// Located external tools. `gifski` is `None` when no GIF encoder was found,
/// in which case GIFs go through the palette fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub gifski: Option<PathBuf>,
    pub benign_patterns: Vec<String>,
}

fn find_binary(configured: Option<&Path>, name: &str) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        debug!(path = %path.display(), "configured {name} does not exist");
    }
    which::which(name).ok()
}

impl Tools {
    pub fn locate(config: &ToolConfig) -> Self {
        let ffmpeg = find_binary(config.ffmpeg.as_deref(), FFMPEG_NAME)
            .unwrap_or_else(|| PathBuf::from(FFMPEG_NAME));
        let ffprobe = find_binary(config.ffprobe.as_deref(), FFPROBE_NAME)
            .unwrap_or_else(|| PathBuf::from(FFPROBE_NAME));
        let gifski = find_binary(config.gifski.as_deref(), GIFSKI_NAME);

        debug!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            gifski = ?gifski,
            "located tools"
        );

        Self {
            ffmpeg,
            ffprobe,
            gifski,
            benign_patterns: config.benign_decoder_patterns.clone(),
        }
    }
}
