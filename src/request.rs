use crate::error::{Error, Result};
use crate::filter::CropRect;
use crate::probe::{self, VideoInfo};
use crate::resolution::ResizeMode;
use crate::task::{self, ConversionTask, OutputFormat, PreparedTask};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_FPS: f64 = 20.0;

/// What a front-end knows about a file before it has been probed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRequest {
    pub source: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub format: OutputFormat,
    pub quality: u8,
    pub fps: f64,
    /// Trim start in seconds.
    pub start: Option<f64>,
    /// Trim end in seconds, exclusive of everything after it.
    pub end: Option<f64>,
    pub crop: Option<CropRect>,
    pub resize: ResizeMode,
}

impl Default for TaskRequest {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            output_dir: None,
            format: OutputFormat::Gif,
            quality: DEFAULT_QUALITY,
            fps: DEFAULT_FPS,
            start: None,
            end: None,
            crop: None,
            resize: ResizeMode::Original,
        }
    }
}

impl TaskRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Fills in the probed frame size and turns start/end into a trim window.
    /// An end past the source duration is pulled back to it.
    pub fn into_task(self, info: &VideoInfo) -> Result<ConversionTask> {
        let start = self.start.unwrap_or(0.0);
        if !start.is_finite() || start < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "start must not be negative, got {start}"
            )));
        }
        if let Some(duration) = info.duration_secs {
            if start >= duration {
                return Err(Error::InvalidParameter(format!(
                    "start {start}s is past the end of the source ({duration}s)"
                )));
            }
        }

        let trim_duration_secs = match self.end {
            None => None,
            Some(end) => {
                if !end.is_finite() || end <= start {
                    return Err(Error::InvalidParameter(format!(
                        "end {end}s must come after start {start}s"
                    )));
                }
                let end = info.duration_secs.map_or(end, |duration| end.min(duration));
                Some(end - start)
            }
        };

        let output =
            task::canonical_output_path(&self.source, self.output_dir.as_deref(), self.format)?;

        Ok(ConversionTask {
            source: self.source,
            output,
            format: self.format,
            quality: self.quality,
            fps: self.fps,
            trim_start_secs: start,
            trim_duration_secs,
            crop: self.crop,
            resize: self.resize,
            orig_width: info.width,
            orig_height: info.height,
            source_duration_secs: info.duration_secs,
        })
    }
}

/// A JSON array of requests.
pub fn load_manifest(path: &Path) -> Result<Vec<TaskRequest>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Probes every source and builds its task. A source that cannot be probed
/// becomes an unreadable entry so the rest of the batch still runs; invalid
/// parameters stop everything.
pub fn prepare_tasks(ffprobe: &Path, requests: Vec<TaskRequest>) -> Result<Vec<PreparedTask>> {
    requests
        .into_iter()
        .map(|request| match probe::probe(ffprobe, &request.source) {
            Ok(info) => {
                debug!(source = %request.source.display(), ?info, "building task");
                request.into_task(&info).map(PreparedTask::Ready)
            }
            Err(error) => {
                warn!(source = %request.source.display(), %error, "could not probe source");
                Ok(PreparedTask::Unreadable {
                    source: request.source,
                    error,
                })
            }
        })
        .collect()
}
