use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Used when the stream reports no usable rate.
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
    pub framerate: f64,
}

#[derive(Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<StreamEntry>,
    #[serde(default)]
    format: Option<FormatEntry>,
}

#[derive(Deserialize)]
struct StreamEntry {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize)]
struct FormatEntry {
    duration: Option<String>,
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.parse().ok()?;
            let denominator: f64 = denominator.parse().ok()?;
            if denominator <= 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => raw.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|duration| duration.is_finite() && *duration > 0.0)
}

/// Reads the report printed by `ffprobe -print_format json`.
pub fn parse_report(json: &[u8]) -> Result<VideoInfo> {
    let report: ProbeReport = serde_json::from_slice(json)?;

    let stream = report
        .streams
        .first()
        .ok_or_else(|| Error::ProbeFailed("no video stream found".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        _ => return Err(Error::ProbeFailed("missing frame size".into())),
    };

    let framerate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(FALLBACK_FRAME_RATE);

    let duration_secs = report
        .format
        .and_then(|format| format.duration)
        .as_deref()
        .and_then(parse_duration);

    Ok(VideoInfo {
        width,
        height,
        duration_secs,
        framerate,
    })
}

pub fn probe(ffprobe: &Path, source: &Path) -> Result<VideoInfo> {
    if !source.exists() {
        return Err(Error::InputNotFound(source.to_path_buf()));
    }

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-show_entries",
            "format=duration",
        ])
        .arg(source)
        .output()
        .map_err(|source| Error::Launch {
            tool: ffprobe.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ProbeFailed(stderr.trim().to_string()));
    }

    let info = parse_report(&output.stdout)?;
    debug!(source = %source.display(), ?info, "probed");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_integer_fraction() {
        let result = parse_frame_rate("30/1").unwrap();
        assert!((result - 30.0).abs() < 0.001);
    }

    #[test]
    fn parse_ntsc_fraction() {
        let result = parse_frame_rate("30000/1001").unwrap();
        assert!((result - 29.97).abs() < 0.01);
    }

    #[test]
    fn parse_plain_float() {
        let result = parse_frame_rate("29.97").unwrap();
        assert!((result - 29.97).abs() < 0.001);
    }

    #[test]
    fn zero_rates_are_unusable() {
        assert!(parse_frame_rate("30/0").is_none());
        assert!(parse_frame_rate("0/0").is_none());
        assert!(parse_frame_rate("0").is_none());
    }

    #[test]
    fn parse_garbage_returns_none() {
        assert!(parse_frame_rate("not_a_number").is_none());
        assert!(parse_frame_rate("").is_none());
        assert!(parse_frame_rate("abc/1").is_none());
        assert!(parse_frame_rate("30/abc").is_none());
    }

    #[test]
    fn full_report_is_read() {
        let info = parse_report(
            br#"{
                "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "24000/1001"}],
                "format": {"duration": "12.500000"}
            }"#,
        )
        .unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.framerate - 23.976).abs() < 0.001);
        assert_eq!(info.duration_secs, Some(12.5));
    }

    #[test]
    fn missing_rate_falls_back_to_thirty() {
        let info = parse_report(
            br#"{"streams": [{"width": 640, "height": 480}], "format": {"duration": "3"}}"#,
        )
        .unwrap();
        assert_eq!(info.framerate, FALLBACK_FRAME_RATE);
    }

    #[test]
    fn missing_duration_is_tolerated() {
        let info = parse_report(br#"{"streams": [{"width": 640, "height": 480}]}"#).unwrap();
        assert_eq!(info.duration_secs, None);

        let na = parse_report(
            br#"{"streams": [{"width": 640, "height": 480}], "format": {"duration": "N/A"}}"#,
        )
        .unwrap();
        assert_eq!(na.duration_secs, None);
    }

    #[test]
    fn report_without_video_stream_fails() {
        let result = parse_report(br#"{"streams": [], "format": {"duration": "3"}}"#);
        assert!(matches!(result, Err(Error::ProbeFailed(_))));
    }

    #[test]
    fn missing_source_is_reported_before_launch() {
        let result = probe(Path::new("/no/such/ffprobe"), Path::new("/no/such/clip.mp4"));
        assert!(matches!(result, Err(Error::InputNotFound(_))));
    }
}
