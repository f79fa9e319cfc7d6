use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const PRESET_HEIGHTS: &[u32] = &[1080, 720, 480, 360];
const PRESET_PERCENTS: &[f64] = &[75.0, 50.0, 33.0, 25.0];

/// How the output frame size is derived from the (possibly cropped) source.
///
/// Serialized with a `mode` key so task manifests stay independent of any
/// display label.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResizeMode {
    #[default]
    Original,
    ScalePercent {
        percent: f64,
    },
    Custom {
        width: u32,
        height: u32,
    },
    Preset {
        width: u32,
        height: u32,
    },
}

fn round_down_even(value: u32) -> u32 {
    value & !1
}

fn round_up_even(value: u32) -> Result<u32> {
    if value % 2 == 0 {
        return Ok(value);
    }
    value
        .checked_add(1)
        .ok_or_else(|| Error::InvalidParameter(format!("dimension {value} is too large")))
}

fn ensure_positive(width: u32, height: u32, context: &str) -> Result<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidParameter(format!(
            "{context} resolves to {width}x{height}"
        )));
    }
    Ok((width, height))
}

/// Maps a resize mode onto even output dimensions.
///
/// `Original` and `Preset` round odd values down; `ScalePercent` and `Custom`
/// round them up. The encoder output depends on that asymmetry, so keep it.
pub fn resolve(orig_width: u32, orig_height: u32, mode: ResizeMode) -> Result<(u32, u32)> {
    match mode {
        ResizeMode::Original => ensure_positive(
            round_down_even(orig_width),
            round_down_even(orig_height),
            "source size",
        ),
        ResizeMode::ScalePercent { percent } => {
            if !percent.is_finite() || percent <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "scale percent must be positive, got {percent}"
                )));
            }
            let width = (orig_width as f64 * percent / 100.0) as u32;
            let height = (orig_height as f64 * percent / 100.0) as u32;
            let (width, height) = ensure_positive(width, height, "scaled size")?;
            Ok((round_up_even(width)?, round_up_even(height)?))
        }
        ResizeMode::Custom { width, height } => {
            let (width, height) = ensure_positive(width, height, "custom size")?;
            Ok((round_up_even(width)?, round_up_even(height)?))
        }
        ResizeMode::Preset { width, height } => ensure_positive(
            round_down_even(width),
            round_down_even(height),
            "preset size",
        ),
    }
}

/// Resize choices offered for a source of the given size: height-based presets
/// that keep the aspect ratio, then fixed percentage shortcuts.
pub fn presets_for(orig_width: u32, orig_height: u32) -> Vec<ResizeMode> {
    let mut modes = vec![ResizeMode::Original];

    if orig_width > 0 && orig_height > 0 {
        for &height in PRESET_HEIGHTS {
            let width = u32::try_from(height as u64 * orig_width as u64 / orig_height as u64)
                .map_err(|_| Error::InvalidParameter("preset width overflows".into()))
                .and_then(round_up_even);
            if let Ok(width) = width {
                modes.push(ResizeMode::Preset { width, height });
            }
        }
    }

    for &percent in PRESET_PERCENTS {
        modes.push(ResizeMode::ScalePercent { percent });
    }

    modes
}

impl std::fmt::Display for ResizeMode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResizeMode::Original => write!(formatter, "original"),
            ResizeMode::ScalePercent { percent } => write!(formatter, "scale {percent}%"),
            ResizeMode::Custom { width, height } => write!(formatter, "custom {width}x{height}"),
            ResizeMode::Preset { width, height } => write!(formatter, "{width}x{height} ({height}p)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_rounds_odd_dimensions_down() {
        assert_eq!(resolve(641, 481, ResizeMode::Original).unwrap(), (640, 480));
    }

    #[test]
    fn original_is_even_and_within_one_pixel() {
        for width in 2..40 {
            for height in 2..40 {
                let (out_w, out_h) = resolve(width, height, ResizeMode::Original).unwrap();
                assert_eq!(out_w % 2, 0);
                assert_eq!(out_h % 2, 0);
                assert!(out_w <= width && width - out_w <= 1);
                assert!(out_h <= height && height - out_h <= 1);
            }
        }
    }

    #[test]
    fn original_rejects_single_pixel_source() {
        assert!(matches!(
            resolve(1, 480, ResizeMode::Original),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn scale_percent_truncates_then_rounds_up() {
        let mode = ResizeMode::ScalePercent { percent: 33.0 };
        // 640 * 0.33 = 211.2 -> 211 -> 212, 480 * 0.33 = 158.4 -> 158
        assert_eq!(resolve(640, 480, mode).unwrap(), (212, 158));
    }

    #[test]
    fn scale_hundred_matches_original_on_even_source() {
        let scaled = resolve(1280, 720, ResizeMode::ScalePercent { percent: 100.0 }).unwrap();
        let original = resolve(1280, 720, ResizeMode::Original).unwrap();
        assert_eq!(scaled, original);
    }

    #[test]
    fn scale_percent_is_always_positive_and_even() {
        for percent in [0.5, 1.0, 12.5, 33.0, 50.0, 75.0, 99.9, 100.0] {
            let (width, height) =
                resolve(1919, 1079, ResizeMode::ScalePercent { percent }).unwrap();
            assert!(width > 0 && height > 0);
            assert_eq!(width % 2, 0);
            assert_eq!(height % 2, 0);
        }
    }

    #[test]
    fn scale_percent_rejects_zero_and_negative() {
        for percent in [0.0, -10.0, f64::NAN] {
            assert!(resolve(640, 480, ResizeMode::ScalePercent { percent }).is_err());
        }
    }

    #[test]
    fn scale_percent_rejects_collapsed_result() {
        let result = resolve(10, 10, ResizeMode::ScalePercent { percent: 1.0 });
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn custom_rounds_up() {
        let mode = ResizeMode::Custom {
            width: 801,
            height: 599,
        };
        assert_eq!(resolve(1920, 1080, mode).unwrap(), (802, 600));
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let custom = ResizeMode::Custom {
            width: u32::MAX,
            height: 600,
        };
        assert!(matches!(
            resolve(1920, 1080, custom),
            Err(Error::InvalidParameter(_))
        ));

        let huge = ResizeMode::ScalePercent { percent: 1e12 };
        assert!(matches!(
            resolve(1920, 1080, huge),
            Err(Error::InvalidParameter(_))
        ));

        let largest_even = ResizeMode::Custom {
            width: u32::MAX - 1,
            height: 600,
        };
        assert_eq!(resolve(1920, 1080, largest_even).unwrap(), (u32::MAX - 1, 600));
    }

    #[test]
    fn presets_skip_widths_that_do_not_fit() {
        let modes = presets_for(u32::MAX, 1);
        assert!(!modes.iter().any(|mode| matches!(mode, ResizeMode::Preset { .. })));
        assert!(modes.contains(&ResizeMode::ScalePercent { percent: 50.0 }));
    }

    #[test]
    fn custom_rejects_zero() {
        let mode = ResizeMode::Custom {
            width: 0,
            height: 600,
        };
        assert!(resolve(1920, 1080, mode).is_err());
    }

    #[test]
    fn preset_rounds_down() {
        let mode = ResizeMode::Preset {
            width: 855,
            height: 480,
        };
        assert_eq!(resolve(1920, 1080, mode).unwrap(), (854, 480));
    }

    #[test]
    fn presets_follow_source_aspect() {
        let modes = presets_for(1920, 1080);
        assert_eq!(modes[0], ResizeMode::Original);
        assert_eq!(
            modes[1],
            ResizeMode::Preset {
                width: 1920,
                height: 1080
            }
        );
        // 480 * 16/9 = 853.33 -> 853 -> 854
        assert_eq!(
            modes[3],
            ResizeMode::Preset {
                width: 854,
                height: 480
            }
        );
        assert_eq!(modes.len(), 1 + PRESET_HEIGHTS.len() + PRESET_PERCENTS.len());
    }

    #[test]
    fn presets_for_unknown_size_skips_aspect_entries() {
        let modes = presets_for(0, 0);
        assert_eq!(modes.len(), 1 + PRESET_PERCENTS.len());
    }

    #[test]
    fn resize_mode_uses_key_based_json() {
        let mode: ResizeMode =
            serde_json::from_str(r#"{"mode":"scale_percent","percent":50.0}"#).unwrap();
        assert_eq!(mode, ResizeMode::ScalePercent { percent: 50.0 });

        let mode: ResizeMode = serde_json::from_str(r#"{"mode":"original"}"#).unwrap();
        assert_eq!(mode, ResizeMode::Original);
    }
}
