use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Crop rectangle in normalized coordinates, relative to the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelCrop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn validate(&self) -> Result<()> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(Error::InvalidParameter("crop contains a non-finite value".into()));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidParameter(
                "crop width and height must be positive".into(),
            ));
        }
        if self.x < 0.0 || self.y < 0.0 || self.x + self.width > 1.0 || self.y + self.height > 1.0
        {
            return Err(Error::InvalidParameter(format!(
                "crop {self} is not inside the frame"
            )));
        }
        Ok(())
    }

    /// Scales to source pixels. Values are truncated, not rounded.
    pub fn to_pixels(&self, source_width: u32, source_height: u32) -> Result<PixelCrop> {
        self.validate()?;
        let crop = PixelCrop {
            x: (self.x * source_width as f64) as u32,
            y: (self.y * source_height as f64) as u32,
            width: (self.width * source_width as f64) as u32,
            height: (self.height * source_height as f64) as u32,
        };
        if crop.width == 0 || crop.height == 0 {
            return Err(Error::InvalidParameter(format!(
                "crop {self} is smaller than one pixel of a {source_width}x{source_height} source"
            )));
        }
        Ok(crop)
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{},{},{},{}",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStage {
    Crop(PixelCrop),
    Fps(f64),
    Scale { width: u32, height: u32 },
}

impl fmt::Display for FilterStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::Crop(crop) => write!(
                formatter,
                "crop={}:{}:{}:{}",
                crop.width, crop.height, crop.x, crop.y
            ),
            FilterStage::Fps(fps) => write!(formatter, "fps={fps}"),
            FilterStage::Scale { width, height } => {
                write!(formatter, "scale={width}:{height}:flags=lanczos")
            }
        }
    }
}

/// Ordered video filter stages: crop, then fps, then scale.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
    output_size: (u32, u32),
}

impl FilterChain {
    pub fn build(
        crop: Option<PixelCrop>,
        target_width: u32,
        target_height: u32,
        target_fps: f64,
    ) -> Self {
        let mut stages = Vec::with_capacity(3);
        if let Some(crop) = crop {
            stages.push(FilterStage::Crop(crop));
        }
        stages.push(FilterStage::Fps(target_fps));
        stages.push(FilterStage::Scale {
            width: target_width,
            height: target_height,
        });
        Self {
            stages,
            output_size: (target_width, target_height),
        }
    }

    /// Frame size leaving the final scale stage.
    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    /// With a trailing stage appended, e.g. `palettegen`.
    pub fn with_suffix(&self, suffix: &str) -> String {
        format!("{self},{suffix}")
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 {
                formatter.write_str(",")?;
            }
            write!(formatter, "{stage}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop(x: f64, y: f64, width: f64, height: f64) -> CropRect {
        CropRect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn chain_without_crop_is_fps_then_scale() {
        let chain = FilterChain::build(None, 640, 480, 10.0);
        assert_eq!(chain.to_string(), "fps=10,scale=640:480:flags=lanczos");
    }

    #[test]
    fn crop_comes_first() {
        let pixels = crop(0.25, 0.5, 0.5, 0.5).to_pixels(640, 480).unwrap();
        let chain = FilterChain::build(Some(pixels), 320, 240, 12.5);
        assert_eq!(
            chain.to_string(),
            "crop=320:240:160:240,fps=12.5,scale=320:240:flags=lanczos"
        );
        assert!(matches!(chain.stages[0], FilterStage::Crop(_)));
    }

    #[test]
    fn crop_pixels_are_truncated() {
        let pixels = crop(0.1, 0.1, 0.333, 0.333).to_pixels(1000, 100).unwrap();
        assert_eq!(
            pixels,
            PixelCrop {
                x: 100,
                y: 10,
                width: 333,
                height: 33
            }
        );
    }

    #[test]
    fn crop_outside_frame_is_rejected() {
        assert!(crop(0.6, 0.0, 0.5, 0.5).validate().is_err());
        assert!(crop(-0.1, 0.0, 0.5, 0.5).validate().is_err());
        assert!(crop(0.0, 0.0, 0.0, 0.5).validate().is_err());
        assert!(crop(0.0, 0.0, f64::NAN, 0.5).validate().is_err());
    }

    #[test]
    fn full_frame_crop_is_valid() {
        assert!(crop(0.0, 0.0, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn sub_pixel_crop_is_rejected() {
        assert!(crop(0.0, 0.0, 0.001, 0.5).to_pixels(100, 100).is_err());
    }

    #[test]
    fn output_size_reads_scale_stage() {
        let chain = FilterChain::build(None, 480, 270, 15.0);
        assert_eq!(chain.output_size(), (480, 270));
    }

    #[test]
    fn suffix_is_appended_after_scale() {
        let chain = FilterChain::build(None, 480, 270, 15.0);
        assert_eq!(
            chain.with_suffix("palettegen"),
            "fps=15,scale=480:270:flags=lanczos,palettegen"
        );
    }
}
