use clap::{Args, Parser, Subcommand};
use clipgif::error::{Error, Result};
use clipgif::estimate::SamplingStrategy;
use clipgif::filter::CropRect;
use clipgif::request::{self, DEFAULT_FPS, DEFAULT_QUALITY, TaskRequest};
use clipgif::resolution::ResizeMode;
use clipgif::task::OutputFormat;
use clipgif::{config::ToolConfig, timecode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "clipgif",
    version,
    about = "Convert trimmed video clips to animated GIF or WebP"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub tools: ToolArgs,

    #[arg(short, long, global = true, help = "Log debug output")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Convert each input to an animation next to it (or in --output-dir)
    Convert(ClipArgs),
    /// Estimate output sizes by encoding short samples
    Estimate {
        #[command(flatten)]
        clip: ClipArgs,

        #[arg(long, value_enum, default_value_t = SamplingStrategy::Single)]
        strategy: SamplingStrategy,
    },
    /// List output sizes offered for an input's aspect ratio
    Presets { input: PathBuf },
}

#[derive(Args)]
pub struct ToolArgs {
    #[arg(long, global = true, help = "JSON file with tool paths and benign decoder patterns")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub ffmpeg: Option<PathBuf>,

    #[arg(long, global = true)]
    pub ffprobe: Option<PathBuf>,

    #[arg(long, global = true)]
    pub gifski: Option<PathBuf>,
}

impl ToolArgs {
    pub fn tool_config(&self) -> Result<ToolConfig> {
        let base = match &self.config {
            Some(path) => ToolConfig::load(path)?,
            None => ToolConfig::default(),
        };
        Ok(base.merge(ToolConfig {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            gifski: self.gifski.clone(),
            benign_decoder_patterns: Vec::new(),
        }))
    }
}

#[derive(Args)]
pub struct ClipArgs {
    pub inputs: Vec<PathBuf>,

    #[arg(long, help = "JSON array of task requests, converted after the inputs")]
    pub tasks: Option<PathBuf>,

    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Gif)]
    pub format: OutputFormat,

    #[arg(short, long, default_value_t = DEFAULT_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: u8,

    #[arg(long, default_value_t = DEFAULT_FPS)]
    pub fps: f64,

    #[arg(long, value_parser = parse_time, help = "Trim start: ss, mm:ss or hh:mm:ss")]
    pub start: Option<f64>,

    #[arg(long, value_parser = parse_time, help = "Trim end: ss, mm:ss or hh:mm:ss")]
    pub end: Option<f64>,

    #[arg(long, value_parser = parse_crop, help = "Normalized crop rectangle x,y,w,h")]
    pub crop: Option<CropRect>,

    #[arg(long, conflicts_with = "size", help = "Scale to a percentage of the source")]
    pub scale: Option<f64>,

    #[arg(long, value_parser = parse_size, help = "Exact output size WxH")]
    pub size: Option<(u32, u32)>,
}

impl ClipArgs {
    fn resize(&self) -> ResizeMode {
        match (self.scale, self.size) {
            (Some(percent), _) => ResizeMode::ScalePercent { percent },
            (None, Some((width, height))) => ResizeMode::Custom { width, height },
            (None, None) => ResizeMode::Original,
        }
    }

    pub fn requests(&self) -> Result<Vec<TaskRequest>> {
        let mut requests: Vec<TaskRequest> = self
            .inputs
            .iter()
            .map(|input| TaskRequest {
                source: input.clone(),
                output_dir: self.output_dir.clone(),
                format: self.format,
                quality: self.quality,
                fps: self.fps,
                start: self.start,
                end: self.end,
                crop: self.crop,
                resize: self.resize(),
            })
            .collect();

        if let Some(manifest) = &self.tasks {
            requests.extend(request::load_manifest(manifest)?);
        }

        if requests.is_empty() {
            return Err(Error::InvalidParameter(
                "no input files (pass paths or --tasks)".into(),
            ));
        }
        Ok(requests)
    }
}

fn parse_time(text: &str) -> std::result::Result<f64, String> {
    timecode::parse_timestamp(text).map_err(|error| error.to_string())
}

fn parse_crop(text: &str) -> std::result::Result<CropRect, String> {
    let values: Vec<f64> = text
        .split(',')
        .map(|value| value.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|error| format!("crop value: {error}"))?;
    let [x, y, width, height] = values[..] else {
        return Err(format!("expected x,y,w,h, got {text:?}"));
    };
    let crop = CropRect {
        x,
        y,
        width,
        height,
    };
    crop.validate().map_err(|error| error.to_string())?;
    Ok(crop)
}

fn parse_size(text: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {text:?}"))?;
    let width = width.trim().parse().map_err(|error| format!("width: {error}"))?;
    let height = height.trim().parse().map_err(|error| format!("height: {error}"))?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_parses_four_fractions() {
        let crop = parse_crop("0.1, 0.2,0.5,0.5").unwrap();
        assert_eq!(
            crop,
            CropRect {
                x: 0.1,
                y: 0.2,
                width: 0.5,
                height: 0.5
            }
        );
        assert!(parse_crop("0.1,0.2,0.5").is_err());
        assert!(parse_crop("0.8,0,0.5,0.5").is_err());
    }

    #[test]
    fn size_parses_width_by_height() {
        assert_eq!(parse_size("640x360").unwrap(), (640, 360));
        assert_eq!(parse_size("640X360").unwrap(), (640, 360));
        assert!(parse_size("640").is_err());
    }

    #[test]
    fn convert_defaults() {
        let cli = Cli::parse_from(["clipgif", "convert", "clip.mp4"]);
        let Command::Convert(clip) = cli.command else {
            panic!("expected convert");
        };
        let requests = clip.requests().unwrap();
        assert_eq!(requests, vec![TaskRequest::new("clip.mp4")]);
    }

    #[test]
    fn estimate_reads_strategy_and_trim() {
        let cli = Cli::parse_from([
            "clipgif",
            "estimate",
            "clip.mp4",
            "--strategy",
            "distributed",
            "--start",
            "0:05",
            "--end",
            "1:00",
            "--scale",
            "50",
        ]);
        let Command::Estimate { clip, strategy } = cli.command else {
            panic!("expected estimate");
        };
        assert_eq!(strategy, SamplingStrategy::Distributed);
        let request = &clip.requests().unwrap()[0];
        assert_eq!(request.start, Some(5.0));
        assert_eq!(request.end, Some(60.0));
        assert_eq!(request.resize, ResizeMode::ScalePercent { percent: 50.0 });
    }

    #[test]
    fn scale_and_size_conflict() {
        let result = Cli::try_parse_from([
            "clipgif", "convert", "clip.mp4", "--scale", "50", "--size", "320x240",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn no_inputs_is_invalid() {
        let cli = Cli::parse_from(["clipgif", "convert"]);
        let Command::Convert(clip) = cli.command else {
            panic!("expected convert");
        };
        assert!(matches!(clip.requests(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn tool_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tools.json");
        std::fs::write(&config, r#"{"ffmpeg": "/opt/ffmpeg", "gifski": "/opt/gifski"}"#).unwrap();
        let config_arg = config.display().to_string();

        let cli = Cli::parse_from([
            "clipgif",
            "presets",
            "clip.mp4",
            "--config",
            config_arg.as_str(),
            "--gifski",
            "/usr/local/bin/gifski",
        ]);
        let tools = cli.tools.tool_config().unwrap();
        assert_eq!(tools.ffmpeg, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(tools.gifski, Some(PathBuf::from("/usr/local/bin/gifski")));
    }
}
