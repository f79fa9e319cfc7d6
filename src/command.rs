use crate::config::Tools;
use crate::error::Result;
use crate::filter::FilterChain;
use crate::task::{ConversionTask, OutputFormat};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Pixel format of the raw frame stream handed to the GIF encoder.
pub const RAW_PIXEL_FORMAT: &str = "yuv420p";
/// Raw, self-describing frame container written to stdout.
pub const RAW_STREAM_FORMAT: &str = "yuv4mpegpipe";
pub const WEBP_PIXEL_FORMAT: &str = "yuv444p";

const WEBP_COMPRESSION_FULL: u8 = 6;
const WEBP_COMPRESSION_SAMPLE: u8 = 4;

/// A span of the source to read. `duration_secs: None` reads to the end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start_secs: f64,
    pub duration_secs: Option<f64>,
}

impl Window {
    pub fn of_task(task: &ConversionTask) -> Self {
        Self {
            start_secs: task.trim_start_secs,
            duration_secs: task.trim_duration_secs,
        }
    }
}

/// Final conversions favour size, size samples favour speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Full,
    Sample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        command
    }

    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.program.display())?;
        for arg in &self.args {
            write!(formatter, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What the pipeline runner executes for one output.
#[derive(Debug)]
pub enum Plan {
    /// Decoder stdout feeds the GIF encoder's stdin.
    Piped {
        decoder: Invocation,
        encoder: Invocation,
    },
    /// One decoder process writing the artifact itself.
    Single(Invocation),
    /// Two decoder passes through a temporary palette image, used for GIFs
    /// when no GIF encoder is installed. The palette is deleted on drop.
    Palette {
        generate: Invocation,
        apply: Invocation,
        palette: tempfile::TempPath,
    },
}

fn push(args: &mut Vec<OsString>, values: &[&str]) {
    args.extend(values.iter().map(OsString::from));
}

fn common_args() -> Vec<OsString> {
    let mut args = Vec::new();
    push(&mut args, &["-hide_banner", "-nostdin", "-nostats", "-y"]);
    args
}

fn input_args(args: &mut Vec<OsString>, source: &Path, windows: &[Window]) {
    for window in windows {
        if window.start_secs > 0.0 {
            push(args, &["-ss", &format!("{:.3}", window.start_secs)]);
        }
        if let Some(duration) = window.duration_secs {
            push(args, &["-t", &format!("{:.3}", duration)]);
        }
        args.push("-i".into());
        args.push(source.into());
    }
}

/// Filter graph over all inputs: concatenated first when there is more than
/// one window, so the chain applies to the joined frame sequence.
fn source_graph(inputs: usize, chain: &str) -> String {
    if inputs <= 1 {
        return format!("[0:v]{chain}");
    }
    let labels: String = (0..inputs).map(|index| format!("[{index}:v]")).collect();
    format!("{labels}concat=n={inputs}:v=1:a=0,{chain}")
}

fn filter_args(args: &mut Vec<OsString>, inputs: usize, chain: &str) {
    if inputs <= 1 {
        push(args, &["-vf", chain]);
    } else {
        let graph = format!("{}[out]", source_graph(inputs, chain));
        push(args, &["-filter_complex", &graph, "-map", "[out]"]);
    }
}

/// Decoder arguments for the task's trim range.
pub fn decoder_args(task: &ConversionTask, filters: &FilterChain) -> Vec<OsString> {
    decoder_args_for(&task.source, &[Window::of_task(task)], filters)
}

/// Decoder arguments streaming raw frames of `windows` to stdout.
pub fn decoder_args_for(source: &Path, windows: &[Window], filters: &FilterChain) -> Vec<OsString> {
    let mut args = common_args();
    input_args(&mut args, source, windows);
    filter_args(&mut args, windows.len(), &filters.to_string());
    push(
        &mut args,
        &["-pix_fmt", RAW_PIXEL_FORMAT, "-f", RAW_STREAM_FORMAT, "-"],
    );
    args
}

/// GIF encoder arguments. Width and height are pinned to the decoder's
/// output so the encoder never rescales on its own.
pub fn encoder_args(task: &ConversionTask, filters: &FilterChain, output: &Path) -> Vec<OsString> {
    let (width, height) = filters.output_size();
    let mut args = Vec::new();
    push(
        &mut args,
        &[
            "--fps",
            &task.fps.to_string(),
            "--quality",
            &task.quality.to_string(),
            "--width",
            &width.to_string(),
            "--height",
            &height.to_string(),
            "-o",
        ],
    );
    args.push(output.into());
    args.push("-".into());
    args
}

/// Single-process WebP arguments using the decoder's native encoder.
pub fn webp_args(
    task: &ConversionTask,
    windows: &[Window],
    filters: &FilterChain,
    output: &Path,
    pass: Pass,
) -> Vec<OsString> {
    let compression = match pass {
        Pass::Full => WEBP_COMPRESSION_FULL,
        Pass::Sample => WEBP_COMPRESSION_SAMPLE,
    };
    let mut args = common_args();
    input_args(&mut args, &task.source, windows);
    filter_args(&mut args, windows.len(), &filters.to_string());
    push(
        &mut args,
        &[
            "-c:v",
            "libwebp",
            "-lossless",
            "0",
            "-compression_level",
            &compression.to_string(),
            "-q:v",
            &task.quality.to_string(),
            "-preset",
            "default",
            "-loop",
            "0",
            "-an",
            "-vsync",
            "0",
            "-pix_fmt",
            WEBP_PIXEL_FORMAT,
        ],
    );
    args.push(output.into());
    args
}

/// First palette pass: filtered frames reduced to a palette image.
pub fn palette_generate_args(
    source: &Path,
    windows: &[Window],
    filters: &FilterChain,
    palette: &Path,
) -> Vec<OsString> {
    let mut args = common_args();
    input_args(&mut args, source, windows);
    filter_args(&mut args, windows.len(), &filters.with_suffix("palettegen"));
    args.push(palette.into());
    args
}

/// Second palette pass: filtered frames mapped through the palette.
pub fn palette_apply_args(
    source: &Path,
    windows: &[Window],
    filters: &FilterChain,
    palette: &Path,
    output: &Path,
) -> Vec<OsString> {
    let mut args = common_args();
    input_args(&mut args, source, windows);
    args.push("-i".into());
    args.push(palette.into());
    let graph = format!(
        "{}[x];[x][{}:v]paletteuse",
        source_graph(windows.len(), &filters.to_string()),
        windows.len()
    );
    push(&mut args, &["-lavfi", &graph]);
    args.push(output.into());
    args
}

/// Chooses the process layout for `task` and derives every argument vector.
pub fn plan(
    tools: &Tools,
    task: &ConversionTask,
    windows: &[Window],
    output: &Path,
    pass: Pass,
) -> Result<Plan> {
    let filters = task.filter_chain()?;

    let plan = match (task.format, &tools.gifski) {
        (OutputFormat::Webp, _) => Plan::Single(Invocation {
            program: tools.ffmpeg.clone(),
            args: webp_args(task, windows, &filters, output, pass),
        }),
        (OutputFormat::Gif, Some(gifski)) => Plan::Piped {
            decoder: Invocation {
                program: tools.ffmpeg.clone(),
                args: decoder_args_for(&task.source, windows, &filters),
            },
            encoder: Invocation {
                program: gifski.clone(),
                args: encoder_args(task, &filters, output),
            },
        },
        (OutputFormat::Gif, None) => {
            let palette = tempfile::Builder::new()
                .prefix("clipgif-palette-")
                .suffix(".png")
                .tempfile()?
                .into_temp_path();
            Plan::Palette {
                generate: Invocation {
                    program: tools.ffmpeg.clone(),
                    args: palette_generate_args(&task.source, windows, &filters, &palette),
                },
                apply: Invocation {
                    program: tools.ffmpeg.clone(),
                    args: palette_apply_args(&task.source, windows, &filters, &palette, output),
                },
                palette,
            }
        }
    };

    Ok(plan)
}
