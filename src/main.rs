mod cli;

use clap::Parser;
use cli::{Cli, Command};
use clipgif::config::Tools;
use clipgif::convert::{BatchState, ConversionEvent};
use clipgif::error::{Error, Result};
use clipgif::estimate::EstimateEvent;
use clipgif::pipeline::CancelFlag;
use clipgif::request;
use clipgif::session::Session;
use clipgif::{probe, resolution, timecode};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

const EXIT_CANCELLED: u8 = 130;

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// First Ctrl+C cancels the running batch, the second one exits.
fn install_interrupt_handler(cancel: &CancelFlag) -> Result<()> {
    let flag = cancel.as_atomic();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
        eprintln!("\ncancelling, press Ctrl+C again to exit now");
    })
    .map_err(|error| Error::Io(std::io::Error::other(error.to_string())))
}

fn convert(session: &Session, clip: &cli::ClipArgs) -> Result<ExitCode> {
    let tasks = request::prepare_tasks(&session.tools().ffprobe, clip.requests()?)?;
    let batch = session.start_conversion(tasks)?;

    for event in batch.events() {
        match event {
            ConversionEvent::Started {
                index,
                total,
                description,
            } => eprintln!("[{}/{}] {description}", index + 1, total),
            ConversionEvent::Finished { report, .. } => match report.result {
                Ok(output) => eprintln!("  -> {}", output.display()),
                Err(error) => eprintln!("  failed: {error}"),
            },
            ConversionEvent::Cancelled { tally } => eprintln!(
                "\ncancelled: {} succeeded, {} failed",
                tally.succeeded, tally.failed
            ),
            ConversionEvent::Completed { tally } => eprintln!(
                "\ndone: {} succeeded, {} failed",
                tally.succeeded, tally.failed
            ),
        }
    }

    let summary = batch.wait()?;
    Ok(match summary.state {
        BatchState::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ if summary.tally.failed > 0 => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn estimate(
    session: &Session,
    clip: &cli::ClipArgs,
    strategy: clipgif::estimate::SamplingStrategy,
) -> Result<ExitCode> {
    let tasks = request::prepare_tasks(&session.tools().ffprobe, clip.requests()?)?;
    let batch = session.estimate(tasks, strategy)?;

    for event in batch.events() {
        match event {
            EstimateEvent::Started {
                index,
                total,
                file_name,
            } => eprintln!("[{}/{}] sampling {file_name}", index + 1, total),
            EstimateEvent::Finished { line, .. } => println!("{line}"),
            EstimateEvent::Cancelled => eprintln!("\nestimate cancelled"),
            EstimateEvent::Completed => {}
        }
    }

    let report = batch.wait()?;
    Ok(if report.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    })
}

fn presets(tools: &Tools, input: &std::path::Path) -> Result<ExitCode> {
    let info = probe::probe(&tools.ffprobe, input)?;
    let duration = info
        .duration_secs
        .map_or_else(|| "unknown length".to_string(), timecode::format_timestamp);
    eprintln!(
        "input: {}x{}, {:.1}fps, {duration}",
        info.width, info.height, info.framerate
    );
    for mode in resolution::presets_for(info.width, info.height) {
        let (width, height) = resolution::resolve(info.width, info.height, mode)?;
        println!("{:<20} -> {width}x{height}", mode.to_string());
    }
    Ok(ExitCode::SUCCESS)
}

fn run(args: Cli) -> Result<ExitCode> {
    let tools = Tools::locate(&args.tools.tool_config()?);
    if tools.gifski.is_none() {
        tracing::info!("gifski not found, GIFs will use the ffmpeg palette encoder");
    }

    match &args.command {
        Command::Presets { input } => presets(&tools, input),
        Command::Convert(clip) => {
            let session = Session::new(tools);
            install_interrupt_handler(&session.cancel_flag())?;
            convert(&session, clip)
        }
        Command::Estimate { clip, strategy } => {
            let session = Session::new(tools);
            install_interrupt_handler(&session.cancel_flag())?;
            estimate(&session, clip, *strategy)
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
