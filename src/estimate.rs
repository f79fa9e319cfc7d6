use crate::command::{self, Pass, Window};
use crate::config::Tools;
use crate::error::{Error, Result};
use crate::pipeline::{CancelFlag, Outcome, Runner};
use crate::task::{self, ConversionTask, PreparedTask};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SINGLE_SAMPLE_SECS: f64 = 3.0;
const SEGMENT_FRACTION: f64 = 0.11;
const MIDDLE_SEGMENT_OFFSET: f64 = 0.445;
const MIN_SEGMENT_SECS: f64 = 0.5;
const SEGMENT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SamplingStrategy {
    /// One contiguous sample at the trim start.
    #[default]
    Single,
    /// Three samples spread over the clip, joined before encoding.
    Distributed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleWindow {
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl From<SampleWindow> for Window {
    fn from(window: SampleWindow) -> Self {
        Window {
            start_secs: window.start_secs,
            duration_secs: Some(window.duration_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimateSample {
    pub windows: Vec<SampleWindow>,
    pub sampled_bytes: u64,
    pub extrapolation_ratio: f64,
    pub estimated_total_bytes: f64,
}

impl EstimateSample {
    pub fn new(windows: Vec<SampleWindow>, sampled_bytes: u64, effective_secs: f64) -> Self {
        let sampled_secs = sampled_duration(&windows);
        Self {
            extrapolation_ratio: effective_secs / sampled_secs,
            estimated_total_bytes: extrapolate(sampled_bytes, sampled_secs, effective_secs),
            windows,
            sampled_bytes,
        }
    }
}

/// Length of the trimmed clip: the trim end clamped to the source, or the
/// rest of the source after the trim start when no end is set.
pub fn effective_duration(task: &ConversionTask) -> Result<f64> {
    let start = task.trim_start_secs;
    let source = task
        .source_duration_secs
        .filter(|duration| duration.is_finite() && *duration > 0.0);

    let duration = match (task.trim_duration_secs, source) {
        (Some(trim), Some(source)) => trim.min(source - start),
        (Some(trim), None) => trim,
        (None, Some(source)) => source - start,
        (None, None) => {
            return Err(Error::ProbeFailed("unknown duration".into()));
        }
    };

    if duration <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "trim start {start:.3}s is past the end of the source"
        )));
    }
    Ok(duration)
}

pub fn sample_windows(
    start_secs: f64,
    effective_secs: f64,
    strategy: SamplingStrategy,
) -> Vec<SampleWindow> {
    let single = vec![SampleWindow {
        start_secs,
        duration_secs: effective_secs.min(SINGLE_SAMPLE_SECS),
    }];

    match strategy {
        SamplingStrategy::Single => single,
        SamplingStrategy::Distributed => {
            let segment = (effective_secs * SEGMENT_FRACTION).max(MIN_SEGMENT_SECS);
            if segment * SEGMENT_COUNT as f64 > effective_secs {
                return single;
            }
            vec![
                SampleWindow {
                    start_secs,
                    duration_secs: segment,
                },
                SampleWindow {
                    start_secs: start_secs + effective_secs * MIDDLE_SEGMENT_OFFSET,
                    duration_secs: segment,
                },
                SampleWindow {
                    start_secs: start_secs + effective_secs - segment,
                    duration_secs: segment,
                },
            ]
        }
    }
}

pub fn sampled_duration(windows: &[SampleWindow]) -> f64 {
    windows.iter().map(|window| window.duration_secs).sum()
}

/// Linear extrapolation: `sampled_bytes * effective / sampled`.
pub fn extrapolate(sampled_bytes: u64, sampled_secs: f64, effective_secs: f64) -> f64 {
    sampled_bytes as f64 * effective_secs / sampled_secs
}

pub fn format_size(bytes: f64) -> String {
    let megabytes = bytes / (1024.0 * 1024.0);
    if megabytes >= 1.0 {
        format!("~{megabytes:.2} MB")
    } else {
        format!("~{:.0} KB", bytes / 1024.0)
    }
}

fn one_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug)]
pub struct EstimateEntry {
    pub source: PathBuf,
    pub file_name: String,
    pub result: Result<EstimateSample>,
}

impl EstimateEntry {
    pub fn line(&self) -> String {
        match &self.result {
            Ok(sample) => format!(
                "{}: {} (estimated)",
                self.file_name,
                format_size(sample.estimated_total_bytes)
            ),
            Err(error) => format!("{}: Error ({})", self.file_name, one_line(&error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct EstimateReport {
    pub entries: Vec<EstimateEntry>,
    pub cancelled: bool,
}

impl EstimateReport {
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(EstimateEntry::line).collect()
    }
}

#[derive(Debug, Clone)]
pub enum EstimateEvent {
    Started {
        index: usize,
        total: usize,
        file_name: String,
    },
    Finished {
        index: usize,
        total: usize,
        line: String,
    },
    Cancelled,
    Completed,
}

/// Estimates output sizes by encoding short samples of each clip.
pub struct Estimator<'a> {
    tools: &'a Tools,
    cancel: &'a CancelFlag,
    strategy: SamplingStrategy,
}

impl<'a> Estimator<'a> {
    pub fn new(tools: &'a Tools, cancel: &'a CancelFlag, strategy: SamplingStrategy) -> Self {
        Self {
            tools,
            cancel,
            strategy,
        }
    }

    /// One entry per task; a failing file does not stop the others.
    pub fn run(
        &self,
        tasks: &[ConversionTask],
        on_event: impl FnMut(EstimateEvent),
    ) -> Result<EstimateReport> {
        let prepared = tasks.iter().cloned().map(PreparedTask::from).collect();
        self.run_prepared(prepared, on_event)
    }

    /// Like [`Estimator::run`]; a source that could not be probed gets its own
    /// error line.
    pub fn run_prepared(
        &self,
        tasks: Vec<PreparedTask>,
        mut on_event: impl FnMut(EstimateEvent),
    ) -> Result<EstimateReport> {
        for prepared in &tasks {
            if let PreparedTask::Ready(task) = prepared {
                task.validate()?;
            }
        }

        let runner = Runner::new(self.cancel, &self.tools.benign_patterns);
        let total = tasks.len();
        let mut report = EstimateReport::default();

        for (index, prepared) in tasks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let source = prepared.source().to_path_buf();
            let file_name = task::display_name(&source);
            on_event(EstimateEvent::Started {
                index,
                total,
                file_name: file_name.clone(),
            });

            let result = match prepared {
                PreparedTask::Ready(task) => self.estimate_one(&runner, &task),
                PreparedTask::Unreadable { error, .. } => Err(error),
            };
            if matches!(result, Err(Error::Cancelled)) {
                report.cancelled = true;
                break;
            }

            let entry = EstimateEntry {
                source,
                file_name,
                result,
            };
            let line = entry.line();
            match &entry.result {
                Ok(sample) => info!(
                    source = %entry.source.display(),
                    bytes = sample.estimated_total_bytes,
                    "estimated"
                ),
                Err(error) => warn!(source = %entry.source.display(), %error, "estimate failed"),
            }
            report.entries.push(entry);
            on_event(EstimateEvent::Finished { index, total, line });
        }

        on_event(if report.cancelled {
            EstimateEvent::Cancelled
        } else {
            EstimateEvent::Completed
        });
        Ok(report)
    }

    fn estimate_one(&self, runner: &Runner<'_>, task: &ConversionTask) -> Result<EstimateSample> {
        task.check_source()?;
        let effective = effective_duration(task)?;
        let windows = sample_windows(task.trim_start_secs, effective, self.strategy);
        let inputs: Vec<Window> = windows.iter().copied().map(Window::from).collect();
        debug!(?windows, effective, "sampling");

        let sample = tempfile::Builder::new()
            .prefix("clipgif-estimate-")
            .suffix(&format!(".{}", task.format.extension()))
            .tempfile()?
            .into_temp_path();

        let outcome = {
            let plan = command::plan(self.tools, task, &inputs, &sample, Pass::Sample)?;
            runner.run(&plan).outcome
        };

        let measured = match outcome {
            Outcome::Success => std::fs::metadata(&sample)
                .map(|metadata| metadata.len())
                .map_err(Error::from),
            Outcome::Failed(error) => Err(error),
            Outcome::Cancelled => Err(Error::Cancelled),
        };

        let path = sample.to_path_buf();
        if let Err(error) = sample.close() {
            warn!(path = %path.display(), %error, "could not delete sample file");
        }

        let sampled_bytes = measured?;
        if sampled_bytes == 0 {
            return Err(Error::Io(std::io::Error::other("sample output is 0 bytes")));
        }

        Ok(EstimateSample::new(windows, sampled_bytes, effective))
    }
}
