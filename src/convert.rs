use crate::command::{self, Pass, Window};
use crate::config::Tools;
use crate::error::{Error, Result};
use crate::pipeline::{CancelFlag, Outcome, Runner};
use crate::task::{self, ConversionTask, PreparedTask};
use crate::timecode;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct TaskReport {
    pub source: PathBuf,
    /// Written artifact, or the error that stopped this task.
    pub result: Result<PathBuf>,
}

#[derive(Debug)]
pub enum ConversionEvent {
    Started {
        index: usize,
        total: usize,
        description: String,
    },
    Finished {
        index: usize,
        total: usize,
        report: TaskReport,
    },
    Cancelled {
        tally: Tally,
    },
    Completed {
        tally: Tally,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSummary {
    pub tally: Tally,
    pub state: BatchState,
}

/// Runs a batch of conversions one after another.
pub struct Converter<'a> {
    tools: &'a Tools,
    cancel: &'a CancelFlag,
    state: BatchState,
}

impl<'a> Converter<'a> {
    pub fn new(tools: &'a Tools, cancel: &'a CancelFlag) -> Self {
        Self {
            tools,
            cancel,
            state: BatchState::Idle,
        }
    }

    /// Converts `tasks` in order. Invalid parameters abort before anything is
    /// launched; per-task failures are counted and the batch goes on.
    pub fn run(
        &mut self,
        tasks: &[ConversionTask],
        on_event: impl FnMut(ConversionEvent),
    ) -> Result<ConversionSummary> {
        let prepared = tasks.iter().cloned().map(PreparedTask::from).collect();
        self.run_prepared(prepared, on_event)
    }

    /// Like [`Converter::run`], with sources that could not be probed counted
    /// as failed tasks in their place in the batch.
    pub fn run_prepared(
        &mut self,
        tasks: Vec<PreparedTask>,
        mut on_event: impl FnMut(ConversionEvent),
    ) -> Result<ConversionSummary> {
        for prepared in &tasks {
            if let PreparedTask::Ready(task) = prepared {
                task.validate()?;
            }
        }

        let tools: &'a Tools = self.tools;
        let cancel: &'a CancelFlag = self.cancel;
        self.state = BatchState::Running;
        let runner = Runner::new(cancel, &tools.benign_patterns);
        let total = tasks.len();
        let mut tally = Tally::default();

        for (index, prepared) in tasks.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(tally, &mut on_event));
            }

            let source = prepared.source().to_path_buf();
            let result = match prepared {
                PreparedTask::Ready(task) => {
                    on_event(ConversionEvent::Started {
                        index,
                        total,
                        description: describe(&task),
                    });
                    self.convert_one(&runner, &task)
                }
                PreparedTask::Unreadable { source, error } => {
                    on_event(ConversionEvent::Started {
                        index,
                        total,
                        description: task::display_name(&source),
                    });
                    Err(error)
                }
            };

            match &result {
                Ok(output) => {
                    info!(source = %source.display(), output = %output.display(), "converted");
                    tally.succeeded += 1;
                }
                Err(Error::Cancelled) => return Ok(self.cancelled(tally, &mut on_event)),
                Err(error) => {
                    warn!(source = %source.display(), %error, "conversion failed");
                    tally.failed += 1;
                }
            }

            on_event(ConversionEvent::Finished {
                index,
                total,
                report: TaskReport {
                    source,
                    result,
                },
            });
        }

        self.state = BatchState::Completed;
        on_event(ConversionEvent::Completed { tally });
        Ok(ConversionSummary {
            tally,
            state: self.state,
        })
    }

    fn cancelled(
        &mut self,
        tally: Tally,
        on_event: &mut impl FnMut(ConversionEvent),
    ) -> ConversionSummary {
        info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            "batch cancelled"
        );
        self.state = BatchState::Cancelled;
        on_event(ConversionEvent::Cancelled { tally });
        ConversionSummary {
            tally,
            state: self.state,
        }
    }

    fn convert_one(&self, runner: &Runner<'_>, task: &ConversionTask) -> Result<PathBuf> {
        task.check_source()?;
        let output = task::reserve_output_path(&task.output)?;
        let plan = match command::plan(
            self.tools,
            task,
            &[Window::of_task(task)],
            &output,
            Pass::Full,
        ) {
            Ok(plan) => plan,
            Err(error) => {
                remove_partial_output(&output);
                return Err(error);
            }
        };
        let result = runner.run(&plan);
        drop(plan);

        match result.outcome {
            Outcome::Success => match std::fs::metadata(&output) {
                Ok(metadata) if metadata.len() > 0 => Ok(output),
                Ok(_) => {
                    remove_partial_output(&output);
                    Err(Error::Io(std::io::Error::other(format!(
                        "output {} was not written",
                        output.display()
                    ))))
                }
                Err(error) => Err(Error::Io(std::io::Error::new(
                    error.kind(),
                    format!("output {} was not written: {error}", output.display()),
                ))),
            },
            Outcome::Failed(error) => {
                remove_partial_output(&output);
                Err(error)
            }
            Outcome::Cancelled => {
                remove_partial_output(&output);
                Err(Error::Cancelled)
            }
        }
    }
}

fn describe(task: &ConversionTask) -> String {
    let mut details = Vec::new();
    if let Ok((width, height)) = task.output_dimensions() {
        details.push(format!("{width}x{height}"));
    }
    if task.trim_start_secs > 0.0 || task.trim_duration_secs.is_some() {
        let end = match task.trim_duration_secs {
            Some(duration) => timecode::format_timestamp(task.trim_start_secs + duration),
            None => "end".to_string(),
        };
        details.push(format!(
            "{}-{end}",
            timecode::format_timestamp(task.trim_start_secs)
        ));
    }
    if details.is_empty() {
        task.file_name()
    } else {
        format!("{} ({})", task.file_name(), details.join(", "))
    }
}

/// The path was reserved for this task, so anything there is ours.
fn remove_partial_output(output: &Path) {
    if !output.exists() {
        return;
    }
    if let Err(error) = std::fs::remove_file(output) {
        warn!(output = %output.display(), %error, "could not remove partial output");
    }
}
