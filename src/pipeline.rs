use crate::command::{Invocation, Plan};
use crate::error::Error;
use std::fmt;
use std::io::Read;
use std::process::{Child, ChildStderr, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long killed processes get to release their handles.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[cfg(unix)]
const SIGPIPE: i32 = 13;

/// Shared cancellation request. Written by the interactive side, polled by
/// the worker between tasks and while waiting on processes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// The underlying flag, for signal handlers that set it directly.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl Exit {
    pub fn success(self) -> bool {
        self == Exit::Code(0)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Exit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Exit::Signal(signal);
            }
        }
        Exit::Unknown
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Code(code) => write!(formatter, "exit code {code}"),
            Exit::Signal(signal) => write!(formatter, "signal {signal}"),
            Exit::Unknown => write!(formatter, "unknown exit status"),
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Success,
    Failed(Error),
    Cancelled,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub outcome: Outcome,
    pub decoder_diagnostics: String,
    pub encoder_diagnostics: String,
}

impl PipelineResult {
    fn failed(error: Error) -> Self {
        Self {
            outcome: Outcome::Failed(error),
            decoder_diagnostics: String::new(),
            encoder_diagnostics: String::new(),
        }
    }

    fn cancelled() -> Self {
        Self {
            outcome: Outcome::Cancelled,
            decoder_diagnostics: String::new(),
            encoder_diagnostics: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

/// Whether a failed decoder only lost its reader.
///
/// Heuristic: the decoder tool reports no dedicated exit code for a closed
/// pipe, so its diagnostics are matched against a configurable allow-list.
/// A SIGPIPE death needs no text match.
pub fn is_benign_decoder_exit(exit: Exit, diagnostics: &str, patterns: &[String]) -> bool {
    #[cfg(unix)]
    {
        if exit == Exit::Signal(SIGPIPE) {
            return true;
        }
    }
    #[cfg(not(unix))]
    let _ = exit;

    patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && diagnostics.contains(pattern.as_str()))
}

fn failure_text(diagnostics: &str, tool: &str, exit: Exit) -> String {
    if diagnostics.trim().is_empty() {
        format!("{tool} exited with {exit}")
    } else {
        diagnostics.to_string()
    }
}

/// Outcome of a decoder/encoder pair. The encoder's exit decides success;
/// a failed decoder only counts when its diagnostics are not benign.
/// Cancellation overrides everything.
pub fn classify_piped(
    encoder: Exit,
    decoder: Exit,
    encoder_diagnostics: &str,
    decoder_diagnostics: &str,
    benign_patterns: &[String],
    cancelled: bool,
) -> Outcome {
    if cancelled {
        return Outcome::Cancelled;
    }
    if !encoder.success() {
        return Outcome::Failed(Error::EncoderFailed(failure_text(
            encoder_diagnostics,
            "encoder",
            encoder,
        )));
    }
    if !decoder.success() && !is_benign_decoder_exit(decoder, decoder_diagnostics, benign_patterns)
    {
        return Outcome::Failed(Error::DecoderFailed(failure_text(
            decoder_diagnostics,
            "decoder",
            decoder,
        )));
    }
    Outcome::Success
}

/// Outcome of a process that writes the artifact itself.
pub fn classify_single(exit: Exit, diagnostics: &str, cancelled: bool) -> Outcome {
    if cancelled {
        return Outcome::Cancelled;
    }
    if !exit.success() {
        return Outcome::Failed(Error::EncoderFailed(failure_text(
            diagnostics,
            "encoder",
            exit,
        )));
    }
    Outcome::Success
}

fn drain(mut stream: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = stream.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// A spawned tool whose stderr is being collected. Killed and reaped on drop
/// if it is still running.
struct LiveProcess {
    tool: String,
    child: Child,
    status: Option<ExitStatus>,
    stderr: Option<JoinHandle<String>>,
}

impl LiveProcess {
    fn spawn(invocation: &Invocation, stdin: Stdio, stdout: Stdio) -> Result<Self, Error> {
        debug!(command = %invocation, "launching");
        let tool = invocation.tool_name();

        let mut command = invocation.command();
        command.stdin(stdin).stdout(stdout).stderr(Stdio::piped());
        let spawned = command.spawn();
        // The command still owns the parent's copy of any handle passed as
        // stdin; it must be closed before waiting.
        drop(command);

        let mut child = spawned.map_err(|source| Error::Launch {
            tool: tool.clone(),
            source,
        })?;
        let stderr = child.stderr.take().map(drain);

        Ok(Self {
            tool,
            child,
            status: None,
            stderr,
        })
    }

    /// Blocks until exit. `None` means cancellation came first.
    fn wait(&mut self, cancel: &CancelFlag) -> std::io::Result<Option<Exit>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.status = Some(status);
                return Ok(Some(status.into()));
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Err(error) = self.child.kill() {
            debug!(tool = %self.tool, %error, "kill failed");
        }
    }

    fn reap(&mut self, deadline: Instant) {
        while self.status.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.status = Some(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    warn!(tool = %self.tool, "process still running after kill");
                    return;
                }
                Err(error) => {
                    warn!(tool = %self.tool, %error, "could not reap process");
                    return;
                }
            }
        }
    }

    /// Collected stderr. Empty while the process is still running.
    fn diagnostics(&mut self) -> String {
        if self.status.is_none() {
            return String::new();
        }
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for LiveProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.kill();
            self.reap(Instant::now() + KILL_GRACE);
        }
    }
}

fn terminate(processes: &mut [&mut LiveProcess]) {
    for process in processes.iter_mut() {
        process.kill();
    }
    let deadline = Instant::now() + KILL_GRACE;
    for process in processes.iter_mut() {
        process.reap(deadline);
    }
}

/// Executes plans. Owns nothing beyond the live processes of one run.
pub struct Runner<'a> {
    cancel: &'a CancelFlag,
    benign_patterns: &'a [String],
}

impl<'a> Runner<'a> {
    pub fn new(cancel: &'a CancelFlag, benign_patterns: &'a [String]) -> Self {
        Self {
            cancel,
            benign_patterns,
        }
    }

    pub fn run(&self, plan: &Plan) -> PipelineResult {
        match plan {
            Plan::Piped { decoder, encoder } => self.run_piped(decoder, encoder),
            Plan::Single(invocation) => self.run_single(invocation),
            Plan::Palette { generate, apply, .. } => {
                let palette = self.run_single(generate);
                if !palette.is_success() {
                    return palette;
                }
                self.run_single(apply)
            }
        }
    }

    pub fn run_piped(&self, decoder: &Invocation, encoder: &Invocation) -> PipelineResult {
        if self.cancel.is_cancelled() {
            return PipelineResult::cancelled();
        }

        let mut decoder_process = match LiveProcess::spawn(decoder, Stdio::null(), Stdio::piped())
        {
            Ok(process) => process,
            Err(error) => return PipelineResult::failed(error),
        };

        let frames = match decoder_process.child.stdout.take() {
            Some(frames) => frames,
            None => {
                return PipelineResult::failed(Error::Io(std::io::Error::other(
                    "decoder stdout was not captured",
                )));
            }
        };

        let mut encoder_process =
            match LiveProcess::spawn(encoder, Stdio::from(frames), Stdio::null()) {
                Ok(process) => process,
                Err(error) => return PipelineResult::failed(error),
            };

        let encoder_exit = match encoder_process.wait(self.cancel) {
            Ok(Some(exit)) => exit,
            Ok(None) => {
                terminate(&mut [&mut encoder_process, &mut decoder_process]);
                return PipelineResult::cancelled();
            }
            Err(error) => return PipelineResult::failed(Error::Io(error)),
        };

        let decoder_exit = match decoder_process.wait(self.cancel) {
            Ok(Some(exit)) => exit,
            Ok(None) => {
                terminate(&mut [&mut decoder_process]);
                return PipelineResult::cancelled();
            }
            Err(error) => return PipelineResult::failed(Error::Io(error)),
        };

        let encoder_diagnostics = encoder_process.diagnostics();
        let decoder_diagnostics = decoder_process.diagnostics();
        debug!(%encoder_exit, %decoder_exit, "pipeline finished");

        let outcome = classify_piped(
            encoder_exit,
            decoder_exit,
            &encoder_diagnostics,
            &decoder_diagnostics,
            self.benign_patterns,
            self.cancel.is_cancelled(),
        );

        PipelineResult {
            outcome,
            decoder_diagnostics,
            encoder_diagnostics,
        }
    }

    pub fn run_single(&self, invocation: &Invocation) -> PipelineResult {
        if self.cancel.is_cancelled() {
            return PipelineResult::cancelled();
        }

        let mut process = match LiveProcess::spawn(invocation, Stdio::null(), Stdio::null()) {
            Ok(process) => process,
            Err(error) => return PipelineResult::failed(error),
        };

        let exit = match process.wait(self.cancel) {
            Ok(Some(exit)) => exit,
            Ok(None) => {
                terminate(&mut [&mut process]);
                return PipelineResult::cancelled();
            }
            Err(error) => return PipelineResult::failed(Error::Io(error)),
        };

        let diagnostics = process.diagnostics();
        debug!(%exit, "process finished");

        PipelineResult {
            outcome: classify_single(exit, &diagnostics, self.cancel.is_cancelled()),
            decoder_diagnostics: diagnostics,
            encoder_diagnostics: String::new(),
        }
    }
}
