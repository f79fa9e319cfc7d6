use crate::config::Tools;
use crate::convert::{ConversionEvent, ConversionSummary, Converter};
use crate::error::{Error, Result};
use crate::estimate::{EstimateEvent, EstimateReport, Estimator, SamplingStrategy};
use crate::pipeline::CancelFlag;
use crate::task::PreparedTask;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// A batch running on its worker thread. Events arrive in task order; the
/// channel closes once the worker is done.
pub struct Batch<E, T> {
    events: mpsc::Receiver<E>,
    worker: JoinHandle<Result<T>>,
}

impl<E, T> Batch<E, T> {
    /// Blocks for each event until the worker finishes.
    pub fn events(&self) -> mpsc::Iter<'_, E> {
        self.events.iter()
    }

    /// Events already queued, without blocking.
    pub fn pending_events(&self) -> mpsc::TryIter<'_, E> {
        self.events.try_iter()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn wait(self) -> Result<T> {
        self.worker.join().map_err(|_| Error::WorkerPanicked)?
    }
}

/// Ends a batch when the worker exits, panics included: the cancel request
/// is consumed, then the running mark is cleared.
struct RunningGuard {
    running: Arc<AtomicBool>,
    cancel: CancelFlag,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.cancel.reset();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Entry points for a front-end: start a conversion or estimate batch on a
/// background worker and cancel it from any thread. One batch at a time.
pub struct Session {
    tools: Arc<Tools>,
    cancel: CancelFlag,
    running: Arc<AtomicBool>,
}

impl Session {
    pub fn new(tools: Tools) -> Self {
        Self {
            tools: Arc::new(tools),
            cancel: CancelFlag::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Shared with the worker. Setting it from a signal handler cancels the
    /// running batch, or the next one if it is set while tasks are prepared.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Cancels the running batch; does nothing while idle.
    pub fn cancel(&self) {
        if self.is_running() {
            debug!("cancel requested");
            self.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_conversion(
        &self,
        tasks: Vec<PreparedTask>,
    ) -> Result<Batch<ConversionEvent, ConversionSummary>> {
        self.spawn(move |tools, cancel, sender| {
            Converter::new(tools, cancel).run_prepared(tasks, |event| {
                let _ = sender.send(event);
            })
        })
    }

    pub fn estimate(
        &self,
        tasks: Vec<PreparedTask>,
        strategy: SamplingStrategy,
    ) -> Result<Batch<EstimateEvent, EstimateReport>> {
        self.spawn(move |tools, cancel, sender| {
            Estimator::new(tools, cancel, strategy).run_prepared(tasks, |event| {
                let _ = sender.send(event);
            })
        })
    }

    fn spawn<E, T, F>(&self, work: F) -> Result<Batch<E, T>>
    where
        E: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&Tools, &CancelFlag, &mpsc::Sender<E>) -> Result<T> + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidParameter(
                "a batch is already running".into(),
            ));
        }
        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            cancel: self.cancel.clone(),
        };

        let tools = Arc::clone(&self.tools);
        let cancel = self.cancel.clone();
        let (sender, receiver) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("clipgif-batch".into())
            .spawn(move || {
                let _guard = guard;
                work(&tools, &cancel, &sender)
            })?;

        Ok(Batch {
            events: receiver,
            worker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::BatchState;
    use std::path::PathBuf;

    fn tools() -> Tools {
        Tools {
            ffmpeg: PathBuf::from("/no/such/ffmpeg"),
            ffprobe: PathBuf::from("/no/such/ffprobe"),
            gifski: None,
            benign_patterns: Vec::new(),
        }
    }

    #[test]
    fn empty_batch_completes() {
        let session = Session::new(tools());
        let batch = session.start_conversion(Vec::new()).unwrap();
        let events: Vec<_> = batch.events().collect();
        let summary = batch.wait().unwrap();

        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ConversionEvent::Completed { .. }));
        assert!(!session.is_running());
    }

    #[test]
    fn cancel_while_idle_is_ignored() {
        let session = Session::new(tools());
        session.cancel();
        let summary = session
            .start_conversion(Vec::new())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(summary.state, BatchState::Completed);
    }

    #[test]
    fn flag_set_before_start_cancels_that_batch() {
        let session = Session::new(tools());
        let task = crate::request::TaskRequest::new("/no/such/clip.mp4")
            .into_task(&crate::probe::VideoInfo {
                width: 640,
                height: 480,
                duration_secs: Some(5.0),
                framerate: 30.0,
            })
            .unwrap();
        session.cancel_flag().cancel();
        let summary = session
            .start_conversion(vec![task.into()])
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(summary.state, BatchState::Cancelled);

        let next = session
            .start_conversion(Vec::new())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(next.state, BatchState::Completed);
    }

    #[test]
    fn validation_errors_come_back_from_wait() {
        let session = Session::new(tools());
        let mut task = crate::request::TaskRequest::new("/no/such/clip.mp4")
            .into_task(&crate::probe::VideoInfo {
                width: 640,
                height: 480,
                duration_secs: Some(5.0),
                framerate: 30.0,
            })
            .unwrap();
        task.quality = 0;
        let result = session
            .estimate(vec![task.into()], SamplingStrategy::Single)
            .unwrap()
            .wait();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert!(!session.is_running());
    }

    #[test]
    fn missing_source_is_an_estimate_line() {
        let session = Session::new(tools());
        let task = crate::request::TaskRequest::new("/no/such/clip.mp4")
            .into_task(&crate::probe::VideoInfo {
                width: 640,
                height: 480,
                duration_secs: Some(5.0),
                framerate: 30.0,
            })
            .unwrap();
        let report = session
            .estimate(vec![task.into()], SamplingStrategy::Single)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(report.entries.len(), 1);
        assert!(matches!(
            report.entries[0].result,
            Err(Error::InputNotFound(_))
        ));
    }
}
