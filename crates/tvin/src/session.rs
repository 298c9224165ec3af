use std::sync::mpsc::{self, TryRecvError};
use std::thread::JoinHandle;

use tracing::{error, warn};
use tvin_core::prelude::{CaptureFormat, LoopCounts, LoopMetrics};
use tvin_tvd::CaptureIo;

use crate::capture_api::{CaptureController, CaptureError, FrameSink};

/// A capture running on its own worker thread.
///
/// The worker owns the controller and executes the run-loop contract:
/// `capture_one_frame` until an error or a stop signal, then `stop()` and
/// `teardown()` unconditionally. Because dequeue blocks without a timeout,
/// the stop signal is observed between frames; stopping can be delayed by
/// one in-flight dequeue.
///
/// # Example
/// ```rust,ignore
/// use tvin::prelude::*;
///
/// let session = CaptureRequest::new("/dev/video1").spawn(|frame: FrameView<'_>| {
///     // convert/display frame.data()
/// })?;
/// let err = session.stop();
/// # Ok::<(), tvin::capture_api::CaptureError>(())
/// ```
pub struct CaptureSession {
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<Option<CaptureError>>>,
    metrics: LoopMetrics,
    format: CaptureFormat,
}

impl CaptureSession {
    /// Start streaming on an initialized controller and move it onto a
    /// worker thread delivering decimated frames to `sink`.
    ///
    /// A stream-on failure tears the controller down and is returned here;
    /// no thread is spawned in that case.
    pub fn spawn<D, S>(mut controller: CaptureController<D>, mut sink: S) -> Result<Self, CaptureError>
    where
        D: CaptureIo + Send + 'static,
        S: FrameSink + Send + 'static,
    {
        if let Err(err) = controller.start() {
            controller.teardown();
            return Err(err);
        }
        let metrics = controller.metrics();
        let format = *controller.format();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = std::thread::spawn(move || {
            let mut failure = None;
            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }
                if let Err(err) = controller.capture_one_frame(&mut sink) {
                    error!(error = %err, "capture loop terminated");
                    failure = Some(err);
                    break;
                }
            }
            if let Err(err) = controller.stop() {
                warn!(error = %err, "stream off reported an error during shutdown");
            }
            controller.teardown();
            failure
        });

        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            metrics,
            format,
        })
    }

    /// The format frames are being captured in.
    pub fn format(&self) -> &CaptureFormat {
        &self.format
    }

    /// Shared handle to the loop counters.
    pub fn metrics(&self) -> LoopMetrics {
        self.metrics.clone()
    }

    /// Snapshot of the loop counters.
    pub fn counts(&self) -> LoopCounts {
        self.metrics.snapshot()
    }

    /// Signal the worker to stop and wait for teardown to finish.
    ///
    /// Returns the error that ended the loop, if it died on its own before
    /// the signal arrived.
    pub fn stop(mut self) -> Option<CaptureError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<CaptureError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.worker.take() {
            Some(handle) => handle.join().unwrap_or(None),
            None => None,
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // If the owner forgot to call stop, shut the worker down anyway so
        // mappings and the device descriptor are released.
        if self.worker.is_some() {
            let _ = self.shutdown();
        }
    }
}
