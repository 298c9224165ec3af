use std::io;
use std::num::NonZeroU32;
use std::path::PathBuf;

use tvin_core::prelude::{CaptureParams, VideoSystem};
use tvin_tvd::TvdDevice;

use super::controller::CaptureController;
use super::FrameSink;
use crate::session::CaptureSession;

/// Device node the TVD driver registers on the reference boards.
pub const DEFAULT_DEVICE: &str = "/dev/video1";
/// Buffers requested from the driver by default.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;
/// Every Nth dequeued frame reaches the consumer.
pub const DEFAULT_FRAME_DIVISOR: u32 = 3;

/// Errors raised while bringing up or driving a capture.
///
/// # Example
/// ```rust,ignore
/// use tvin::prelude::*;
///
/// let err = CaptureRequest::new("/dev/video1").initialize().err().expect("no device");
/// eprintln!("capture failed: {err} ({})", err.code());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open capture device {path}")]
    CannotOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("capability query failed")]
    QueryCapability(#[source] io::Error),
    #[error("device is not capable of streaming I/O")]
    NotStreamingCapable,
    #[error("private format selection rejected by driver")]
    SetFormat(#[source] io::Error),
    #[error("format read-back failed")]
    GetFormat(#[source] io::Error),
    #[error("buffer allocation failed")]
    RequestBuffers(#[source] io::Error),
    #[error("driver granted no capture buffers")]
    NoBuffers,
    #[error("query of buffer {index} failed")]
    QueryBuffer {
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("mmap of buffer {index} failed")]
    Mmap {
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("enqueue of buffer {index} failed")]
    Enqueue {
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("buffer dequeue failed")]
    Dequeue(#[source] io::Error),
    #[error("driver returned buffer index {index} outside the pool")]
    BadBufferIndex { index: u32 },
    #[error("stream on failed")]
    StreamOn(#[source] io::Error),
    #[error("stream off failed")]
    StreamOff(#[source] io::Error),
}

impl CaptureError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::CannotOpen { .. } => "cannot_open",
            CaptureError::QueryCapability(_) => "query_capability_failed",
            CaptureError::NotStreamingCapable => "not_streaming_capable",
            CaptureError::SetFormat(_) => "set_format_failed",
            CaptureError::GetFormat(_) => "get_format_failed",
            CaptureError::RequestBuffers(_) => "request_buffers_failed",
            CaptureError::NoBuffers => "no_buffers_granted",
            CaptureError::QueryBuffer { .. } => "query_buffer_failed",
            CaptureError::Mmap { .. } => "mmap_failed",
            CaptureError::Enqueue { .. } => "enqueue_failed",
            CaptureError::Dequeue(_) => "dequeue_failed",
            CaptureError::BadBufferIndex { .. } => "bad_buffer_index",
            CaptureError::StreamOn(_) => "stream_on_failed",
            CaptureError::StreamOff(_) => "stream_off_failed",
        }
    }

}

/// Everything the capture bring-up needs besides the device itself.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Driver input selection written before geometry negotiation.
    pub params: CaptureParams,
    /// Buffers to request; the driver may grant fewer.
    pub buffer_count: u32,
    /// Deliver every Nth dequeued frame to the consumer.
    pub frame_divisor: NonZeroU32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            params: CaptureParams::default(),
            buffer_count: DEFAULT_BUFFER_COUNT,
            frame_divisor: NonZeroU32::new(DEFAULT_FRAME_DIVISOR).unwrap(),
        }
    }
}

/// Builder for a capture bring-up on a device node.
///
/// # Example
/// ```rust,ignore
/// use tvin::prelude::*;
///
/// let mut controller = CaptureRequest::new("/dev/video1")
///     .video_system(VideoSystem::Pal)
///     .buffers(4)
///     .frame_divisor(3)
///     .initialize()?;
/// controller.start()?;
/// # Ok::<(), tvin::capture_api::CaptureError>(())
/// ```
pub struct CaptureRequest {
    path: PathBuf,
    options: CaptureOptions,
}

impl CaptureRequest {
    /// Target a device node.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: CaptureOptions::default(),
        }
    }

    /// Select the analog system to decode.
    pub fn video_system(mut self, system: VideoSystem) -> Self {
        self.options.params.system = system;
        self
    }

    /// Select the physical interface index.
    pub fn interface(mut self, interface: u8) -> Self {
        self.options.params.interface = interface;
        self
    }

    /// Number of buffers to request (minimum 1; the driver may grant fewer).
    pub fn buffers(mut self, count: u32) -> Self {
        self.options.buffer_count = count.max(1);
        self
    }

    /// Deliver every Nth dequeued frame (minimum 1 = every frame).
    pub fn frame_divisor(mut self, divisor: u32) -> Self {
        self.options.frame_divisor = NonZeroU32::new(divisor.max(1)).unwrap();
        self
    }

    /// The options accumulated so far.
    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Open the device and run the full bring-up: capability check, format
    /// negotiation, buffer pool allocation/mapping/priming. Any failure
    /// tears down before returning.
    pub fn initialize(self) -> Result<CaptureController<TvdDevice>, CaptureError> {
        let device = TvdDevice::open(&self.path).map_err(|source| CaptureError::CannotOpen {
            path: self.path.clone(),
            source,
        })?;
        CaptureController::initialize(device, &self.options)
    }

    /// Initialize, start streaming, and hand the run loop to a worker
    /// thread delivering decimated frames to `sink`.
    pub fn spawn<S>(self, sink: S) -> Result<CaptureSession, CaptureError>
    where
        S: FrameSink + Send + 'static,
    {
        let controller = self.initialize()?;
        CaptureSession::spawn(controller, sink)
    }
}
