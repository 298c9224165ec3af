use tracing::{error, info, warn};
use tvin_core::prelude::{CaptureFormat, LoopMetrics};
use tvin_tvd::CaptureIo;

use super::negotiate::negotiate_format;
use super::pool::FramePool;
use super::request::{CaptureError, CaptureOptions};

/// Streaming state of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not streaming; the pool may or may not be initialized.
    Idle,
    /// Stream on; buffers cycle between driver and application.
    Streaming,
    /// Stream start failed; only teardown recovers from here.
    Failed,
}

/// One decimated frame, borrowed from its pool mapping for the duration of
/// the consumer callback.
///
/// The data is only valid until the callback returns; afterwards the buffer
/// goes back to the driver for refilling.
pub struct FrameView<'a> {
    data: &'a [u8],
    format: &'a CaptureFormat,
}

impl<'a> FrameView<'a> {
    /// Full frame bytes as mapped from the driver.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.format.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.format.height()
    }

    /// The negotiated format this frame was captured in.
    pub fn format(&self) -> &'a CaptureFormat {
        self.format
    }

    /// Luma plane bytes.
    pub fn luma(&self) -> &'a [u8] {
        let end = self.format.planes.first.min(self.data.len());
        &self.data[..end]
    }

    /// Bytes from the second chroma plane onward, or `None` when the pixel
    /// format has no known plane layout (do not attempt second-plane decode).
    pub fn second_plane(&self) -> Option<&'a [u8]> {
        self.format
            .planes
            .second
            .map(|offset| self.data.get(offset..).unwrap_or(&[]))
    }
}

/// Consumer of decimated frames. Runs synchronously on the loop's thread,
/// so it must return quickly or the driver starves for buffers.
pub trait FrameSink {
    /// Receive one frame for the duration of the call.
    fn deliver(&mut self, frame: FrameView<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(FrameView<'_>),
{
    fn deliver(&mut self, frame: FrameView<'_>) {
        self(frame)
    }
}

/// Owns the device, the negotiated format, and the buffer pool, and drives
/// the stream-on / dequeue / requeue / stream-off cycle.
///
/// The run loop itself belongs to the caller (or to
/// [`CaptureSession`](crate::session::CaptureSession)): call
/// [`capture_one_frame`](Self::capture_one_frame) until it reports an error
/// or an external stop arrives, then call [`stop`](Self::stop) and
/// [`teardown`](Self::teardown) unconditionally.
pub struct CaptureController<D: CaptureIo> {
    driver: D,
    pool: FramePool,
    format: CaptureFormat,
    divisor: u64,
    ticks: u64,
    state: LoopState,
    metrics: LoopMetrics,
}

impl<D: CaptureIo> CaptureController<D> {
    /// Run the full bring-up against an already-open driver: capability
    /// check, format negotiation, pool allocate/map/prime/enqueue.
    ///
    /// Every failure path tears down (unmaps whatever prefix of the pool
    /// was built, closes the device) before the error is returned.
    pub fn initialize(mut driver: D, options: &CaptureOptions) -> Result<Self, CaptureError> {
        let mut pool = FramePool::empty();
        match Self::bring_up(&mut driver, &mut pool, options) {
            Ok(format) => Ok(Self {
                driver,
                pool,
                format,
                divisor: u64::from(options.frame_divisor.get()),
                ticks: 0,
                state: LoopState::Idle,
                metrics: LoopMetrics::default(),
            }),
            Err(err) => {
                error!(error = %err, "capture initialization failed, tearing down");
                pool.unmap_all();
                driver.close();
                Err(err)
            }
        }
    }

    fn bring_up(
        driver: &mut D,
        pool: &mut FramePool,
        options: &CaptureOptions,
    ) -> Result<CaptureFormat, CaptureError> {
        let caps = driver
            .query_capability()
            .map_err(CaptureError::QueryCapability)?;
        if !caps.streaming() {
            error!(driver = %caps.driver, "device is not capable of streaming");
            return Err(CaptureError::NotStreamingCapable);
        }
        info!(driver = %caps.driver, card = %caps.card, "device is capable of streaming");

        let format = negotiate_format(driver, &options.params)?;

        pool.allocate(driver, options.buffer_count)?;
        pool.map_all(driver)?;
        pool.prime_and_enqueue_all(driver)?;

        info!(buffers = pool.len(), "capture initialization done");
        Ok(format)
    }

    /// Issue stream-on and reset the per-frame dequeue counter.
    ///
    /// On failure no frames will ever be produced and only
    /// [`teardown`](Self::teardown) recovers the controller.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        match self.driver.stream_on() {
            Ok(()) => {
                self.ticks = 0;
                self.state = LoopState::Streaming;
                info!("stream on");
                Ok(())
            }
            Err(source) => {
                self.state = LoopState::Failed;
                error!("stream on failed");
                Err(CaptureError::StreamOn(source))
            }
        }
    }

    /// The steady-state unit of work: dequeue a filled buffer, deliver it to
    /// `sink` if the decimation policy selects it, and requeue it.
    ///
    /// Dequeue blocks until the driver has a filled buffer. Any error is
    /// fatal to the loop: the caller must stop iterating and still call
    /// [`stop`](Self::stop) and [`teardown`](Self::teardown).
    pub fn capture_one_frame<S>(&mut self, sink: &mut S) -> Result<(), CaptureError>
    where
        S: FrameSink + ?Sized,
    {
        let index = self.driver.dequeue_buffer().map_err(CaptureError::Dequeue)?;
        self.metrics.record_dequeued();

        if !self.pool.mark_filled(index) {
            // A buffer we never mapped cannot be consumed; hand it straight
            // back so the driver does not lose it, then report the protocol
            // violation.
            warn!(index, "driver returned an index outside the mapped pool");
            let _ = self.driver.queue_buffer(index);
            return Err(CaptureError::BadBufferIndex { index });
        }

        let selected = self.ticks % self.divisor == 0;
        self.ticks += 1;

        if selected {
            if let Some(mapping) = self.pool.mapping(index) {
                sink.deliver(FrameView {
                    data: mapping.as_slice(),
                    format: &self.format,
                });
                self.metrics.record_delivered();
            }
        } else {
            self.metrics.record_skipped();
        }

        // Requeue whether or not the frame was consumed, so the driver can
        // refill it.
        self.pool.mark_queued(index);
        self.driver
            .queue_buffer(index)
            .map_err(|source| CaptureError::Enqueue { index, source })?;
        self.metrics.record_requeued();
        Ok(())
    }

    /// Issue stream-off. The controller considers itself stopped regardless
    /// of what the driver reports; the error is surfaced but does not block
    /// shutdown.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        self.state = LoopState::Idle;
        info!("stream off");
        self.driver.stream_off().map_err(CaptureError::StreamOff)
    }

    /// Unmap the whole pool and close the device.
    ///
    /// Callable any number of times, from any state, including the
    /// partial-initialization states internal bring-up already routes here.
    pub fn teardown(&mut self) {
        self.pool.unmap_all();
        self.driver.close();
        self.state = LoopState::Idle;
    }

    /// The format negotiated at initialization.
    pub fn format(&self) -> &CaptureFormat {
        &self.format
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The buffer pool, for observing sizes and ownership counts.
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Shared handle to the loop counters.
    pub fn metrics(&self) -> LoopMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_api::fake::{FakeDriver, FakeState};
    use tvin_core::prelude::pixfmt;

    fn init_default() -> (CaptureController<FakeDriver>, crate::capture_api::fake::SharedState)
    {
        let (driver, state) = FakeDriver::new(FakeState::default());
        let controller =
            CaptureController::initialize(driver, &CaptureOptions::default()).unwrap();
        (controller, state)
    }

    #[test]
    fn end_to_end_nine_frames_three_deliveries() {
        let (mut controller, state) = init_default();
        assert_eq!(controller.format().planes.second, Some(432_000));
        assert_eq!(controller.pool().len(), 4);

        controller.start().unwrap();
        assert_eq!(controller.state(), LoopState::Streaming);

        let mut frames = 0u32;
        let mut sink = |frame: FrameView<'_>| {
            assert_eq!((frame.width(), frame.height()), (720, 480));
            assert!(!frame.data().is_empty());
            frames += 1;
        };
        for _ in 0..9 {
            controller.capture_one_frame(&mut sink).unwrap();
        }
        drop(sink);
        assert_eq!(frames, 3);

        controller.stop().unwrap();
        assert_eq!(controller.state(), LoopState::Idle);
        controller.teardown();
        assert_eq!(controller.pool().mapped_len(), 0);

        let state = state.lock().unwrap();
        assert!(state.closed);
        assert!(!state.streaming);
        assert_eq!(state.dequeues, 9);
    }

    #[test]
    fn decimation_selects_every_third_dequeue_position() {
        let (mut controller, _state) = init_default();
        controller.start().unwrap();

        let mut positions = Vec::new();
        for position in 0..12u32 {
            let before = controller.metrics().snapshot().delivered;
            controller.capture_one_frame(&mut |_: FrameView<'_>| {}).unwrap();
            if controller.metrics().snapshot().delivered > before {
                positions.push(position);
            }
        }
        assert_eq!(positions, vec![0, 3, 6, 9]);

        let counts = controller.metrics().snapshot();
        assert_eq!(counts.dequeued, 12);
        assert_eq!(counts.delivered, 4);
        assert_eq!(counts.skipped, 8);
        assert_eq!(counts.requeued, 12);
    }

    #[test]
    fn ownership_invariant_holds_during_delivery() {
        let (mut controller, _state) = init_default();
        controller.start().unwrap();
        for _ in 0..6 {
            controller.capture_one_frame(&mut |_: FrameView<'_>| {}).unwrap();
            let pool = controller.pool();
            assert_eq!(pool.queued_len() + pool.held_len(), pool.mapped_len());
            assert_eq!(pool.held_len(), 0);
        }
    }

    #[test]
    fn missing_streaming_capability_aborts_and_tears_down() {
        let (driver, state) = FakeDriver::new(FakeState {
            streaming_cap: false,
            ..FakeState::default()
        });
        let err = CaptureController::initialize(driver, &CaptureOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), "not_streaming_capable");
        assert!(state.lock().unwrap().closed);
    }

    #[test]
    fn mmap_failure_truncates_then_tears_down() {
        let (driver, state) = FakeDriver::new(FakeState {
            fail_map_at: Some(2),
            ..FakeState::default()
        });
        let err = CaptureController::initialize(driver, &CaptureOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), "mmap_failed");
        let state = state.lock().unwrap();
        // Only the two successfully mapped buffers ever existed, and the
        // device ends closed.
        assert_eq!(state.maps, 2);
        assert!(state.closed);
    }

    #[test]
    fn stream_on_failure_marks_failed_until_teardown() {
        let (driver, state) = FakeDriver::new(FakeState {
            fail_stream_on: true,
            ..FakeState::default()
        });
        let mut controller =
            CaptureController::initialize(driver, &CaptureOptions::default()).unwrap();
        let err = controller.start().err().unwrap();
        assert_eq!(err.code(), "stream_on_failed");
        assert_eq!(controller.state(), LoopState::Failed);
        controller.teardown();
        assert_eq!(controller.state(), LoopState::Idle);
        assert!(state.lock().unwrap().closed);
    }

    #[test]
    fn requeue_failure_is_fatal_to_the_loop() {
        let (driver, _state) = FakeDriver::new(FakeState {
            fail_queue_while_streaming: true,
            ..FakeState::default()
        });
        let mut controller =
            CaptureController::initialize(driver, &CaptureOptions::default()).unwrap();
        controller.start().unwrap();
        let err = controller
            .capture_one_frame(&mut |_: FrameView<'_>| {})
            .err()
            .unwrap();
        assert_eq!(err.code(), "enqueue_failed");
        assert!(matches!(err, CaptureError::Enqueue { index: 0, .. }));
    }

    #[test]
    fn dequeue_failure_is_fatal_to_the_loop() {
        let (driver, _state) = FakeDriver::new(FakeState {
            fail_dequeue_after: Some(2),
            ..FakeState::default()
        });
        let mut controller =
            CaptureController::initialize(driver, &CaptureOptions::default()).unwrap();
        controller.start().unwrap();
        let mut sink = |_: FrameView<'_>| {};
        controller.capture_one_frame(&mut sink).unwrap();
        controller.capture_one_frame(&mut sink).unwrap();
        let err = controller.capture_one_frame(&mut sink).err().unwrap();
        assert_eq!(err.code(), "dequeue_failed");
        // The loop owner still shuts down through the universal path.
        let _ = controller.stop();
        controller.teardown();
        assert_eq!(controller.pool().mapped_len(), 0);
    }

    #[test]
    fn unknown_format_frames_carry_no_second_plane() {
        let (driver, _state) = FakeDriver::new(FakeState {
            geometry: (720, 480, tvin_core::prelude::FourCc::new(*b"MJPG")),
            ..FakeState::default()
        });
        let mut controller =
            CaptureController::initialize(driver, &CaptureOptions::default()).unwrap();
        controller.start().unwrap();
        let mut seen = false;
        controller
            .capture_one_frame(&mut |frame: FrameView<'_>| {
                assert!(frame.second_plane().is_none());
                assert!(!frame.luma().is_empty());
                seen = true;
            })
            .unwrap();
        assert!(seen);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (mut controller, state) = init_default();
        controller.teardown();
        controller.teardown();
        assert_eq!(controller.pool().mapped_len(), 0);
        assert!(state.lock().unwrap().closed);
    }

    #[test]
    fn divisor_one_delivers_every_frame() {
        let (driver, _state) = FakeDriver::new(FakeState::default());
        let options = CaptureOptions {
            frame_divisor: std::num::NonZeroU32::new(1).unwrap(),
            ..CaptureOptions::default()
        };
        let mut controller = CaptureController::initialize(driver, &options).unwrap();
        controller.start().unwrap();
        for _ in 0..5 {
            controller.capture_one_frame(&mut |_: FrameView<'_>| {}).unwrap();
        }
        let counts = controller.metrics().snapshot();
        assert_eq!(counts.delivered, 5);
        assert_eq!(counts.skipped, 0);
    }

    #[test]
    fn semi_planar_formats_reuse_the_first_offset() {
        let (driver, _state) = FakeDriver::new(FakeState {
            geometry: (704, 576, pixfmt::NV12),
            ..FakeState::default()
        });
        let controller =
            CaptureController::initialize(driver, &CaptureOptions::default()).unwrap();
        let planes = controller.format().planes;
        assert_eq!(planes.second, Some(planes.first));
    }
}
