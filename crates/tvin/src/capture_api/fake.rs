//! Deterministic in-process driver for exercising the capture layer.
//!
//! Buffers are anonymous mappings so the unmap path runs for real, and the
//! dequeue order is the FIFO of queued indices, which makes decimation and
//! ownership assertions reproducible.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tvin_core::prelude::{CaptureParams, FourCc, pixfmt};
use tvin_tvd::{BufferInfo, Capability, CaptureIo, FrameMapping, sys};

pub(crate) type SharedState = Arc<Mutex<FakeState>>;

pub(crate) struct FakeState {
    pub streaming_cap: bool,
    pub fail_querycap: bool,
    pub geometry: (u32, u32, FourCc),
    pub params: Option<CaptureParams>,
    pub geometry_queried_before_params: bool,
    /// Upper bound on buffers the fake will grant.
    pub grant: u32,
    pub frame_len: u32,
    pub fail_query_at: Option<u32>,
    /// Fail the Nth map call (0-based over successful maps so far).
    pub fail_map_at: Option<u32>,
    pub fail_enqueue_at: Option<u32>,
    /// Fail queueing once streaming has started (requeue-path failures).
    pub fail_queue_while_streaming: bool,
    /// Allow this many successful dequeues, then fail.
    pub fail_dequeue_after: Option<u64>,
    pub fail_stream_on: bool,
    pub queued: VecDeque<u32>,
    pub dequeues: u64,
    pub maps: u32,
    pub streaming: bool,
    pub closed: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            streaming_cap: true,
            fail_querycap: false,
            geometry: (720, 480, pixfmt::YUV420),
            params: None,
            geometry_queried_before_params: false,
            grant: 4,
            frame_len: 720 * 480 * 2,
            fail_query_at: None,
            fail_map_at: None,
            fail_enqueue_at: None,
            fail_queue_while_streaming: false,
            fail_dequeue_after: None,
            fail_stream_on: false,
            queued: VecDeque::new(),
            dequeues: 0,
            maps: 0,
            streaming: false,
            closed: false,
        }
    }
}

pub(crate) struct FakeDriver {
    state: SharedState,
}

impl FakeDriver {
    pub(crate) fn new(state: FakeState) -> (Self, SharedState) {
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

fn fault(what: &str) -> io::Error {
    io::Error::other(format!("injected {what} failure"))
}

impl CaptureIo for FakeDriver {
    fn query_capability(&mut self) -> io::Result<Capability> {
        let state = self.state.lock().unwrap();
        if state.fail_querycap {
            return Err(fault("querycap"));
        }
        let mut capabilities = sys::V4L2_CAP_VIDEO_CAPTURE;
        if state.streaming_cap {
            capabilities |= sys::V4L2_CAP_STREAMING;
        }
        Ok(Capability {
            driver: "fake-tvd".into(),
            card: "synthetic capture".into(),
            capabilities,
        })
    }

    fn set_capture_parameters(&mut self, params: &CaptureParams) -> io::Result<()> {
        self.state.lock().unwrap().params = Some(*params);
        Ok(())
    }

    fn query_capture_geometry(&mut self) -> io::Result<(u32, u32, FourCc)> {
        let mut state = self.state.lock().unwrap();
        if state.params.is_none() {
            state.geometry_queried_before_params = true;
        }
        Ok(state.geometry)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let state = self.state.lock().unwrap();
        Ok(count.min(state.grant))
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let state = self.state.lock().unwrap();
        if state.fail_query_at == Some(index) {
            return Err(fault("querybuf"));
        }
        Ok(BufferInfo {
            length: state.frame_len,
            offset: index * state.frame_len,
        })
    }

    fn map_buffer(&mut self, info: BufferInfo) -> io::Result<FrameMapping> {
        let mut state = self.state.lock().unwrap();
        if state.fail_map_at == Some(state.maps) {
            return Err(fault("mmap"));
        }
        state.maps += 1;
        FrameMapping::anonymous(info.length as usize)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_enqueue_at == Some(index) && !state.streaming {
            return Err(fault("qbuf"));
        }
        if state.fail_queue_while_streaming && state.streaming {
            return Err(fault("requeue"));
        }
        state.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<u32> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_dequeue_after {
            if state.dequeues >= limit {
                return Err(fault("dqbuf"));
            }
        }
        let index = state
            .queued
            .pop_front()
            .ok_or_else(|| fault("dqbuf-starved"))?;
        state.dequeues += 1;
        Ok(index)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stream_on {
            return Err(fault("streamon"));
        }
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().streaming = false;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
