#![doc = include_str!("../README.md")]

pub use tvin_core as core;
pub use tvin_tvd as tvd;

pub use thiserror;

pub mod capture_api;
pub mod session;

pub mod prelude {
    pub use crate::capture_api::{
        CaptureController, CaptureError, CaptureOptions, CaptureRequest, DEFAULT_BUFFER_COUNT,
        DEFAULT_DEVICE, DEFAULT_FRAME_DIVISOR, FramePool, FrameSink, FrameView, LoopState,
        SlotState, negotiate_format,
    };
    pub use crate::session::CaptureSession;
    pub use tvin_tvd::prelude::*;
}
