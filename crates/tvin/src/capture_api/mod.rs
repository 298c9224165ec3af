//! Capture request builder, format negotiation, buffer pool, and the loop
//! controller.
//!
//! Most users start with [`CaptureRequest`]; the pieces are public so a
//! custom run loop can drive a [`CaptureController`] directly.

pub mod controller;
pub mod negotiate;
pub mod pool;
pub mod request;

#[cfg(test)]
pub(crate) mod fake;

pub use controller::{CaptureController, FrameSink, FrameView, LoopState};
pub use negotiate::negotiate_format;
pub use pool::{FramePool, SlotState};
pub use request::{
    CaptureError, CaptureOptions, CaptureRequest, DEFAULT_BUFFER_COUNT, DEFAULT_DEVICE,
    DEFAULT_FRAME_DIVISOR,
};
