#![doc = include_str!("../README.md")]

pub mod device;
pub mod mapping;
pub mod sys;

pub use device::{BufferInfo, Capability, CaptureIo, TvdDevice};
pub use mapping::FrameMapping;

pub mod prelude {
    pub use crate::{BufferInfo, Capability, CaptureIo, FrameMapping, TvdDevice};
    pub use tvin_core::prelude::*;
}
