#![doc = include_str!("../README.md")]

pub mod format;
pub mod metrics;

pub mod prelude {
    pub use crate::{
        format::{
            CaptureFormat, CaptureParams, FourCc, PlaneOffsets, Resolution, VideoSystem, pixfmt,
            second_plane_offset,
        },
        metrics::{LoopCounts, LoopMetrics},
    };
}
