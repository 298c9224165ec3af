use std::io;

use tracing::{info, warn};
use tvin_core::prelude::{CaptureFormat, CaptureParams, Resolution};
use tvin_tvd::CaptureIo;

use super::request::CaptureError;

/// Configure the driver's input selection, then read back the geometry it
/// settled on.
///
/// The order is load-bearing: the private format-set must land before the
/// geometry query, or the driver reports its default, likely-wrong layout.
/// An unrecognized pixel format is not fatal; the returned format carries no
/// second-plane offset and consumers must skip second-plane decoding.
pub fn negotiate_format<D: CaptureIo>(
    driver: &mut D,
    params: &CaptureParams,
) -> Result<CaptureFormat, CaptureError> {
    driver
        .set_capture_parameters(params)
        .map_err(CaptureError::SetFormat)?;

    let (width, height, pixelformat) = driver
        .query_capture_geometry()
        .map_err(CaptureError::GetFormat)?;
    let resolution = Resolution::new(width, height).ok_or_else(|| {
        CaptureError::GetFormat(io::Error::new(
            io::ErrorKind::InvalidData,
            "driver reported a zero-sized frame",
        ))
    })?;

    let format = CaptureFormat::from_geometry(resolution, pixelformat);
    if format.planes.second.is_none() {
        warn!(
            pixelformat = %format.pixelformat,
            "no plane layout rule for reported pixel format; second-plane decode disabled"
        );
    }
    info!(
        size = %format.resolution,
        pixelformat = %format.pixelformat,
        first_offset = format.planes.first,
        second_offset = ?format.planes.second,
        "capture geometry negotiated"
    );
    Ok(format)
}
