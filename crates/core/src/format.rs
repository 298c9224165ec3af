use std::{fmt, num::NonZeroU32};

/// Four-character code identifying a pixel layout, as reported by the driver.
///
/// # Example
/// ```rust
/// use tvin_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"YU12");
/// assert_eq!(fcc.to_string(), "YU12");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Construct from the little-endian u32 the kernel reports.
    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_le_bytes())
    }

    /// Little-endian u32 encoding, as passed through ioctl structs.
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// The raw code bytes.
    pub const fn bytes(self) -> [u8; 4] {
        self.0
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "0x{:08x}", self.to_u32()),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FourCc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for FourCc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err(serde::de::Error::custom("fourcc must be four ASCII bytes"));
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(FourCc(arr))
    }
}

/// Pixel format codes understood by the TVD capture path.
pub mod pixfmt {
    use super::FourCc;

    /// Planar YUV 4:2:2.
    pub const YUV422P: FourCc = FourCc::new(*b"422P");
    /// Packed YUV 4:2:2, Y/Cb/Y/Cr order.
    pub const YUYV: FourCc = FourCc::new(*b"YUYV");
    /// Packed YUV 4:2:2, Y/Cr/Y/Cb order.
    pub const YVYU: FourCc = FourCc::new(*b"YVYU");
    /// Packed YUV 4:2:2, Cb/Y/Cr/Y order.
    pub const UYVY: FourCc = FourCc::new(*b"UYVY");
    /// Packed YUV 4:2:2, Cr/Y/Cb/Y order.
    pub const VYUY: FourCc = FourCc::new(*b"VYUY");
    /// Planar YUV 4:2:0.
    pub const YUV420: FourCc = FourCc::new(*b"YU12");
    /// Semi-planar YUV 4:2:2, interleaved CbCr plane.
    pub const NV16: FourCc = FourCc::new(*b"NV16");
    /// Semi-planar YUV 4:2:0, interleaved CbCr plane.
    pub const NV12: FourCc = FourCc::new(*b"NV12");
    /// Semi-planar YUV 4:2:0 in 16x16 macroblock tiles.
    pub const HM12: FourCc = FourCc::new(*b"HM12");
}

/// Frame resolution in pixels.
///
/// # Example
/// ```rust
/// use tvin_core::prelude::Resolution;
///
/// let res = Resolution::new(720, 480).unwrap();
/// assert_eq!(res.pixels(), 345_600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Total pixel count.
    pub fn pixels(&self) -> usize {
        self.width.get() as usize * self.height.get() as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Analog video system decoded by the TVD front end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VideoSystem {
    /// 525-line NTSC.
    #[default]
    Ntsc,
    /// 625-line PAL.
    Pal,
}

impl VideoSystem {
    /// Selector byte expected by the driver's private format payload.
    pub const fn selector(self) -> u8 {
        match self {
            VideoSystem::Ntsc => 0,
            VideoSystem::Pal => 1,
        }
    }
}

/// Input selection written to the driver before geometry can be queried.
///
/// The defaults reproduce the single-channel wiring the hardware fixes:
/// interface 0, one row, one column, channel selectors `[0, 1, 0, 0]`.
///
/// # Example
/// ```rust
/// use tvin_core::prelude::{CaptureParams, VideoSystem};
///
/// let params = CaptureParams {
///     system: VideoSystem::Pal,
///     ..CaptureParams::default()
/// };
/// assert_eq!(params.row_count, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureParams {
    /// Physical interface index.
    pub interface: u8,
    /// Video system to decode.
    pub system: VideoSystem,
    /// Channel grid rows.
    pub row_count: u8,
    /// Channel grid columns.
    pub col_count: u8,
    /// Per-channel input selectors.
    pub channels: [u8; 4],
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            interface: 0,
            system: VideoSystem::Ntsc,
            row_count: 1,
            col_count: 1,
            channels: [0, 1, 0, 0],
        }
    }
}

/// Byte offsets of the chroma planes within one captured frame.
///
/// `first` is always `width * height` (the end of the luma plane).
/// `second` depends on the pixel format family and is `None` when the
/// driver reports a format this crate has no layout rule for; consumers
/// must not attempt second-plane decoding in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlaneOffsets {
    /// Offset of the first chroma plane.
    pub first: usize,
    /// Offset of the second chroma plane, when the layout defines one.
    pub second: Option<usize>,
}

impl PlaneOffsets {
    /// Derive offsets for a format/resolution pair.
    pub fn derive(pixelformat: FourCc, resolution: Resolution) -> Self {
        Self {
            first: resolution.pixels(),
            second: second_plane_offset(pixelformat, resolution),
        }
    }
}

/// Closed-form second-plane offset for the supported YUV families.
///
/// Returns `None` for formats outside the 4:2:2/4:2:0 families.
///
/// # Example
/// ```rust
/// use tvin_core::prelude::{pixfmt, second_plane_offset, Resolution};
///
/// let res = Resolution::new(720, 480).unwrap();
/// assert_eq!(second_plane_offset(pixfmt::YUV420, res), Some(432_000));
/// assert_eq!(second_plane_offset(pixfmt::NV12, res), Some(345_600));
/// ```
pub fn second_plane_offset(pixelformat: FourCc, resolution: Resolution) -> Option<usize> {
    let pixels = resolution.pixels();
    match &pixelformat.bytes() {
        // Planar and packed 4:2:2: full-size luma plus two half-width chroma planes.
        b"422P" | b"YUYV" | b"YVYU" | b"UYVY" | b"VYUY" => Some(pixels * 3 / 2),
        // Planar 4:2:0: quarter-size chroma planes.
        b"YU12" => Some(pixels * 5 / 4),
        // Semi-planar: one interleaved chroma plane starting right after luma.
        b"NV16" | b"NV12" | b"HM12" => Some(pixels),
        _ => None,
    }
}

/// Capture format negotiated with the driver.
///
/// Built from the driver's geometry read-back, never from caller intent,
/// and immutable afterwards.
///
/// # Example
/// ```rust
/// use tvin_core::prelude::{pixfmt, CaptureFormat, Resolution};
///
/// let format = CaptureFormat::from_geometry(
///     Resolution::new(720, 480).unwrap(),
///     pixfmt::YUV420,
/// );
/// assert_eq!(format.planes.second, Some(432_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureFormat {
    /// Frame resolution reported by the driver.
    pub resolution: Resolution,
    /// Pixel layout reported by the driver.
    pub pixelformat: FourCc,
    /// Derived chroma plane offsets.
    pub planes: PlaneOffsets,
}

impl CaptureFormat {
    /// Build a format from driver-reported geometry, deriving plane offsets.
    pub fn from_geometry(resolution: Resolution, pixelformat: FourCc) -> Self {
        Self {
            resolution,
            pixelformat,
            planes: PlaneOffsets::derive(pixelformat, resolution),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.resolution.width.get()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.resolution.height.get()
    }
}
