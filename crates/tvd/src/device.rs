use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use tracing::debug;
use tvin_core::prelude::{CaptureParams, FourCc};

use crate::mapping::FrameMapping;
use crate::sys;

/// Length and device offset of one driver-allocated buffer, as reported by
/// `VIDIOC_QUERYBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer length in bytes.
    pub length: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
}

/// Device identity and capability bits from `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone)]
pub struct Capability {
    /// Kernel driver name.
    pub driver: String,
    /// Device card name.
    pub card: String,
    /// Raw capability flags.
    pub capabilities: u32,
}

impl Capability {
    /// Whether the device supports the streaming (mmap) I/O method.
    pub fn streaming(&self) -> bool {
        self.capabilities & sys::V4L2_CAP_STREAMING != 0
    }

    /// Whether the device is a video capture endpoint.
    pub fn video_capture(&self) -> bool {
        self.capabilities & sys::V4L2_CAP_VIDEO_CAPTURE != 0
    }
}

/// The ioctl surface the capture layer is written against.
///
/// `TvdDevice` is the production implementation; tests drive the same
/// capture code with a deterministic synthetic driver.
pub trait CaptureIo {
    /// `VIDIOC_QUERYCAP`.
    fn query_capability(&mut self) -> io::Result<Capability>;

    /// Vendor-private `VIDIOC_S_FMT` selecting interface/system/channels.
    ///
    /// Must run before [`CaptureIo::query_capture_geometry`]; querying
    /// first yields the driver's default, likely-wrong geometry.
    fn set_capture_parameters(&mut self, params: &CaptureParams) -> io::Result<()>;

    /// `VIDIOC_G_FMT`: the (width, height, pixelformat) the driver settled on.
    fn query_capture_geometry(&mut self) -> io::Result<(u32, u32, FourCc)>;

    /// `VIDIOC_REQBUFS`: ask for `count` mmap buffers; returns the granted
    /// count, which may be lower when contiguous memory is scarce.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF` for one buffer index.
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    /// Map a queried buffer into process memory.
    fn map_buffer(&mut self, info: BufferInfo) -> io::Result<FrameMapping>;

    /// `VIDIOC_QBUF`: hand a buffer to the driver's incoming queue.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// `VIDIOC_DQBUF`: block until a filled buffer is available and return
    /// its index.
    fn dequeue_buffer(&mut self) -> io::Result<u32>;

    /// `VIDIOC_STREAMON` for the capture buffer type.
    fn stream_on(&mut self) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF` for the capture buffer type.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Close the device. Idempotent.
    fn close(&mut self);
}

/// Open handle to a TVD capture device node.
///
/// The descriptor is owned; dropping the handle closes it, and `close` may
/// be called any number of times.
///
/// # Example
/// ```rust,ignore
/// use tvin_tvd::prelude::*;
///
/// let mut dev = TvdDevice::open("/dev/video1")?;
/// let caps = dev.query_capability()?;
/// assert!(caps.streaming());
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct TvdDevice {
    fd: Option<OwnedFd>,
    path: PathBuf,
}

impl TvdDevice {
    /// Open the device read/write.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(path = %path.display(), "opened capture device");
        Ok(Self {
            fd: Some(file.into()),
            path,
        })
    }

    /// Whether the descriptor is still open.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Device node path this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw_fd(&self) -> io::Result<RawFd> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device is closed"))
    }
}

fn xioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    // SAFETY: every request code in `sys` is declared against the struct
    // type it is called with, so the kernel reads/writes inside `arg`.
    let ret = unsafe { libc::ioctl(fd, request, arg as *mut T) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn fixed_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl CaptureIo for TvdDevice {
    fn query_capability(&mut self) -> io::Result<Capability> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut cap: sys::v4l2_capability = unsafe { mem::zeroed() };
        xioctl(fd, sys::VIDIOC_QUERYCAP, &mut cap)?;
        Ok(Capability {
            driver: fixed_cstr(&cap.driver),
            card: fixed_cstr(&cap.card),
            capabilities: cap.capabilities,
        })
    }

    fn set_capture_parameters(&mut self, params: &CaptureParams) -> io::Result<()> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut fmt: sys::v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = sys::V4L2_BUF_TYPE_PRIVATE;
        // SAFETY: the private buffer type selects the raw byte view of the
        // format union; the offsets are the TVD driver's payload layout.
        unsafe {
            let raw = &mut fmt.fmt.raw_data;
            raw[0] = params.interface;
            raw[1] = params.system.selector();
            raw[8] = params.row_count;
            raw[9] = params.col_count;
            raw[10..14].copy_from_slice(&params.channels);
        }
        xioctl(fd, sys::VIDIOC_S_FMT, &mut fmt)
    }

    fn query_capture_geometry(&mut self) -> io::Result<(u32, u32, FourCc)> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut fmt: sys::v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        xioctl(fd, sys::VIDIOC_G_FMT, &mut fmt)?;
        // SAFETY: for the capture buffer type the kernel filled the pix view.
        let pix = unsafe { fmt.fmt.pix };
        Ok((pix.width, pix.height, FourCc::from_u32(pix.pixelformat)))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut req: sys::v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        req.memory = sys::V4L2_MEMORY_MMAP;
        xioctl(fd, sys::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut buf: sys::v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        buf.index = index;
        xioctl(fd, sys::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            length: buf.length,
            // SAFETY: mmap-memory buffers report their offset in this view.
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&mut self, info: BufferInfo) -> io::Result<FrameMapping> {
        let fd = self.raw_fd()?;
        FrameMapping::map_device(fd, info.length as usize, info.offset)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut buf: sys::v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        buf.index = index;
        xioctl(fd, sys::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<u32> {
        let fd = self.raw_fd()?;
        // SAFETY: zeroed is a valid initial state for this plain-data struct.
        let mut buf: sys::v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        xioctl(fd, sys::VIDIOC_DQBUF, &mut buf)?;
        Ok(buf.index)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let fd = self.raw_fd()?;
        let mut kind = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(fd, sys::VIDIOC_STREAMON, &mut kind)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let fd = self.raw_fd()?;
        let mut kind = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(fd, sys::VIDIOC_STREAMOFF, &mut kind)
    }

    fn close(&mut self) {
        if self.fd.take().is_some() {
            debug!(path = %self.path.display(), "closed capture device");
        }
    }
}
