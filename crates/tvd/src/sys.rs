//! Raw V4L2 ABI surface consumed by the TVD driver.
//!
//! Request codes are computed with the asm-generic `_IOC` encoding from the
//! sizes of the structs below, so they come out right on both 32-bit (the
//! sunxi SoCs this driver ships on) and 64-bit targets; `v4l2_buffer` and
//! `v4l2_format` change size with the pointer width.

#![allow(non_camel_case_types)]

use libc::{c_ulong, c_void, timeval};
use std::mem::size_of;

const IOC_NRBITS: c_ulong = 8;
const IOC_TYPEBITS: c_ulong = 8;
const IOC_SIZEBITS: c_ulong = 14;

const IOC_NRSHIFT: c_ulong = 0;
const IOC_TYPESHIFT: c_ulong = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: c_ulong = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: c_ulong = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: c_ulong = 1;
const IOC_READ: c_ulong = 2;

const fn ioc(dir: c_ulong, ty: u8, nr: u8, size: usize) -> c_ulong {
    (dir << IOC_DIRSHIFT)
        | ((ty as c_ulong) << IOC_TYPESHIFT)
        | ((nr as c_ulong) << IOC_NRSHIFT)
        | ((size as c_ulong) << IOC_SIZESHIFT)
}

const fn iow<T>(ty: u8, nr: u8) -> c_ulong {
    ioc(IOC_WRITE, ty, nr, size_of::<T>())
}

const fn ior<T>(ty: u8, nr: u8) -> c_ulong {
    ioc(IOC_READ, ty, nr, size_of::<T>())
}

const fn iowr<T>(ty: u8, nr: u8) -> c_ulong {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size_of::<T>())
}

pub const VIDIOC_QUERYCAP: c_ulong = ior::<v4l2_capability>(b'V', 0);
pub const VIDIOC_G_FMT: c_ulong = iowr::<v4l2_format>(b'V', 4);
pub const VIDIOC_S_FMT: c_ulong = iowr::<v4l2_format>(b'V', 5);
pub const VIDIOC_REQBUFS: c_ulong = iowr::<v4l2_requestbuffers>(b'V', 8);
pub const VIDIOC_QUERYBUF: c_ulong = iowr::<v4l2_buffer>(b'V', 9);
pub const VIDIOC_QBUF: c_ulong = iowr::<v4l2_buffer>(b'V', 15);
pub const VIDIOC_DQBUF: c_ulong = iowr::<v4l2_buffer>(b'V', 17);
pub const VIDIOC_STREAMON: c_ulong = iow::<libc::c_int>(b'V', 18);
pub const VIDIOC_STREAMOFF: c_ulong = iow::<libc::c_int>(b'V', 19);

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
/// Driver-private buffer type; the TVD input-selection payload rides on it.
pub const V4L2_BUF_TYPE_PRIVATE: u32 = 0x80;

pub const V4L2_MEMORY_MMAP: u32 = 1;

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

/// Format payload union. Only the `pix` and `raw_data` views are used here;
/// the pointer member keeps the alignment (and therefore the struct size and
/// ioctl code) matching the kernel's, whose union contains window clip
/// pointers.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    _align: *mut c_void,
}

#[repr(C)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[repr(C)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub reserved: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn struct_sizes_match_lp64_kernel_abi() {
        assert_eq!(size_of::<v4l2_capability>(), 104);
        assert_eq!(size_of::<v4l2_format>(), 208);
        assert_eq!(size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(size_of::<v4l2_buffer>(), 88);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn request_codes_match_lp64_headers() {
        assert_eq!(VIDIOC_QUERYCAP, 0x8068_5600);
        assert_eq!(VIDIOC_G_FMT, 0xc0d0_5604);
        assert_eq!(VIDIOC_S_FMT, 0xc0d0_5605);
        assert_eq!(VIDIOC_REQBUFS, 0xc014_5608);
        assert_eq!(VIDIOC_QUERYBUF, 0xc058_5609);
        assert_eq!(VIDIOC_QBUF, 0xc058_560f);
        assert_eq!(VIDIOC_DQBUF, 0xc058_5611);
        assert_eq!(VIDIOC_STREAMON, 0x4004_5612);
        assert_eq!(VIDIOC_STREAMOFF, 0x4004_5613);
    }

    #[test]
    fn raw_data_view_overlays_pix_view() {
        // SAFETY: both views cover the head of the same union allocation.
        unsafe {
            let mut fmt: v4l2_format = std::mem::zeroed();
            fmt.fmt.raw_data[0] = 7;
            assert_eq!(fmt.fmt.pix.width.to_le_bytes()[0], 7);
        }
    }
}
