#![allow(non_camel_case_types)]
//! Minimal raw V4L2 ioctl surface: buffer pool request/map/queue/dequeue and
//! stream on/off, plus the event-subscription ioctls shared with the UVC
//! gadget extensions in [`super::uvc`].

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::ptr;

use nix::{request_code_read, request_code_readwrite, request_code_write};

use super::uvc::RawEvent;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Direction a video node is being used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufType {
    /// The capture-side (real camera) direction.
    Capture,
    /// The UVC gadget output direction.
    Output,
}

impl BufType {
    const fn raw(self) -> u32 {
        match self {
            Self::Capture => 1, // V4L2_BUF_TYPE_VIDEO_CAPTURE
            Self::Output => 2,  // V4L2_BUF_TYPE_VIDEO_OUTPUT
        }
    }
}

/// Kernel buffer memory model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMemory {
    /// Kernel-allocated, mapped into this process.
    Mmap,
    /// Caller-supplied pointer, valid for one queue/dequeue round trip.
    UserPtr,
}

impl BufferMemory {
    const fn raw(self) -> u32 {
        match self {
            Self::Mmap => 1,
            Self::UserPtr => 2,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_requestbuffers {
    count: u32,
    typ: u32,
    memory: u32,
    reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
union v4l2_buffer_m {
    offset: u32,
    userptr: libc::c_ulong,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_timeval {
    tv_sec: libc::c_long,
    tv_usec: libc::c_long,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_timecode {
    typ: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

const V4L2_BUF_FLAG_ERROR: u32 = 0x0040;

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_buffer_raw {
    index: u32,
    typ: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: v4l2_timeval,
    timecode: v4l2_timecode,
    sequence: u32,
    memory: u32,
    m: v4l2_buffer_m,
    length: u32,
    reserved2: u32,
    reserved: u32,
}

#[repr(C)]
struct v4l2_event_subscription {
    typ: u32,
    id: u32,
    flags: u32,
    reserved: [u32; 5],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_pix_format {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    private: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[repr(C)]
union v4l2_format_fmt {
    pix: v4l2_pix_format,
    raw: [u8; 200],
}

#[repr(C)]
struct v4l2_format_raw {
    typ: u32,
    fmt: v4l2_format_fmt,
}

#[repr(C)]
struct v4l2_capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

/// Capability bit for capture devices (`V4L2_CAP_VIDEO_CAPTURE`).
pub const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
/// Capability bit for output devices (`V4L2_CAP_VIDEO_OUTPUT`).
pub const CAP_VIDEO_OUTPUT: u32 = 0x0000_0002;
/// Capability bit for streaming I/O (`V4L2_CAP_STREAMING`).
pub const CAP_STREAMING: u32 = 0x0400_0000;

/// A pixel format: FourCC plus geometry, independent of buffer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// FourCC packed little-endian, e.g. `b"YUYV"`/`b"MJPG"`.
    pub fourcc: [u8; 4],
    /// Stride in bytes.
    pub bytesperline: u32,
    /// Total image size in bytes.
    pub sizeimage: u32,
}

fn fourcc_to_u32(fourcc: [u8; 4]) -> u32 {
    u32::from_le_bytes(fourcc)
}

fn fourcc_from_u32(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

const VIDIOC_QUERYCAP: nix::sys::ioctl::ioctl_num_type =
    request_code_read!(b'V', 0, mem::size_of::<v4l2_capability>());
const VIDIOC_G_FMT: nix::sys::ioctl::ioctl_num_type =
    request_code_readwrite!(b'V', 4, mem::size_of::<v4l2_format_raw>());
const VIDIOC_S_FMT: nix::sys::ioctl::ioctl_num_type =
    request_code_readwrite!(b'V', 5, mem::size_of::<v4l2_format_raw>());

const VIDIOC_REQBUFS: nix::sys::ioctl::ioctl_num_type =
    request_code_readwrite!(b'V', 8, mem::size_of::<v4l2_requestbuffers>());
const VIDIOC_QUERYBUF: nix::sys::ioctl::ioctl_num_type =
    request_code_readwrite!(b'V', 9, mem::size_of::<v4l2_buffer_raw>());
const VIDIOC_QBUF: nix::sys::ioctl::ioctl_num_type =
    request_code_readwrite!(b'V', 15, mem::size_of::<v4l2_buffer_raw>());
const VIDIOC_DQBUF: nix::sys::ioctl::ioctl_num_type =
    request_code_readwrite!(b'V', 17, mem::size_of::<v4l2_buffer_raw>());
const VIDIOC_STREAMON: nix::sys::ioctl::ioctl_num_type =
    request_code_write!(b'V', 18, mem::size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: nix::sys::ioctl::ioctl_num_type =
    request_code_write!(b'V', 19, mem::size_of::<libc::c_int>());
const VIDIOC_SUBSCRIBE_EVENT: nix::sys::ioctl::ioctl_num_type =
    request_code_write!(b'V', 90, mem::size_of::<v4l2_event_subscription>());
const VIDIOC_DQEVENT: nix::sys::ioctl::ioctl_num_type =
    request_code_read!(b'V', 89, mem::size_of::<RawEvent>());

/// One buffer slot: either a kernel-mapped region (MMAP) or a borrowed
/// pointer handed to the kernel for exactly one queue (USERPTR).
#[derive(Debug)]
pub struct Buffer {
    /// Index within the pool.
    pub index: u32,
    /// Start address, valid for MMAP buffers for the pool's lifetime and for
    /// USERPTR buffers for the duration of a single queue call.
    pub start: *mut u8,
    /// Capacity in bytes.
    pub length: u32,
    /// Bytes actually populated (meaningful on dequeue, or set before queue).
    pub bytes_used: u32,
    /// Whether the kernel flagged this buffer as errored on dequeue.
    pub error: bool,
}

// Buffers are only ever touched from the single-threaded bridge loop.
unsafe impl Send for Buffer {}

/// A raw V4L2 node, opened non-blocking read-write.
pub struct RawDevice {
    fd: std::fs::File,
    memory: BufferMemory,
    mmap_regions: Vec<(*mut libc::c_void, usize)>,
}

impl RawDevice {
    /// Open `path` non-blocking, read-write.
    pub fn open(path: &Path) -> io::Result<Self> {
        let cstr = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let raw_fd = cvt(unsafe { libc::open(cstr.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) })?;
        let fd = unsafe { <std::fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(raw_fd) };
        Ok(Self {
            fd,
            memory: BufferMemory::Mmap,
            mmap_regions: Vec::new(),
        })
    }

    /// Request `count` buffers for `buf_type` using `memory`. `count == 0`
    /// releases a previously requested pool (and unmaps any MMAP regions).
    pub fn request_buffers(
        &mut self,
        buf_type: BufType,
        memory: BufferMemory,
        count: u32,
    ) -> io::Result<u32> {
        self.unmap_all();
        let mut req = v4l2_requestbuffers {
            count,
            typ: buf_type.raw(),
            memory: memory.raw(),
            reserved: [0; 2],
        };
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_REQBUFS as _, &mut req) })?;
        self.memory = memory;
        Ok(req.count)
    }

    /// Query and, for MMAP pools, map every buffer in `[0, count)`.
    pub fn map_buffers(&mut self, buf_type: BufType, count: u32) -> io::Result<Vec<Buffer>> {
        let mut out = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut raw = unsafe { mem::zeroed::<v4l2_buffer_raw>() };
            raw.index = index;
            raw.typ = buf_type.raw();
            raw.memory = self.memory.raw();
            cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_QUERYBUF as _, &mut raw) })?;

            let (start, length) = if self.memory == BufferMemory::Mmap {
                let len = raw.length as usize;
                let offset = unsafe { raw.m.offset } as libc::off_t;
                let ptr = unsafe {
                    libc::mmap(
                        ptr::null_mut(),
                        len,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_SHARED,
                        self.as_raw_fd(),
                        offset,
                    )
                };
                if ptr == libc::MAP_FAILED {
                    return Err(io::Error::last_os_error());
                }
                self.mmap_regions.push((ptr, len));
                (ptr.cast::<u8>(), raw.length)
            } else {
                (ptr::null_mut(), raw.length)
            };

            out.push(Buffer {
                index,
                start,
                length,
                bytes_used: 0,
                error: false,
            });
        }
        Ok(out)
    }

    /// Enqueue a buffer by index (MMAP) with `bytes_used` set for output
    /// roles; the kernel fills it in for capture roles.
    pub fn queue_mmap(&self, buf_type: BufType, index: u32, bytes_used: u32) -> io::Result<()> {
        let mut raw = unsafe { mem::zeroed::<v4l2_buffer_raw>() };
        raw.index = index;
        raw.typ = buf_type.raw();
        raw.memory = BufferMemory::Mmap.raw();
        raw.bytesused = bytes_used;
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_QBUF as _, &mut raw) }).map(|_| ())
    }

    /// Enqueue a borrowed region as a USERPTR buffer.
    pub fn queue_userptr(
        &self,
        buf_type: BufType,
        index: u32,
        addr: *mut u8,
        length: u32,
        bytes_used: u32,
    ) -> io::Result<()> {
        let mut raw = unsafe { mem::zeroed::<v4l2_buffer_raw>() };
        raw.index = index;
        raw.typ = buf_type.raw();
        raw.memory = BufferMemory::UserPtr.raw();
        raw.m.userptr = addr as libc::c_ulong;
        raw.length = length;
        raw.bytesused = bytes_used;
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_QBUF as _, &mut raw) }).map(|_| ())
    }

    /// Non-blocking dequeue. `Ok(None)` on `EAGAIN`.
    pub fn dequeue(&self, buf_type: BufType) -> io::Result<Option<Buffer>> {
        let mut raw = unsafe { mem::zeroed::<v4l2_buffer_raw>() };
        raw.typ = buf_type.raw();
        raw.memory = self.memory.raw();
        match cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_DQBUF as _, &mut raw) }) {
            Ok(_) => Ok(Some(Buffer {
                index: raw.index,
                start: ptr::null_mut(),
                length: raw.length,
                bytes_used: raw.bytesused,
                error: raw.flags & V4L2_BUF_FLAG_ERROR != 0,
            })),
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Start or stop streaming for `buf_type`.
    pub fn set_streaming(&self, buf_type: BufType, on: bool) -> io::Result<()> {
        let typ = buf_type.raw() as libc::c_int;
        let req = if on { VIDIOC_STREAMON } else { VIDIOC_STREAMOFF };
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), req as _, &typ) }).map(|_| ())
    }

    /// Subscribe to a raw V4L2/UVC event type.
    pub fn subscribe_event(&self, event_type: u32) -> io::Result<()> {
        let sub = v4l2_event_subscription {
            typ: event_type,
            id: 0,
            flags: 0,
            reserved: [0; 5],
        };
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_SUBSCRIBE_EVENT as _, &sub) })
            .map(|_| ())
    }

    /// Non-blocking dequeue of a pending event.
    pub(super) fn dequeue_event_raw(&self) -> io::Result<Option<RawEvent>> {
        let mut raw = unsafe { mem::zeroed::<RawEvent>() };
        match cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_DQEVENT as _, &mut raw) }) {
            Ok(_) => Ok(Some(raw)),
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Query device capability bits.
    pub fn capabilities(&self) -> io::Result<(String, u32)> {
        let mut caps = unsafe { mem::zeroed::<v4l2_capability>() };
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_QUERYCAP as _, &mut caps) })?;
        let driver = String::from_utf8_lossy(&caps.driver)
            .trim_end_matches('\0')
            .to_owned();
        let bits = if caps.device_caps != 0 {
            caps.device_caps
        } else {
            caps.capabilities
        };
        Ok((driver, bits))
    }

    /// Read the current pixel format for `buf_type`.
    pub fn get_format(&self, buf_type: BufType) -> io::Result<PixFormat> {
        let mut raw = unsafe { mem::zeroed::<v4l2_format_raw>() };
        raw.typ = buf_type.raw();
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_G_FMT as _, &mut raw) })?;
        let pix = unsafe { raw.fmt.pix };
        Ok(PixFormat {
            width: pix.width,
            height: pix.height,
            fourcc: fourcc_from_u32(pix.pixelformat),
            bytesperline: pix.bytesperline,
            sizeimage: pix.sizeimage,
        })
    }

    /// Request a pixel format for `buf_type`; returns what the driver
    /// actually accepted.
    pub fn set_format(&self, buf_type: BufType, format: &PixFormat) -> io::Result<PixFormat> {
        let pix = v4l2_pix_format {
            width: format.width,
            height: format.height,
            pixelformat: fourcc_to_u32(format.fourcc),
            field: 1, // V4L2_FIELD_NONE
            bytesperline: format.bytesperline,
            sizeimage: format.sizeimage,
            colorspace: 8, // V4L2_COLORSPACE_SRGB
            private: 0,
            flags: 0,
            ycbcr_enc: 0,
            quantization: 0,
            xfer_func: 0,
        };
        let mut raw = v4l2_format_raw {
            typ: buf_type.raw(),
            fmt: v4l2_format_fmt { pix },
        };
        cvt(unsafe { libc::ioctl(self.as_raw_fd(), VIDIOC_S_FMT as _, &mut raw) })?;
        let pix = unsafe { raw.fmt.pix };
        Ok(PixFormat {
            width: pix.width,
            height: pix.height,
            fourcc: fourcc_from_u32(pix.pixelformat),
            bytesperline: pix.bytesperline,
            sizeimage: pix.sizeimage,
        })
    }

    fn unmap_all(&mut self) {
        for (ptr, len) in self.mmap_regions.drain(..) {
            unsafe {
                let _ = libc::munmap(ptr, len);
            }
        }
    }
}

impl AsRawFd for RawDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        self.unmap_all();
    }
}
