//! Raw ioctl bindings the safe `v4l` crate does not expose: per-index buffer
//! pool management, USERPTR queuing, and the UVC-gadget event/response
//! ioctls. Everything here mirrors `<linux/videodev2.h>` and
//! `<linux/usb/g_uvc.h>` layouts exactly; callers above this module never see
//! a raw pointer or an `unsafe` block.

mod v4l2;
mod uvc;

pub use v4l2::{
    BufType, Buffer, BufferMemory, PixFormat, RawDevice, CAP_STREAMING, CAP_VIDEO_CAPTURE,
    CAP_VIDEO_OUTPUT,
};
pub use uvc::{UvcEvent, UvcEventKind, UvcRequestData, UsbCtrlRequest};
