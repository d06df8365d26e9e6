#![allow(non_camel_case_types)]
//! The UVC-gadget kernel extensions layered on top of `VIDIOC_DQEVENT`:
//! `UVC_EVENT_*` event kinds and `UVCIOC_SEND_RESPONSE`, mirroring
//! `<linux/usb/g_uvc.h>`.

use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;

use nix::request_code_write;

use super::v4l2::RawDevice;

const V4L2_EVENT_PRIVATE_START: u32 = 0x0800_0000;

const UVC_EVENT_CONNECT: u32 = V4L2_EVENT_PRIVATE_START;
const UVC_EVENT_DISCONNECT: u32 = V4L2_EVENT_PRIVATE_START + 1;
const UVC_EVENT_STREAMON: u32 = V4L2_EVENT_PRIVATE_START + 2;
const UVC_EVENT_STREAMOFF: u32 = V4L2_EVENT_PRIVATE_START + 3;
const UVC_EVENT_SETUP: u32 = V4L2_EVENT_PRIVATE_START + 4;
const UVC_EVENT_DATA: u32 = V4L2_EVENT_PRIVATE_START + 5;

/// `struct usb_ctrlrequest`, copied verbatim off the wire.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct UsbCtrlRequest {
    /// `bmRequestType`.
    pub request_type: u8,
    /// `bRequest`.
    pub request: u8,
    /// `wValue`, little-endian.
    pub value: u16,
    /// `wIndex`, little-endian.
    pub index: u16,
    /// `wLength`, little-endian.
    pub length: u16,
}

/// `struct uvc_request_data`: the payload carried by a `UVC_EVENT_DATA`
/// event, and the shape of a `UVCIOC_SEND_RESPONSE` reply.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct UvcRequestData {
    /// Negative for a protocol STALL, otherwise the number of valid bytes in
    /// `data`.
    pub length: i32,
    /// Payload bytes.
    pub data: [u8; 60],
}

impl UvcRequestData {
    /// An empty, non-stalling response of the given length.
    #[must_use]
    pub const fn with_length(length: i32) -> Self {
        Self {
            length,
            data: [0; 60],
        }
    }

    /// Build a response carrying `bytes`, which must fit in 60 bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; 60];
        let n = bytes.len().min(60);
        data[..n].copy_from_slice(&bytes[..n]);
        Self {
            length: n as i32,
            data,
        }
    }

    /// The valid prefix of `data`, or an empty slice if `length` is negative.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        if self.length <= 0 {
            &[]
        } else {
            &self.data[..(self.length as usize).min(60)]
        }
    }
}

impl std::fmt::Debug for UvcRequestData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UvcRequestData")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// A decoded UVC-gadget event.
#[derive(Debug)]
pub enum UvcEventKind {
    /// The gadget has been enumerated by a host.
    Connect,
    /// The host has gone away.
    Disconnect,
    /// The host started the streaming interface's active alternate setting.
    StreamOn,
    /// The host stopped the streaming interface.
    StreamOff,
    /// A class-specific control-plane SETUP packet.
    Setup(UsbCtrlRequest),
    /// The data stage following a `SET_CUR` SETUP.
    Data(UvcRequestData),
}

/// Wrapper kept for symmetry with `v4l2::Buffer`; callers match on `.kind`.
#[derive(Debug)]
pub struct UvcEvent {
    /// The decoded event payload.
    pub kind: UvcEventKind,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(super) struct RawEvent {
    typ: u32,
    u: [u8; 64],
    pending: u32,
    sequence: u32,
    timestamp: libc::timespec,
    id: u32,
    reserved: [u32; 8],
}

const UVCIOC_SEND_RESPONSE: nix::sys::ioctl::ioctl_num_type =
    request_code_write!(b'U', 1, mem::size_of::<UvcRequestData>());

impl RawDevice {
    /// Subscribe to every UVC gadget event kind this bridge understands.
    pub fn subscribe_uvc_events(&self) -> io::Result<()> {
        for ev in [
            UVC_EVENT_CONNECT,
            UVC_EVENT_DISCONNECT,
            UVC_EVENT_STREAMON,
            UVC_EVENT_STREAMOFF,
            UVC_EVENT_SETUP,
            UVC_EVENT_DATA,
        ] {
            self.subscribe_event(ev)?;
        }
        Ok(())
    }

    /// Dequeue and decode the next pending UVC event, if any.
    pub fn dequeue_uvc_event(&self) -> io::Result<Option<UvcEvent>> {
        let Some(raw) = self.dequeue_event_raw()? else {
            return Ok(None);
        };
        let kind = match raw.typ {
            UVC_EVENT_CONNECT => UvcEventKind::Connect,
            UVC_EVENT_DISCONNECT => UvcEventKind::Disconnect,
            UVC_EVENT_STREAMON => UvcEventKind::StreamOn,
            UVC_EVENT_STREAMOFF => UvcEventKind::StreamOff,
            UVC_EVENT_SETUP => {
                let req = unsafe { std::ptr::read_unaligned(raw.u.as_ptr().cast::<UsbCtrlRequest>()) };
                UvcEventKind::Setup(req)
            }
            UVC_EVENT_DATA => {
                let data = unsafe { std::ptr::read_unaligned(raw.u.as_ptr().cast::<UvcRequestData>()) };
                UvcEventKind::Data(data)
            }
            other => {
                log::debug!("ignoring unrecognized UVC event type {other:#x}");
                return Ok(None);
            }
        };
        Ok(Some(UvcEvent { kind }))
    }

    /// Reply to the SETUP currently being handled.
    pub fn send_response(&self, response: &UvcRequestData) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(self.as_raw_fd(), UVCIOC_SEND_RESPONSE as _, response) };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_data_round_trips_short_payload() {
        let data = UvcRequestData::from_bytes(&[1, 2, 3, 4]);
        assert_eq!(data.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn negative_length_is_a_stall_with_no_bytes() {
        let data = UvcRequestData::with_length(-1);
        assert!(data.as_slice().is_empty());
    }
}
