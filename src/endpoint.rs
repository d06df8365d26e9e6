//! Device Endpoint: a uniform handle over one kernel video node, covering
//! format, buffer-pool, streaming, UVC event, and camera-control operations.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::control_mapping::{self, ControlMapping};
use crate::error::{BridgeError, Result};
use crate::sys;

/// Which side of the bridge an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The real camera, opened for capture.
    Capture,
    /// The UVC gadget function, opened for output.
    UvcOutput,
}

impl Role {
    const fn buf_type(self) -> sys::BufType {
        match self {
            Self::Capture => sys::BufType::Capture,
            Self::UvcOutput => sys::BufType::Output,
        }
    }

    const fn required_cap(self) -> u32 {
        match self {
            Self::Capture => sys::CAP_VIDEO_CAPTURE,
            Self::UvcOutput => sys::CAP_VIDEO_OUTPUT,
        }
    }

    /// The buffer memory model this role's pool is always requested with:
    /// MMAP on the capture side, USERPTR on the gadget side (borrowing the
    /// capture side's mapped regions for exactly one queue/dequeue round
    /// trip).
    const fn memory(self) -> sys::BufferMemory {
        match self {
            Self::Capture => sys::BufferMemory::Mmap,
            Self::UvcOutput => sys::BufferMemory::UserPtr,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::UvcOutput => "uvc-output",
        }
    }
}

const MIN_BUFFERS: u32 = 2;

/// A uniform handle over a V4L2 or UVC-gadget video node.
pub struct DeviceEndpoint {
    path: PathBuf,
    role: Role,
    raw: sys::RawDevice,
    /// Safe `v4l` handle used only for camera-control get/set on the
    /// capture endpoint; the gadget side has no V4L2 control interface.
    ctrl_device: Option<v4l::Device>,
    is_streaming: bool,
    buffers: Vec<sys::Buffer>,
    qbuf_count: u64,
    dqbuf_count: u64,
}

impl DeviceEndpoint {
    /// Open `path` for `role`, verifying capability bits.
    pub fn open(path: &Path, role: Role) -> Result<Self> {
        let raw = sys::RawDevice::open(path).map_err(|source| BridgeError::DeviceOpen {
            path: path.display().to_string(),
            source,
        })?;
        let (driver, bits) = raw.capabilities().map_err(|source| BridgeError::DeviceOpen {
            path: path.display().to_string(),
            source,
        })?;
        if bits & role.required_cap() == 0 || bits & sys::CAP_STREAMING == 0 {
            return Err(BridgeError::WrongCapability {
                path: path.display().to_string(),
                role: role.label(),
            });
        }
        log::info!("opened {} ({driver}) as {}", path.display(), role.label());

        if role == Role::UvcOutput {
            raw.subscribe_uvc_events()
                .map_err(|source| BridgeError::DeviceOpen {
                    path: path.display().to_string(),
                    source,
                })?;
        }

        let ctrl_device = if role == Role::Capture {
            match v4l::Device::with_path(path) {
                Ok(dev) => Some(dev),
                Err(err) => {
                    log::warn!("{}: control enumeration unavailable: {err}", path.display());
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            role,
            raw,
            ctrl_device,
            is_streaming: false,
            buffers: Vec::new(),
            qbuf_count: 0,
            dqbuf_count: 0,
        })
    }

    /// Which role this endpoint was opened with.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether this endpoint is currently streaming.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Outstanding buffers: enqueued but not yet reaped.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.qbuf_count - self.dqbuf_count
    }

    /// Current pixel format.
    pub fn format(&self) -> Result<sys::PixFormat> {
        self.raw.get_format(self.role.buf_type()).map_err(Into::into)
    }

    /// Set the pixel format. Only legal while not streaming.
    pub fn set_format(&mut self, fourcc: [u8; 4], width: u32, height: u32) -> Result<sys::PixFormat> {
        if self.is_streaming {
            return Err(BridgeError::Protocol(crate::error::RequestErrorCode::InvalidRequest));
        }
        let bytesperline = if &fourcc == b"YUYV" { width * 2 } else { 0 };
        let sizeimage = if &fourcc == b"YUYV" { width * height * 2 } else { width * height };
        let requested = sys::PixFormat {
            width,
            height,
            fourcc,
            bytesperline,
            sizeimage,
        };
        self.raw
            .set_format(self.role.buf_type(), &requested)
            .map_err(Into::into)
    }

    /// Request `count` buffers (`0` releases the pool) and map them if MMAP.
    pub fn request_buffers(&mut self, count: u32, memory: sys::BufferMemory) -> Result<()> {
        if count != 0 && count < MIN_BUFFERS {
            return Err(BridgeError::BadArgument(format!(
                "buffer count {count} below minimum {MIN_BUFFERS}"
            )));
        }
        let granted = self.raw.request_buffers(self.role.buf_type(), memory, count)?;
        self.buffers = if count == 0 {
            Vec::new()
        } else {
            self.raw.map_buffers(self.role.buf_type(), granted)?
        };
        self.qbuf_count = 0;
        self.dqbuf_count = 0;
        Ok(())
    }

    /// Mapped buffer start addresses and lengths, in index order (MMAP pools
    /// only).
    #[must_use]
    pub fn mapped_regions(&self) -> Vec<(u32, *mut u8, u32)> {
        self.buffers.iter().map(|b| (b.index, b.start, b.length)).collect()
    }

    /// Enqueue buffer `index` from this endpoint's own MMAP pool.
    pub fn queue_mmap(&mut self, index: u32, bytes_used: u32) -> Result<()> {
        self.raw.queue_mmap(self.role.buf_type(), index, bytes_used)?;
        self.qbuf_count += 1;
        Ok(())
    }

    /// Enqueue a region borrowed from the peer endpoint as a USERPTR buffer.
    pub fn queue_userptr(&mut self, index: u32, addr: *mut u8, length: u32, bytes_used: u32) -> Result<()> {
        self.raw
            .queue_userptr(self.role.buf_type(), index, addr, length, bytes_used)?;
        self.qbuf_count += 1;
        Ok(())
    }

    /// Non-blocking dequeue.
    pub fn dequeue(&mut self) -> Result<Option<sys::Buffer>> {
        let buf = self.raw.dequeue(self.role.buf_type())?;
        if buf.is_some() {
            self.dqbuf_count += 1;
        }
        Ok(buf)
    }

    /// Start or stop streaming. Stopping an already-stopped endpoint is a
    /// no-op.
    pub fn set_streaming(&mut self, on: bool) -> Result<()> {
        if !on && !self.is_streaming {
            return Ok(());
        }
        self.raw.set_streaming(self.role.buf_type(), on)?;
        self.is_streaming = on;
        Ok(())
    }

    /// Dequeue the next pending UVC gadget event, if any (UVC endpoint only).
    pub fn dequeue_uvc_event(&self) -> Result<Option<sys::UvcEvent>> {
        self.raw.dequeue_uvc_event().map_err(Into::into)
    }

    /// Reply to the in-flight SETUP (UVC endpoint only).
    pub fn send_response(&self, response: &sys::UvcRequestData) -> Result<()> {
        self.raw.send_response(response).map_err(Into::into)
    }

    /// Populate the UVC-domain side of `catalog` from this endpoint's V4L2
    /// controls (capture endpoint only). Processing Unit rows are gated on
    /// the corrected user-control class filter; Input Terminal rows address
    /// camera-class controls and are not subject to it.
    pub fn enumerate_controls(&self, catalog: &mut [ControlMapping]) {
        for row in catalog.iter_mut() {
            if row.interface == control_mapping::UvcInterface::ProcessingUnit
                && !control_mapping::is_user_class(row.v4l2_id)
            {
                row.enabled = false;
                continue;
            }
            let Some((min, max, step, default, current)) = self.query_control(row.v4l2_id) else {
                row.enabled = false;
                continue;
            };
            row.enabled = true;
            row.v4l2_min = min;
            row.v4l2_max = max;
            row.v4l2_step = step;
            row.v4l2_default = default;
            row.value = row.to_uvc(current);
        }
    }

    /// Apply a UVC-domain control write to the V4L2 device, inverting the
    /// linear mapping and clamping. Mirrors to the paired control when set.
    pub fn apply_camera_control(&self, row: &ControlMapping) -> Result<()> {
        if !row.enabled {
            log::debug!("ignoring write to disabled control {}", row.name);
            return Ok(());
        }
        let v4l2_value = row.to_v4l2(row.value);
        self.write_control(row.v4l2_id, v4l2_value)?;
        if let Some(mirror_id) = row.mirror_v4l2_id {
            self.write_control(mirror_id, v4l2_value)?;
        }
        Ok(())
    }

    // Grounded on the `v4l` crate's control query/set surface
    // (`Device::query_controls`, `Device::control`, `Device::set_control`);
    // kept behind this narrow seam so the rest of the endpoint never touches
    // `v4l::control` types directly.
    fn query_control(&self, id: u32) -> Option<(i64, i64, i64, i64, i64)> {
        let device = self.ctrl_device.as_ref()?;
        let desc = device
            .query_controls()
            .ok()?
            .into_iter()
            .find(|d| d.id == id)?;
        let current = match device.control(id) {
            Ok(ctrl) => control_value_as_i64(&ctrl.value),
            Err(_) => desc.default,
        };
        Some((desc.minimum, desc.maximum, desc.step, desc.default, current))
    }

    fn write_control(&self, id: u32, value: i64) -> Result<()> {
        let Some(device) = self.ctrl_device.as_ref() else {
            return Ok(());
        };
        #[allow(clippy::cast_possible_truncation)]
        let ctrl = v4l::control::Control {
            id,
            value: v4l::control::Value::Integer(value),
        };
        device.set_control(ctrl).map_err(Into::into)
    }

    /// Release the buffer pool and stop streaming, in that order.
    pub fn close(&mut self) -> Result<()> {
        self.set_streaming(false)?;
        self.request_buffers(0, self.role.memory())
    }

    /// Path this endpoint was opened from, for logging.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file descriptor, for the readiness wait.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.raw.as_raw_fd()
    }

    /// Disable the default catalog's entries that `id` is not the class of.
    #[must_use]
    pub fn default_catalog() -> Vec<ControlMapping> {
        control_mapping::default_catalog()
    }
}

fn control_value_as_i64(value: &v4l::control::Value) -> i64 {
    match value {
        v4l::control::Value::Integer(v) => *v,
        v4l::control::Value::Boolean(v) => i64::from(*v),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_maps_to_expected_capability_bit() {
        assert_eq!(Role::Capture.required_cap(), sys::CAP_VIDEO_CAPTURE);
        assert_eq!(Role::UvcOutput.required_cap(), sys::CAP_VIDEO_OUTPUT);
    }
}
