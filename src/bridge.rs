//! Bridge Event Loop: a single-threaded, cooperative pump shuttling buffers
//! between the capture endpoint and the UVC gadget endpoint, answering the
//! UVC control plane along the way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::control_mapping::{self, ControlMapping};
use crate::endpoint::DeviceEndpoint;
use crate::error::{BridgeError, Result};
use crate::inventory::Inventory;
use crate::protocol::ControlPlane;
use crate::status::StatusChannel;
use crate::sys::{self, UvcEventKind};

/// Minimum outstanding UVC buffers before a dequeue is allowed, unless the
/// loop is draining on shutdown.
const SHUTTLE_THROTTLE: u64 = 2;
const STREAMING_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything the event loop owns for one run.
pub struct Bridge {
    capture: DeviceEndpoint,
    uvc: DeviceEndpoint,
    inventory: Inventory,
    catalog: Vec<ControlMapping>,
    control_plane: ControlPlane,
    status: Box<dyn StatusChannel>,
    buffer_count: u32,
    show_fps: bool,
    shutdown_requested: bool,
    capture_regions: HashMap<u32, (*mut u8, u32)>,
    frame_count: u64,
    fps_window_start: Instant,
}

impl Bridge {
    /// Assemble a bridge from its already-open endpoints and configuration.
    #[must_use]
    pub fn new(
        capture: DeviceEndpoint,
        uvc: DeviceEndpoint,
        inventory: Inventory,
        catalog: Vec<ControlMapping>,
        status: Box<dyn StatusChannel>,
        buffer_count: u32,
        show_fps: bool,
    ) -> Self {
        let control_plane = ControlPlane::new(&inventory);
        Self {
            capture,
            uvc,
            inventory,
            catalog,
            control_plane,
            status,
            buffer_count,
            show_fps,
            shutdown_requested: false,
            capture_regions: HashMap::new(),
            frame_count: 0,
            fps_window_start: Instant::now(),
        }
    }

    /// Run until a signal, a stall, or a host disconnect ends the session.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if should_terminate() || self.shutdown_requested {
                break;
            }

            std::thread::sleep(Duration::from_millis(1));

            match self.wait_for_readiness() {
                Ok(Readiness { uvc_exceptional, uvc_writable, capture_readable }) => {
                    if uvc_exceptional {
                        self.handle_uvc_event()?;
                    }
                    if uvc_writable && self.capture.is_streaming() {
                        self.shuttle_uvc_to_capture()?;
                    }
                    if capture_readable {
                        self.shuttle_capture_to_uvc()?;
                    }
                }
                Err(WaitError::Interrupted) => continue,
                Err(WaitError::Stall) => {
                    log::warn!("readiness wait timed out while streaming; treating as a stall");
                    break;
                }
                Err(WaitError::Io(err)) => return Err(err.into()),
            }

            if self.show_fps {
                self.report_fps();
            }
        }

        self.shutdown()
    }

    fn wait_for_readiness(&self) -> std::result::Result<Readiness, WaitError> {
        use std::os::fd::BorrowedFd;

        let streaming = self.capture.is_streaming();

        // Exceptional (UVC events) and writable (buffer space) are always
        // watched on the UVC fd; readable on the capture fd only matters
        // once capture is actually streaming frames.
        let uvc_flags = PollFlags::POLLPRI | PollFlags::POLLOUT;
        // Safety: both fds outlive this call, which never escapes their
        // owning `DeviceEndpoint`s.
        let uvc_borrowed = unsafe { BorrowedFd::borrow_raw(self.uvc.as_raw_fd()) };
        let capture_borrowed = unsafe { BorrowedFd::borrow_raw(self.capture.as_raw_fd()) };

        let timeout = if streaming {
            PollTimeout::from(u16::try_from(STREAMING_POLL_TIMEOUT.as_millis()).unwrap_or(u16::MAX))
        } else {
            PollTimeout::NONE
        };

        let mut fds = vec![PollFd::new(uvc_borrowed, uvc_flags)];
        if streaming {
            fds.push(PollFd::new(capture_borrowed, PollFlags::POLLIN));
        }

        let n = match poll(&mut fds, timeout) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => return Err(WaitError::Interrupted),
            Err(err) => return Err(WaitError::Io(std::io::Error::from(err))),
        };

        if n == 0 && streaming {
            return Err(WaitError::Stall);
        }

        let uvc_revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
        let capture_revents = if streaming {
            fds[1].revents().unwrap_or_else(PollFlags::empty)
        } else {
            PollFlags::empty()
        };

        Ok(Readiness {
            uvc_exceptional: uvc_revents.contains(PollFlags::POLLPRI),
            uvc_writable: uvc_revents.contains(PollFlags::POLLOUT),
            capture_readable: capture_revents.contains(PollFlags::POLLIN),
        })
    }

    fn handle_uvc_event(&mut self) -> Result<()> {
        let Some(event) = self.uvc.dequeue_uvc_event()? else {
            return Ok(());
        };
        match event.kind {
            UvcEventKind::Connect => {}
            UvcEventKind::Disconnect => {
                log::info!("host disconnected");
                self.shutdown_requested = true;
            }
            UvcEventKind::Setup(req) => {
                let outcome = self
                    .control_plane
                    .handle_setup(&req, &self.inventory, &self.catalog);
                self.uvc.send_response(&outcome.response)?;
            }
            UvcEventKind::Data(payload) => {
                let outcome = self
                    .control_plane
                    .handle_data(&payload, &self.inventory, &mut self.catalog);
                if let Some((format_index, frame_index)) = outcome.commit_format {
                    self.apply_commit(format_index, frame_index);
                }
                if let Some((interface, selector)) = outcome.control_write {
                    if let Some(row) = control_mapping::find(&self.catalog, interface, selector) {
                        if let Err(err) = self.capture.apply_camera_control(row) {
                            log::warn!("failed to apply control write to {}: {err}", row.name);
                        }
                    }
                }
            }
            UvcEventKind::StreamOn => self.start_streaming()?,
            UvcEventKind::StreamOff => self.stop_streaming()?,
        }
        Ok(())
    }

    fn apply_commit(&mut self, format_index: u8, frame_index: u8) {
        let Some(descriptor) = self.inventory.find(format_index, frame_index) else {
            log::warn!("commit referenced unknown format/frame {format_index}/{frame_index}");
            return;
        };
        let fourcc: [u8; 4] = match descriptor.format {
            crate::inventory::PixelFormat::Mjpeg => *b"MJPG",
            crate::inventory::PixelFormat::Yuyv => *b"YUYV",
        };
        let (width, height) = (descriptor.width, descriptor.height);

        if let Err(err) = self.capture.set_format(fourcc, width, height) {
            log::warn!("commit: failed to set capture format: {err}");
            return;
        }
        if let Err(err) = self.uvc.set_format(fourcc, width, height) {
            log::warn!("commit: failed to set uvc format: {err}");
        }
    }

    fn start_streaming(&mut self) -> Result<()> {
        self.capture.request_buffers(self.buffer_count, sys::BufferMemory::Mmap)?;
        self.uvc.request_buffers(self.buffer_count, sys::BufferMemory::UserPtr)?;

        self.capture_regions = self
            .capture
            .mapped_regions()
            .into_iter()
            .map(|(index, start, length)| (index, (start, length)))
            .collect();

        for &index in self.capture_regions.keys() {
            self.capture.queue_mmap(index, 0)?;
        }

        self.capture.enumerate_controls(&mut self.catalog);
        self.capture.set_streaming(true)?;
        self.status.set_streaming(true);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        self.capture.set_streaming(false)?;
        self.capture.request_buffers(0, sys::BufferMemory::Mmap)?;
        self.uvc.set_streaming(false)?;
        self.uvc.request_buffers(0, sys::BufferMemory::UserPtr)?;
        self.capture_regions.clear();
        self.status.set_streaming(false);
        Ok(())
    }

    fn shuttle_uvc_to_capture(&mut self) -> Result<()> {
        if !should_dequeue_uvc(self.uvc.outstanding(), self.shutdown_requested) {
            return Ok(());
        }
        let Some(buffer) = self.uvc.dequeue()? else {
            return Ok(());
        };
        if buffer.error {
            log::warn!("uvc buffer {} flagged an error on dequeue", buffer.index);
            self.shutdown_requested = true;
            return Ok(());
        }
        self.capture.queue_mmap(buffer.index, 0)
    }

    fn shuttle_capture_to_uvc(&mut self) -> Result<()> {
        let Some(buffer) = self.capture.dequeue()? else {
            return Ok(());
        };
        if buffer.error {
            log::warn!("capture buffer {} flagged an error on dequeue", buffer.index);
            self.shutdown_requested = true;
            return Ok(());
        }
        let Some(&(start, length)) = self.capture_regions.get(&buffer.index) else {
            log::warn!("capture buffer {} has no mapped region", buffer.index);
            return Ok(());
        };

        let was_streaming = self.uvc.is_streaming();
        self.uvc
            .queue_userptr(buffer.index, start, length, buffer.bytes_used)?;
        if !was_streaming {
            self.uvc.set_streaming(true)?;
        }

        self.frame_count += 1;
        Ok(())
    }

    fn report_fps(&mut self) {
        let elapsed = self.fps_window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            log::info!("{fps:.1} fps");
            self.frame_count = 0;
            self.fps_window_start = Instant::now();
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        log::info!("shutting down bridge event loop");
        self.capture.close()?;
        self.uvc.close()?;
        Ok(())
    }
}

struct Readiness {
    uvc_exceptional: bool,
    uvc_writable: bool,
    capture_readable: bool,
}

/// Whether the UVC→capture shuttle may dequeue right now: only once at
/// least [`SHUTTLE_THROTTLE`] buffers are outstanding on the UVC side,
/// unless the loop is draining on shutdown.
const fn should_dequeue_uvc(outstanding: u64, shutdown_requested: bool) -> bool {
    outstanding >= SHUTTLE_THROTTLE || shutdown_requested
}

enum WaitError {
    Interrupted,
    Stall,
    Io(std::io::Error),
}

static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination_signal(_: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Whether a `SIGINT`/`SIGTERM` has been observed since startup.
#[must_use]
pub fn should_terminate() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

/// Install `SIGINT`/`SIGTERM` handlers that flip [`TERMINATE`], matching the
/// original's `volatile sig_atomic_t`. Call once, before the bridge loop
/// starts.
pub fn install_signal_handlers() -> Result<()> {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(handle_termination_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).map_err(|e| BridgeError::Io(e.into()))?;
        signal::sigaction(Signal::SIGTERM, &action).map_err(|e| BridgeError::Io(e.into()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_struct_defaults_to_all_false() {
        let r = Readiness {
            uvc_exceptional: false,
            uvc_writable: false,
            capture_readable: false,
        };
        assert!(!r.uvc_exceptional && !r.uvc_writable && !r.capture_readable);
    }

    #[test]
    fn throttle_blocks_dequeue_below_two_outstanding() {
        assert!(!should_dequeue_uvc(0, false));
        assert!(!should_dequeue_uvc(1, false));
        assert!(should_dequeue_uvc(2, false));
        assert!(should_dequeue_uvc(3, false));
    }

    #[test]
    fn throttle_drains_regardless_of_outstanding_during_shutdown() {
        assert!(should_dequeue_uvc(0, true));
        assert!(should_dequeue_uvc(1, true));
    }
}
