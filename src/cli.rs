//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{BridgeError, Result};

const MIN_BUFFERS: u32 = 2;
const MAX_BUFFERS: u32 = 32;

/// Undocumented flags accepted (and ignored) for launch-script compatibility.
///
/// The original tool's `usage()` text never mentions these, but its `getopt`
/// string accepts them without a matching `case`. We keep accepting them
/// rather than rejecting a command line that has worked for years.
const IGNORED_FLAGS: &[char] = &['b', 'd', 'f', 'i', 'm', 'o', 'r', 's', 't'];

/// Validated bridge configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Number of buffers requested on each endpoint's pool.
    pub buffer_count: u32,
    /// UVC gadget video node (output side).
    pub uvc_device: PathBuf,
    /// V4L2 capture device node.
    pub v4l2_device: PathBuf,
    /// GPIO pin to toggle on stream transitions, if any.
    pub status_pin: Option<u32>,
    /// Whether to drive the onboard LED status trigger.
    pub status_led: bool,
    /// Whether to log frames-per-second once a second.
    pub show_fps: bool,
}

/// Raw clap argument definition, kept close to the flag letters the original
/// tool uses so existing launch scripts keep working unmodified.
#[derive(Parser, Debug)]
#[command(name = "uvc-gadget-bridge", about = "Bridge a V4L2 camera onto a UVC gadget")]
struct Args {
    /// Number of streaming buffers to request per endpoint.
    #[arg(short = 'n', default_value_t = 4)]
    buffer_count: u32,

    /// UVC gadget video node.
    #[arg(short = 'u', default_value = "/dev/video0")]
    uvc_device: PathBuf,

    /// V4L2 capture device node.
    #[arg(short = 'v', default_value = "/dev/video1")]
    v4l2_device: PathBuf,

    /// GPIO pin number to raise while streaming.
    #[arg(short = 'p')]
    status_pin: Option<u32>,

    /// Drive the onboard LED (`/sys/class/leds/led0`) while streaming.
    #[arg(short = 'l', default_value_t = false)]
    status_led: bool,

    /// Print a frames-per-second line once a second.
    #[arg(short = 'x', default_value_t = false)]
    show_fps: bool,

    /// Accepted and ignored: undocumented compatibility flags.
    #[arg(short = 'b', hide = true)]
    _compat_b: bool,
    #[arg(short = 'd', hide = true)]
    _compat_d: bool,
    #[arg(short = 'f', hide = true)]
    _compat_f: bool,
    #[arg(short = 'i', hide = true)]
    _compat_i: bool,
    #[arg(short = 'm', hide = true)]
    _compat_m: bool,
    #[arg(short = 'o', hide = true)]
    _compat_o: bool,
    #[arg(short = 'r', hide = true)]
    _compat_r: bool,
    #[arg(short = 's', hide = true)]
    _compat_s: bool,
    #[arg(short = 't', hide = true)]
    _compat_t: bool,
}

/// Parse `std::env::args`, logging a warning for every compatibility flag seen.
pub fn parse() -> Result<Settings> {
    let args = Args::parse();
    warn_ignored_flags();

    if !(MIN_BUFFERS..=MAX_BUFFERS).contains(&args.buffer_count) {
        return Err(BridgeError::BadArgument(format!(
            "buffer count {} out of range [{MIN_BUFFERS}, {MAX_BUFFERS}]",
            args.buffer_count
        )));
    }

    Ok(Settings {
        buffer_count: args.buffer_count,
        uvc_device: args.uvc_device,
        v4l2_device: args.v4l2_device,
        status_pin: args.status_pin,
        status_led: args.status_led,
        show_fps: args.show_fps,
    })
}

fn warn_ignored_flags() {
    for flag in std::env::args().skip(1) {
        let Some(letter) = flag.strip_prefix('-').and_then(|s| s.chars().next()) else {
            continue;
        };
        if IGNORED_FLAGS.contains(&letter) {
            log::warn!("ignoring undocumented compatibility flag -{letter}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_flags_cover_original_compat_set() {
        for letter in IGNORED_FLAGS {
            assert!(letter.is_ascii_lowercase());
        }
        assert_eq!(IGNORED_FLAGS.len(), 9);
    }
}
