//! Status side channel: an external collaborator signaling stream on/off
//! over a GPIO pin and/or the onboard LED. Never blocks the event loop and
//! never fails a stream transition on its own account.

use std::fs;
use std::path::PathBuf;

const GPIO_ROOT: &str = "/sys/class/gpio";
const LED_BRIGHTNESS: &str = "/sys/class/leds/led0/brightness";

/// A stream-transition indicator.
pub trait StatusChannel {
    /// Prepare the channel for use (export a GPIO pin, check a sysfs path
    /// exists). Failures are logged by the caller, never propagated.
    fn enable(&mut self);
    /// Reflect a stream on/off transition.
    fn set_streaming(&mut self, streaming: bool);
}

/// Drives nothing; used when neither `-l` nor `-p` was given.
pub struct NullStatusChannel;

impl StatusChannel for NullStatusChannel {
    fn enable(&mut self) {}
    fn set_streaming(&mut self, _streaming: bool) {}
}

/// Writes `1`/`0` to a GPIO pin's `value` file and/or the onboard LED's
/// `brightness` file, matching the original's direct sysfs writes.
pub struct SysfsStatusChannel {
    pin: Option<u32>,
    led: bool,
    value_path: Option<PathBuf>,
}

impl SysfsStatusChannel {
    /// Build a channel driving GPIO `pin` (if any) and the onboard LED (if
    /// `led`).
    #[must_use]
    pub const fn new(pin: Option<u32>, led: bool) -> Self {
        Self { pin, led, value_path: None }
    }

    fn write(path: &std::path::Path, contents: &str) {
        if let Err(err) = fs::write(path, contents) {
            log::warn!("status channel: failed to write {}: {err}", path.display());
        }
    }
}

impl StatusChannel for SysfsStatusChannel {
    fn enable(&mut self) {
        if let Some(pin) = self.pin {
            let export = PathBuf::from(GPIO_ROOT).join("export");
            Self::write(&export, &pin.to_string());
            self.value_path = Some(PathBuf::from(GPIO_ROOT).join(format!("gpio{pin}")).join("value"));
            if let Some(path) = &self.value_path {
                let direction = path.parent().map(|p| p.join("direction"));
                if let Some(direction) = direction {
                    Self::write(&direction, "out");
                }
            }
        }
    }

    fn set_streaming(&mut self, streaming: bool) {
        let bit = if streaming { "1" } else { "0" };
        if let Some(path) = &self.value_path {
            Self::write(path, bit);
        }
        if self.led {
            Self::write(std::path::Path::new(LED_BRIGHTNESS), bit);
        }
    }
}

/// Build the configured status channel: no-op unless `-l` or `-p` was given.
#[must_use]
pub fn build(pin: Option<u32>, led: bool) -> Box<dyn StatusChannel> {
    if pin.is_none() && !led {
        Box::new(NullStatusChannel)
    } else {
        let mut channel = SysfsStatusChannel::new(pin, led);
        channel.enable();
        Box::new(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_builds_null_channel() {
        let mut channel = build(None, false);
        // Should not panic or touch the filesystem.
        channel.set_streaming(true);
    }
}
