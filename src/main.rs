//! uvc-gadget-bridge binary entry point.

use std::path::Path;

use uvc_gadget_bridge::bridge::{self, Bridge};
use uvc_gadget_bridge::endpoint::{DeviceEndpoint, Role};
use uvc_gadget_bridge::error::Result;
use uvc_gadget_bridge::{cli, control_mapping, inventory, status};

const CONFIGFS_ROOT: &str = "/sys/kernel/config/usb_gadget";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn run() -> Result<()> {
    let settings = cli::parse()?;

    let format_inventory = inventory::load(Path::new(CONFIGFS_ROOT))?;
    let mut catalog = control_mapping::default_catalog();

    let capture = DeviceEndpoint::open(&settings.v4l2_device, Role::Capture)?;
    let uvc = DeviceEndpoint::open(&settings.uvc_device, Role::UvcOutput)?;

    capture.enumerate_controls(&mut catalog);

    let status_channel = status::build(settings.status_pin, settings.status_led);

    bridge::install_signal_handlers()?;

    let mut bridge = Bridge::new(
        capture,
        uvc,
        format_inventory,
        catalog,
        status_channel,
        settings.buffer_count,
        settings.show_fps,
    );

    bridge.run()
}
