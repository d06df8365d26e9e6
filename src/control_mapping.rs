//! The static catalog pairing UVC camera controls with V4L2 controls, and the
//! linear range translation between the two domains.

/// Which UVC interface entity a control selector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvcInterface {
    /// Entity id 1: Camera (Input) Terminal.
    InputTerminal,
    /// Entity id 2: Processing Unit.
    ProcessingUnit,
}

impl UvcInterface {
    /// The UVC entity id this interface kind is addressed by.
    #[must_use]
    pub const fn entity_id(self) -> u8 {
        match self {
            Self::InputTerminal => 1,
            Self::ProcessingUnit => 2,
        }
    }

    /// Resolve an entity id back to an interface kind.
    #[must_use]
    pub const fn from_entity_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::InputTerminal),
            2 => Some(Self::ProcessingUnit),
            _ => None,
        }
    }
}

/// Capability bits returned for `GET_INFO`.
pub const CAP_GET: u8 = 0x01;
/// Capability bits returned for `GET_INFO`.
pub const CAP_SET: u8 = 0x02;

/// One row of the control catalog. V4L2-side fields are populated by
/// [`crate::endpoint::DeviceEndpoint::enumerate_controls`]; `value` is the
/// live UVC-domain value mirrored from the device.
#[derive(Debug, Clone)]
pub struct ControlMapping {
    /// Human-readable name, for logging only.
    pub name: &'static str,
    /// V4L2 control id (CID).
    pub v4l2_id: u32,
    /// UVC control selector within `interface`.
    pub uvc_selector: u8,
    /// Which UVC entity this selector is addressed through.
    pub interface: UvcInterface,
    /// Whether the device actually exposes this control.
    pub enabled: bool,
    /// V4L2-domain minimum.
    pub v4l2_min: i64,
    /// V4L2-domain maximum.
    pub v4l2_max: i64,
    /// V4L2-domain step.
    pub v4l2_step: i64,
    /// V4L2-domain default.
    pub v4l2_default: i64,
    /// Live UVC-domain value (`v4l2_current - v4l2_min`).
    pub value: i64,
    /// Byte width of the control on the wire (1, 2, or 4).
    pub length: u8,
    /// Whether writing this control should also mirror into a paired
    /// control (red balance mirrors to blue balance).
    pub mirror_v4l2_id: Option<u32>,
}

impl ControlMapping {
    /// UVC-domain minimum: always zero by construction.
    #[must_use]
    pub const fn uvc_min(&self) -> i64 {
        0
    }

    /// UVC-domain maximum: the width of the V4L2 range.
    #[must_use]
    pub const fn uvc_max(&self) -> i64 {
        self.v4l2_max - self.v4l2_min
    }

    /// UVC-domain default.
    #[must_use]
    pub const fn uvc_default(&self) -> i64 {
        self.v4l2_default - self.v4l2_min
    }

    /// Translate a V4L2-domain value into the UVC domain.
    #[must_use]
    pub const fn to_uvc(&self, v4l2_value: i64) -> i64 {
        v4l2_value - self.v4l2_min
    }

    /// Translate a UVC-domain value into the V4L2 domain, clamping first.
    #[must_use]
    pub fn to_v4l2(&self, uvc_value: i64) -> i64 {
        let clamped = uvc_value.clamp(self.uvc_min(), self.uvc_max());
        let span = (self.v4l2_max - self.v4l2_min).max(1);
        (clamped - self.uvc_min()) * span / self.uvc_max().max(1) + self.v4l2_min
    }
}

/// The V4L2 control-class mask and the user-control class constant, used to
/// filter the device's control enumeration.
///
/// The original source guards this enumeration with
/// `if (id && V4L2_CTRL_CLASS_USER)`, a logical AND of two nonzero constants
/// that is always true. The bitmask form below is what that check clearly
/// intended and is what this bridge implements.
pub const V4L2_CTRL_CLASS_MASK: u32 = 0xffff_0000;
/// The "user controls" V4L2 control class.
pub const V4L2_CTRL_CLASS_USER: u32 = 0x0098_0000;

/// True when `id` belongs to the user control class.
#[must_use]
pub const fn is_user_class(id: u32) -> bool {
    (id & V4L2_CTRL_CLASS_MASK) == V4L2_CTRL_CLASS_USER
}

// V4L2 CIDs (linux/videodev2.h), offsets from V4L2_CID_BASE = 0x0098_0900.
const V4L2_CID_BASE: u32 = 0x0098_0900;
const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
const V4L2_CID_SATURATION: u32 = V4L2_CID_BASE + 2;
const V4L2_CID_SHARPNESS: u32 = V4L2_CID_BASE + 27;
const V4L2_CID_BACKLIGHT_COMPENSATION: u32 = V4L2_CID_BASE + 36;
const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 9;
const V4L2_CID_POWER_LINE_FREQUENCY: u32 = V4L2_CID_BASE + 24;
const V4L2_CID_WHITE_BALANCE_TEMPERATURE: u32 = V4L2_CID_BASE + 26;
const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
const V4L2_CID_RED_BALANCE: u32 = V4L2_CID_BASE + 23;
const V4L2_CID_BLUE_BALANCE: u32 = V4L2_CID_BASE + 22;

const V4L2_CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 1;
const V4L2_CID_EXPOSURE_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE;
const V4L2_CID_FOCUS_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 10;
const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
const V4L2_CID_ZOOM_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 13;

// UVC Processing Unit control selectors (UVC spec, PU_*_CONTROL).
const PU_BRIGHTNESS_CONTROL: u8 = 0x02;
const PU_CONTRAST_CONTROL: u8 = 0x03;
const PU_GAIN_CONTROL: u8 = 0x04;
const PU_SATURATION_CONTROL: u8 = 0x07;
const PU_SHARPNESS_CONTROL: u8 = 0x08;
const PU_WHITE_BALANCE_TEMPERATURE_CONTROL: u8 = 0x0a;
const PU_WHITE_BALANCE_TEMPERATURE_AUTO_CONTROL: u8 = 0x0b;
const PU_WHITE_BALANCE_COMPONENT_CONTROL: u8 = 0x0c;
const PU_BACKLIGHT_COMPENSATION_CONTROL: u8 = 0x13;
const PU_POWER_LINE_FREQUENCY_CONTROL: u8 = 0x05;

// UVC Camera (Input) Terminal control selectors (CT_*_CONTROL).
const CT_ZOOM_ABSOLUTE_CONTROL: u8 = 0x0b;
const CT_FOCUS_ABSOLUTE_CONTROL: u8 = 0x06;
const CT_FOCUS_AUTO_CONTROL: u8 = 0x08;
const CT_EXPOSURE_TIME_ABSOLUTE_CONTROL: u8 = 0x04;
const CT_AE_MODE_CONTROL: u8 = 0x02;

fn row(
    name: &'static str,
    v4l2_id: u32,
    uvc_selector: u8,
    interface: UvcInterface,
    mirror: Option<u32>,
) -> ControlMapping {
    ControlMapping {
        name,
        v4l2_id,
        uvc_selector,
        interface,
        enabled: false,
        v4l2_min: 0,
        v4l2_max: 0,
        v4l2_step: 1,
        v4l2_default: 0,
        value: 0,
        length: 2,
        mirror_v4l2_id: mirror,
    }
}

/// Build the default catalog, disabled until
/// [`crate::endpoint::DeviceEndpoint::enumerate_controls`] fills in ranges.
#[must_use]
pub fn default_catalog() -> Vec<ControlMapping> {
    use UvcInterface::{InputTerminal, ProcessingUnit};
    vec![
        row("brightness", V4L2_CID_BRIGHTNESS, PU_BRIGHTNESS_CONTROL, ProcessingUnit, None),
        row("contrast", V4L2_CID_CONTRAST, PU_CONTRAST_CONTROL, ProcessingUnit, None),
        row("saturation", V4L2_CID_SATURATION, PU_SATURATION_CONTROL, ProcessingUnit, None),
        row("sharpness", V4L2_CID_SHARPNESS, PU_SHARPNESS_CONTROL, ProcessingUnit, None),
        row("gain", V4L2_CID_GAIN, PU_GAIN_CONTROL, ProcessingUnit, None),
        row(
            "backlight_compensation",
            V4L2_CID_BACKLIGHT_COMPENSATION,
            PU_BACKLIGHT_COMPENSATION_CONTROL,
            ProcessingUnit,
            None,
        ),
        row(
            "white_balance_temperature",
            V4L2_CID_WHITE_BALANCE_TEMPERATURE,
            PU_WHITE_BALANCE_TEMPERATURE_CONTROL,
            ProcessingUnit,
            None,
        ),
        row(
            "white_balance_auto",
            V4L2_CID_AUTO_WHITE_BALANCE,
            PU_WHITE_BALANCE_TEMPERATURE_AUTO_CONTROL,
            ProcessingUnit,
            None,
        ),
        row(
            "power_line_frequency",
            V4L2_CID_POWER_LINE_FREQUENCY,
            PU_POWER_LINE_FREQUENCY_CONTROL,
            ProcessingUnit,
            None,
        ),
        // Red balance writes mirror to blue balance (product-specific coupling).
        row(
            "red_balance",
            V4L2_CID_RED_BALANCE,
            PU_WHITE_BALANCE_COMPONENT_CONTROL,
            ProcessingUnit,
            Some(V4L2_CID_BLUE_BALANCE),
        ),
        row("zoom_absolute", V4L2_CID_ZOOM_ABSOLUTE, CT_ZOOM_ABSOLUTE_CONTROL, InputTerminal, None),
        row("focus_absolute", V4L2_CID_FOCUS_ABSOLUTE, CT_FOCUS_ABSOLUTE_CONTROL, InputTerminal, None),
        row("focus_auto", V4L2_CID_FOCUS_AUTO, CT_FOCUS_AUTO_CONTROL, InputTerminal, None),
        row(
            "exposure_time_absolute",
            V4L2_CID_EXPOSURE_ABSOLUTE,
            CT_EXPOSURE_TIME_ABSOLUTE_CONTROL,
            InputTerminal,
            None,
        ),
        row("exposure_auto", V4L2_CID_EXPOSURE_AUTO, CT_AE_MODE_CONTROL, InputTerminal, None),
    ]
}

/// Find the (first) row addressed by `(interface, selector)`.
#[must_use]
pub fn find_mut<'a>(
    catalog: &'a mut [ControlMapping],
    interface: UvcInterface,
    selector: u8,
) -> Option<&'a mut ControlMapping> {
    catalog
        .iter_mut()
        .find(|row| row.interface == interface && row.uvc_selector == selector)
}

/// Find the (first) row addressed by `(interface, selector)`.
#[must_use]
pub fn find<'a>(
    catalog: &'a [ControlMapping],
    interface: UvcInterface,
    selector: u8,
) -> Option<&'a ControlMapping> {
    catalog
        .iter()
        .find(|row| row.interface == interface && row.uvc_selector == selector)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ControlMapping {
        let mut m = row("brightness", V4L2_CID_BRIGHTNESS, PU_BRIGHTNESS_CONTROL, UvcInterface::ProcessingUnit, None);
        m.enabled = true;
        m.v4l2_min = -100;
        m.v4l2_max = 100;
        m.v4l2_default = 0;
        m.value = m.to_uvc(0);
        m
    }

    #[test]
    fn uvc_range_starts_at_zero() {
        let m = sample();
        assert_eq!(m.uvc_min(), 0);
        assert_eq!(m.uvc_max(), 200);
    }

    #[test]
    fn forward_and_inverse_round_trip() {
        let m = sample();
        for v4l2_value in [-100, -50, 0, 50, 100] {
            let uvc = m.to_uvc(v4l2_value);
            assert_eq!(m.to_v4l2(uvc), v4l2_value);
        }
    }

    #[test]
    fn write_clamps_out_of_range() {
        let m = sample();
        // 250 is past uvc_max (200); clamp to 200 -> v4l2 100.
        assert_eq!(m.to_v4l2(250), 100);
        assert_eq!(m.to_v4l2(-50), -100);
    }

    #[test]
    fn corrected_user_class_filter_matches_expected_constant() {
        assert!(is_user_class(V4L2_CID_BRIGHTNESS));
        assert!(!is_user_class(V4L2_CID_EXPOSURE_ABSOLUTE));
    }

    #[test]
    fn find_locates_known_row() {
        let catalog = default_catalog();
        let m = find(&catalog, UvcInterface::ProcessingUnit, PU_BRIGHTNESS_CONTROL);
        assert!(m.is_some());
        assert_eq!(m.unwrap().name, "brightness");
    }
}
