//! Control-Plane State Machine: translates UVC class SETUP/DATA events into
//! responses, and drives Probe/Commit negotiation.

use crate::control_mapping::{self, ControlMapping, UvcInterface};
use crate::error::RequestErrorCode;
use crate::inventory::Inventory;
use crate::streaming_control::{self, StreamingControlBlock, Target};
use crate::sys::{UsbCtrlRequest, UvcRequestData};

const USB_REQ_GET_STATUS: u8 = 0x00;
const SET_CUR: u8 = 0x01;
const GET_CUR: u8 = 0x81;
const GET_MIN: u8 = 0x82;
const GET_MAX: u8 = 0x83;
const GET_RES: u8 = 0x84;
const GET_LEN: u8 = 0x85;
const GET_INFO: u8 = 0x86;
const GET_DEF: u8 = 0x87;

const VC_REQUEST_ERROR_CODE_CONTROL: u8 = 0x02;
const VS_PROBE_CONTROL: u8 = 0x01;
const VS_COMMIT_CONTROL: u8 = 0x02;

/// `wIndex.lo` values identifying which interface subclass a class request
/// targets (`<linux/usb/video.h>` `UVC_INTF_*`).
const UVC_INTF_CONTROL: u8 = 0;
const UVC_INTF_STREAMING: u8 = 1;

/// What the next DATA stage should do, decided by the preceding SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveControl {
    None,
    Probe,
    Commit,
    Control { interface: UvcInterface, selector: u8 },
}

/// Per-UVC-endpoint negotiation and error-reporting state.
pub struct ControlPlane {
    pub probe: StreamingControlBlock,
    pub commit: StreamingControlBlock,
    active: ActiveControl,
    error_code: RequestErrorCode,
}

/// The outcome of handling a SETUP event: a response to send back over
/// `UVCIOC_SEND_RESPONSE`, and whether the caller must now also wait for a
/// DATA stage (true for `SET_CUR`).
pub struct SetupOutcome {
    pub response: UvcRequestData,
    pub expects_data: bool,
}

/// The outcome of handling a DATA event.
#[derive(Debug, Default)]
pub struct DataOutcome {
    /// Set when a Commit DATA stage completed and the negotiated format
    /// must now be applied to both endpoints.
    pub commit_format: Option<(u8, u8)>,
    /// Set when a camera-control DATA stage wrote a catalog row; the caller
    /// must apply it to the V4L2 device.
    pub control_write: Option<(UvcInterface, u8)>,
}

impl ControlPlane {
    /// Build fresh negotiation state from `inventory`'s defaults.
    #[must_use]
    pub fn new(inventory: &Inventory) -> Self {
        let probe = streaming_control::build(inventory, 0, 0, Target::Min);
        Self {
            probe,
            commit: probe,
            active: ActiveControl::None,
            error_code: RequestErrorCode::NoError,
        }
    }

    /// Handle a SETUP event. `catalog` is consulted (read-only) for entity
    /// requests; DATA-stage writes happen in [`Self::handle_data`].
    pub fn handle_setup(
        &mut self,
        req: &UsbCtrlRequest,
        inventory: &Inventory,
        catalog: &[ControlMapping],
    ) -> SetupOutcome {
        if req.request_type & 0x7f != 0x21 {
            // Not a class, interface-recipient request.
            return SetupOutcome {
                response: UvcRequestData::with_length(0),
                expects_data: false,
            };
        }

        let intf_type = (req.index & 0xff) as u8;
        let entity = (req.index >> 8) as u8;
        let selector = (req.value >> 8) as u8;
        let request = req.request;

        match intf_type {
            UVC_INTF_CONTROL if entity == 0 && selector == VC_REQUEST_ERROR_CODE_CONTROL => {
                self.reply_error_code(request)
            }
            UVC_INTF_CONTROL if entity == 0 => SetupOutcome {
                response: UvcRequestData::with_length(0),
                expects_data: false,
            },
            UVC_INTF_CONTROL => self.handle_entity_request(entity, selector, request, catalog),
            UVC_INTF_STREAMING => self.handle_streaming_request(selector, request, inventory),
            _ => SetupOutcome {
                response: UvcRequestData::with_length(0),
                expects_data: false,
            },
        }
    }

    fn reply_error_code(&mut self, request: u8) -> SetupOutcome {
        if request == GET_CUR || request == USB_REQ_GET_STATUS {
            SetupOutcome {
                response: UvcRequestData::from_bytes(&[self.error_code.wire_value()]),
                expects_data: false,
            }
        } else {
            self.error_code = RequestErrorCode::InvalidRequest;
            SetupOutcome {
                response: UvcRequestData::with_length(-1),
                expects_data: false,
            }
        }
    }

    fn handle_entity_request(
        &mut self,
        entity_id: u8,
        selector: u8,
        request: u8,
        catalog: &[ControlMapping],
    ) -> SetupOutcome {
        let Some(interface) = control_mapping::UvcInterface::from_entity_id(entity_id) else {
            self.error_code = RequestErrorCode::InvalidUnit;
            return SetupOutcome {
                response: UvcRequestData::with_length(-1),
                expects_data: false,
            };
        };

        let Some(row) = control_mapping::find(catalog, interface, selector) else {
            self.error_code = RequestErrorCode::InvalidControl;
            return SetupOutcome {
                response: UvcRequestData::with_length(-1),
                expects_data: false,
            };
        };
        if !row.enabled {
            self.error_code = RequestErrorCode::InvalidControl;
            return SetupOutcome {
                response: UvcRequestData::with_length(-1),
                expects_data: false,
            };
        }

        self.error_code = RequestErrorCode::NoError;
        match request {
            SET_CUR => {
                self.active = ActiveControl::Control { interface, selector };
                SetupOutcome {
                    response: UvcRequestData::with_length(i32::from(row.length)),
                    expects_data: true,
                }
            }
            GET_CUR => self.reply_control_value(row.value, row.length),
            GET_MIN => self.reply_control_value(row.uvc_min(), row.length),
            GET_MAX => self.reply_control_value(row.uvc_max(), row.length),
            GET_DEF => self.reply_control_value(row.uvc_default(), row.length),
            GET_RES => self.reply_control_value(row.v4l2_step, row.length),
            GET_INFO => SetupOutcome {
                response: UvcRequestData::from_bytes(&[control_mapping::CAP_GET | control_mapping::CAP_SET]),
                expects_data: false,
            },
            _ => {
                self.error_code = RequestErrorCode::InvalidRequest;
                SetupOutcome {
                    response: UvcRequestData::with_length(-1),
                    expects_data: false,
                }
            }
        }
    }

    fn reply_control_value(&self, value: i64, length: u8) -> SetupOutcome {
        let bytes = (value as i32).to_le_bytes();
        let n = usize::from(length).min(4);
        SetupOutcome {
            response: UvcRequestData::from_bytes(&bytes[..n]),
            expects_data: false,
        }
    }

    fn handle_streaming_request(
        &mut self,
        selector: u8,
        request: u8,
        inventory: &Inventory,
    ) -> SetupOutcome {
        if selector != VS_PROBE_CONTROL && selector != VS_COMMIT_CONTROL {
            return SetupOutcome {
                response: UvcRequestData::with_length(0),
                expects_data: false,
            };
        }
        let is_probe = selector == VS_PROBE_CONTROL;

        match request {
            SET_CUR => {
                self.active = if is_probe { ActiveControl::Probe } else { ActiveControl::Commit };
                SetupOutcome {
                    response: UvcRequestData::with_length(streaming_control::WIRE_LEN as i32),
                    expects_data: true,
                }
            }
            GET_CUR => {
                let block = if is_probe { self.probe } else { self.commit };
                SetupOutcome {
                    response: UvcRequestData::from_bytes(&block.encode()),
                    expects_data: false,
                }
            }
            GET_MIN | GET_DEF => SetupOutcome {
                response: UvcRequestData::from_bytes(&streaming_control::build(inventory, 0, 0, Target::Min).encode()),
                expects_data: false,
            },
            GET_MAX => SetupOutcome {
                response: UvcRequestData::from_bytes(&streaming_control::build(inventory, 0, 0, Target::Max).encode()),
                expects_data: false,
            },
            GET_RES => SetupOutcome {
                response: UvcRequestData::from_bytes(&streaming_control::zero_block().encode()),
                expects_data: false,
            },
            GET_LEN => SetupOutcome {
                response: UvcRequestData::from_bytes(&(streaming_control::WIRE_LEN as u16).to_le_bytes()),
                expects_data: false,
            },
            GET_INFO => SetupOutcome {
                response: UvcRequestData::from_bytes(&[control_mapping::CAP_GET | control_mapping::CAP_SET]),
                expects_data: false,
            },
            _ => {
                self.error_code = RequestErrorCode::InvalidRequest;
                SetupOutcome {
                    response: UvcRequestData::with_length(-1),
                    expects_data: false,
                }
            }
        }
    }

    /// Handle a DATA event following a prior `SET_CUR`.
    pub fn handle_data(
        &mut self,
        payload: &UvcRequestData,
        inventory: &Inventory,
        catalog: &mut [ControlMapping],
    ) -> DataOutcome {
        let bytes = payload.as_slice();
        match self.active {
            ActiveControl::Probe => {
                let parsed = StreamingControlBlock::decode(bytes);
                self.probe = streaming_control::build(inventory, parsed.format_index, parsed.frame_index, Target::Set);
                DataOutcome::default()
            }
            ActiveControl::Commit => {
                let parsed = StreamingControlBlock::decode(bytes);
                self.commit = streaming_control::build(inventory, parsed.format_index, parsed.frame_index, Target::Set);
                DataOutcome {
                    commit_format: Some((self.commit.format_index, self.commit.frame_index)),
                    control_write: None,
                }
            }
            ActiveControl::Control { interface, selector } => {
                let mut control_write = None;
                if let Some(row) = control_mapping::find_mut(catalog, interface, selector) {
                    if row.enabled {
                        let raw = le_bytes_to_i64(bytes);
                        row.value = raw.clamp(row.uvc_min(), row.uvc_max());
                        #[allow(clippy::cast_possible_truncation)]
                        let length = bytes.len().min(4) as u8;
                        row.length = length;
                        control_write = Some((interface, selector));
                    }
                }
                DataOutcome { commit_format: None, control_write }
            }
            ActiveControl::None => DataOutcome::default(),
        }
    }
}

fn le_bytes_to_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from(i32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{FrameFormatDescriptor, PixelFormat, Speed, StreamingParams};

    fn inventory() -> Inventory {
        Inventory {
            rows: vec![FrameFormatDescriptor {
                speed: Speed::Full,
                format: PixelFormat::Yuyv,
                format_index: 1,
                frame_index: 1,
                width: 640,
                height: 480,
                default_frame_interval: 0,
                min_bit_rate: 0,
                max_bit_rate: 0,
                max_video_frame_buffer_size: 0,
                capabilities: 0,
                group: "h".into(),
            }],
            streaming: StreamingParams { maxburst: 0, maxpacket: 1024, interval: 1 },
        }
    }

    fn setup(request_type: u8, request: u8, value_hi: u8, intf_type: u8, entity: u8) -> UsbCtrlRequest {
        UsbCtrlRequest {
            request_type,
            request,
            value: u16::from(value_hi) << 8,
            index: (u16::from(entity) << 8) | u16::from(intf_type),
            length: 0,
        }
    }

    #[test]
    fn non_class_request_is_ignored() {
        let inv = inventory();
        let catalog = control_mapping::default_catalog();
        let mut plane = ControlPlane::new(&inv);
        let req = setup(0x00, GET_CUR, 0, UVC_INTF_CONTROL, 0);
        let outcome = plane.handle_setup(&req, &inv, &catalog);
        assert_eq!(outcome.response.length, 0);
    }

    #[test]
    fn probe_set_then_get_round_trips_indices() {
        let inv = inventory();
        let catalog = control_mapping::default_catalog();
        let mut plane = ControlPlane::new(&inv);

        let set_req = setup(0x21, SET_CUR, VS_PROBE_CONTROL, UVC_INTF_STREAMING, 0);
        let outcome = plane.handle_setup(&set_req, &inv, &catalog);
        assert!(outcome.expects_data);

        let payload = streaming_control::build(&inv, 1, 1, Target::Set).encode();
        let mut catalog_mut = control_mapping::default_catalog();
        plane.handle_data(&UvcRequestData::from_bytes(&payload), &inv, &mut catalog_mut);

        let get_req = setup(0x21, GET_CUR, VS_PROBE_CONTROL, UVC_INTF_STREAMING, 0);
        let outcome = plane.handle_setup(&get_req, &inv, &catalog);
        let got = StreamingControlBlock::decode(outcome.response.as_slice());
        assert_eq!(got.format_index, 1);
        assert_eq!(got.frame_index, 1);
    }

    #[test]
    fn commit_set_triggers_format_application() {
        let inv = inventory();
        let catalog = control_mapping::default_catalog();
        let mut plane = ControlPlane::new(&inv);

        let set_req = setup(0x21, SET_CUR, VS_COMMIT_CONTROL, UVC_INTF_STREAMING, 0);
        plane.handle_setup(&set_req, &inv, &catalog);

        let payload = streaming_control::build(&inv, 1, 1, Target::Set).encode();
        let mut catalog_mut = control_mapping::default_catalog();
        let outcome = plane.handle_data(&UvcRequestData::from_bytes(&payload), &inv, &mut catalog_mut);
        assert_eq!(outcome.commit_format, Some((1, 1)));
    }

    #[test]
    fn unknown_entity_control_reports_invalid_control() {
        let inv = inventory();
        let catalog = control_mapping::default_catalog();
        let mut plane = ControlPlane::new(&inv);
        // Processing Unit (entity 2), an unassigned selector.
        let req = setup(0x21, GET_CUR, 0xff, UVC_INTF_CONTROL, 2);
        let outcome = plane.handle_setup(&req, &inv, &catalog);
        assert_eq!(outcome.response.length, -1);
        assert_eq!(plane.error_code, RequestErrorCode::InvalidControl);
    }

    #[test]
    fn error_code_request_reaches_the_error_code_handler_not_streaming() {
        let inv = inventory();
        let catalog = control_mapping::default_catalog();
        let mut plane = ControlPlane::new(&inv);
        plane.error_code = RequestErrorCode::InvalidControl;

        // Control interface, entity 0, selector VC_REQUEST_ERROR_CODE_CONTROL:
        // must return the 1-byte status, not a 26-byte streaming block even
        // though the selector byte (0x02) collides with VS_COMMIT_CONTROL.
        let req = setup(0x21, GET_CUR, VC_REQUEST_ERROR_CODE_CONTROL, UVC_INTF_CONTROL, 0);
        let outcome = plane.handle_setup(&req, &inv, &catalog);
        assert_eq!(outcome.response.length, 1);
        assert_eq!(outcome.response.as_slice(), &[RequestErrorCode::InvalidControl.wire_value()]);
    }

    #[test]
    fn control_write_clamps_value_and_records_length() {
        let inv = inventory();
        let mut catalog = control_mapping::default_catalog();
        {
            let row = control_mapping::find_mut(&mut catalog, UvcInterface::ProcessingUnit, 0x02)
                .expect("brightness row");
            row.enabled = true;
            row.v4l2_min = -100;
            row.v4l2_max = 100;
        }
        let mut plane = ControlPlane::new(&inv);

        let set_req = setup(0x21, SET_CUR, 0x02, UVC_INTF_CONTROL, UvcInterface::ProcessingUnit.entity_id());
        let outcome = plane.handle_setup(&set_req, &inv, &catalog);
        assert!(outcome.expects_data);

        // 250 is past uvc_max (200 = v4l2_max - v4l2_min); must clamp, not wrap.
        let payload = UvcRequestData::from_bytes(&250i32.to_le_bytes()[..2]);
        let data_outcome = plane.handle_data(&payload, &inv, &mut catalog);

        let row = control_mapping::find(&catalog, UvcInterface::ProcessingUnit, 0x02).expect("brightness row");
        assert_eq!(row.value, 200);
        assert_eq!(row.length, 2);
        assert_eq!(data_outcome.control_write, Some((UvcInterface::ProcessingUnit, 0x02)));
    }
}
