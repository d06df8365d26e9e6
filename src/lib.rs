//! uvc-gadget-bridge: bridges a V4L2 capture device onto a Linux UVC gadget
//! function, answering the UVC control plane and shuttling video buffers
//! between the two kernel nodes.

pub mod bridge;
pub mod cli;
pub mod control_mapping;
pub mod endpoint;
pub mod error;
pub mod inventory;
pub mod protocol;
pub mod status;
pub mod streaming_control;
pub mod sys;
