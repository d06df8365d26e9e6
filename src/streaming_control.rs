//! The UVC streaming control block (Probe/Commit payload) and its builder.

use crate::inventory::Inventory;

/// Wire size of a streaming control block.
pub const WIRE_LEN: usize = 26;

/// `bmHint`, `bFormatIndex`, ... as negotiated by Probe/Commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingControlBlock {
    /// `bmHint`.
    pub hint: u16,
    /// `bFormatIndex`.
    pub format_index: u8,
    /// `bFrameIndex`.
    pub frame_index: u8,
    /// `dwFrameInterval`, 100 ns ticks.
    pub frame_interval: u32,
    /// `wKeyFrameRate` (unused, kept for wire fidelity).
    pub key_frame_rate: u16,
    /// `wPFrameRate` (unused).
    pub p_frame_rate: u16,
    /// `wCompQuality` (unused).
    pub comp_quality: u16,
    /// `wCompWindowSize` (unused).
    pub comp_window_size: u16,
    /// `wDelay` (unused).
    pub delay: u16,
    /// `dwMaxVideoFrameSize`.
    pub max_video_frame_size: u32,
    /// `dwMaxPayloadTransferSize`.
    pub max_payload_transfer_size: u32,
    /// `dwClockFrequency` (unused).
    pub clock_frequency: u32,
    /// `bmFramingInfo`.
    pub framing_info: u8,
    /// `bPreferedVersion`.
    pub prefered_version: u8,
    /// `bMinVersion`.
    pub min_version: u8,
    /// `bMaxVersion`.
    pub max_version: u8,
}

impl StreamingControlBlock {
    /// Encode into the 26-byte little-endian wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; WIRE_LEN] {
        let mut buf = [0u8; WIRE_LEN];
        buf[0..2].copy_from_slice(&self.hint.to_le_bytes());
        buf[2] = self.format_index;
        buf[3] = self.frame_index;
        buf[4..8].copy_from_slice(&self.frame_interval.to_le_bytes());
        buf[8..10].copy_from_slice(&self.key_frame_rate.to_le_bytes());
        buf[10..12].copy_from_slice(&self.p_frame_rate.to_le_bytes());
        buf[12..14].copy_from_slice(&self.comp_quality.to_le_bytes());
        buf[14..16].copy_from_slice(&self.comp_window_size.to_le_bytes());
        buf[16..18].copy_from_slice(&self.delay.to_le_bytes());
        buf[18..22].copy_from_slice(&self.max_video_frame_size.to_le_bytes());
        buf[22..26].copy_from_slice(&self.max_payload_transfer_size.to_le_bytes());
        buf
    }

    /// Decode from a host-supplied payload. Payloads shorter than 26 bytes
    /// (legacy UVC 1.0 hosts omit trailing fields) are accepted; missing
    /// fields default to zero.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        let get_u16 = |off: usize| -> u16 {
            bytes
                .get(off..off + 2)
                .map(|s| u16::from_le_bytes([s[0], s[1]]))
                .unwrap_or(0)
        };
        let get_u32 = |off: usize| -> u32 {
            bytes
                .get(off..off + 4)
                .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                .unwrap_or(0)
        };
        Self {
            hint: get_u16(0),
            format_index: bytes.get(2).copied().unwrap_or(0),
            frame_index: bytes.get(3).copied().unwrap_or(0),
            frame_interval: get_u32(4),
            key_frame_rate: get_u16(8),
            p_frame_rate: get_u16(10),
            comp_quality: get_u16(12),
            comp_window_size: get_u16(14),
            delay: get_u16(16),
            max_video_frame_size: get_u32(18),
            max_payload_transfer_size: get_u32(22),
            clock_frequency: 0,
            framing_info: 3,
            prefered_version: 1,
            min_version: 1,
            max_version: 1,
        }
    }
}

/// What a builder invocation should do with the requested indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Clamp the requested `(format_index, frame_index)` into range.
    Set,
    /// Replace both indices with the inventory's global minimum.
    Min,
    /// Replace both indices with the inventory's global maximum.
    Max,
}

const MIN_FRAME_INTERVAL: u32 = 100_000;
const DEFAULT_FRAME_INTERVAL: u32 = 400_000;

/// Build a streaming control block for `(format_index, frame_index)` against
/// `inventory`, per the negotiation rules in the control-plane design.
#[must_use]
pub fn build(inventory: &Inventory, format_index: u8, frame_index: u8, target: Target) -> StreamingControlBlock {
    let (fmt_min, fmt_max) = inventory.format_index_bounds();

    let (format_index, frame_index) = match target {
        Target::Min => {
            let (fr_min, _) = inventory.frame_index_bounds(fmt_min);
            (fmt_min, fr_min)
        }
        Target::Max => {
            let (_, fr_max) = inventory.frame_index_bounds(fmt_max);
            (fmt_max, fr_max)
        }
        Target::Set => {
            let clamped_fmt = format_index.clamp(fmt_min, fmt_max);
            let (fr_min, fr_max) = inventory.frame_index_bounds(clamped_fmt);
            (clamped_fmt, frame_index.clamp(fr_min, fr_max))
        }
    };

    let descriptor = inventory.find(format_index, frame_index);
    let interval = descriptor
        .map(|d| d.default_frame_interval)
        .filter(|i| *i >= MIN_FRAME_INTERVAL)
        .unwrap_or(DEFAULT_FRAME_INTERVAL);
    let max_video_frame_size = descriptor.map_or(0, |d| d.max_video_frame_size());

    StreamingControlBlock {
        hint: 1,
        format_index,
        frame_index,
        frame_interval: interval,
        max_video_frame_size,
        max_payload_transfer_size: u32::from(inventory.streaming.maxpacket),
        framing_info: 3,
        prefered_version: 1,
        min_version: fmt_min,
        max_version: fmt_max,
        ..StreamingControlBlock::default()
    }
}

/// An all-zero block, used for `GET_RES`.
#[must_use]
pub fn zero_block() -> StreamingControlBlock {
    StreamingControlBlock::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{FrameFormatDescriptor, PixelFormat, Speed, StreamingParams};

    fn sample_inventory() -> Inventory {
        Inventory {
            rows: vec![
                FrameFormatDescriptor {
                    speed: Speed::Full,
                    format: PixelFormat::Mjpeg,
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
                },
                FrameFormatDescriptor {
                    speed: Speed::Full,
                    format: PixelFormat::Yuyv,
                    format_index: 2,
                    frame_index: 1,
                    width: 1280,
                    height: 720,
                    default_frame_interval: 0,
                    min_bit_rate: 0,
                    max_bit_rate: 0,
                    max_video_frame_buffer_size: 0,
                    capabilities: 0,
                    group: "h2".into(),
                },
            ],
            streaming: StreamingParams {
                maxburst: 0,
                maxpacket: 1024,
                interval: 1,
            },
        }
    }

    #[test]
    fn get_max_picks_highest_format_and_frame() {
        let inv = sample_inventory();
        let block = build(&inv, 0, 0, Target::Max);
        assert_eq!(block.format_index, 2);
        assert_eq!(block.frame_index, 1);
        assert_eq!(block.max_video_frame_size, 1280 * 720 * 2);
        assert_eq!(block.frame_interval, DEFAULT_FRAME_INTERVAL);
    }

    #[test]
    fn get_min_and_get_def_are_identical() {
        let inv = sample_inventory();
        let min_block = build(&inv, 0, 0, Target::Min);
        let def_block = build(&inv, 0, 0, Target::Min);
        assert_eq!(min_block, def_block);
        assert_eq!(min_block.format_index, 1);
    }

    #[test]
    fn set_clamps_out_of_range_indices() {
        let inv = sample_inventory();
        let block = build(&inv, 99, 99, Target::Set);
        assert_eq!(block.format_index, 2);
        assert_eq!(block.frame_index, 1);
    }

    #[test]
    fn encode_decode_round_trip() {
        let inv = sample_inventory();
        let block = build(&inv, 1, 1, Target::Set);
        let bytes = block.encode();
        let decoded = StreamingControlBlock::decode(&bytes);
        assert_eq!(decoded.format_index, block.format_index);
        assert_eq!(decoded.frame_index, block.frame_index);
        assert_eq!(decoded.max_video_frame_size, block.max_video_frame_size);
    }
}
