//! Format Inventory: the set of advertised (speed, format, frame) descriptors
//! and USB streaming parameters, read once from the configfs gadget tree.

use std::fs;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Maximum rows kept; extras are dropped (and logged).
const MAX_ROWS: usize = 30;

/// USB speed a descriptor group was advertised under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Speed {
    /// `fs`.
    Full,
    /// `hs`.
    High,
    /// `ss`.
    Super,
}

/// Advertised pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG.
    Mjpeg,
    /// Packed YUV 4:2:2.
    Yuyv,
}

/// One (speed, format, frame) row of the inventory.
#[derive(Debug, Clone)]
pub struct FrameFormatDescriptor {
    /// USB speed this row was advertised under.
    pub speed: Speed,
    /// Pixel format.
    pub format: PixelFormat,
    /// 1-based format index, unique within (speed, format).
    pub format_index: u8,
    /// 1-based frame index, unique within (speed, format_index).
    pub frame_index: u8,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Default frame interval in 100 ns ticks.
    pub default_frame_interval: u32,
    /// Minimum bitrate.
    pub min_bit_rate: u32,
    /// Maximum bitrate.
    pub max_bit_rate: u32,
    /// Maximum buffer size in bytes.
    pub max_video_frame_buffer_size: u32,
    /// Capability bitmap as advertised.
    pub capabilities: u32,
    /// configfs group name this row came from (diagnostic only).
    pub group: String,
}

impl FrameFormatDescriptor {
    /// `dwMaxVideoFrameSize` for this descriptor's pixel format and
    /// resolution.
    #[must_use]
    pub const fn max_video_frame_size(&self) -> u32 {
        match self.format {
            PixelFormat::Yuyv => self.width * self.height * 2,
            PixelFormat::Mjpeg => self.width * self.height,
        }
    }
}

/// USB streaming endpoint parameters, read once and clamped.
#[derive(Debug, Clone, Copy)]
pub struct StreamingParams {
    /// `bMaxBurst`, clamped to `[0, 15]`.
    pub maxburst: u8,
    /// `wMaxPacketSize`, clamped to `[1, 3072]`.
    pub maxpacket: u16,
    /// `bInterval`, clamped to `[1, 16]`.
    pub interval: u8,
}

impl Default for StreamingParams {
    fn default() -> Self {
        Self {
            maxburst: 0,
            maxpacket: 1024,
            interval: 1,
        }
    }
}

/// The immutable result of parsing the configfs tree.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Every advertised row, in discovery order.
    pub rows: Vec<FrameFormatDescriptor>,
    /// The streaming endpoint parameters found alongside the format tree.
    pub streaming: StreamingParams,
}

impl Inventory {
    /// `(min, max)` format index across the whole inventory.
    #[must_use]
    pub fn format_index_bounds(&self) -> (u8, u8) {
        let min = self.rows.iter().map(|r| r.format_index).min().unwrap_or(1);
        let max = self.rows.iter().map(|r| r.format_index).max().unwrap_or(1);
        (min, max)
    }

    /// `(min, max)` frame index within `format_index`.
    #[must_use]
    pub fn frame_index_bounds(&self, format_index: u8) -> (u8, u8) {
        let indices: Vec<u8> = self
            .rows
            .iter()
            .filter(|r| r.format_index == format_index)
            .map(|r| r.frame_index)
            .collect();
        let min = indices.iter().copied().min().unwrap_or(1);
        let max = indices.iter().copied().max().unwrap_or(1);
        (min, max)
    }

    /// Locate the descriptor for an exact (format_index, frame_index) pair.
    #[must_use]
    pub fn find(&self, format_index: u8, frame_index: u8) -> Option<&FrameFormatDescriptor> {
        self.rows
            .iter()
            .find(|r| r.format_index == format_index && r.frame_index == frame_index)
    }
}

fn speed_from_segment(seg: &str) -> Option<Speed> {
    match seg {
        "fs" => Some(Speed::Full),
        "hs" => Some(Speed::High),
        "ss" => Some(Speed::Super),
        _ => None,
    }
}

fn format_from_prefix(seg: &str) -> Option<PixelFormat> {
    match seg.chars().next()? {
        'm' => Some(PixelFormat::Mjpeg),
        'u' => Some(PixelFormat::Yuyv),
        _ => None,
    }
}

fn parse_u32(path: &Path) -> Option<u32> {
    let text = fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    if trimmed.len() > 10 {
        return None;
    }
    trimmed.parse::<u32>().ok()
}

struct Builder {
    rows: Vec<FrameFormatDescriptor>,
    streaming: StreamingParams,
}

impl Builder {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            streaming: StreamingParams::default(),
        }
    }

    fn row_mut(&mut self, speed: Speed, format: PixelFormat, format_index: u8, frame_index: u8, group: &str) -> Option<&mut FrameFormatDescriptor> {
        if let Some(pos) = self
            .rows
            .iter()
            .position(|r| r.speed == speed && r.format == format && r.format_index == format_index && r.frame_index == frame_index)
        {
            return self.rows.get_mut(pos);
        }
        if self.rows.len() >= MAX_ROWS {
            log::warn!("format inventory capacity ({MAX_ROWS}) reached, dropping row");
            return None;
        }
        self.rows.push(FrameFormatDescriptor {
            speed,
            format,
            format_index,
            frame_index,
            width: 0,
            height: 0,
            default_frame_interval: 0,
            min_bit_rate: 0,
            max_bit_rate: 0,
            max_video_frame_buffer_size: 0,
            capabilities: 0,
            group: group.to_owned(),
        });
        self.rows.last_mut()
    }

    fn set_format_index(&mut self, speed: Speed, format: PixelFormat, value: u8) {
        for r in self.rows.iter_mut().filter(|r| r.speed == speed && r.format == format) {
            r.format_index = value;
        }
    }
}

/// Walk `root` (typically `/sys/kernel/config/usb_gadget`) and build the
/// inventory. Only paths containing both `/uvc` and a
/// `streaming/class/<speed>/header/<group>/<format>/<frame>/<attribute>`
/// tail are consulted, plus sibling `streaming_<param>` files.
pub fn load(root: &Path) -> Result<Inventory> {
    let mut builder = Builder::new();
    walk(root, &mut builder);

    if builder.rows.is_empty() {
        return Err(BridgeError::ConfigMissing(root.display().to_string()));
    }

    log::info!(
        "format inventory: {} rows, maxburst={} maxpacket={} interval={}",
        builder.rows.len(),
        builder.streaming.maxburst,
        builder.streaming.maxpacket,
        builder.streaming.interval
    );
    for r in &builder.rows {
        log::debug!(
            "  {:?}/{:?} idx={}/{} {}x{} interval={}",
            r.speed, r.format, r.format_index, r.frame_index, r.width, r.height, r.default_frame_interval
        );
    }

    Ok(Inventory {
        rows: builder.rows,
        streaming: builder.streaming,
    })
}

fn walk(dir: &Path, builder: &mut Builder) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        log::trace!("visiting {}", path.display());
        if path.is_dir() {
            walk(&path, builder);
        } else {
            consider_file(&path, builder);
        }
    }
}

fn consider_file(path: &Path, builder: &mut Builder) {
    let text = path.to_string_lossy();
    if !text.contains("/uvc") {
        return;
    }

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if name == "streaming_maxburst" {
            if let Some(v) = parse_u32(path) {
                builder.streaming.maxburst = v.min(15) as u8;
            }
            return;
        }
        if name == "streaming_maxpacket" {
            if let Some(v) = parse_u32(path) {
                builder.streaming.maxpacket = v.clamp(1, 3072) as u16;
            }
            return;
        }
        if name == "streaming_interval" {
            if let Some(v) = parse_u32(path) {
                builder.streaming.interval = v.clamp(1, 16) as u8;
            }
            return;
        }
    }

    let Some(tail) = streaming_class_tail(&text) else {
        return;
    };
    let parts: Vec<&str> = tail.split('/').collect();
    // speed / header / group / format / frame / attribute
    let [speed_s, _header, group, format_s, frame_s, attr] = parts[..] else {
        return;
    };
    let Some(speed) = speed_from_segment(speed_s) else {
        return;
    };
    let Some(format) = format_from_prefix(format_s) else {
        return;
    };
    let Ok(frame_index) = frame_s.parse::<u8>() else {
        return;
    };

    if attr == "bFormatIndex" {
        if let Some(v) = parse_u32(path) {
            builder.set_format_index(speed, format, v as u8);
        }
        return;
    }

    // Use whatever format_index is currently assigned for this group (may be
    // overwritten later by a sibling bFormatIndex file).
    let format_index = builder
        .rows
        .iter()
        .find(|r| r.speed == speed && r.format == format)
        .map_or(1, |r| r.format_index);

    let Some(row) = builder.row_mut(speed, format, format_index, frame_index, group) else {
        return;
    };

    match attr {
        "bFrameIndex" => {
            if let Some(v) = parse_u32(path) {
                row.frame_index = v as u8;
            }
        }
        "wWidth" => {
            if let Some(v) = parse_u32(path) {
                row.width = v;
            }
        }
        "wHeight" => {
            if let Some(v) = parse_u32(path) {
                row.height = v;
            }
        }
        "dwDefaultFrameInterval" => {
            if let Some(v) = parse_u32(path) {
                row.default_frame_interval = v;
            }
        }
        "dwMinBitRate" => {
            if let Some(v) = parse_u32(path) {
                row.min_bit_rate = v;
            }
        }
        "dwMaxBitRate" => {
            if let Some(v) = parse_u32(path) {
                row.max_bit_rate = v;
            }
        }
        "dwMaxVideoFrameBufferSize" => {
            if let Some(v) = parse_u32(path) {
                row.max_video_frame_buffer_size = v;
            }
        }
        "bmCapabilities" => {
            if let Some(v) = parse_u32(path) {
                row.capabilities = v;
            }
        }
        _ => {}
    }
}

/// Find the `streaming/class/...` tail of a path and return everything after
/// `class/`, e.g. `fs/header/h/m/1/wWidth`.
fn streaming_class_tail(full: &str) -> Option<String> {
    let marker = "streaming/class/";
    let idx = full.find(marker)?;
    Some(full[idx + marker.len()..].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, value: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, value).unwrap();
    }

    #[test]
    fn single_mjpeg_row_parses() {
        let dir = tempdir().unwrap();
        let root: PathBuf = dir.path().join("g1/functions/uvc.usb0");
        write(&root, "streaming/class/fs/header/h/m/1/bFormatIndex", "1");
        write(&root, "streaming/class/fs/header/h/m/1/bFrameIndex", "1");
        write(&root, "streaming/class/fs/header/h/m/1/wWidth", "640");
        write(&root, "streaming/class/fs/header/h/m/1/wHeight", "480");
        write(
            &root,
            "streaming/class/fs/header/h/m/1/dwDefaultFrameInterval",
            "333333",
        );

        let inventory = load(dir.path()).expect("parse should succeed");
        assert_eq!(inventory.rows.len(), 1);
        let row = &inventory.rows[0];
        assert_eq!(row.speed, Speed::Full);
        assert_eq!(row.format, PixelFormat::Mjpeg);
        assert_eq!(row.format_index, 1);
        assert_eq!(row.frame_index, 1);
        assert_eq!(row.width, 640);
        assert_eq!(row.height, 480);
        assert_eq!(row.default_frame_interval, 333_333);
    }

    #[test]
    fn two_formats_compute_distinct_bounds() {
        let dir = tempdir().unwrap();
        let root: PathBuf = dir.path().join("g1/functions/uvc.usb0");
        write(&root, "streaming/class/fs/header/h/m/1/bFormatIndex", "1");
        write(&root, "streaming/class/fs/header/h/m/1/bFrameIndex", "1");
        write(&root, "streaming/class/fs/header/h/m/1/wWidth", "640");
        write(&root, "streaming/class/fs/header/h/m/1/wHeight", "480");

        write(&root, "streaming/class/fs/header/h2/u/2/bFormatIndex", "2");
        write(&root, "streaming/class/fs/header/h2/u/2/bFrameIndex", "1");
        write(&root, "streaming/class/fs/header/h2/u/2/wWidth", "1280");
        write(&root, "streaming/class/fs/header/h2/u/2/wHeight", "720");

        let inventory = load(dir.path()).unwrap();
        assert_eq!(inventory.rows.len(), 2);
        assert_eq!(inventory.format_index_bounds(), (1, 2));
        let max_row = inventory.find(2, 1).unwrap();
        assert_eq!(max_row.max_video_frame_size(), 1280 * 720 * 2);
    }

    #[test]
    fn empty_tree_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn streaming_params_are_clamped() {
        let dir = tempdir().unwrap();
        let root: PathBuf = dir.path().join("g1/functions/uvc.usb0");
        write(&root, "streaming/class/fs/header/h/m/1/bFormatIndex", "1");
        write(&root, "streaming/class/fs/header/h/m/1/bFrameIndex", "1");
        write(&root, "streaming_maxburst", "99");
        write(&root, "streaming_maxpacket", "999999");
        write(&root, "streaming_interval", "0");

        let inventory = load(dir.path()).unwrap();
        assert_eq!(inventory.streaming.maxburst, 15);
        assert_eq!(inventory.streaming.maxpacket, 3072);
        assert_eq!(inventory.streaming.interval, 1);
    }
}
