//! Ar0234 modes file
//!
//! Output formats the ISP firmware can stream

use super::protocol::ProtocolError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Format code understood by the firmware
    pub code: u8,
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{} (code {})", self.width, self.height, self.fps, self.code)
    }
}

const FRAME_RATES: [u32; 4] = [25, 30, 50, 60];

// (width, height, format code)
const FRAME_SIZES: [(u32, u32, u8); 7] = [
    (1280, 720, 12),
    (1280, 960, 9),
    (1920, 1080, 3),
    (1440, 1080, 4),
    (1080, 1080, 5),
    (1024, 1024, 11),
    (1280, 1024, 7),
];

lazy_static! {
    pub static ref MODES: Vec<FrameMode> = FRAME_SIZES
        .iter()
        .flat_map(|&(width, height, code)| {
            FRAME_RATES.iter().map(move |&fps| FrameMode {
                width,
                height,
                fps,
                code,
            })
        })
        .collect();
}

/// Exact match, or the first rate offered for the size
pub fn select_mode(width: u32, height: u32, fps: u32) -> Result<FrameMode, ProtocolError> {
    let mut same_size = MODES
        .iter()
        .filter(|m| m.width == width && m.height == height)
        .peekable();

    let first = same_size.peek().copied().copied().ok_or_else(|| {
        ProtocolError::UnsupportedConfiguration(format!("frame size {}x{}", width, height))
    })?;

    Ok(same_size.find(|m| m.fps == fps).copied().unwrap_or(first))
}
