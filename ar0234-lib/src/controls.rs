//! Ar0234 controls file
//!
//! Every camera control is described once: range, default, and how its
//! logical value maps onto the register bits of the application firmware.
//! Codecs here are pure; register access lives in the device module

use super::definitions::reg;
use super::protocol::ProtocolError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    StoreRegisters,
    RestoreRegisters,
    RestoreFactory,
    Reboot,
    AutoWhiteBalance,
    DoWhiteBalance,
    WhiteBalanceTemperature,
    WhiteBalancePreset,
    AwbManualX,
    AwbManualY,
    ExposureAuto,
    Brightness,
    ExposureAbsolute,
    Exposure,
    Gain,
    ExposureMetering,
    BacklightCompensation,
    RoiBound,
    RoiLock,
    RoiFace,
    ExposureUpper,
    ExposureMax,
    GainUpper,
    GainMax,
    BlcWindowX0,
    BlcWindowY0,
    BlcWindowX1,
    BlcWindowY1,
    BlcRatio,
    BlcFaceLevel,
    BlcFaceWeight,
    BlcRoiLevel,
    FaceDetectEnable,
    FaceDetectRectangles,
    FaceDetectSaturated,
    FaceDetectSpeed,
    FaceDetectThreshold,
    FaceChromaThreshold,
    FaceMinSize,
    FaceMaxSize,
    Saturation,
    Contrast,
    HorizontalFlip,
    VerticalFlip,
    Sharpness,
    Gamma,
    NoiseReduction,
    Zoom,
    Pan,
    Tilt,
    ZoomSpeed,
    PowerLineFrequency,
    TestPattern,
    ColorEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuItem {
    pub value: i64,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Integer,
    Boolean,
    Menu(&'static [MenuItem]),
    /// Write-only action
    Button,
}

/// Register width and signedness of a plain register control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    I8,
    U16,
    I16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StoreRegisters,
    RestoreRegisters,
    RestoreFactory,
    Reboot,
    PushToWhite,
}

/// How a control is stored on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Register { reg: u8, width: Width },
    /// Value in 100 us units, register in us (32 bit)
    Microseconds { reg: u8 },
    /// Value in 1/1000, register s7.8
    FixedPoint { reg: u8 },
    /// One flag of a shared register, read-modify-write
    Bit { reg: u8, bit: u8 },
    /// Mirror (bit 0) and flip (bit 1), written together from cached values
    MirrorFlip { bit: u8 },
    ExposureMode { reg: u8 },
    Metering { reg: u8 },
    AutoWhiteBalance { reg: u8 },
    WhiteBalancePreset,
    PowerLine,
    ColorEffect { reg: u8 },
    Action(Action),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub id: ControlId,
    /// Short name used on the command line
    pub key: &'static str,
    pub name: &'static str,
    pub kind: ControlKind,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub default: i64,
    pub codec: Codec,
}

impl Descriptor {
    /// Reject values outside the range, or menu values without an entry
    pub fn check(&self, value: i64) -> Result<(), ProtocolError> {
        if self.kind == ControlKind::Button {
            return Ok(());
        }

        let in_menu = match self.kind {
            ControlKind::Menu(items) => items.iter().any(|item| item.value == value),
            _ => true,
        };

        if value < self.min || value > self.max || !in_menu {
            return Err(ProtocolError::InvalidValue {
                control: self.key,
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn is_action(&self) -> bool {
        matches!(self.codec, Codec::Action(_))
    }

    /// Name of a menu entry
    pub fn menu_name(&self, value: i64) -> Option<&'static str> {
        match self.kind {
            ControlKind::Menu(items) => items
                .iter()
                .find(|item| item.value == value)
                .map(|item| item.name),
            _ => None,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ControlKind::Integer => "int",
            ControlKind::Boolean => "bool",
            ControlKind::Menu(_) => "menu",
            ControlKind::Button => "button",
        };

        if self.kind == ControlKind::Button {
            return write!(f, "{:<28} {:<6} {}", self.key, kind, self.name);
        }

        write!(
            f,
            "{:<28} {:<6} min={} max={} step={} default={}  {}",
            self.key, kind, self.min, self.max, self.step, self.default, self.name
        )
    }
}

pub const WB_PRESET_MENU: &[MenuItem] = &[
    MenuItem { value: 0, name: "Manual" },
    MenuItem { value: 2, name: "Incandescent" },
    MenuItem { value: 3, name: "Fluorescent" },
    MenuItem { value: 4, name: "Fluorescent H" },
    MenuItem { value: 5, name: "Horizon" },
    MenuItem { value: 6, name: "Daylight" },
    MenuItem { value: 7, name: "Flash" },
    MenuItem { value: 8, name: "Cloudy" },
    MenuItem { value: 9, name: "Shade" },
];

pub const EXPOSURE_MODE_MENU: &[MenuItem] = &[
    MenuItem { value: 0, name: "Auto Mode" },
    MenuItem { value: 1, name: "Manual Mode" },
    MenuItem { value: 2, name: "Shutter Priority Mode" },
    MenuItem { value: 3, name: "Aperture Priority Mode" },
];

pub const METERING_MENU: &[MenuItem] = &[
    MenuItem { value: 0, name: "Average" },
    MenuItem { value: 1, name: "Center Weighted" },
    MenuItem { value: 2, name: "Spot" },
    MenuItem { value: 3, name: "Matrix" },
];

pub const POWER_LINE_MENU: &[MenuItem] = &[
    MenuItem { value: 0, name: "Disabled" },
    MenuItem { value: 1, name: "50 Hz" },
    MenuItem { value: 2, name: "60 Hz" },
    MenuItem { value: 3, name: "Auto" },
];

pub const TEST_PATTERN_MENU: &[MenuItem] = &[
    MenuItem { value: 0, name: "Disabled" },
    MenuItem { value: 1, name: "Enabled" },
];

pub const COLOR_EFFECT_MENU: &[MenuItem] = &[
    MenuItem { value: 0, name: "None" },
    MenuItem { value: 1, name: "Black & White" },
    MenuItem { value: 2, name: "Sepia" },
    MenuItem { value: 3, name: "Negative" },
    MenuItem { value: 4, name: "Emboss" },
    MenuItem { value: 5, name: "Sketch" },
    MenuItem { value: 6, name: "Sky Blue" },
    MenuItem { value: 7, name: "Grass Green" },
    MenuItem { value: 8, name: "Skin Whiten" },
    MenuItem { value: 9, name: "Vivid" },
    MenuItem { value: 10, name: "Aqua" },
    MenuItem { value: 11, name: "Art Freeze" },
    MenuItem { value: 12, name: "Silhouette" },
    MenuItem { value: 13, name: "Solarization" },
    MenuItem { value: 14, name: "Antique" },
    MenuItem { value: 15, name: "Set Cb/Cr" },
];

// Kelvin per white balance preset
const WB_PRESET_KELVIN: [(i64, u16); 9] = [
    (0, 0),
    (2, 3000),
    (3, 4000),
    (4, 5000),
    (5, 5000),
    (6, 6500),
    (7, 5500),
    (8, 7500),
    (9, 9500),
];

// Open intervals, exclusive on both ends
const WB_KELVIN_BUCKETS: [(u16, u16, i64); 7] = [
    (2500, 3500, 2),
    (3500, 4500, 3),
    (4500, 5000, 4),
    (5000, 6000, 5),
    (6000, 7000, 6),
    (7000, 8000, 8),
    (8000, 10000, 9),
];

// Device code per colour effect menu value
const COLOR_EFFECT_CODES: [u8; 16] = [
    0x00, 0x03, 0x0D, 0x07, 0x05, 0x0F, 0x08, 0x09, 0x00, 0x00, 0x00, 0x11, 0x04, 0x10, 0x02, 0x00,
];

// Exposure mode register per menu value
const EXPOSURE_MODE_CODES: [u8; 4] = [0x0C, 0x00, 0x09, 0x0C];

pub const WB_MANUAL: u8 = 0x00;
pub const WB_TEMPERATURE_CONTROLLED: u8 = 0x07;
pub const WB_AUTO: u8 = 0x0F;
pub const WB_PUSH_TO_WHITE: u8 = 0x08;

/// Exposure target in 1/1000 to s7.8, rounding half away from zero
pub fn exposure_encode(value: i32) -> i16 {
    let scaled = value * 256;
    let rounded = if scaled < 0 {
        (scaled - 500) / 1000
    } else {
        (scaled + 500) / 1000
    };
    rounded as i16
}

pub fn exposure_decode(raw: u16) -> i32 {
    i32::from(raw as i16) * 1000 / 256
}

pub fn wb_preset_kelvin(value: i64) -> Option<u16> {
    WB_PRESET_KELVIN
        .iter()
        .find(|(preset, _)| *preset == value)
        .map(|(_, kelvin)| *kelvin)
}

/// Preset matching a temperature reading, `None` for readings between buckets
pub fn wb_preset_from_kelvin(kelvin: u16) -> Option<i64> {
    if kelvin == 0 {
        return Some(0);
    }

    WB_KELVIN_BUCKETS
        .iter()
        .find(|(low, high, _)| kelvin > *low && kelvin < *high)
        .map(|(_, _, preset)| *preset)
}

/// White balance mode write (if any) and temperature for a preset.
///
/// The mode register is only touched while auto white balance is off.
pub fn wb_preset_writes(value: i64, auto_wb: bool) -> Option<(Option<u8>, u16)> {
    let kelvin = wb_preset_kelvin(value)?;
    let mode = match (auto_wb, value) {
        (true, _) => None,
        (false, 0) => Some(WB_MANUAL),
        (false, _) => Some(WB_TEMPERATURE_CONTROLLED),
    };
    Some((mode, kelvin))
}

pub fn auto_wb_encode(on: bool) -> u8 {
    if on {
        WB_AUTO
    } else {
        WB_TEMPERATURE_CONTROLLED
    }
}

pub fn auto_wb_decode(raw: u8) -> bool {
    raw & 0x0F == 0x0F
}

pub fn color_effect_encode(value: i64) -> u8 {
    usize::try_from(value)
        .ok()
        .and_then(|index| COLOR_EFFECT_CODES.get(index))
        .copied()
        .unwrap_or(0x00)
}

/// Codes shared by several effects decode to the first of them
pub fn color_effect_decode(code: u8) -> i64 {
    COLOR_EFFECT_CODES
        .iter()
        .position(|c| *c == code)
        .map_or(0, |index| index as i64)
}

pub fn exposure_mode_encode(value: i64) -> Option<u8> {
    usize::try_from(value)
        .ok()
        .and_then(|index| EXPOSURE_MODE_CODES.get(index))
        .copied()
}

pub fn exposure_mode_decode(code: u8) -> i64 {
    match code {
        0x00 => 1,
        0x09 => 2,
        _ => 0,
    }
}

pub fn metering_decode(raw: u8) -> i64 {
    if raw <= 3 {
        i64::from(raw)
    } else {
        1
    }
}

/// New anti-flicker mode register and optional frequency write
pub fn power_line_encode(current_mode: u8, value: i64) -> (u8, Option<u8>) {
    let base = current_mode & 0xFC;
    match value {
        0 => (base, None),
        1 => (base | 1, Some(50)),
        2 => (base | 1, Some(60)),
        _ => (base | 2, None),
    }
}

pub fn power_line_decode(mode: u8, frequency: u8) -> i64 {
    match mode & 0x3 {
        0 => 0,
        2 => 3,
        _ if frequency <= 55 => 1,
        _ => 2,
    }
}

pub fn set_bit(current: u8, bit: u8, on: bool) -> u8 {
    (current & !(1 << bit)) | (u8::from(on) << bit)
}

pub fn get_bit(raw: u8, bit: u8) -> i64 {
    i64::from((raw >> bit) & 0x01)
}

pub fn mirror_flip_encode(hflip: bool, vflip: bool) -> u8 {
    u8::from(vflip) << 1 | u8::from(hflip)
}

pub fn register_encode(width: Width, value: i64) -> u16 {
    match width {
        Width::U8 | Width::I8 => u16::from(value as u8),
        Width::U16 | Width::I16 => value as u16,
    }
}

pub fn register_decode(width: Width, raw: u16) -> i64 {
    match width {
        Width::U8 => i64::from(raw as u8),
        Width::I8 => i64::from(raw as u8 as i8),
        Width::U16 => i64::from(raw),
        Width::I16 => i64::from(raw as i16),
    }
}

macro_rules! control {
    ($id:ident, $key:expr, $name:expr, $kind:expr, $min:expr, $max:expr, $default:expr, $codec:expr) => {
        Descriptor {
            id: ControlId::$id,
            key: $key,
            name: $name,
            kind: $kind,
            min: $min,
            max: $max,
            step: if $kind == ControlKind::Button { 0 } else { 1 },
            default: $default,
            codec: $codec,
        }
    };
}

use Codec::{Bit, Register};
use ControlKind::{Boolean, Button, Integer, Menu};

lazy_static! {
    /// All controls in enumeration order
    pub static ref CONTROLS: Vec<Descriptor> = vec![
        // Camera control
        control!(StoreRegisters, "store_registers", "Store Registers to NVM", Button, 0, 0, 0,
            Codec::Action(Action::StoreRegisters)),
        control!(RestoreRegisters, "restore_registers", "Restore Registers from NVM", Button, 0, 0, 0,
            Codec::Action(Action::RestoreRegisters)),
        control!(RestoreFactory, "restore_factory", "Restore to Factory Settings", Button, 0, 0, 0,
            Codec::Action(Action::RestoreFactory)),
        control!(Reboot, "reboot", "Reboot Camera", Button, 0, 0, 0,
            Codec::Action(Action::Reboot)),

        // White balance
        control!(AutoWhiteBalance, "auto_white_balance", "White Balance, Automatic", Boolean, 0, 1, 1,
            Codec::AutoWhiteBalance { reg: reg::WHITE_BALANCE }),
        control!(DoWhiteBalance, "do_white_balance", "Do White Balance", Button, 0, 0, 0,
            Codec::Action(Action::PushToWhite)),
        control!(WhiteBalanceTemperature, "white_balance_temperature", "White Balance Temperature",
            Integer, 0, 0xFFFF, 6500, Register { reg: reg::WB_TEMPERATURE, width: Width::U16 }),
        control!(WhiteBalancePreset, "white_balance_preset", "White Balance, Auto & Preset",
            Menu(WB_PRESET_MENU), 0, 9, 6, Codec::WhiteBalancePreset),
        control!(AwbManualX, "awb_manual_x", "AWB manual X", Integer, -32768, 32767, 0,
            Register { reg: reg::AWB_MAN_X, width: Width::I16 }),
        control!(AwbManualY, "awb_manual_y", "AWB manual Y", Integer, -32768, 32767, 0,
            Register { reg: reg::AWB_MAN_Y, width: Width::I16 }),

        // Exposure
        control!(ExposureAuto, "exposure_auto", "Auto Exposure", Menu(EXPOSURE_MODE_MENU), 0, 3, 0,
            Codec::ExposureMode { reg: reg::EXPOSURE_MODE }),
        control!(Brightness, "brightness", "Brightness", Integer, -32768, 32767, 0,
            Register { reg: reg::BRIGHTNESS, width: Width::I16 }),
        control!(ExposureAbsolute, "exposure_absolute", "Exposure Time, Absolute (x 100us)",
            Integer, 0, 0xFFFF, 333, Codec::Microseconds { reg: reg::EXPOSURE_ABS }),
        control!(Exposure, "exposure", "Exposure Target (x 0.001)", Integer, -32768, 32767, -2200,
            Codec::FixedPoint { reg: reg::AE_TARGET }),
        control!(Gain, "gain", "Gain", Integer, 0x100, 32767, 0x100,
            Register { reg: reg::GAIN, width: Width::U16 }),
        control!(ExposureMetering, "exposure_metering", "Exposure, Metering Mode",
            Menu(METERING_MENU), 0, 3, 1, Codec::Metering { reg: reg::BLC_MODE }),
        control!(BacklightCompensation, "backlight_compensation", "Backlight Compensation",
            Integer, 0, 0x80, 0, Register { reg: reg::BLC_LEVEL, width: Width::U8 }),
        control!(RoiBound, "roi_bound", "Region of Interest (Bound)", Boolean, 0, 1, 0,
            Bit { reg: reg::ROI_MODE, bit: 0 }),
        control!(RoiLock, "roi_lock", "Region of Interest (Lock)", Boolean, 0, 1, 0,
            Bit { reg: reg::ROI_MODE, bit: 1 }),
        control!(RoiFace, "roi_face", "Region of Interest (Face)", Boolean, 0, 1, 1,
            Bit { reg: reg::ROI_MODE, bit: 2 }),
        control!(ExposureUpper, "exposure_upper", "Exposure Upper (x 100us)", Integer, 0, 0xFFFF, 333,
            Codec::Microseconds { reg: reg::EXPOSURE_UPPER }),
        control!(ExposureMax, "exposure_max", "Exposure Max (x 100us)", Integer, 0, 0xFFFF, 333,
            Codec::Microseconds { reg: reg::EXPOSURE_MAX }),
        control!(GainUpper, "gain_upper", "Gain Upper (u8.8)", Integer, 0, 0xFFFF, 0x0800,
            Register { reg: reg::GAIN_UPPER, width: Width::U16 }),
        control!(GainMax, "gain_max", "Gain Max (max = 2^value, s7.8)", Integer, 0, 0xFFFF, 0x0580,
            Register { reg: reg::GAIN_MAX, width: Width::U16 }),
        control!(BlcWindowX0, "blc_window_x0", "BLC window X0 (0~128)", Integer, 0, 0x80, 0x00,
            Register { reg: reg::BLC_WINDOW_X0, width: Width::U8 }),
        control!(BlcWindowY0, "blc_window_y0", "BLC window Y0 (0~128)", Integer, 0, 0x80, 0x00,
            Register { reg: reg::BLC_WINDOW_Y0, width: Width::U8 }),
        control!(BlcWindowX1, "blc_window_x1", "BLC window X1 (0~128)", Integer, 0, 0x80, 0x80,
            Register { reg: reg::BLC_WINDOW_X1, width: Width::U8 }),
        control!(BlcWindowY1, "blc_window_y1", "BLC window Y1 (0~128)", Integer, 0, 0x80, 0x80,
            Register { reg: reg::BLC_WINDOW_Y1, width: Width::U8 }),
        control!(BlcRatio, "blc_ratio", "BLC ratio (0~128)", Integer, 0, 0x80, 0x80,
            Register { reg: reg::BLC_RATIO, width: Width::U8 }),
        control!(BlcFaceLevel, "blc_face_level", "BLC face level (0~128)", Integer, 0, 0x80, 0x80,
            Register { reg: reg::BLC_FACE_LEVEL, width: Width::U8 }),
        control!(BlcFaceWeight, "blc_face_weight", "BLC face weight (0~128)", Integer, 0, 0x80, 0x80,
            Register { reg: reg::BLC_FACE_WEIGHT, width: Width::U8 }),
        control!(BlcRoiLevel, "blc_roi_level", "BLC roi level (0~128)", Integer, 0, 0x80, 0x00,
            Register { reg: reg::BLC_ROI_LEVEL, width: Width::U8 }),

        // Face detection
        control!(FaceDetectEnable, "face_detect", "Face detection (enable)", Boolean, 0, 1, 0,
            Bit { reg: reg::FACE_DETECT, bit: 0 }),
        control!(FaceDetectRectangles, "face_detect_rectangles", "Face detection (rectangles)",
            Boolean, 0, 1, 0, Bit { reg: reg::FACE_DETECT, bit: 4 }),
        control!(FaceDetectSaturated, "face_detect_saturated", "Face detection (saturated)",
            Boolean, 0, 1, 0, Bit { reg: reg::FACE_DETECT, bit: 5 }),
        control!(FaceDetectSpeed, "face_detect_speed", "Face detection speed (x 0.1s)",
            Integer, 0, 0xFF, 0x00, Register { reg: reg::FACE_DETECT_SPEED, width: Width::U8 }),
        control!(FaceDetectThreshold, "face_detect_threshold", "Face detection threshold",
            Integer, 0, 0xFF, 0x80, Register { reg: reg::FACE_DETECT_THRESHOLD, width: Width::U8 }),
        control!(FaceChromaThreshold, "face_chroma_threshold", "Face chroma threshold",
            Integer, 0, 0x1F, 0x0C, Register { reg: reg::FACE_CHROMA_THRESHOLD, width: Width::U8 }),
        control!(FaceMinSize, "face_min_size", "Face minimum size", Integer, 0, 0x4000, 0x0400,
            Register { reg: reg::FACE_MIN_SIZE, width: Width::U16 }),
        control!(FaceMaxSize, "face_max_size", "Face maximum size", Integer, 0, 0x4000, 0x4000,
            Register { reg: reg::FACE_MAX_SIZE, width: Width::U16 }),

        // Basic
        control!(Saturation, "saturation", "Saturation", Integer, 0, 0x2000, 0x1000,
            Register { reg: reg::SATURATION, width: Width::U16 }),
        control!(Contrast, "contrast", "Contrast", Integer, -32768, 32767, 0,
            Register { reg: reg::CONTRAST, width: Width::I16 }),
        control!(HorizontalFlip, "hflip", "Horizontal Flip", Boolean, 0, 1, 0,
            Codec::MirrorFlip { bit: 0 }),
        control!(VerticalFlip, "vflip", "Vertical Flip", Boolean, 0, 1, 0,
            Codec::MirrorFlip { bit: 1 }),
        control!(Sharpness, "sharpness", "Sharpness", Integer, -32768, 32767, 0,
            Register { reg: reg::SHARPNESS, width: Width::I16 }),
        control!(Gamma, "gamma", "Gamma", Integer, 0, 0x7FFF, 0,
            Register { reg: reg::GAMMA, width: Width::U16 }),
        control!(NoiseReduction, "noise_reduction", "Noise reduction", Integer, -32768, 32767, 0,
            Register { reg: reg::NOISE_RED, width: Width::I16 }),

        // Zoom, pan and tilt
        control!(Zoom, "zoom", "Zoom, Absolute", Integer, 0, 0x7FFF, 0x0100,
            Register { reg: reg::ZOOM, width: Width::U16 }),
        control!(Pan, "pan", "Pan, Absolute", Integer, 0, 0x80, 0x40,
            Register { reg: reg::PAN, width: Width::U8 }),
        control!(Tilt, "tilt", "Tilt, Absolute", Integer, 0, 0x80, 0x40,
            Register { reg: reg::TILT, width: Width::U8 }),
        control!(ZoomSpeed, "zoom_speed", "Zoom speed", Integer, -128, 127, -128,
            Register { reg: reg::ZOOM_SPEED, width: Width::I8 }),

        // Anti flicker, test pattern and effects
        control!(PowerLineFrequency, "power_line_frequency", "Power Line Frequency",
            Menu(POWER_LINE_MENU), 0, 3, 3, Codec::PowerLine),
        control!(TestPattern, "test_pattern", "Test Pattern", Menu(TEST_PATTERN_MENU), 0, 1, 0,
            Register { reg: reg::TEST_PATTERN, width: Width::U8 }),
        control!(ColorEffect, "color_effect", "Color Effects", Menu(COLOR_EFFECT_MENU), 0, 15, 0,
            Codec::ColorEffect { reg: reg::COLORFX }),
    ];

    pub static ref DESCRIPTORS: HashMap<ControlId, Descriptor> =
        CONTROLS.iter().map(|d| (d.id, *d)).collect();
}

pub fn descriptor(id: ControlId) -> Result<&'static Descriptor, ProtocolError> {
    DESCRIPTORS
        .get(&id)
        .ok_or_else(|| ProtocolError::InvalidArgument(format!("no descriptor for {:?}", id)))
}

/// Look a control up by its command line name
pub fn find(key: &str) -> Option<&'static Descriptor> {
    CONTROLS.iter().find(|d| d.key == key)
}

/// Last known value of every control
#[derive(Debug, Clone)]
pub struct ControlCache {
    values: HashMap<ControlId, i64>,
}

impl ControlCache {
    /// Cache holding the descriptor defaults
    pub fn new() -> Self {
        ControlCache {
            values: CONTROLS.iter().map(|d| (d.id, d.default)).collect(),
        }
    }

    pub fn get(&self, id: ControlId) -> i64 {
        self.values.get(&id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, id: ControlId, value: i64) {
        self.values.insert(id, value);
    }
}

impl Default for ControlCache {
    fn default() -> Self {
        Self::new()
    }
}
