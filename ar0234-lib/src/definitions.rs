//! Ar0234 definitions file
//!
//! Flash layout of the companion MCU, register map of the application firmware,
//! command opcodes and the timing budgets used while waiting for the device

use std::time::Duration;

/// Default 7-bit I2C address of the companion chip
pub const DEFAULT_I2C_ADDRESS: u8 = 0x3C;

/// Bus transfer attempts before giving up
pub const DEFAULT_RETRIES: usize = 300;

/// Pause between two attempts of the same transfer
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Largest payload of a single flash/ISP/NVM write or read
pub const MAX_CHUNK: usize = 64;

// Bootloader flash layout
pub const FLASH_APP_START: u32 = 0x1A00;
pub const FLASH_APP_MAX: u32 = 0xF3FF;
pub const FLASH_NVM_START: u32 = 0xF400;
pub const FLASH_NVM_MAX: u32 = 0xF7FF;
pub const FLASH_NVM_SIZE: u32 = FLASH_NVM_MAX - FLASH_NVM_START + 1;
pub const FLASH_APP_CRC_ADDRESS: u16 = 0xF3F0;
pub const FLASH_APP_SIZE_ADDRESS: u16 = 0xF3F4;
pub const FLASH_PAGE_SIZE: u16 = 512;

/// Highest address of the 24-bit ISP SPI flash
pub const ISP_FLASH_MAX: u32 = 0x00FF_FFFF;

/// Bootloader gate value written to 0xFC/0xFD
pub const PASSWORD: u16 = 0x0554;

/// Value returned by the boot id command while the bootloader runs
pub const BOOT_ID: u16 = 0x5AA5;

/// Seed of the device CRC-16
pub const INITIAL_CRC: u16 = 0xFFFF;

/// Command opcodes, first byte of every transfer
pub mod command {
    pub const REG8_WRITE: u8 = 0x30;
    pub const REG8_READ: u8 = 0x31;
    pub const REG16_WRITE: u8 = 0x32;
    pub const REG16_READ: u8 = 0x33;
    pub const REG32_WRITE: u8 = 0x34;
    pub const REG32_READ: u8 = 0x35;

    // Bootloader
    pub const FLASH_WRITE: u8 = 0x38;
    pub const FLASH_READ: u8 = 0x39;
    pub const APP_CALC_CRC: u8 = 0x41;
    pub const FLASH_ERASE: u8 = 0x44;
    pub const REBOOT: u8 = 0x46;
    pub const BOOT_ID: u8 = 0x47;
    pub const BOOT_CAMERA_TYPE: u8 = 0xF1;

    // Upgrader (ISP SPI flash)
    pub const ISP_FLASH_WRITE: u8 = 0x40;
    pub const ISP_FLASH_ERASE: u8 = 0x42;
    pub const ISP_FLASH_GET_ID: u8 = 0x43;
    pub const ISP_FLASH_BLOCK_ERASE: u8 = 0x44;
    pub const ISP_FLASH_GET_STATUS: u8 = 0x45;
    pub const ISP_FLASH_GET_CRC: u8 = 0x47;

    // Application NVM access
    pub const NVM_WRITE: u8 = 0x50;
    pub const NVM_READ: u8 = 0x51;

    pub const READ_SERIAL: u8 = 0x61;
}

/// Application firmware register map
pub mod reg {
    pub const BRIGHTNESS: u8 = 0x02;
    pub const CONTRAST: u8 = 0x04;
    pub const SATURATION: u8 = 0x06;
    pub const SHARPNESS: u8 = 0x0A;
    pub const NOISE_RED: u8 = 0x0C;
    pub const GAMMA: u8 = 0x0E;
    pub const ZOOM: u8 = 0x18;
    pub const ZOOM_SPEED: u8 = 0x1C;
    pub const PAN: u8 = 0x1D;
    pub const TILT: u8 = 0x1E;
    pub const MIRROR_FLIP: u8 = 0x1F;
    pub const EXPOSURE_MODE: u8 = 0x20;
    pub const ROI_MODE: u8 = 0x21;
    pub const EXPOSURE_UPPER: u8 = 0x24;
    pub const EXPOSURE_MAX: u8 = 0x28;
    pub const GAIN_UPPER: u8 = 0x2C;
    pub const GAIN_MAX: u8 = 0x2E;
    pub const GAIN: u8 = 0x30;
    pub const EXPOSURE_ABS: u8 = 0x34;
    pub const AE_TARGET: u8 = 0x3C;
    pub const BLC_MODE: u8 = 0x40;
    pub const BLC_LEVEL: u8 = 0x41;
    pub const BLC_WINDOW_X0: u8 = 0x42;
    pub const BLC_WINDOW_Y0: u8 = 0x43;
    pub const BLC_WINDOW_X1: u8 = 0x44;
    pub const BLC_WINDOW_Y1: u8 = 0x45;
    pub const BLC_RATIO: u8 = 0x4A;
    pub const BLC_FACE_LEVEL: u8 = 0x4B;
    pub const BLC_FACE_WEIGHT: u8 = 0x4C;
    pub const BLC_ROI_LEVEL: u8 = 0x4F;
    pub const WHITE_BALANCE: u8 = 0x50;
    pub const WB_TEMPERATURE: u8 = 0x52;
    pub const FACE_DETECT: u8 = 0x55;
    pub const ANTIFLICKER_MODE: u8 = 0x56;
    pub const ANTIFLICKER_FREQ: u8 = 0x57;
    pub const COLORFX: u8 = 0x76;
    pub const FACE_DETECT_SPEED: u8 = 0x82;
    pub const FACE_DETECT_THRESHOLD: u8 = 0x83;
    pub const FACE_CHROMA_THRESHOLD: u8 = 0x84;
    pub const FACE_MIN_SIZE: u8 = 0x86;
    pub const FACE_MAX_SIZE: u8 = 0x88;
    pub const AWB_MAN_X: u8 = 0x8A;
    pub const AWB_MAN_Y: u8 = 0x8C;
    pub const TEST_PATTERN: u8 = 0xE0;
    pub const POWER: u8 = 0xE7;
    pub const UPGRADER_MODE: u8 = 0xEB;
    pub const ISP_MINOR_VERSION: u8 = 0xEC;
    pub const ISP_MAJOR_VERSION: u8 = 0xED;
    pub const NVM_MINOR_VERSION: u8 = 0xEE;
    pub const NVM_MAJOR_VERSION: u8 = 0xEF;
    pub const SAVE_RESTART: u8 = 0xF0;
    pub const CAMERA_TYPE: u8 = 0xF1;
    pub const PASSWORD_LOW: u8 = 0xFC;
    pub const PASSWORD_HIGH: u8 = 0xFD;
    pub const MCU_MINOR_VERSION: u8 = 0xFE;
    pub const MCU_MAJOR_VERSION: u8 = 0xFF;
}

/// Values written to `reg::SAVE_RESTART`
pub mod save_restart {
    pub const STORE_REGISTERS: u8 = 0x01;
    pub const RESTORE_REGISTERS: u8 = 0x05;
    pub const RESTORE_FACTORY_REGISTERS: u8 = 0x07;
    pub const RESTORE_FACTORY_CALIBRATION: u8 = 0x08;
    pub const RESTART: u8 = 0x99;
    pub const START_BOOTLOADER: u8 = 0xA5;
}

/// Value written to `reg::UPGRADER_MODE`
pub const UPGRADER_MODE_ENTER: u8 = 0x82;

/// Readiness polling budgets, as (interval, timeout)
pub mod timing {
    use std::time::Duration;

    pub const BUS_FREE: (Duration, Duration) = (Duration::from_millis(50), Duration::from_secs(3));
    pub const BOOTLOADER_START: (Duration, Duration) =
        (Duration::from_millis(100), Duration::from_secs(3));
    pub const ERASE: (Duration, Duration) = (Duration::from_millis(10), Duration::from_secs(3));
    pub const REBOOT: (Duration, Duration) = (Duration::from_millis(50), Duration::from_secs(5));
    pub const POWER_UP: (Duration, Duration) =
        (Duration::from_millis(100), Duration::from_secs(5));
    pub const APP_CRC: (Duration, Duration) =
        (Duration::from_millis(10), Duration::from_millis(100));
    pub const ISP_CRC: (Duration, Duration) = (Duration::from_millis(10), Duration::from_secs(1));
    pub const ISP_PAGE_ERASE: (Duration, Duration) =
        (Duration::from_millis(10), Duration::from_secs(1));

    /// Fixed settle time after the bootloader start command
    pub const BOOTLOADER_SETTLE: Duration = Duration::from_millis(100);

    /// Fixed settle time after a power-up request
    pub const POWER_UP_SETTLE: Duration = Duration::from_millis(100);

    /// Spacing of SPI status polls during a full ISP erase
    pub const ISP_ERASE_STATUS_INTERVAL: Duration = Duration::from_millis(10);

    /// SPI status reads before a busy flash is reported
    pub const SPI_STATUS_POLLS: usize = 1000;

    /// Pause after restoring the stored register set
    pub const RESTORE_SETTLE: Duration = Duration::from_millis(5);

    /// Pause after each step of a factory restore
    pub const FACTORY_SETTLE: Duration = Duration::from_millis(10);
}
