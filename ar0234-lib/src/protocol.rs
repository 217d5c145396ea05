//! Ar0234 protocol file
//!
//! Command set of the companion chip: register access of the application
//! firmware, the bootloader flash commands and the upgrader (ISP SPI flash)
//! commands. Which family is valid depends on the firmware currently running,
//! so the protocol tracks it explicitly and refuses commands issued in the
//! wrong mode

use super::definitions::{
    command, reg, save_restart, timing, BOOT_ID, FLASH_APP_CRC_ADDRESS, FLASH_APP_MAX,
    FLASH_APP_SIZE_ADDRESS, FLASH_APP_START, FLASH_NVM_MAX, FLASH_NVM_START, FLASH_PAGE_SIZE,
    ISP_FLASH_MAX, MAX_CHUNK, UPGRADER_MODE_ENTER,
};
use super::transport::{CancelToken, Transport};
use embedded_hal::i2c::{ErrorKind, I2c};
use log::debug;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Possible errors while using library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Bus transfer failed after {attempts} attempts: {kind}")]
    Transport { kind: ErrorKind, attempts: usize },
    #[error("Device not ready within {0:?}")]
    Timeout(Duration),
    #[error("Firmware image line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("Checksum mismatch: expected 0x{expected:04X}, device reports 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },
    #[error("SPI flash still busy, status 0x{0:04X}")]
    FlashBusyTimeout(u16),
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    #[error("Command needs {expected} mode, device is in {actual} mode")]
    WrongMode { expected: Mode, actual: Mode },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Value {value} of {control} outside [{min}, {max}]")]
    InvalidValue {
        control: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("Firmware {name} unavailable: {reason}")]
    FirmwareUnavailable { name: String, reason: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Device lock poisoned")]
    LockPoisoned,
}

/// Firmware currently running on the companion chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Application,
    Bootloader,
    UpgraderIsp,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Application => "application",
            Mode::Bootloader => "bootloader",
            Mode::UpgraderIsp => "upgrader",
        };
        f.write_str(name)
    }
}

/// Sensor variant reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    Unknown,
    Color,
    Monochrome,
}

impl CameraType {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => CameraType::Color,
            2 => CameraType::Monochrome,
            _ => CameraType::Unknown,
        }
    }
}

impl fmt::Display for CameraType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraType::Unknown => "unknown",
            CameraType::Color => "color",
            CameraType::Monochrome => "mono",
        };
        f.write_str(name)
    }
}

/// Identification command of the ISP SPI flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiIdCommand {
    /// 0x9F
    Jedec,
    /// 0x90
    Manufacturer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiId {
    pub manufacturer: u8,
    pub device: u16,
}

// Current state
pub struct Protocol<I2C> {
    transport: Transport<I2C>,
    mode: Mode,
}

impl<I2C: I2c> Protocol<I2C> {
    /// Create protocol instance, assuming the application firmware runs
    pub fn new(transport: Transport<I2C>) -> Self {
        Protocol {
            transport,
            mode: Mode::Application,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Override the tracked mode when it is known from outside
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.transport.cancel_token()
    }

    pub fn release(self) -> I2C {
        self.transport.release()
    }

    /// Wait until the device acknowledges its address
    pub fn poll_ready(&mut self, budget: (Duration, Duration)) -> Result<(), ProtocolError> {
        self.transport.poll_ready(budget.0, budget.1)
    }

    fn expect_mode(&self, allowed: &[Mode]) -> Result<(), ProtocolError> {
        if allowed.contains(&self.mode) {
            return Ok(());
        }

        Err(ProtocolError::WrongMode {
            expected: allowed[0],
            actual: self.mode,
        })
    }

    fn expect_registers(&self) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Application, Mode::UpgraderIsp])
    }

    pub fn read_u8(&mut self, addr: u8) -> Result<u8, ProtocolError> {
        self.expect_registers()?;
        let reply = self
            .transport
            .send_receive(&[command::REG8_READ, addr], 1)?;
        Ok(reply[0])
    }

    pub fn read_u16(&mut self, addr: u8) -> Result<u16, ProtocolError> {
        self.expect_registers()?;
        let reply = self
            .transport
            .send_receive(&[command::REG16_READ, addr], 2)?;
        Ok(u16::from_le_bytes([reply[0], reply[1]]))
    }

    pub fn read_u32(&mut self, addr: u8) -> Result<u32, ProtocolError> {
        self.expect_registers()?;
        let reply = self
            .transport
            .send_receive(&[command::REG32_READ, addr], 4)?;
        Ok(u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]))
    }

    pub fn write_u8(&mut self, addr: u8, value: u8) -> Result<(), ProtocolError> {
        self.expect_registers()?;
        self.transport.send(&[command::REG8_WRITE, addr, value])
    }

    pub fn write_u16(&mut self, addr: u8, value: u16) -> Result<(), ProtocolError> {
        self.expect_registers()?;
        let [lo, hi] = value.to_le_bytes();
        self.transport.send(&[command::REG16_WRITE, addr, lo, hi])
    }

    pub fn write_u32(&mut self, addr: u8, value: u32) -> Result<(), ProtocolError> {
        self.expect_registers()?;
        let [b0, b1, b2, b3] = value.to_le_bytes();
        self.transport
            .send(&[command::REG32_WRITE, addr, b0, b1, b2, b3])
    }

    fn read_version(&mut self, major: u8, minor: u8) -> Result<u16, ProtocolError> {
        let major = self.read_u8(major)?;
        let minor = self.read_u8(minor)?;
        Ok(u16::from(major) << 8 | u16::from(minor))
    }

    pub fn mcu_version(&mut self) -> Result<u16, ProtocolError> {
        self.read_version(reg::MCU_MAJOR_VERSION, reg::MCU_MINOR_VERSION)
    }

    pub fn nvm_version(&mut self) -> Result<u16, ProtocolError> {
        self.read_version(reg::NVM_MAJOR_VERSION, reg::NVM_MINOR_VERSION)
    }

    pub fn isp_version(&mut self) -> Result<u16, ProtocolError> {
        self.read_version(reg::ISP_MAJOR_VERSION, reg::ISP_MINOR_VERSION)
    }

    pub fn camera_type(&mut self) -> Result<CameraType, ProtocolError> {
        Ok(CameraType::from_code(self.read_u8(reg::CAMERA_TYPE)?))
    }

    pub fn read_serial(&mut self) -> Result<[u8; 16], ProtocolError> {
        self.expect_registers()?;
        let reply = self.transport.send_receive(&[command::READ_SERIAL], 16)?;
        let mut serial = [0u8; 16];
        serial.copy_from_slice(&reply);
        Ok(serial)
    }

    /// Read `size` bytes of the calibration block through the application
    pub fn read_nvm(&mut self, page: u8, offset: u8, size: usize) -> Result<Vec<u8>, ProtocolError> {
        self.expect_mode(&[Mode::Application])?;
        check_nvm_access(page, offset, size)?;
        self.transport
            .send_receive(&[command::NVM_READ, page, offset, size as u8], size)
    }

    pub fn write_nvm(&mut self, page: u8, offset: u8, data: &[u8]) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Application])?;
        check_nvm_access(page, offset, data.len())?;
        let mut request = vec![command::NVM_WRITE, page, offset];
        request.extend_from_slice(data);
        self.transport.send(&request)
    }

    /// Unlock the bootloader entry
    pub fn set_password(&mut self, password: u16) -> Result<(), ProtocolError> {
        let [lo, hi] = password.to_le_bytes();
        self.write_u8(reg::PASSWORD_LOW, lo)?;
        self.write_u8(reg::PASSWORD_HIGH, hi)
    }

    /// Ask the application to jump into the bootloader.
    ///
    /// The device stops answering for a while; callers wait with
    /// [`Protocol::poll_ready`] before the next command.
    pub fn start_bootloader(&mut self) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Application])?;
        self.write_u8(reg::SAVE_RESTART, save_restart::START_BOOTLOADER)?;
        self.transition(Mode::Bootloader);
        Ok(())
    }

    /// Route the SPI flash commands to the ISP flash, application keeps running
    pub fn enter_upgrader_mode(&mut self) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Application])?;
        self.write_u8(reg::UPGRADER_MODE, UPGRADER_MODE_ENTER)?;
        self.transition(Mode::UpgraderIsp);
        Ok(())
    }

    /// Restart the application firmware
    pub fn restart(&mut self) -> Result<(), ProtocolError> {
        self.write_u8(reg::SAVE_RESTART, save_restart::RESTART)?;
        self.transition(Mode::Application);
        Ok(())
    }

    /// Read boot identifier, answered in every mode
    pub fn boot_id(&mut self) -> Result<u16, ProtocolError> {
        let reply = self.transport.send_receive(&[command::BOOT_ID], 2)?;
        Ok(u16::from(reply[1]) << 8 | u16::from(reply[0]))
    }

    /// Probe the boot identifier and track the mode it reveals
    pub fn detect_mode(&mut self) -> Result<Mode, ProtocolError> {
        let id = self.boot_id()?;
        debug!("Boot id 0x{:04X}", id);

        if id == BOOT_ID {
            self.mode = Mode::Bootloader;
        } else if self.mode == Mode::Bootloader {
            self.mode = Mode::Application;
        }

        Ok(self.mode)
    }

    pub fn boot_camera_type(&mut self) -> Result<CameraType, ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        let reply = self
            .transport
            .send_receive(&[command::BOOT_CAMERA_TYPE], 1)?;
        Ok(CameraType::from_code(reply[0]))
    }

    pub fn flash_read(&mut self, addr: u16, size: usize) -> Result<Vec<u8>, ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        check_chunk(size)?;
        let [lo, hi] = addr.to_le_bytes();
        self.transport
            .send_receive(&[command::FLASH_READ, lo, hi, size as u8], size)
    }

    pub fn flash_write(&mut self, addr: u16, data: &[u8]) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        check_chunk(data.len())?;
        let [lo, hi] = addr.to_le_bytes();
        let mut request = vec![command::FLASH_WRITE, lo, hi];
        request.extend_from_slice(data);
        self.transport.send(&request)
    }

    /// Erase up to one page starting at `addr`
    pub fn page_erase(&mut self, addr: u16, size: u16) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        if size > FLASH_PAGE_SIZE {
            return Err(ProtocolError::InvalidArgument(format!(
                "erase size {} exceeds page size {}",
                size, FLASH_PAGE_SIZE
            )));
        }

        let [a0, a1] = addr.to_le_bytes();
        let [s0, s1] = size.to_le_bytes();
        self.transport
            .send(&[command::FLASH_ERASE, a0, a1, s0, s1])
    }

    /// Erase application and calibration regions at once
    pub fn erase_all(&mut self) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        debug!("Erasing application and NVM");
        self.transport.send(&[command::FLASH_ERASE, 0x01])
    }

    pub fn erase_app(&mut self) -> Result<(), ProtocolError> {
        debug!("Erasing application region");
        self.erase_region(FLASH_APP_START, FLASH_APP_MAX)
    }

    pub fn erase_nvm(&mut self) -> Result<(), ProtocolError> {
        debug!("Erasing NVM region");
        self.erase_region(FLASH_NVM_START, FLASH_NVM_MAX)
    }

    fn erase_region(&mut self, start: u32, max: u32) -> Result<(), ProtocolError> {
        let mut page = start;
        while page < max {
            self.page_erase(page as u16, FLASH_PAGE_SIZE)?;
            self.poll_ready(timing::ERASE)?;
            page += u32::from(FLASH_PAGE_SIZE);
        }
        Ok(())
    }

    /// Let the bootloader compute the CRC-16 of the application region
    pub fn calc_app_crc(&mut self) -> Result<u16, ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        self.transport.send(&[command::APP_CALC_CRC, 0x00])?;
        self.poll_ready(timing::APP_CRC)?;
        let reply = self.transport.receive(2)?;
        Ok(u16::from_le_bytes([reply[0], reply[1]]))
    }

    /// CRC stored by the image itself
    pub fn read_app_crc(&mut self) -> Result<u16, ProtocolError> {
        let data = self.flash_read(FLASH_APP_CRC_ADDRESS, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    pub fn read_app_size(&mut self) -> Result<u16, ProtocolError> {
        let data = self.flash_read(FLASH_APP_SIZE_ADDRESS, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    /// Leave the bootloader and start the application
    pub fn reboot(&mut self) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::Bootloader])?;
        self.transport.send(&[command::REBOOT, 0x01])?;
        self.transition(Mode::Application);
        Ok(())
    }

    pub fn spi_status(&mut self) -> Result<u16, ProtocolError> {
        self.expect_mode(&[Mode::UpgraderIsp])?;
        let reply = self
            .transport
            .send_receive(&[command::ISP_FLASH_GET_STATUS], 2)?;
        Ok(u16::from(reply[1]) << 8 | u16::from(reply[0]))
    }

    fn wait_spi_idle(&mut self, interval: Option<Duration>) -> Result<(), ProtocolError> {
        let mut status = 0xFFFF;

        for _ in 0..timing::SPI_STATUS_POLLS {
            status = self.spi_status()?;
            if status == 0x0000 {
                return Ok(());
            }
            if let Some(interval) = interval {
                std::thread::sleep(interval);
            }
        }

        Err(ProtocolError::FlashBusyTimeout(status))
    }

    pub fn isp_write(&mut self, addr: u32, data: &[u8]) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::UpgraderIsp])?;
        check_chunk(data.len())?;
        let [a0, a1, a2] = isp_address(addr)?;
        let mut request = vec![command::ISP_FLASH_WRITE, a0, a1, a2];
        request.extend_from_slice(data);
        self.transport.send(&request)?;
        self.wait_spi_idle(None)
    }

    pub fn isp_erase_all(&mut self) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::UpgraderIsp])?;
        debug!("Erasing ISP flash");
        self.transport.send(&[command::ISP_FLASH_ERASE, 0x01])?;
        std::thread::sleep(timing::ISP_ERASE_STATUS_INTERVAL);
        self.wait_spi_idle(Some(timing::ISP_ERASE_STATUS_INTERVAL))
    }

    pub fn isp_erase_page(&mut self, addr: u32) -> Result<(), ProtocolError> {
        self.expect_mode(&[Mode::UpgraderIsp])?;
        let [a0, a1, a2] = isp_address(addr)?;
        self.transport
            .send(&[command::ISP_FLASH_BLOCK_ERASE, a0, a1, a2])?;
        self.poll_ready(timing::ISP_PAGE_ERASE)
    }

    /// CRC-16 of the ISP flash between `start` and `end`, both inclusive
    pub fn isp_calc_crc(&mut self, start: u32, end: u32) -> Result<u16, ProtocolError> {
        self.expect_mode(&[Mode::UpgraderIsp])?;
        if start > end {
            return Err(ProtocolError::InvalidArgument(format!(
                "CRC range 0x{:06X}..0x{:06X} is empty",
                start, end
            )));
        }

        let [s0, s1, s2] = isp_address(start)?;
        let [e0, e1, e2] = isp_address(end)?;
        self.transport
            .send(&[command::ISP_FLASH_GET_CRC, s0, s1, s2, e0, e1, e2])?;
        self.poll_ready(timing::ISP_CRC)?;
        let reply = self.transport.receive(2)?;
        Ok(u16::from_le_bytes([reply[0], reply[1]]))
    }

    pub fn spi_id(&mut self, kind: SpiIdCommand) -> Result<SpiId, ProtocolError> {
        self.expect_mode(&[Mode::UpgraderIsp])?;
        let code = match kind {
            SpiIdCommand::Jedec => 0x9F,
            SpiIdCommand::Manufacturer => 0x90,
        };

        let reply = self
            .transport
            .send_receive(&[command::ISP_FLASH_GET_ID, code], 4)?;

        let id = match kind {
            SpiIdCommand::Jedec => SpiId {
                manufacturer: reply[0],
                device: u16::from(reply[1]) << 8 | u16::from(reply[2]),
            },
            SpiIdCommand::Manufacturer => SpiId {
                manufacturer: reply[2],
                device: u16::from(reply[3]),
            },
        };
        Ok(id)
    }

    fn transition(&mut self, mode: Mode) {
        if self.mode != mode {
            debug!("Mode {} -> {}", self.mode, mode);
            self.mode = mode;
        }
    }
}

fn check_chunk(size: usize) -> Result<(), ProtocolError> {
    if size == 0 || size > MAX_CHUNK {
        return Err(ProtocolError::InvalidArgument(format!(
            "transfer of {} bytes, expected 1..={}",
            size, MAX_CHUNK
        )));
    }
    Ok(())
}

fn check_nvm_access(page: u8, offset: u8, size: usize) -> Result<(), ProtocolError> {
    if page > 3 {
        return Err(ProtocolError::InvalidArgument(format!(
            "NVM page {} out of range",
            page
        )));
    }
    check_chunk(size)?;
    if usize::from(offset) + size > 256 {
        return Err(ProtocolError::InvalidArgument(format!(
            "NVM access 0x{:02X}+{} crosses the page end",
            offset, size
        )));
    }
    Ok(())
}

fn isp_address(addr: u32) -> Result<[u8; 3], ProtocolError> {
    if addr > ISP_FLASH_MAX {
        return Err(ProtocolError::InvalidArgument(format!(
            "ISP address 0x{:X} beyond 24 bits",
            addr
        )));
    }
    let [a0, a1, a2, _] = addr.to_le_bytes();
    Ok([a0, a1, a2])
}
