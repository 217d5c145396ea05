//! Ar0234 device file
//!
//! Per-device state: tracked firmware versions, the control cache and the
//! register sequences behind every control get/set

use super::controls::{
    self, auto_wb_decode, auto_wb_encode, color_effect_decode, color_effect_encode,
    exposure_decode, exposure_encode, exposure_mode_decode, exposure_mode_encode, get_bit,
    metering_decode, mirror_flip_encode, power_line_decode, power_line_encode, register_decode,
    register_encode, set_bit, wb_preset_from_kelvin, wb_preset_writes, Action, Codec,
    ControlCache, ControlId, Descriptor, Width, CONTROLS, WB_PUSH_TO_WHITE,
};
use super::definitions::{reg, save_restart, timing};
use super::modes::{select_mode, FrameMode};
use super::protocol::{CameraType, Mode, Protocol, ProtocolError};
use embedded_hal::i2c::I2c;
use log::{debug, warn};
use std::thread;

/// Register value of `reg::POWER` per state
const POWER_ON: u8 = 0x00;
const POWER_OFF: u8 = 0x01;

/// Per-device settings of the update orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Channel the device is attached to, used in log messages
    pub channel_id: u8,
    /// NVM version the device should carry, 0 disables NVM updates
    pub target_nvm_version: u16,
    /// Name of the separately shipped NVM image
    pub nvm_image_name: Option<String>,
}

impl DeviceConfig {
    pub fn new(channel_id: u8) -> Self {
        DeviceConfig {
            channel_id,
            ..Default::default()
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            channel_id: 0,
            target_nvm_version: 0x0001,
            nvm_image_name: None,
        }
    }
}

/// Firmware versions as last read from, or written to, the device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Versions {
    pub mcu: u16,
    pub nvm: u16,
    pub isp: u16,
}

pub struct Device<I2C> {
    protocol: Protocol<I2C>,
    config: DeviceConfig,
    versions: Versions,
    camera_type: CameraType,
    controls: ControlCache,
    frame_mode: Option<FrameMode>,
}

impl<I2C: I2c> Device<I2C> {
    pub fn new(protocol: Protocol<I2C>, config: DeviceConfig) -> Self {
        Device {
            protocol,
            config,
            versions: Versions::default(),
            camera_type: CameraType::Unknown,
            controls: ControlCache::new(),
            frame_mode: None,
        }
    }

    pub fn protocol_mut(&mut self) -> &mut Protocol<I2C> {
        &mut self.protocol
    }

    pub fn release(self) -> I2C {
        self.protocol.release()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn versions(&self) -> Versions {
        self.versions
    }

    pub fn versions_mut(&mut self) -> &mut Versions {
        &mut self.versions
    }

    pub fn camera_type(&self) -> CameraType {
        self.camera_type
    }

    pub fn frame_mode(&self) -> Option<FrameMode> {
        self.frame_mode
    }

    /// Read all three firmware versions from the application
    pub fn read_versions(&mut self) -> Result<Versions, ProtocolError> {
        self.versions = Versions {
            mcu: self.protocol.mcu_version()?,
            nvm: self.protocol.nvm_version()?,
            isp: self.protocol.isp_version()?,
        };
        debug!(
            "Channel {}: MCU 0x{:04X}, NVM 0x{:04X}, ISP {}",
            self.config.channel_id, self.versions.mcu, self.versions.nvm, self.versions.isp
        );
        Ok(self.versions)
    }

    pub fn read_camera_type(&mut self) -> Result<CameraType, ProtocolError> {
        self.camera_type = self.protocol.camera_type()?;
        Ok(self.camera_type)
    }

    /// Switch the sensor on or off, waiting for it to answer after power-up
    pub fn power(&mut self, on: bool) -> Result<(), ProtocolError> {
        if !on {
            debug!("Channel {}: power down", self.config.channel_id);
            return self.protocol.write_u8(reg::POWER, POWER_OFF);
        }

        debug!("Channel {}: power up", self.config.channel_id);
        // The bootloader has no power register, it only needs to answer
        if self.protocol.mode() != Mode::Bootloader {
            self.protocol.write_u8(reg::POWER, POWER_ON)?;
            thread::sleep(timing::POWER_UP_SETTLE);
        }
        self.protocol.poll_ready(timing::POWER_UP)
    }

    /// Pick the output mode, the ISP firmware is not told until streaming starts
    pub fn set_format(&mut self, width: u32, height: u32, fps: u32) -> Result<FrameMode, ProtocolError> {
        let mode = select_mode(width, height, fps)?;
        if mode.fps != fps {
            debug!("{} fps not offered for {}x{}, using {}", fps, width, height, mode);
        }
        self.frame_mode = Some(mode);
        Ok(mode)
    }

    /// Cached value, as of the last get/set/refresh
    pub fn cached_control(&self, id: ControlId) -> i64 {
        self.controls.get(id)
    }

    pub fn set_control(&mut self, id: ControlId, value: i64) -> Result<(), ProtocolError> {
        let descriptor = controls::descriptor(id)?;
        descriptor.check(value)?;

        match descriptor.codec {
            Codec::Register { reg, width } => match width {
                Width::U8 | Width::I8 => self
                    .protocol
                    .write_u8(reg, register_encode(width, value) as u8)?,
                Width::U16 | Width::I16 => {
                    self.protocol.write_u16(reg, register_encode(width, value))?
                }
            },
            Codec::Microseconds { reg } => self.protocol.write_u32(reg, value as u32 * 100)?,
            Codec::FixedPoint { reg } => self
                .protocol
                .write_u16(reg, exposure_encode(value as i32) as u16)?,
            Codec::Bit { reg, bit } => {
                let current = self.protocol.read_u8(reg)?;
                self.protocol.write_u8(reg, set_bit(current, bit, value != 0))?;
            }
            Codec::MirrorFlip { bit } => {
                let (hflip, vflip) = if bit == 0 {
                    (value != 0, self.controls.get(ControlId::VerticalFlip) != 0)
                } else {
                    (self.controls.get(ControlId::HorizontalFlip) != 0, value != 0)
                };
                self.protocol
                    .write_u8(reg::MIRROR_FLIP, mirror_flip_encode(hflip, vflip))?;
            }
            Codec::ExposureMode { reg } => {
                let code = exposure_mode_encode(value).ok_or_else(|| invalid(descriptor, value))?;
                self.protocol.write_u8(reg, code)?;
            }
            Codec::Metering { reg } => self.protocol.write_u8(reg, value as u8)?,
            Codec::AutoWhiteBalance { reg } => {
                self.protocol.write_u8(reg, auto_wb_encode(value != 0))?
            }
            Codec::WhiteBalancePreset => {
                let auto_wb = self.controls.get(ControlId::AutoWhiteBalance) != 0;
                let (mode, kelvin) =
                    wb_preset_writes(value, auto_wb).ok_or_else(|| invalid(descriptor, value))?;
                if let Some(mode) = mode {
                    self.protocol.write_u8(reg::WHITE_BALANCE, mode)?;
                }
                self.protocol.write_u16(reg::WB_TEMPERATURE, kelvin)?;
                self.controls
                    .set(ControlId::WhiteBalanceTemperature, i64::from(kelvin));
            }
            Codec::PowerLine => {
                let current = self.protocol.read_u8(reg::ANTIFLICKER_MODE)?;
                let (mode, frequency) = power_line_encode(current, value);
                self.protocol.write_u8(reg::ANTIFLICKER_MODE, mode)?;
                if let Some(frequency) = frequency {
                    self.protocol.write_u8(reg::ANTIFLICKER_FREQ, frequency)?;
                }
            }
            Codec::ColorEffect { reg } => self.protocol.write_u8(reg, color_effect_encode(value))?,
            Codec::Action(action) => return self.run_action(action),
        }

        debug!("Set {} = {}", descriptor.key, value);
        self.controls.set(id, value);
        Ok(())
    }

    /// Read a control from the device and update the cache
    pub fn get_control(&mut self, id: ControlId) -> Result<i64, ProtocolError> {
        let descriptor = controls::descriptor(id)?;
        if descriptor.is_action() {
            return Err(ProtocolError::InvalidArgument(format!(
                "{} is write-only",
                descriptor.key
            )));
        }

        match self.read_control(descriptor)? {
            Some(value) => {
                self.controls.set(id, value);
                Ok(value)
            }
            None => Ok(self.controls.get(id)),
        }
    }

    /// Re-read every readable control into the cache
    pub fn refresh_controls(&mut self) -> Result<(), ProtocolError> {
        for descriptor in CONTROLS.iter().filter(|d| !d.is_action()) {
            if let Some(value) = self.read_control(descriptor)? {
                self.controls.set(descriptor.id, value);
            }
        }
        debug!("Channel {}: control cache refreshed", self.config.channel_id);
        Ok(())
    }

    // None when the register holds nothing the control can represent
    fn read_control(&mut self, descriptor: &Descriptor) -> Result<Option<i64>, ProtocolError> {
        let value = match descriptor.codec {
            Codec::Register { reg, width } => {
                let raw = match width {
                    Width::U8 | Width::I8 => u16::from(self.protocol.read_u8(reg)?),
                    Width::U16 | Width::I16 => self.protocol.read_u16(reg)?,
                };
                register_decode(width, raw)
            }
            Codec::Microseconds { reg } => i64::from(self.protocol.read_u32(reg)? / 100),
            Codec::FixedPoint { reg } => i64::from(exposure_decode(self.protocol.read_u16(reg)?)),
            Codec::Bit { reg, bit } => get_bit(self.protocol.read_u8(reg)?, bit),
            Codec::MirrorFlip { bit } => get_bit(self.protocol.read_u8(reg::MIRROR_FLIP)?, bit),
            Codec::ExposureMode { reg } => exposure_mode_decode(self.protocol.read_u8(reg)?),
            Codec::Metering { reg } => metering_decode(self.protocol.read_u8(reg)?),
            Codec::AutoWhiteBalance { reg } => {
                i64::from(auto_wb_decode(self.protocol.read_u8(reg)?))
            }
            Codec::WhiteBalancePreset => {
                let kelvin = self.protocol.read_u16(reg::WB_TEMPERATURE)?;
                match wb_preset_from_kelvin(kelvin) {
                    Some(preset) => preset,
                    None => {
                        warn!(
                            "White balance temperature {} K matches no preset, keeping {}",
                            kelvin,
                            self.controls.get(ControlId::WhiteBalancePreset)
                        );
                        return Ok(None);
                    }
                }
            }
            Codec::PowerLine => {
                let mode = self.protocol.read_u8(reg::ANTIFLICKER_MODE)?;
                let frequency = match mode & 0x03 {
                    1 | 3 => self.protocol.read_u8(reg::ANTIFLICKER_FREQ)?,
                    _ => 0,
                };
                power_line_decode(mode, frequency)
            }
            Codec::ColorEffect { reg } => color_effect_decode(self.protocol.read_u8(reg)?),
            Codec::Action(_) => return Ok(None),
        };

        Ok(Some(value))
    }

    fn run_action(&mut self, action: Action) -> Result<(), ProtocolError> {
        debug!("Action {:?}", action);

        match action {
            Action::StoreRegisters => self
                .protocol
                .write_u8(reg::SAVE_RESTART, save_restart::STORE_REGISTERS),
            Action::RestoreRegisters => {
                self.protocol
                    .write_u8(reg::SAVE_RESTART, save_restart::RESTORE_REGISTERS)?;
                thread::sleep(timing::RESTORE_SETTLE);
                self.refresh_controls()
            }
            Action::RestoreFactory => {
                self.protocol
                    .write_u8(reg::SAVE_RESTART, save_restart::RESTORE_FACTORY_REGISTERS)?;
                thread::sleep(timing::FACTORY_SETTLE);
                self.protocol
                    .write_u8(reg::SAVE_RESTART, save_restart::RESTORE_FACTORY_CALIBRATION)?;
                thread::sleep(timing::FACTORY_SETTLE);
                self.refresh_controls()
            }
            Action::Reboot => self.protocol.restart(),
            Action::PushToWhite => self.protocol.write_u8(reg::WHITE_BALANCE, WB_PUSH_TO_WHITE),
        }
    }
}

fn invalid(descriptor: &Descriptor, value: i64) -> ProtocolError {
    ProtocolError::InvalidValue {
        control: descriptor.key,
        value,
        min: descriptor.min,
        max: descriptor.max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use std::collections::HashMap;

    /// Register file answering the 8/16/32-bit register commands
    #[derive(Default)]
    struct Registers {
        bytes: HashMap<u8, u8>,
        writes: Vec<Vec<u8>>,
        pending: Option<(u8, usize)>,
    }

    impl ErrorType for Registers {
        type Error = ErrorKind;
    }

    impl I2c for Registers {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) if bytes.len() >= 2 => {
                        let (cmd, addr) = (bytes[0], bytes[1]);
                        match cmd {
                            0x31 => self.pending = Some((addr, 1)),
                            0x33 => self.pending = Some((addr, 2)),
                            0x35 => self.pending = Some((addr, 4)),
                            _ => {
                                for (i, b) in bytes[2..].iter().enumerate() {
                                    self.bytes.insert(addr.wrapping_add(i as u8), *b);
                                }
                                self.writes.push(bytes.to_vec());
                            }
                        }
                    }
                    Operation::Write(_) => {}
                    Operation::Read(buf) => {
                        let (addr, _) = self.pending.take().unwrap_or((0, 0));
                        for (i, dst) in buf.iter_mut().enumerate() {
                            *dst = *self.bytes.get(&addr.wrapping_add(i as u8)).unwrap_or(&0);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn device(preset: &[(u8, u8)]) -> Device<Registers> {
        let mut bus = Registers::default();
        bus.bytes.extend(preset.iter().copied());
        Device::new(
            Protocol::new(Transport::new(bus, 0x3C)),
            DeviceConfig::default(),
        )
    }

    #[test]
    fn mirror_and_flip_keep_each_other() {
        let mut dev = device(&[]);
        dev.set_control(ControlId::VerticalFlip, 1).unwrap();
        dev.set_control(ControlId::HorizontalFlip, 1).unwrap();
        dev.set_control(ControlId::VerticalFlip, 0).unwrap();

        let writes = dev.release().writes;
        assert_eq!(writes[0], vec![0x30, reg::MIRROR_FLIP, 0x02]);
        assert_eq!(writes[1], vec![0x30, reg::MIRROR_FLIP, 0x03]);
        assert_eq!(writes[2], vec![0x30, reg::MIRROR_FLIP, 0x01]);
    }

    #[test]
    fn face_detect_bits_read_modify_write() {
        let mut dev = device(&[(reg::FACE_DETECT, 0b0010_0001)]);
        dev.set_control(ControlId::FaceDetectRectangles, 1).unwrap();
        assert_eq!(dev.get_control(ControlId::FaceDetectEnable).unwrap(), 1);
        assert_eq!(dev.get_control(ControlId::FaceDetectSaturated).unwrap(), 1);

        let writes = dev.release().writes;
        assert_eq!(writes, vec![vec![0x30, reg::FACE_DETECT, 0b0011_0001]]);
    }

    #[test]
    fn exposure_absolute_in_100us_units() {
        let mut dev = device(&[]);
        dev.set_control(ControlId::ExposureAbsolute, 333).unwrap();
        assert_eq!(dev.get_control(ControlId::ExposureAbsolute).unwrap(), 333);

        let writes = dev.release().writes;
        assert_eq!(
            writes[0],
            vec![0x34, reg::EXPOSURE_ABS, 0x14, 0x82, 0x00, 0x00]
        );
    }

    #[test]
    fn out_of_range_value_is_not_written() {
        let mut dev = device(&[]);
        assert!(matches!(
            dev.set_control(ControlId::Pan, 0x81),
            Err(ProtocolError::InvalidValue { control: "pan", .. })
        ));
        assert!(dev.release().writes.is_empty());
    }

    #[test]
    fn white_balance_preset_honours_auto_mode() {
        let mut dev = device(&[]);
        dev.set_control(ControlId::AutoWhiteBalance, 0).unwrap();
        dev.set_control(ControlId::WhiteBalancePreset, 8).unwrap();
        assert_eq!(dev.cached_control(ControlId::WhiteBalanceTemperature), 7500);

        let writes = dev.release().writes;
        assert_eq!(writes[0], vec![0x30, reg::WHITE_BALANCE, 0x07]);
        assert_eq!(writes[1], vec![0x30, reg::WHITE_BALANCE, 0x07]);
        assert_eq!(writes[2], vec![0x32, reg::WB_TEMPERATURE, 0x4C, 0x1D]);
    }

    #[test]
    fn white_balance_gap_keeps_cached_preset() {
        // 5000 K = 0x1388
        let mut dev = device(&[(reg::WB_TEMPERATURE, 0x88), (reg::WB_TEMPERATURE + 1, 0x13)]);
        assert_eq!(dev.get_control(ControlId::WhiteBalancePreset).unwrap(), 6);
    }

    #[test]
    fn power_line_frequency_read_only_when_used() {
        let mut dev = device(&[(reg::ANTIFLICKER_MODE, 0x02), (reg::ANTIFLICKER_FREQ, 50)]);
        assert_eq!(dev.get_control(ControlId::PowerLineFrequency).unwrap(), 3);

        dev.set_control(ControlId::PowerLineFrequency, 2).unwrap();
        assert_eq!(dev.get_control(ControlId::PowerLineFrequency).unwrap(), 2);
    }

    #[test]
    fn actions_are_write_only() {
        let mut dev = device(&[]);
        assert!(matches!(
            dev.get_control(ControlId::StoreRegisters),
            Err(ProtocolError::InvalidArgument(_))
        ));
        dev.set_control(ControlId::StoreRegisters, 0).unwrap();
        dev.set_control(ControlId::DoWhiteBalance, 0).unwrap();

        let writes = dev.release().writes;
        assert_eq!(writes[0], vec![0x30, reg::SAVE_RESTART, 0x01]);
        assert_eq!(writes[1], vec![0x30, reg::WHITE_BALANCE, 0x08]);
    }

    #[test]
    fn format_falls_back_to_first_rate() {
        let mut dev = device(&[]);
        let mode = dev.set_format(1280, 720, 15).unwrap();
        assert_eq!((mode.fps, mode.code), (25, 12));
        assert_eq!(dev.frame_mode(), Some(mode));
        assert!(dev.set_format(1, 1, 30).is_err());
        assert_eq!(dev.frame_mode(), Some(mode));
    }
}
