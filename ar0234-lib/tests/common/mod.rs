//! Simulated companion chip for the integration tests
#![allow(dead_code)]

use ar0234_lib::crc::crc16;
use ar0234_lib::definitions::{
    reg, DEFAULT_I2C_ADDRESS, FLASH_APP_CRC_ADDRESS, FLASH_APP_SIZE_ADDRESS, FLASH_APP_START,
    FLASH_NVM_MAX, FLASH_NVM_START,
};
use ar0234_lib::device::DeviceConfig;
use ar0234_lib::transport::Transport;
use ar0234_lib::Ar0234;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    Application,
    Bootloader,
}

/// Side effects the chip saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RegWrite { reg: u8, value: u8 },
    EnterBootloader,
    EnterUpgrader,
    PageErase { addr: u32, size: u32 },
    EraseAll,
    FlashWrite { addr: u32, len: usize },
    AppCrc,
    Reboot,
    Restart,
    IspEraseAll,
    IspWrite { addr: u32, len: usize },
    IspCrc { start: u32, end: u32 },
}

pub struct SimState {
    pub firmware: Firmware,
    pub upgrader: bool,
    pub regs: [u8; 256],
    pub flash: Vec<u8>,
    pub isp_flash: Vec<u8>,
    /// Transactions still refused before the chip answers again
    pub busy: usize,
    pub events: Vec<Event>,
    pending: Vec<u8>,
    pub camera_type: u8,
    /// Versions reported once the written firmware boots
    pub flashed_mcu_version: u16,
    pub flashed_nvm_version: u16,
    pub flashed_isp_version: u16,
    pub corrupt_app_crc: bool,
    pub corrupt_isp_crc: bool,
    /// SPI status stays busy once ISP data has been written
    pub isp_flash_stuck: bool,
    app_written: bool,
    nvm_written: bool,
    isp_written: bool,
}

impl SimState {
    fn blank(firmware: Firmware) -> Self {
        SimState {
            firmware,
            upgrader: false,
            regs: [0; 256],
            flash: vec![0xFF; 0x1_0000],
            isp_flash: vec![0xFF; 0x1_0000],
            busy: 0,
            events: Vec::new(),
            pending: Vec::new(),
            camera_type: 1,
            flashed_mcu_version: 0,
            flashed_nvm_version: 0,
            flashed_isp_version: 0,
            corrupt_app_crc: false,
            corrupt_isp_crc: false,
            isp_flash_stuck: false,
            app_written: false,
            nvm_written: false,
            isp_written: false,
        }
    }

    pub fn application(mcu: u16, nvm: u16, isp: u16) -> Self {
        let mut state = SimState::blank(Firmware::Application);
        state.set_versions(mcu, nvm, isp);
        state
    }

    /// Chip stuck in its bootloader, version registers as given
    pub fn bootloader(mcu: u16, nvm: u16, isp: u16) -> Self {
        let mut state = SimState::blank(Firmware::Bootloader);
        state.set_versions(mcu, nvm, isp);
        state
    }

    pub fn set_versions(&mut self, mcu: u16, nvm: u16, isp: u16) {
        self.set_version(reg::MCU_MAJOR_VERSION, reg::MCU_MINOR_VERSION, mcu);
        self.set_version(reg::NVM_MAJOR_VERSION, reg::NVM_MINOR_VERSION, nvm);
        self.set_version(reg::ISP_MAJOR_VERSION, reg::ISP_MINOR_VERSION, isp);
    }

    pub fn set_version(&mut self, major: u8, minor: u8, version: u16) {
        let [hi, lo] = version.to_be_bytes();
        self.regs[usize::from(major)] = hi;
        self.regs[usize::from(minor)] = lo;
    }

    pub fn version(&self, major: u8, minor: u8) -> u16 {
        u16::from(self.regs[usize::from(major)]) << 8 | u16::from(self.regs[usize::from(minor)])
    }

    pub fn reg16(&self, addr: u8) -> u16 {
        u16::from_le_bytes([
            self.regs[usize::from(addr)],
            self.regs[usize::from(addr.wrapping_add(1))],
        ])
    }

    pub fn flash_writes_between(&self, start: u32, end: u32) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::FlashWrite { addr, .. } if (start..=end).contains(addr)))
            .count()
    }

    pub fn erases_between(&self, start: u32, end: u32) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::PageErase { addr, .. } if (start..=end).contains(addr)))
            .count()
    }

    pub fn saw(&self, event: &Event) -> bool {
        self.events.contains(event)
    }

    fn command(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self.firmware {
            Firmware::Application => self.application_command(bytes),
            Firmware::Bootloader => self.bootloader_command(bytes),
        }
    }

    fn answer(&mut self, buf: &mut [u8]) {
        let data = std::mem::take(&mut self.pending);
        for (i, dst) in buf.iter_mut().enumerate() {
            *dst = data.get(i).copied().unwrap_or(0);
        }
    }

    fn read_regs(&mut self, addr: u8, len: u8) {
        self.pending = (0..len)
            .map(|i| self.regs[usize::from(addr.wrapping_add(i))])
            .collect();
    }

    fn application_command(&mut self, bytes: &[u8]) {
        let arg = |i: usize| bytes.get(i).copied().unwrap_or(0);

        match bytes[0] {
            0x30 => self.write_register(arg(1), arg(2)),
            0x32 | 0x34 => {
                for (i, value) in bytes[2..].iter().enumerate() {
                    self.regs[usize::from(arg(1).wrapping_add(i as u8))] = *value;
                }
            }
            0x31 => self.read_regs(arg(1), 1),
            0x33 => self.read_regs(arg(1), 2),
            0x35 => self.read_regs(arg(1), 4),
            0x47 if bytes.len() == 1 => self.pending = vec![0x00, 0x00],
            0x61 => self.pending = b"AR0234-SIM-00001".to_vec(),
            _ if self.upgrader => self.upgrader_command(bytes),
            _ => {}
        }
    }

    fn write_register(&mut self, addr: u8, value: u8) {
        self.regs[usize::from(addr)] = value;
        self.events.push(Event::RegWrite { reg: addr, value });

        match (addr, value) {
            (reg::SAVE_RESTART, 0xA5)
                if self.regs[usize::from(reg::PASSWORD_LOW)] == 0x54
                    && self.regs[usize::from(reg::PASSWORD_HIGH)] == 0x05 =>
            {
                self.firmware = Firmware::Bootloader;
                self.upgrader = false;
                self.busy = 2;
                self.events.push(Event::EnterBootloader);
            }
            (reg::SAVE_RESTART, 0x99) => {
                if self.isp_written {
                    let version = self.flashed_isp_version;
                    self.set_version(reg::ISP_MAJOR_VERSION, reg::ISP_MINOR_VERSION, version);
                    self.isp_written = false;
                }
                self.upgrader = false;
                self.busy = 2;
                self.events.push(Event::Restart);
            }
            (reg::UPGRADER_MODE, 0x82) => {
                self.upgrader = true;
                self.events.push(Event::EnterUpgrader);
            }
            _ => {}
        }
    }

    fn upgrader_command(&mut self, bytes: &[u8]) {
        let addr = |from: usize| {
            u32::from_le_bytes([bytes[from], bytes[from + 1], bytes[from + 2], 0]) as usize
        };

        match bytes[0] {
            0x40 => {
                let start = addr(1);
                let data = &bytes[4..];
                self.isp_flash[start..start + data.len()].copy_from_slice(data);
                self.isp_written = true;
                self.events.push(Event::IspWrite {
                    addr: start as u32,
                    len: data.len(),
                });
            }
            0x42 => {
                self.isp_flash.fill(0xFF);
                self.events.push(Event::IspEraseAll);
            }
            0x43 => self.pending = vec![0xEF, 0x40, 0x18, 0x17],
            0x45 if self.isp_flash_stuck && self.isp_written => self.pending = vec![0x01, 0x00],
            0x45 => self.pending = vec![0x00, 0x00],
            0x47 => {
                let (start, end) = (addr(1), addr(4));
                let mut crc = crc16(&self.isp_flash[start..=end]);
                if self.corrupt_isp_crc {
                    crc ^= 0x5555;
                }
                self.pending = crc.to_le_bytes().to_vec();
                self.busy = 1;
                self.events.push(Event::IspCrc {
                    start: start as u32,
                    end: end as u32,
                });
            }
            _ => {}
        }
    }

    fn bootloader_command(&mut self, bytes: &[u8]) {
        let arg = |i: usize| bytes.get(i).copied().unwrap_or(0);
        let addr = usize::from(u16::from_le_bytes([arg(1), arg(2)]));

        match bytes[0] {
            0x47 => self.pending = vec![0xA5, 0x5A],
            0xF1 => self.pending = vec![self.camera_type],
            0x39 => self.pending = self.flash[addr..addr + usize::from(arg(3))].to_vec(),
            0x38 => {
                let data = &bytes[3..];
                self.flash[addr..addr + data.len()].copy_from_slice(data);
                if addr as u32 >= FLASH_NVM_START {
                    self.nvm_written = true;
                } else {
                    self.app_written = true;
                }
                self.events.push(Event::FlashWrite {
                    addr: addr as u32,
                    len: data.len(),
                });
            }
            0x44 if bytes.len() == 2 => {
                self.flash[FLASH_APP_START as usize..=FLASH_NVM_MAX as usize].fill(0xFF);
                self.busy = 1;
                self.events.push(Event::EraseAll);
            }
            0x44 => {
                let size = usize::from(u16::from_le_bytes([arg(3), arg(4)]));
                let end = (addr + size).min(self.flash.len());
                self.flash[addr..end].fill(0xFF);
                self.events.push(Event::PageErase {
                    addr: addr as u32,
                    size: size as u32,
                });
            }
            0x41 => {
                let region = &self.flash[FLASH_APP_START as usize..usize::from(FLASH_APP_CRC_ADDRESS)];
                let mut crc = crc16(region);
                if self.corrupt_app_crc {
                    crc ^= 0xFFFF;
                }
                self.pending = crc.to_le_bytes().to_vec();
                self.busy = 1;
                self.events.push(Event::AppCrc);
            }
            0x46 => {
                if self.app_written {
                    let version = self.flashed_mcu_version;
                    self.set_version(reg::MCU_MAJOR_VERSION, reg::MCU_MINOR_VERSION, version);
                }
                if self.nvm_written {
                    let version = self.flashed_nvm_version;
                    self.set_version(reg::NVM_MAJOR_VERSION, reg::NVM_MINOR_VERSION, version);
                }
                self.app_written = false;
                self.nvm_written = false;
                self.firmware = Firmware::Application;
                self.busy = 2;
                self.events.push(Event::Reboot);
            }
            _ => {}
        }
    }
}

/// Shared handle, one clone goes on the bus, the test keeps the other
#[derive(Clone)]
pub struct SimChip(Arc<Mutex<SimState>>);

impl SimChip {
    pub fn new(state: SimState) -> Self {
        SimChip(Arc::new(Mutex::new(state)))
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }
}

impl ErrorType for SimChip {
    type Error = ErrorKind;
}

impl I2c for SimChip {
    fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state();

        if state.busy > 0 {
            state.busy -= 1;
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => state.command(&bytes[..]),
                Operation::Read(buf) => state.answer(&mut buf[..]),
            }
        }
        Ok(())
    }
}

pub fn attach(state: SimState, config: DeviceConfig) -> (Ar0234<SimChip>, SimChip) {
    let chip = SimChip::new(state);
    let transport = Transport::new(chip.clone(), DEFAULT_I2C_ADDRESS)
        .with_retries(20, Duration::from_millis(1));
    (Ar0234::with_transport(transport, config), chip)
}

pub fn record_line(addr: u32, bytes: &[u8]) -> String {
    let data: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
    format!("{:08X} {}", addr, data.join(" "))
}

/// MCU image with a valid stored CRC, optionally followed by NVM records
pub fn app_image(seed: u8, nvm: Option<&[u8]>) -> Vec<u8> {
    let payload: Vec<u8> = (0..200u32)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
        .collect();

    let mut region = vec![0xFFu8; usize::from(FLASH_APP_CRC_ADDRESS) - FLASH_APP_START as usize];
    let mut lines = vec!["// Size 0xC8".to_string()];

    for (index, chunk) in payload.chunks(64).enumerate() {
        let offset = index * 64;
        region[offset..offset + chunk.len()].copy_from_slice(chunk);
        lines.push(record_line(FLASH_APP_START + offset as u32, chunk));
    }

    let crc = crc16(&region);
    lines.push(record_line(u32::from(FLASH_APP_CRC_ADDRESS), &crc.to_le_bytes()));
    lines.push(record_line(
        u32::from(FLASH_APP_SIZE_ADDRESS),
        &(payload.len() as u16).to_le_bytes(),
    ));

    if let Some(nvm) = nvm {
        for (index, chunk) in nvm.chunks(64).enumerate() {
            lines.push(record_line(FLASH_NVM_START + (index * 64) as u32, chunk));
        }
    }

    (lines.join("\r\n") + "\r\n").into_bytes()
}

/// ISP image text and the bytes it places at address 0
pub fn isp_image(len: usize) -> (Vec<u8>, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i * 13 % 251) as u8).collect();

    let mut lines = vec![
        format!("// CRC 0x{:04X}", crc16(&data)),
        format!("// Size 0x{:X}", len),
        "[BLOCKSIZE 64]".to_string(),
    ];
    for (index, chunk) in data.chunks(64).enumerate() {
        lines.push(record_line((index * 64) as u32, chunk));
    }

    ((lines.join("\n") + "\n").into_bytes(), data)
}
