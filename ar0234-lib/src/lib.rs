//! Ar0234 is a control and firmware update library for the AR0234 camera
//! module, driven through the companion MCU/ISP chip on its I2C bus
//!
//! ## Features
//! - Application register access, bootloader and upgrader command sets
//! - Firmware image parsing with the NVM page remap of legacy images
//! - Probe-time update of the MCU application, NVM calibration and ISP image
//! - Camera controls with value checking and a control cache
//! - Supported output mode table
//! - Cancellation of long running operations from another thread

#[macro_use]
extern crate lazy_static;

pub mod controls;
pub mod crc;
pub mod definitions;
pub mod device;
pub mod image;
pub mod modes;
pub mod protocol;
pub mod transport;
pub mod update;

use controls::{ControlId, Descriptor, CONTROLS};
use device::{Device, DeviceConfig, Versions};
use embedded_hal::i2c::I2c;
use image::{FirmwareImage, UpdateIntent};
use modes::FrameMode;
use protocol::{CameraType, Protocol, ProtocolError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use transport::{CancelToken, Transport};
use update::{
    Component, FirmwareProvider, FirmwareTargets, Transition, UpdateFailed, UpdateReport,
    UpdateState,
};

/// One camera module.
///
/// Every operation holds the device lock for its whole duration. Probes and
/// firmware writes additionally serialise on a second lock, so a control
/// request issued during an update waits until the update has finished.
pub struct Ar0234<I2C> {
    device: Mutex<Device<I2C>>,
    probe_lock: Mutex<()>,
    cancel: CancelToken,
}

impl<I2C: I2c> Ar0234<I2C> {
    /// Creates new instance on `i2c` with the default retry budget
    pub fn new(i2c: I2C, address: u8, config: DeviceConfig) -> Self {
        Self::with_transport(Transport::new(i2c, address), config)
    }

    pub fn with_transport(transport: Transport<I2C>, config: DeviceConfig) -> Self {
        let protocol = Protocol::new(transport);
        Ar0234 {
            cancel: protocol.cancel_token(),
            device: Mutex::new(Device::new(protocol, config)),
            probe_lock: Mutex::new(()),
        }
    }

    fn device(&self) -> Result<MutexGuard<'_, Device<I2C>>, ProtocolError> {
        self.device.lock().map_err(|_| ProtocolError::LockPoisoned)
    }

    /// Token stopping the running operation before its next bus transfer.
    ///
    /// A cancelled token stays set until [`CancelToken::reset`] is called.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the probe sequence: power-up, firmware updates, control refresh,
    /// power-down
    pub fn probe<P: FirmwareProvider + ?Sized>(
        &self,
        targets: &FirmwareTargets,
        provider: &P,
    ) -> Result<UpdateReport, ProtocolError> {
        let _probe = self
            .probe_lock
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?;
        let mut device = self.device()?;
        update::probe(&mut device, targets, provider)
    }

    /// Write one image directly, without comparing versions
    pub fn flash(
        &self,
        intent: UpdateIntent,
        image: &FirmwareImage,
    ) -> Result<Vec<Transition>, UpdateFailed> {
        let component = match intent {
            UpdateIntent::Isp => Component::Isp,
            UpdateIntent::Nvm => Component::Nvm,
            _ => Component::Mcu,
        };
        let locked = || UpdateFailed {
            component,
            stage: UpdateState::Idle,
            cause: ProtocolError::LockPoisoned,
        };

        let _probe = self.probe_lock.lock().map_err(|_| locked())?;
        let mut device = self.device.lock().map_err(|_| locked())?;
        let mut log = Vec::new();

        match intent {
            UpdateIntent::Isp => update::flash_isp(device.protocol_mut(), image, &mut log)?,
            _ => update::flash_app(device.protocol_mut(), image, intent, &mut log)?,
        }
        Ok(log)
    }

    pub fn power(&self, on: bool) -> Result<(), ProtocolError> {
        self.device()?.power(on)
    }

    pub fn get_control(&self, id: ControlId) -> Result<i64, ProtocolError> {
        self.device()?.get_control(id)
    }

    pub fn set_control(&self, id: ControlId, value: i64) -> Result<(), ProtocolError> {
        self.device()?.set_control(id, value)
    }

    pub fn enumerate_controls(&self) -> &'static [Descriptor] {
        CONTROLS.as_slice()
    }

    pub fn set_format(&self, width: u32, height: u32, fps: u32) -> Result<FrameMode, ProtocolError> {
        self.device()?.set_format(width, height, fps)
    }

    /// Versions tracked since the last probe or update
    pub fn versions(&self) -> Result<Versions, ProtocolError> {
        Ok(self.device()?.versions())
    }

    /// Read versions and camera type from the running application
    pub fn read_identity(&self) -> Result<(Versions, CameraType), ProtocolError> {
        let mut device = self.device()?;
        let versions = device.read_versions()?;
        let camera = device.read_camera_type()?;
        Ok((versions, camera))
    }

    /// Raw protocol access under the device lock
    pub fn with_protocol<R>(
        &self,
        f: impl FnOnce(&mut Protocol<I2C>) -> Result<R, ProtocolError>,
    ) -> Result<R, ProtocolError> {
        let mut device = self.device()?;
        f(device.protocol_mut())
    }

    /// Give the bus back
    pub fn release(self) -> Result<I2C, ProtocolError> {
        let device = self
            .device
            .into_inner()
            .map_err(|_| ProtocolError::LockPoisoned)?;
        Ok(device.release())
    }
}

impl<I2C: I2c + Send + 'static> Ar0234<I2C> {
    /// Run [`Ar0234::probe`] on a worker thread
    pub fn spawn_probe<P: FirmwareProvider + Send + 'static>(
        self: &Arc<Self>,
        targets: FirmwareTargets,
        provider: P,
    ) -> JoinHandle<Result<UpdateReport, ProtocolError>> {
        let camera = Arc::clone(self);
        thread::spawn(move || camera.probe(&targets, &provider))
    }
}
