//! Ar0234 update file
//!
//! Firmware update orchestration. At probe time the device is powered up,
//! its firmware versions are compared with the targets and each of the MCU
//! application, NVM calibration and ISP images is rewritten when it differs.
//! Components are independent: a failed MCU update does not stop the ISP one

use super::definitions::{timing, FLASH_APP_MAX, PASSWORD};
use super::device::Device;
use super::image::{flash_target, FirmwareImage, UpdateIntent};
use super::protocol::{CameraType, Mode, Protocol, ProtocolError};
use embedded_hal::i2c::I2c;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Mcu,
    Nvm,
    Isp,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Mcu => "MCU",
            Component::Nvm => "NVM",
            Component::Isp => "ISP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    BootRecovery,
    VersionCheck,
    NoUpdateNeeded,
    Loading,
    BootloaderEntry,
    UpgraderEntry,
    Erasing,
    Writing,
    Verifying,
    Rebooting,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateState::Idle => "idle",
            UpdateState::BootRecovery => "boot recovery",
            UpdateState::VersionCheck => "version check",
            UpdateState::NoUpdateNeeded => "no update needed",
            UpdateState::Loading => "loading image",
            UpdateState::BootloaderEntry => "entering bootloader",
            UpdateState::UpgraderEntry => "entering upgrader",
            UpdateState::Erasing => "erasing",
            UpdateState::Writing => "writing",
            UpdateState::Verifying => "verifying",
            UpdateState::Rebooting => "rebooting",
        };
        f.write_str(name)
    }
}

/// State entered by one component's update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub component: Component,
    pub state: UpdateState,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{component} update failed while {stage}: {cause}")]
pub struct UpdateFailed {
    pub component: Component,
    pub stage: UpdateState,
    pub cause: ProtocolError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Target NVM version is 0
    NvmUpdateDisabled,
    /// NVM differs but no image name is configured
    NoNvmImage,
    /// Neither the colour nor the mono ISP image applies
    UnknownCameraType,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NvmUpdateDisabled => "NVM updates disabled for this device",
            SkipReason::NoNvmImage => "no NVM image configured",
            SkipReason::UnknownCameraType => "unknown camera type",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// Version already matches the target
    Current,
    /// `from` is unknown after a boot recovery
    Updated { from: Option<u16>, to: u16 },
    Failed(UpdateFailed),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            Outcome::Current => f.write_str("up to date"),
            Outcome::Updated { from: Some(from), to } => {
                write!(f, "updated 0x{:04X} -> 0x{:04X}", from, to)
            }
            Outcome::Updated { from: None, to } => write!(f, "updated to 0x{:04X}", to),
            Outcome::Failed(failed) => write!(f, "FAILED while {}: {}", failed.stage, failed.cause),
        }
    }
}

/// Result of one probe cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Device was found in its bootloader and reprovisioned
    pub boot_recovery: bool,
    pub mcu: Outcome,
    pub nvm: Outcome,
    pub isp: Outcome,
    pub transitions: Vec<Transition>,
    /// Control refresh or power-down error after the updates
    pub cleanup_error: Option<ProtocolError>,
}

impl UpdateReport {
    fn new() -> Self {
        UpdateReport {
            boot_recovery: false,
            mcu: Outcome::Current,
            nvm: Outcome::Current,
            isp: Outcome::Current,
            transitions: Vec::new(),
            cleanup_error: None,
        }
    }

    pub fn outcome(&self, component: Component) -> &Outcome {
        match component {
            Component::Mcu => &self.mcu,
            Component::Nvm => &self.nvm,
            Component::Isp => &self.isp,
        }
    }

    pub fn is_success(&self) -> bool {
        let failed = [&self.mcu, &self.nvm, &self.isp]
            .iter()
            .any(|outcome| matches!(outcome, Outcome::Failed(_)));
        !failed && self.cleanup_error.is_none()
    }

    /// States one component went through, in order
    pub fn states(&self, component: Component) -> Vec<UpdateState> {
        self.transitions
            .iter()
            .filter(|t| t.component == component)
            .map(|t| t.state)
            .collect()
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.boot_recovery {
            writeln!(f, "Boot recovery performed")?;
        }
        writeln!(f, "MCU: {}", self.mcu)?;
        writeln!(f, "NVM: {}", self.nvm)?;
        write!(f, "ISP: {}", self.isp)?;
        if let Some(err) = &self.cleanup_error {
            write!(f, "\nCleanup: {}", err)?;
        }
        Ok(())
    }
}

/// Versions and image names the driver ships with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTargets {
    pub mcu_version: u16,
    pub mcu_image: String,
    /// NVM version carried inside the MCU image
    pub bundled_nvm_version: u16,
    pub isp_version: u16,
    pub isp_color_image: String,
    pub isp_mono_image: String,
}

impl Default for FirmwareTargets {
    fn default() -> Self {
        FirmwareTargets {
            mcu_version: 0x001B,
            mcu_image: "SFT-23361_mcu_0.26_0.1.img".to_string(),
            bundled_nvm_version: 0x0001,
            isp_version: 443,
            isp_color_image: "SFT-24147_full_color_443.img".to_string(),
            isp_mono_image: "SFT-24148_full_mono_443.img".to_string(),
        }
    }
}

impl FirmwareTargets {
    fn isp_image(&self, camera: CameraType) -> Option<&str> {
        match camera {
            CameraType::Color => Some(self.isp_color_image.as_str()),
            CameraType::Monochrome => Some(self.isp_mono_image.as_str()),
            CameraType::Unknown => None,
        }
    }
}

/// Source of firmware images by name
pub trait FirmwareProvider {
    fn request(&self, name: &str) -> Result<Vec<u8>, ProtocolError>;
}

/// Images stored as files in one directory
#[derive(Debug, Clone)]
pub struct FirmwareDir {
    root: PathBuf,
}

impl FirmwareDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FirmwareDir { root: root.into() }
    }
}

impl FirmwareProvider for FirmwareDir {
    fn request(&self, name: &str) -> Result<Vec<u8>, ProtocolError> {
        let path = self.root.join(name);
        debug!("Loading firmware {}", path.display());
        std::fs::read(&path).map_err(|err| ProtocolError::FirmwareUnavailable {
            name: name.to_string(),
            reason: err.to_string(),
        })
    }
}

impl FirmwareProvider for HashMap<String, Vec<u8>> {
    fn request(&self, name: &str) -> Result<Vec<u8>, ProtocolError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::FirmwareUnavailable {
                name: name.to_string(),
                reason: "not bundled".to_string(),
            })
    }
}

// Tracks the stage of one component and records every state it enters
struct Progress<'a> {
    component: Component,
    stage: UpdateState,
    log: &'a mut Vec<Transition>,
}

impl<'a> Progress<'a> {
    fn new(component: Component, log: &'a mut Vec<Transition>) -> Self {
        Progress {
            component,
            stage: UpdateState::Idle,
            log,
        }
    }

    fn enter(&mut self, state: UpdateState) {
        if self.stage == state {
            return;
        }
        debug!("{}: {} -> {}", self.component, self.stage, state);
        self.stage = state;
        self.log.push(Transition {
            component: self.component,
            state,
        });
    }

    fn fail(&self, cause: ProtocolError) -> UpdateFailed {
        UpdateFailed {
            component: self.component,
            stage: self.stage,
            cause,
        }
    }
}

fn component_of(intent: UpdateIntent) -> Component {
    match intent {
        UpdateIntent::Nvm => Component::Nvm,
        UpdateIntent::Isp => Component::Isp,
        _ => Component::Mcu,
    }
}

/// Write an MCU and/or NVM image through the bootloader.
///
/// Transitions are appended to `log`.
pub fn flash_app<I2C: I2c>(
    protocol: &mut Protocol<I2C>,
    image: &FirmwareImage,
    intent: UpdateIntent,
    log: &mut Vec<Transition>,
) -> Result<(), UpdateFailed> {
    let mut progress = Progress::new(component_of(intent), log);
    let result =
        write_app(protocol, image, intent, &mut progress).map_err(|cause| progress.fail(cause));
    progress.enter(UpdateState::Idle);
    result
}

/// Write an ISP image through the upgrader
pub fn flash_isp<I2C: I2c>(
    protocol: &mut Protocol<I2C>,
    image: &FirmwareImage,
    log: &mut Vec<Transition>,
) -> Result<(), UpdateFailed> {
    let mut progress = Progress::new(Component::Isp, log);
    let result = write_isp(protocol, image, &mut progress).map_err(|cause| progress.fail(cause));
    progress.enter(UpdateState::Idle);
    result
}

// Every record lands inside its region, checked before anything is erased
fn check_layout(image: &FirmwareImage, intent: UpdateIntent) -> Result<(), ProtocolError> {
    for record in image.records() {
        let record = record?;
        let target = flash_target(intent, record.address, record.bytes.len())?;
        if intent == UpdateIntent::Isp && target.is_none() {
            return Err(ProtocolError::InvalidArgument(format!(
                "ISP address 0x{:X} beyond flash",
                record.address
            )));
        }
    }
    Ok(())
}

fn write_app<I2C: I2c>(
    protocol: &mut Protocol<I2C>,
    image: &FirmwareImage,
    intent: UpdateIntent,
    progress: &mut Progress,
) -> Result<(), ProtocolError> {
    if matches!(intent, UpdateIntent::None | UpdateIntent::Isp) {
        return Err(ProtocolError::InvalidArgument(format!(
            "{} is not a bootloader update",
            intent
        )));
    }

    check_layout(image, intent)?;

    // Bootloader
    progress.enter(UpdateState::BootloaderEntry);
    protocol.poll_ready(timing::BUS_FREE)?;
    if protocol.mode() != Mode::Bootloader {
        protocol.set_password(PASSWORD)?;
        protocol.start_bootloader()?;
        thread::sleep(timing::BOOTLOADER_SETTLE);
        protocol.poll_ready(timing::BOOTLOADER_START)?;
    }

    // Erase
    progress.enter(UpdateState::Erasing);
    match intent {
        UpdateIntent::Mcu => protocol.erase_app()?,
        UpdateIntent::Nvm => protocol.erase_nvm()?,
        _ => protocol.erase_all()?,
    }
    protocol.poll_ready(timing::ERASE)?;

    // Write
    progress.enter(UpdateState::Writing);
    let mut written = 0;
    let mut app_written = false;
    for record in image.records() {
        let record = record?;
        let target = match flash_target(intent, record.address, record.bytes.len())? {
            Some(target) => target,
            None => continue,
        };
        let address = u16::try_from(target).map_err(|_| {
            ProtocolError::InvalidArgument(format!("flash address 0x{:X} beyond 16 bits", target))
        })?;

        protocol.flash_write(address, &record.bytes)?;
        app_written |= target <= FLASH_APP_MAX;
        written += record.bytes.len();
    }
    debug!("{} bytes written for {} update", written, intent);

    // Verify, only the application carries a stored CRC
    progress.enter(UpdateState::Verifying);
    if app_written {
        let stored = protocol.read_app_crc()?;
        let computed = protocol.calc_app_crc()?;
        if stored != computed {
            return Err(ProtocolError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        debug!("Application CRC 0x{:04X} OK", computed);
    }

    progress.enter(UpdateState::Rebooting);
    protocol.reboot()?;
    protocol.poll_ready(timing::REBOOT)
}

fn write_isp<I2C: I2c>(
    protocol: &mut Protocol<I2C>,
    image: &FirmwareImage,
    progress: &mut Progress,
) -> Result<(), ProtocolError> {
    progress.enter(UpdateState::Loading);
    let missing = |header: &str| ProtocolError::Parse {
        line: 0,
        reason: format!("ISP image without \"// {}\" header", header),
    };
    let expected = image.crc().ok_or_else(|| missing("CRC"))?;
    let size = image.size().filter(|size| *size > 0).ok_or_else(|| missing("Size"))?;
    check_layout(image, UpdateIntent::Isp)?;

    // Upgrader
    progress.enter(UpdateState::UpgraderEntry);
    protocol.poll_ready(timing::BUS_FREE)?;
    protocol.set_password(PASSWORD)?;
    protocol.enter_upgrader_mode()?;
    let status = protocol.spi_status()?;
    debug!("SPI status 0x{:04X}", status);

    progress.enter(UpdateState::Erasing);
    protocol.isp_erase_all()?;

    progress.enter(UpdateState::Writing);
    for record in image.records() {
        let record = record?;
        if let Some(target) = flash_target(UpdateIntent::Isp, record.address, record.bytes.len())? {
            protocol.isp_write(target, &record.bytes)?;
        }
    }

    progress.enter(UpdateState::Verifying);
    let actual = protocol.isp_calc_crc(0, size - 1)?;
    if actual != expected {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }
    debug!("ISP CRC 0x{:04X} over {} bytes OK", actual, size);

    progress.enter(UpdateState::Rebooting);
    protocol.restart()?;
    protocol.poll_ready(timing::REBOOT)
}

fn load<P: FirmwareProvider + ?Sized>(
    provider: &P,
    name: &str,
    progress: &mut Progress,
) -> Result<FirmwareImage, ProtocolError> {
    progress.enter(UpdateState::Loading);
    let image = FirmwareImage::parse(&provider.request(name)?)?;
    debug!(
        "{}: {} records, CRC {:?}, size {:?}",
        name,
        image.record_count(),
        image.crc(),
        image.size()
    );
    Ok(image)
}

fn settle(
    progress: &mut Progress,
    result: Result<(), ProtocolError>,
    from: Option<u16>,
    to: u16,
) -> Outcome {
    let outcome = match result {
        Ok(()) => Outcome::Updated { from, to },
        Err(cause) => Outcome::Failed(progress.fail(cause)),
    };
    progress.enter(UpdateState::Idle);
    outcome
}

fn report_outcome(channel: u8, component: Component, outcome: &Outcome) {
    match outcome {
        Outcome::Updated { .. } => info!("Channel {}: {} {}", channel, component, outcome),
        Outcome::Current => debug!("Channel {}: {} {}", channel, component, outcome),
        Outcome::Skipped(_) => warn!("Channel {}: {} {}", channel, component, outcome),
        Outcome::Failed(failed) => error!("Channel {}: {}", channel, failed),
    }
}

/// Power the device up, bring every firmware component to its target,
/// refresh the control cache and power down again
pub fn probe<I2C: I2c, P: FirmwareProvider + ?Sized>(
    device: &mut Device<I2C>,
    targets: &FirmwareTargets,
    provider: &P,
) -> Result<UpdateReport, ProtocolError> {
    let channel = device.config().channel_id;
    let mut report = UpdateReport::new();

    device.power(true)?;

    if device.protocol_mut().detect_mode()? == Mode::Bootloader {
        info!("Channel {}: device in bootloader, reprovisioning", channel);
        report.boot_recovery = true;
        recover_boot(device, targets, provider, &mut report);
    } else {
        let versions = match device.read_versions() {
            Ok(versions) => versions,
            Err(err) => {
                error!("Channel {}: cannot read firmware versions: {}", channel, err);
                return Err(err);
            }
        };

        report.mcu = update_mcu(device, targets, provider, versions.mcu, &mut report.transitions);
        report_outcome(channel, Component::Mcu, &report.mcu);

        report.nvm = update_nvm(device, provider, versions.nvm, &mut report.transitions);
        report_outcome(channel, Component::Nvm, &report.nvm);
    }

    report.isp = update_isp(device, targets, provider, &mut report.transitions);
    report_outcome(channel, Component::Isp, &report.isp);

    if let Err(err) = device.refresh_controls().and_then(|_| device.power(false)) {
        error!("Channel {}: finishing probe failed: {}", channel, err);
        report.cleanup_error = Some(err);
    }

    Ok(report)
}

// Bootloader left running: write the combined image whatever the versions say
fn recover_boot<I2C: I2c, P: FirmwareProvider + ?Sized>(
    device: &mut Device<I2C>,
    targets: &FirmwareTargets,
    provider: &P,
    report: &mut UpdateReport,
) {
    let channel = device.config().channel_id;
    let mut progress = Progress::new(Component::Mcu, &mut report.transitions);
    progress.enter(UpdateState::BootRecovery);

    let result = load(provider, &targets.mcu_image, &mut progress).and_then(|image| {
        write_app(device.protocol_mut(), &image, UpdateIntent::Boot, &mut progress)
    });
    report.mcu = settle(&mut progress, result, None, targets.mcu_version);

    report.nvm = match &report.mcu {
        Outcome::Failed(failed) => Outcome::Failed(UpdateFailed {
            component: Component::Nvm,
            ..failed.clone()
        }),
        _ => {
            let versions = device.versions_mut();
            versions.mcu = targets.mcu_version;
            versions.nvm = targets.bundled_nvm_version;
            Outcome::Updated {
                from: None,
                to: targets.bundled_nvm_version,
            }
        }
    };

    report_outcome(channel, Component::Mcu, &report.mcu);
    report_outcome(channel, Component::Nvm, &report.nvm);
}

fn update_mcu<I2C: I2c, P: FirmwareProvider + ?Sized>(
    device: &mut Device<I2C>,
    targets: &FirmwareTargets,
    provider: &P,
    current: u16,
    log: &mut Vec<Transition>,
) -> Outcome {
    let mut progress = Progress::new(Component::Mcu, log);
    progress.enter(UpdateState::VersionCheck);

    if current == targets.mcu_version {
        progress.enter(UpdateState::NoUpdateNeeded);
        progress.enter(UpdateState::Idle);
        return Outcome::Current;
    }

    info!(
        "MCU firmware 0x{:04X}, target 0x{:04X}",
        current, targets.mcu_version
    );
    let result = load(provider, &targets.mcu_image, &mut progress).and_then(|image| {
        write_app(device.protocol_mut(), &image, UpdateIntent::Mcu, &mut progress)
    });
    let outcome = settle(&mut progress, result, Some(current), targets.mcu_version);

    if let Outcome::Updated { to, .. } = outcome {
        device.versions_mut().mcu = to;
    }
    outcome
}

fn update_nvm<I2C: I2c, P: FirmwareProvider + ?Sized>(
    device: &mut Device<I2C>,
    provider: &P,
    current: u16,
    log: &mut Vec<Transition>,
) -> Outcome {
    let target = device.config().target_nvm_version;
    let name = device.config().nvm_image_name.clone();

    let mut progress = Progress::new(Component::Nvm, log);
    progress.enter(UpdateState::VersionCheck);

    let skip = if target == 0 {
        Some(Outcome::Skipped(SkipReason::NvmUpdateDisabled))
    } else if current == target {
        Some(Outcome::Current)
    } else if name.is_none() {
        Some(Outcome::Skipped(SkipReason::NoNvmImage))
    } else {
        None
    };

    let name = match (skip, name) {
        (Some(outcome), _) => {
            progress.enter(UpdateState::NoUpdateNeeded);
            progress.enter(UpdateState::Idle);
            return outcome;
        }
        (None, Some(name)) => name,
        (None, None) => return Outcome::Skipped(SkipReason::NoNvmImage),
    };

    info!("NVM 0x{:04X}, target 0x{:04X}", current, target);
    let result = load(provider, &name, &mut progress).and_then(|image| {
        write_app(device.protocol_mut(), &image, UpdateIntent::Nvm, &mut progress)
    });
    let outcome = settle(&mut progress, result, Some(current), target);

    if let Outcome::Updated { to, .. } = outcome {
        device.versions_mut().nvm = to;
    }
    outcome
}

fn update_isp<I2C: I2c, P: FirmwareProvider + ?Sized>(
    device: &mut Device<I2C>,
    targets: &FirmwareTargets,
    provider: &P,
    log: &mut Vec<Transition>,
) -> Outcome {
    let mut progress = Progress::new(Component::Isp, log);
    progress.enter(UpdateState::VersionCheck);

    // Read again, a new MCU application may report a different ISP version
    let current = match device.protocol_mut().isp_version() {
        Ok(version) => version,
        Err(cause) => return settle(&mut progress, Err(cause), None, targets.isp_version),
    };
    device.versions_mut().isp = current;

    if current == targets.isp_version {
        progress.enter(UpdateState::NoUpdateNeeded);
        progress.enter(UpdateState::Idle);
        return Outcome::Current;
    }

    let camera = match device.read_camera_type() {
        Ok(camera) => camera,
        Err(cause) => return settle(&mut progress, Err(cause), Some(current), targets.isp_version),
    };
    let name = match targets.isp_image(camera) {
        Some(name) => name,
        None => {
            progress.enter(UpdateState::NoUpdateNeeded);
            progress.enter(UpdateState::Idle);
            return Outcome::Skipped(SkipReason::UnknownCameraType);
        }
    };

    info!(
        "ISP firmware {}, target {}, {} camera",
        current, targets.isp_version, camera
    );
    let result = load(provider, name, &mut progress)
        .and_then(|image| write_isp(device.protocol_mut(), &image, &mut progress));
    let outcome = settle(&mut progress, result, Some(current), targets.isp_version);

    if let Outcome::Updated { to, .. } = outcome {
        device.versions_mut().isp = to;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_records_each_state_once() {
        let mut log = Vec::new();
        let mut progress = Progress::new(Component::Nvm, &mut log);
        progress.enter(UpdateState::VersionCheck);
        progress.enter(UpdateState::VersionCheck);
        progress.enter(UpdateState::Erasing);
        let failed = progress.fail(ProtocolError::Cancelled);

        assert_eq!(failed.stage, UpdateState::Erasing);
        assert_eq!(
            failed.to_string(),
            "NVM update failed while erasing: Operation cancelled"
        );
        assert_eq!(
            log,
            vec![
                Transition {
                    component: Component::Nvm,
                    state: UpdateState::VersionCheck
                },
                Transition {
                    component: Component::Nvm,
                    state: UpdateState::Erasing
                },
            ]
        );
    }

    #[test]
    fn isp_image_follows_camera_type() {
        let targets = FirmwareTargets::default();
        assert_eq!(
            targets.isp_image(CameraType::Monochrome),
            Some("SFT-24148_full_mono_443.img")
        );
        assert_eq!(
            targets.isp_image(CameraType::Color),
            Some("SFT-24147_full_color_443.img")
        );
        assert_eq!(targets.isp_image(CameraType::Unknown), None);
    }

    #[test]
    fn bundled_images_by_name() {
        let mut images = HashMap::new();
        images.insert("a.img".to_string(), b"00001A00 01\n".to_vec());
        assert!(images.request("a.img").is_ok());
        assert!(matches!(
            images.request("b.img"),
            Err(ProtocolError::FirmwareUnavailable { .. })
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = FirmwareDir::new("/nonexistent/firmware");
        assert!(matches!(
            dir.request("x.img"),
            Err(ProtocolError::FirmwareUnavailable { name, .. }) if name == "x.img"
        ));
    }

    #[test]
    fn report_success_and_display() {
        let mut report = UpdateReport::new();
        report.mcu = Outcome::Updated {
            from: Some(0x1A),
            to: 0x1B,
        };
        assert!(report.is_success());
        assert_eq!(report.to_string().lines().next(), Some("MCU: updated 0x001A -> 0x001B"));

        report.isp = Outcome::Failed(UpdateFailed {
            component: Component::Isp,
            stage: UpdateState::Verifying,
            cause: ProtocolError::ChecksumMismatch {
                expected: 1,
                actual: 2,
            },
        });
        assert!(!report.is_success());
    }

    #[test]
    fn isp_image_needs_metadata_before_touching_the_bus() {
        use crate::transport::Transport;
        use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

        struct Untouchable;

        impl ErrorType for Untouchable {
            type Error = ErrorKind;
        }

        impl I2c for Untouchable {
            fn transaction(
                &mut self,
                _address: u8,
                _operations: &mut [Operation<'_>],
            ) -> Result<(), Self::Error> {
                panic!("bus used");
            }
        }

        let image = FirmwareImage::parse(b"// CRC 0x1234\n00000000 01 02\n").unwrap();
        let mut protocol = Protocol::new(Transport::new(Untouchable, 0x3C));
        let mut log = Vec::new();
        let failed = flash_isp(&mut protocol, &image, &mut log).unwrap_err();

        assert_eq!(failed.stage, UpdateState::Loading);
        assert!(matches!(failed.cause, ProtocolError::Parse { .. }));
    }
}
