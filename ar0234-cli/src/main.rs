use ar0234_lib::controls::{self, Descriptor};
use ar0234_lib::definitions::{DEFAULT_I2C_ADDRESS, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use ar0234_lib::device::DeviceConfig;
use ar0234_lib::image::{FirmwareImage, UpdateIntent};
use ar0234_lib::protocol::{Mode, ProtocolError};
use ar0234_lib::transport::Transport;
use ar0234_lib::update::{FirmwareDir, FirmwareTargets};
use ar0234_lib::Ar0234;
use clap::{Parser, Subcommand};
use env_logger::Env;
use linux_embedded_hal::I2cdev;
use std::error::Error;

/// AR0234 camera module field tool
#[derive(Parser, Debug)]
#[clap(version = "0.1.0")]
#[clap(
    about,
    long_about = "Register access, firmware update and camera controls of the AR0234 module over I2C"
)]
struct Args {
    /// I2C bus device
    #[clap(short, long, value_parser, default_value = "/dev/i2c-1")]
    bus: String,

    /// 7-bit address of the companion chip
    #[clap(short, long, value_parser = parse_u8, default_value_t = DEFAULT_I2C_ADDRESS)]
    address: u8,

    /// Attempts per bus transfer
    #[clap(short, long, value_parser, default_value_t = DEFAULT_RETRIES)]
    retries: usize,

    /// Debug logging
    #[clap(short, long, action)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Boot id, running firmware, versions, camera type and serial
    Status,

    /// Read an application register
    Readreg {
        /// Register width in bits: 8, 16 or 32
        #[clap(short, long, value_parser = parse_width, default_value_t = 8)]
        width: u8,

        #[clap(value_parser = parse_u8)]
        register: u8,
    },

    /// Write an application register
    Writereg {
        /// Register width in bits: 8, 16 or 32
        #[clap(short, long, value_parser = parse_width, default_value_t = 8)]
        width: u8,

        #[clap(value_parser = parse_u8)]
        register: u8,

        #[clap(value_parser = parse_u32)]
        value: u32,
    },

    /// Write the bootloader password
    Password {
        #[clap(value_parser = parse_u16)]
        value: u16,
    },

    /// Write an MCU application and NVM image through the bootloader
    Flashapp {
        /// Image file
        #[clap(short, long, value_parser)]
        file: String,

        /// Write the application region only
        #[clap(long, action, conflicts_with = "nvm_only")]
        app_only: bool,

        /// Write the NVM region only
        #[clap(long, action)]
        nvm_only: bool,
    },

    /// Write an ISP image through the upgrader
    Flashisp {
        /// Image file
        #[clap(short, long, value_parser)]
        file: String,
    },

    /// Restart the application, or leave the bootloader
    Reboot,

    /// Power up, update outdated firmware, refresh controls and power down
    Probe {
        /// Channel the module is attached to
        #[clap(short, long, value_parser, default_value_t = 0)]
        channel: u8,

        /// Target NVM version, 0 disables NVM updates
        #[clap(long, value_parser = parse_u16, default_value_t = 0x0001)]
        nvm_version: u16,

        /// NVM image name inside the firmware directory
        #[clap(long, value_parser)]
        nvm_image: Option<String>,

        /// Directory holding the firmware images
        #[clap(long, value_parser, default_value = "/lib/firmware")]
        firmware_dir: String,
    },

    /// List camera controls
    Controls,

    /// Read a camera control
    Get {
        #[clap(value_parser)]
        control: String,
    },

    /// Write a camera control
    Set {
        #[clap(value_parser)]
        control: String,

        #[clap(value_parser, allow_hyphen_values = true)]
        value: i64,
    },

    /// Print image metadata and the CRC of its payload
    Info {
        /// Image file
        #[clap(short, long, value_parser)]
        file: String,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("{}: {}", s, err))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_u32(s)?).map_err(|_| format!("{} does not fit 16 bits", s))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_u32(s)?).map_err(|_| format!("{} does not fit 8 bits", s))
}

fn parse_width(s: &str) -> Result<u8, String> {
    match s {
        "8" => Ok(8),
        "16" => Ok(16),
        "32" => Ok(32),
        _ => Err(format!("width {} is not 8, 16 or 32", s)),
    }
}

fn load_image(file: &str) -> Result<FirmwareImage, Box<dyn Error>> {
    let data = std::fs::read(file).map_err(|err| format!("Cannot read {}: {}", file, err))?;
    Ok(FirmwareImage::parse(&data)?)
}

fn lookup(key: &str) -> Result<&'static Descriptor, String> {
    controls::find(key).ok_or_else(|| format!("Unknown control {}, see `controls`", key))
}

fn info(file: &str) -> Result<(), Box<dyn Error>> {
    let image = load_image(file)?;

    match image.crc() {
        Some(crc) => println!("Declared CRC: 0x{:04X}", crc),
        None => println!("Declared CRC: none"),
    }
    match image.size() {
        Some(size) => println!("Declared size: 0x{:X} ({} bytes)", size, size),
        None => println!("Declared size: none"),
    }
    println!("Records: {}", image.record_count());
    println!("Payload: {} bytes", image.payload_len()?);
    println!("Payload CRC: 0x{:04X}", image.payload_crc()?);
    Ok(())
}

fn run(camera: &Ar0234<I2cdev>, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Status => {
            let boot_id = camera.with_protocol(|p| p.boot_id())?;
            let mode = camera.with_protocol(|p| p.detect_mode())?;
            println!("Boot id: 0x{:04X}", boot_id);
            println!("Running: {}", mode);

            if mode == Mode::Bootloader {
                let camera_type = camera.with_protocol(|p| p.boot_camera_type())?;
                println!("Camera type: {}", camera_type);
                return Ok(());
            }

            let (versions, camera_type) = camera.read_identity()?;
            let serial = camera.with_protocol(|p| p.read_serial())?;
            println!("MCU version: 0x{:04X}", versions.mcu);
            println!("NVM version: 0x{:04X}", versions.nvm);
            println!("ISP version: {}", versions.isp);
            println!("Camera type: {}", camera_type);
            println!(
                "Serial: {}",
                serial.iter().map(|b| format!("{:02X}", b)).collect::<String>()
            );
        }

        Command::Readreg { width, register } => {
            let value = camera.with_protocol(|p| match width {
                8 => p.read_u8(register).map(u32::from),
                16 => p.read_u16(register).map(u32::from),
                _ => p.read_u32(register),
            })?;
            let digits = usize::from(width / 4);
            println!("0x{:02X} = 0x{:0w$X} ({})", register, value, value, w = digits);
        }

        Command::Writereg {
            width,
            register,
            value,
        } => {
            camera.with_protocol(|p| match width {
                8 => {
                    let value = u8::try_from(value).map_err(|_| too_wide(value, width))?;
                    p.write_u8(register, value)
                }
                16 => {
                    let value = u16::try_from(value).map_err(|_| too_wide(value, width))?;
                    p.write_u16(register, value)
                }
                _ => p.write_u32(register, value),
            })?;
            println!("Write OK");
        }

        Command::Password { value } => {
            camera.with_protocol(|p| p.set_password(value))?;
            println!("Password written");
        }

        Command::Flashapp {
            file,
            app_only,
            nvm_only,
        } => {
            let image = load_image(&file)?;
            let intent = match (app_only, nvm_only) {
                (true, _) => UpdateIntent::Mcu,
                (_, true) => UpdateIntent::Nvm,
                _ => UpdateIntent::McuNvm,
            };

            camera.with_protocol(|p| p.detect_mode())?;
            println!("Writing {} ({} records, {})", file, image.record_count(), intent);
            camera.flash(intent, &image)?;
            println!("Write OK");
        }

        Command::Flashisp { file } => {
            let image = load_image(&file)?;
            println!("Writing {} ({} records)", file, image.record_count());
            camera.flash(UpdateIntent::Isp, &image)?;
            println!("Write OK");
        }

        Command::Reboot => {
            camera.with_protocol(|p| match p.detect_mode()? {
                Mode::Bootloader => p.reboot(),
                _ => p.restart(),
            })?;
            println!("Rebooting");
        }

        Command::Probe { firmware_dir, .. } => {
            let provider = FirmwareDir::new(firmware_dir);
            let report = camera.probe(&FirmwareTargets::default(), &provider)?;
            println!("{}", report);
            if !report.is_success() {
                return Err("Probe finished with errors".into());
            }
        }

        Command::Controls => {
            for descriptor in camera.enumerate_controls() {
                println!("{}", descriptor);
            }
        }

        Command::Get { control } => {
            let descriptor = lookup(&control)?;
            let value = camera.get_control(descriptor.id)?;
            match descriptor.menu_name(value) {
                Some(name) => println!("{} = {} ({})", descriptor.key, value, name),
                None => println!("{} = {}", descriptor.key, value),
            }
        }

        Command::Set { control, value } => {
            let descriptor = lookup(&control)?;
            camera.set_control(descriptor.id, value)?;
            println!("{} set to {}", descriptor.key, value);
        }

        Command::Info { file } => info(&file)?,
    }

    Ok(())
}

fn too_wide(value: u32, width: u8) -> ProtocolError {
    ProtocolError::InvalidArgument(format!("0x{:X} does not fit {} bits", value, width))
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    // No device needed
    if let Command::Info { file } = &args.command {
        if let Err(err) = info(file) {
            println!("ERROR: {}", err);
            std::process::exit(1);
        }
        return;
    }

    let config = match &args.command {
        Command::Probe {
            channel,
            nvm_version,
            nvm_image,
            ..
        } => DeviceConfig {
            channel_id: *channel,
            target_nvm_version: *nvm_version,
            nvm_image_name: nvm_image.clone(),
        },
        _ => DeviceConfig::default(),
    };

    // Try to open the bus
    let i2c = match I2cdev::new(&args.bus) {
        Ok(i2c) => i2c,
        Err(err) => {
            println!("ERROR: Cannot open bus {}: {}", args.bus, err);
            std::process::exit(1);
        }
    };

    log::debug!(
        "{} opened, companion chip at 0x{:02X}, {} attempts per transfer",
        args.bus,
        args.address,
        args.retries
    );
    let transport =
        Transport::new(i2c, args.address).with_retries(args.retries, DEFAULT_RETRY_DELAY);
    let camera = Ar0234::with_transport(transport, config);

    if let Err(err) = run(&camera, args.command) {
        println!("ERROR: {}", err);
        std::process::exit(1);
    }
}
