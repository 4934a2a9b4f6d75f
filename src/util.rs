use log::info;

use structopt::StructOpt;

use simplelog::{Config, LevelFilter, TermLogger, TerminalMode};

use mikroe_uhb::device::Device;
use mikroe_uhb::hid::open_dev;

use std::fs::File;
use std::path::PathBuf;

/// Program MikroElektronika USB HID Bootloader development kits
#[derive(Debug, StructOpt)]
struct Options {
    /// USB vendor id of the devkit, in hex (see lsusb while the board
    /// is in bootloader mode)
    #[structopt(long, parse(try_from_str = parse_hex), env = "UHB_VID")]
    vid: u16,

    /// USB product id of the devkit, in hex
    #[structopt(long, parse(try_from_str = parse_hex), env = "UHB_PID")]
    pid: u16,

    /// Intel HEX file to program; omit to only print the device info
    hexfile: Option<PathBuf>,

    /// Keep the bootloader from regaining control on reset
    /// (use with caution)
    #[structopt(long)]
    disable_bootloader: bool,

    /// Configure log level
    #[structopt(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: LevelFilter,
}

fn parse_hex(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn main() -> Result<(), Box<dyn std::error::Error + 'static>> {
    // Load options
    let opts = Options::from_args();

    // Setup logging
    TermLogger::init(opts.log_level, Config::default(), TerminalMode::Mixed).unwrap();

    // Wait for the board and open it
    let transport = open_dev(opts.vid, opts.pid)?;
    let mut dev = Device::new(transport);

    let hexf = match &opts.hexfile {
        Some(path) => Some(File::open(path)?),
        None => None,
    };

    dev.program(hexf, true, opts.disable_bootloader)?;

    if opts.hexfile.is_some() {
        info!("Programming complete, device rebooted");
    }

    Ok(())
}
