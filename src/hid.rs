//! `hidapi`-backed transport.

use crate::Transport;
use hidapi::{HidApi, HidDevice, HidError};
use log::info;
use std::io;
use std::thread;
use std::time::Duration;

const RETRY_INTERVAL: Duration = Duration::from_millis(200);

fn to_io(e: HidError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl Transport for HidDevice {
    fn write_report(&mut self, buf: &[u8]) -> io::Result<()> {
        let written = HidDevice::write(self, buf).map_err(to_io)?;
        if written != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short HID report write",
            ));
        }
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = HidDevice::read(self, &mut buf[filled..]).map_err(to_io)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "HID read returned no data",
                ));
            }
            filled += n;
        }
        Ok(())
    }
}

/// Waits for a device with the supplied USB vendor and product ids to be
/// attached, then opens it in blocking mode.
pub fn open_dev(vendor: u16, product: u16) -> io::Result<HidDevice> {
    let mut api = HidApi::new().map_err(to_io)?;
    info!("waiting for USB device {:04x}:{:04x}", vendor, product);
    loop {
        match api.open(vendor, product) {
            Ok(dev) => {
                info!("USB device {:04x}:{:04x} opened", vendor, product);
                dev.set_blocking_mode(true).map_err(to_io)?;
                return Ok(dev);
            }
            Err(_) => {
                // Not connected yet; poll until it shows up.
                thread::sleep(RETRY_INTERVAL);
                api.refresh_devices().map_err(to_io)?;
            }
        }
    }
}
