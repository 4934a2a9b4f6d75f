//! The device session: command send/receive and the programming
//! sequence.

use crate::bootinfo::BootInfo;
use crate::command::{CmdCode, Command, HID_BUF_SIZE};
use crate::devkit::factory;
use crate::hexfile;
use crate::utils::HexSlice;
use crate::{Error, Transport};
use log::debug;
use std::io::Read;

/// A UHB device attached through some HID transport.
#[derive(Debug)]
pub struct Device<T> {
    transport: T,
}

impl<T: Transport> Device<T> {
    pub fn new(transport: T) -> Device<T> {
        Device { transport }
    }

    /// Consumes the session and releases the underlying transport.
    pub fn free(self) -> T {
        self.transport
    }

    /// Sends a command frame.
    pub fn send(&mut self, cmd: &Command) -> Result<(), Error> {
        debug!("send cmd: {}", cmd);
        let mut buf = [0u8; HID_BUF_SIZE + 1];
        buf[1..].copy_from_slice(&cmd.buf());
        self.transport.write_report(&buf)?;
        Ok(())
    }

    /// Sends a data frame (mainly for writing the Flash). Short payloads
    /// are padded with `0xFF`, which the device ignores.
    pub fn send_data(&mut self, data: &[u8]) -> Result<(), Error> {
        debug!("send data: {:?}", HexSlice(data));
        let mut buf = [0xFFu8; HID_BUF_SIZE + 1];
        buf[0] = 0x00; // report id
        buf[1..1 + data.len()].copy_from_slice(data);
        self.transport.write_report(&buf)?;
        Ok(())
    }

    /// Receives a command (mainly for checking ACKs).
    pub fn recv(&mut self) -> Result<Command, Error> {
        let mut buf = [0u8; HID_BUF_SIZE];
        self.transport.read_report(&mut buf)?;
        let cmd = Command::from_buf(&buf);
        debug!("recv cmd: {}", cmd);
        Ok(cmd)
    }

    /// Receives a raw data report (for the BootInfo descriptor).
    pub fn recv_data(&mut self) -> Result<[u8; HID_BUF_SIZE], Error> {
        let mut buf = [0u8; HID_BUF_SIZE];
        self.transport.read_report(&mut buf)?;
        debug!("recv data: {:?}", HexSlice(&buf));
        Ok(buf)
    }

    /// Sends a command which returns an immediate ACK.
    fn simple_cmd(&mut self, cmd: CmdCode) -> Result<(), Error> {
        self.send(&Command::new(cmd, 0, 0))?;
        self.recv()?.expect(cmd);
        Ok(())
    }

    /// Sends a SYNC command (behaves as a ping).
    pub fn cmd_sync(&mut self) -> Result<(), Error> {
        self.simple_cmd(CmdCode::Sync)
    }

    /// Sends an INFO command and parses the returned descriptor.
    pub fn cmd_info(&mut self) -> Result<BootInfo, Error> {
        self.send(&Command::new(CmdCode::Info, 0, 0))?;
        let raw = self.recv_data()?;
        Ok(BootInfo::parse(&raw))
    }

    /// Sends a BOOT command (enter into flashing mode).
    pub fn cmd_boot(&mut self) -> Result<(), Error> {
        self.simple_cmd(CmdCode::Boot)
    }

    /// Sends a REBOOT command (restarts the device). No ACK follows.
    pub fn cmd_reboot(&mut self) -> Result<(), Error> {
        self.send(&Command::new(CmdCode::Reboot, 0, 0))
    }

    /// Runs a programming session.
    ///
    /// Reads the device's BootInfo and, if a HEX input is supplied,
    /// enters flashing mode, stages the image, applies the bootloader
    /// fixup, transfers everything and reboots the board. Without a HEX
    /// input only the BootInfo is read.
    pub fn program<R: Read>(
        &mut self,
        hexf: Option<R>,
        print_info: bool,
        disable_bootloader: bool,
    ) -> Result<BootInfo, Error> {
        let bootinfo = self.cmd_info()?;
        if print_info {
            println!("bootinfo:");
            print!("{}", bootinfo);
        }
        if let Some(hexf) = hexf {
            self.cmd_boot()?;
            self.cmd_sync()?;
            let mut kit = factory(&bootinfo)?;
            hexfile::load(hexf, &mut kit)?;
            kit.fix_bootloader(disable_bootloader)?;
            kit.transfer(self)?;
            self.cmd_reboot()?;
        }
        Ok(bootinfo)
    }
}
