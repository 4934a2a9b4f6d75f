//! The UHB command frame: an 8-byte little-endian header padded to one
//! 64-byte HID report.

use crate::utils::HexSlice;
use log::error;
use std::fmt;

/// Size of a USB HID packet, fixed by the standard.
pub const HID_BUF_SIZE: usize = 64;

/// Mark for the start of a command in the UHB protocol.
pub const STX: u8 = 0x0F;

/// Command codes understood by the bootloader firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmdCode {
    Sync = 1,
    Info = 2,
    Boot = 3,
    Reboot = 4,
    Write = 11,
    Erase = 21,
}

/// Name of a raw command code, for log messages.
fn cmd_name(code: u8) -> &'static str {
    match code {
        1 => "SYNC",
        2 => "INFO",
        3 => "BOOT",
        4 => "REBOOT",
        11 => "WRITE",
        21 => "ERASE",
        _ => "invalid",
    }
}

/// One UHB command, outbound or echoed back as an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub stx: u8,
    pub cmd: u8,
    pub addr: u32,
    pub counter: u16,
}

impl Command {
    /// Constructs a command with the supplied attributes.
    pub fn new(cmd: CmdCode, addr: u32, counter: u16) -> Command {
        Command {
            stx: STX,
            cmd: cmd as u8,
            addr,
            counter,
        }
    }

    /// Parses a command from the first 8 bytes of an inbound report.
    ///
    /// A missing STX is logged but the frame is still returned, so the
    /// caller can inspect whatever code the device echoed.
    pub fn from_buf(buf: &[u8]) -> Command {
        let cmd = Command {
            stx: buf[0],
            cmd: buf[1],
            addr: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            counter: u16::from_le_bytes([buf[6], buf[7]]),
        };
        if cmd.stx != STX {
            error!("missing stx: {:?}", HexSlice(buf));
        }
        cmd
    }

    /// Returns the padded 64-byte report for this command.
    pub fn buf(&self) -> [u8; HID_BUF_SIZE] {
        let mut buf = [0u8; HID_BUF_SIZE];
        buf[0] = self.stx;
        buf[1] = self.cmd;
        buf[2..6].copy_from_slice(&self.addr.to_le_bytes());
        buf[6..8].copy_from_slice(&self.counter.to_le_bytes());
        buf
    }

    /// If the command code is `cmd`, returns `true`. Otherwise logs an
    /// error and returns `false`.
    ///
    /// The device has no negative-ACK, so a mismatch is diagnostic only
    /// and the session carries on.
    pub fn expect(&self, cmd: CmdCode) -> bool {
        if self.cmd != cmd as u8 {
            error!(
                "Expected command {}, got {} ({})",
                cmd_name(cmd as u8),
                self.cmd,
                cmd_name(self.cmd)
            );
            return false;
        }
        true
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, cmd={}, addr=0x{:08x}, counter=0x{:04x}",
            if self.stx == STX { "stx" } else { "invalid" },
            cmd_name(self.cmd),
            self.addr,
            self.counter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let buf = Command::new(CmdCode::Erase, 0x62C0, 3).buf();
        assert_eq!(buf[0], 0x0F);
        assert_eq!(buf[1], 21);
        assert_eq!(&buf[2..6], &[0xC0, 0x62, 0x00, 0x00]);
        assert_eq!(&buf[6..8], &[0x03, 0x00]);
        assert!(buf[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn roundtrip() {
        let cmd = Command::new(CmdCode::Write, 0xDEAD_BEEF, 0x8000);
        assert_eq!(Command::from_buf(&cmd.buf()), cmd);
    }

    #[test]
    fn expect_mismatch_is_not_fatal() {
        let ack = Command::from_buf(&Command::new(CmdCode::Write, 0, 0).buf());
        assert!(ack.expect(CmdCode::Write));
        assert!(!ack.expect(CmdCode::Erase));
    }

    #[test]
    fn bad_stx_still_parses() {
        let mut buf = Command::new(CmdCode::Sync, 1, 2).buf();
        buf[0] = 0x00;
        let cmd = Command::from_buf(&buf);
        assert_eq!(cmd.cmd, CmdCode::Sync as u8);
        assert_eq!(cmd.addr, 1);
        assert_eq!(cmd.counter, 2);
    }
}
