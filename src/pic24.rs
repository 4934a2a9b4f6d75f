//! PIC24 / dsPIC devkit family.
//!
//! These parts pack three bytes of program memory into every instruction
//! word but count addresses by byte-pair, and their HEX files insert a
//! null padding byte after every third payload byte. Three address
//! spaces therefore meet here: pic24 units (what the device reports and
//! expects in commands), HEX file offsets, and the physical byte
//! positions the block model works in.

use crate::bootinfo::{BootInfo, McuType};
use crate::devkit::{require, uniform_table, Block, DevKitModel, Family};
use crate::encoder::{encode, Endian};
use crate::utils::HexSlice;
use crate::Error;
use log::{debug, warn};

#[derive(Debug)]
pub struct Pic24;

/// Start of the PIC configuration data registers, in HEX file units.
const CONFIG_DATA_ADDR: u32 = 0x1F0_0008;

/// pic24 units -> physical number-of-the-byte inside the Flash blocks.
fn pic24_to_phy(addr: u32) -> Result<u32, Error> {
    if addr % 2 != 0 {
        return Err(Error::Misaligned { addr, align: 2 });
    }
    Ok(addr / 2 * 3)
}

/// Inverse of [`pic24_to_phy`].
fn phy_to_pic24(addr: u32) -> Result<u32, Error> {
    if addr % 3 != 0 {
        return Err(Error::Misaligned { addr, align: 3 });
    }
    Ok(addr / 3 * 2)
}

/// HEX file offset -> physical byte position (the padding bytes vanish).
fn hex_to_phy(addr: u32) -> Result<u32, Error> {
    if addr % 4 != 0 {
        return Err(Error::Misaligned { addr, align: 4 });
    }
    Ok(addr / 4 * 3)
}

impl Family for Pic24 {
    fn supported(&self) -> &'static [McuType] {
        &[McuType::Pic24, McuType::DsPic, McuType::DsPic33]
    }

    fn config_data_addr(&self) -> Option<u32> {
        Some(CONFIG_DATA_ADDR)
    }

    fn block_table(&self, info: &BootInfo) -> Result<Vec<Block>, Error> {
        let boot_start = require(info.boot_start, "BootStart")?;
        let erase_block = u32::from(require(info.erase_block, "EraseBlock")?);
        // The device reports BootStart in pic24 units; the table spans
        // physical bytes.
        uniform_table(pic24_to_phy(boot_start)?, erase_block)
    }

    fn write_virt(&self, model: &mut DevKitModel, addr: u32, data: &[u8]) -> Result<(), Error> {
        if addr >= CONFIG_DATA_ADDR {
            debug!("skipping write to config data at 0x{:x}", addr);
            return Ok(());
        }
        if data.len() % 4 != 0 {
            return Err(Error::Hex(format!(
                "PIC24 record of {} bytes at 0x{:x} is not made of 4-byte groups",
                data.len(),
                addr
            )));
        }
        // Discard the padding byte closing every 4-byte group.
        let mut stripped = Vec::with_capacity(data.len() / 4 * 3);
        for (i, group) in data.chunks(4).enumerate() {
            stripped.extend_from_slice(&group[..3]);
            if group[3] != 0 {
                warn!(
                    "padding byte at addr 0x{:x} ({:02X}) is not null",
                    addr + i as u32 * 4 + 3,
                    group[3]
                );
            }
        }
        model.write_phy(hex_to_phy(addr)?, &stripped)
    }

    fn write_addr(&self, model: &DevKitModel, blk: usize, blk_off: u32) -> Result<u32, Error> {
        phy_to_pic24(model.table()[blk].start + blk_off)
    }

    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        let boot_start = model.boot_start(); // pic24 units
        let boot_phy = pic24_to_phy(boot_start)?;
        let jump_to_main = model.read_phy(0, 6)?;
        debug!("first block before fix: {:?}", HexSlice(&jump_to_main));
        if !disable_bootloader {
            // GOTO lit23 (2-word instruction).
            let mut goto = encode(
                "00000100abcdefghijklmnop",
                Some(boot_start & 0xffff),
                Endian::Little,
            )?;
            goto.extend(encode(
                "00000000000000000abcdefg",
                Some(boot_start >> 16),
                Endian::Little,
            )?);
            model.write_phy(0, &goto)?;
        }
        debug!(
            "first block after fix: {:?}",
            HexSlice(&model.read_phy(0, 6)?)
        );
        model.write_phy(boot_phy - 6, &jump_to_main)
    }
}
