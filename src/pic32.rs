//! PIC32 (MIPS32) devkit families.
//!
//! PIC32 HEX files address Flash by physical address, but the CPU and
//! the reported `BootStart` live in the KSEG windows: KSEG0 maps the
//! same memory cached, KSEG1 uncached. The boot ROM is a separate Flash
//! region holding both the reset vector and, on its last block, the
//! configuration words the bootloader must not touch.

use crate::bootinfo::{BootInfo, McuType};
use crate::devkit::{require, Block, DevKitModel, Family};
use crate::encoder::{encode, Endian};
use crate::utils::HexSlice;
use crate::Error;
use log::{debug, warn};

const MAIN_FLASH_BASE: u32 = 0x1D00_0000;
const BOOT_ROM_BASE: u32 = 0x1FC0_0000;
const KSEG0: u32 = 0x8000_0000;
const KSEG1: u32 = 0xA000_0000;

/// Program Flash is reached through the cached window. The boot ROM is
/// always uncached.
const USE_CACHE: bool = true;

#[derive(Debug)]
pub struct Pic32;

#[derive(Debug)]
pub struct Pic32Mz;

fn virt_to_phy(addr: u32) -> u32 {
    addr & 0x1FFF_FFFF
}

fn phy_to_virt(addr: u32) -> u32 {
    if addr >= BOOT_ROM_BASE {
        addr + KSEG1
    } else if addr >= MAIN_FLASH_BASE && !USE_CACHE {
        addr + KSEG1
    } else {
        addr + KSEG0
    }
}

/// Two disjoint block ranges: main Flash, then the boot ROM up to the
/// block holding the configuration words.
fn pic32_table(info: &BootInfo, config_data_addr: u32) -> Result<Vec<Block>, Error> {
    let erase_block = u32::from(require(info.erase_block, "EraseBlock")?);
    let mcu_size = require(info.mcu_size, "McuSize")?;
    if erase_block == 0 || mcu_size == 0 || mcu_size % erase_block != 0 {
        return Err(Error::Descriptor(format!(
            "McuSize 0x{:x} is not a positive multiple of EraseBlock 0x{:x}",
            mcu_size, erase_block
        )));
    }
    let mut table: Vec<Block> = (MAIN_FLASH_BASE..MAIN_FLASH_BASE + mcu_size)
        .step_by(erase_block as usize)
        .map(|start| Block {
            start,
            end: start + erase_block,
        })
        .collect();
    let config_block_start = config_data_addr / erase_block * erase_block;
    table.extend(
        (BOOT_ROM_BASE..config_block_start)
            .step_by(erase_block as usize)
            .map(|start| Block {
                start,
                end: start + erase_block,
            }),
    );
    Ok(table)
}

fn pic32_write(
    model: &mut DevKitModel,
    config_data_addr: u32,
    addr: u32,
    data: &[u8],
) -> Result<(), Error> {
    if addr >= config_data_addr {
        debug!("skipping write to config data at 0x{:x}", addr);
        return Ok(());
    }
    if data.len() % 4 != 0 {
        warn!("writing data of length {}", data.len());
    }
    model.write_phy(virt_to_phy(addr), data)
}

/// MIPS32 program jumping to an absolute address through $30:
/// `lui $30, hi; ori $30, $30, lo; jr $30; nop`.
fn jump_to(addr: u32) -> Result<Vec<u8>, Error> {
    let mut program = encode(
        "0011110000011110abcdefghijklmnop",
        Some(addr >> 16),
        Endian::Little,
    )?;
    program.extend(encode(
        "0011011111011110abcdefghijklmnop",
        Some(addr & 0xffff),
        Endian::Little,
    )?);
    program.extend(encode(
        "00000011110000000000000000001000",
        None,
        Endian::Little,
    )?);
    program.extend(encode(&"0".repeat(32), None, Endian::Little)?);
    Ok(program)
}

/// Hooks the bootloader into the boot ROM and stages the chain stub the
/// bootloader jumps through to start the application.
fn fix_pic32_bootloader(model: &mut DevKitModel, disable_bootloader: bool) -> Result<(), Error> {
    let boot_virt = model.boot_start(); // reported as a KSEG address
    let boot_phy = virt_to_phy(boot_virt);
    let head = model.read_phy(BOOT_ROM_BASE, 16)?;
    let first_word = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    debug!("boot ROM entry before fix: {:?}", HexSlice(&head));

    // A standard runtime prologue means real startup code sits at the
    // entry; hook past the exception-vector gap and chain to it intact.
    // Anything else is taken for the toolchain's entry trampoline, which
    // survives relocation because its jump is absolute.
    let (patch_off, entry) = if first_word == 0x27BD_FFFC || first_word == 0x7000_0000 {
        (0x40, phy_to_virt(BOOT_ROM_BASE))
    } else {
        model.write_phy(boot_phy - 32, &head)?;
        (0x00, phy_to_virt(boot_phy - 32))
    };

    let stub = jump_to(entry)?;
    debug!("startup stub: {:?}", HexSlice(&stub));
    model.write_phy(boot_phy - 16, &stub)?;

    if !disable_bootloader {
        model.write_phy(BOOT_ROM_BASE + patch_off, &jump_to(boot_virt)?)?;
    }
    Ok(())
}

impl Family for Pic32 {
    fn supported(&self) -> &'static [McuType] {
        &[McuType::Pic32]
    }

    fn config_data_addr(&self) -> Option<u32> {
        Some(0x1FC0_2FF0)
    }

    fn block_table(&self, info: &BootInfo) -> Result<Vec<Block>, Error> {
        pic32_table(info, 0x1FC0_2FF0)
    }

    fn write_virt(&self, model: &mut DevKitModel, addr: u32, data: &[u8]) -> Result<(), Error> {
        pic32_write(model, 0x1FC0_2FF0, addr, data)
    }

    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        fix_pic32_bootloader(model, disable_bootloader)
    }
}

impl Family for Pic32Mz {
    fn supported(&self) -> &'static [McuType] {
        &[McuType::Pic32Mz]
    }

    fn config_data_addr(&self) -> Option<u32> {
        Some(0x1FC0_FF00)
    }

    fn block_table(&self, info: &BootInfo) -> Result<Vec<Block>, Error> {
        pic32_table(info, 0x1FC0_FF00)
    }

    fn write_virt(&self, model: &mut DevKitModel, addr: u32, data: &[u8]) -> Result<(), Error> {
        pic32_write(model, 0x1FC0_FF00, addr, data)
    }

    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        fix_pic32_bootloader(model, disable_bootloader)
    }
}
