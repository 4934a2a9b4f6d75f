//! The devkit model: a staged image of the device's Flash memory blocks,
//! plus the erase/write engine that streams it out.
//!
//! A [`Family`] implementation describes everything that varies between
//! MCU lines: the block layout, the mapping from the addresses a HEX
//! file uses to physical byte positions, the addresses the `WRITE` and
//! `ERASE` commands expect, and the reset-vector fixup that keeps the
//! bootloader in control of the board. Everything else (block lookup,
//! lazy buffers, carry across block boundaries, the transfer engine)
//! lives here once.

use crate::bootinfo::BootInfo;
use crate::command::{CmdCode, Command, HID_BUF_SIZE};
use crate::device::Device;
use crate::{Error, Transport};
use log::debug;
use std::fmt;

use crate::arm::{GenericArm, Stm32};
use crate::pic18::Pic18;
use crate::pic24::Pic24;
use crate::pic32::{Pic32, Pic32Mz};

/// Maximum amount of data bytes transferred during a single WRITE
/// command. Keeps the 16-bit counter field with headroom to spare.
const WRITE_MAX: usize = 0x8000;

/// One Erase Block: a contiguous physical Flash region `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u32,
    pub end: u32,
}

impl Block {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }
}

/// Behavior that varies between MCU families.
///
/// Implementations are stateless; the model calls back into them with
/// itself as an argument. Default methods cover the common case of a
/// uniform block grid addressed by plain physical byte positions.
pub trait Family: Sync + fmt::Debug {
    /// MCU types served by this family. A type must not be claimed by
    /// two families.
    fn supported(&self) -> &'static [crate::bootinfo::McuType];

    /// Offset in memory to which the Flash contents are mapped. It is
    /// subtracted from addresses supplied to `write_virt` to obtain
    /// positions relative to the start of the Flash.
    fn flash_mem_offset(&self) -> u32 {
        0
    }

    /// Start of the configuration data region, if the family has one.
    /// The bootloader cannot write configuration data, so writes at or
    /// above this address are silently discarded.
    fn config_data_addr(&self) -> Option<u32> {
        None
    }

    /// Builds the Erase Block table for a device. The default is a
    /// uniform grid from address 0 up to `BootStart`.
    fn block_table(&self, info: &BootInfo) -> Result<Vec<Block>, Error> {
        let boot_start = require(info.boot_start, "BootStart")?;
        let erase_block = u32::from(require(info.erase_block, "EraseBlock")?);
        uniform_table(boot_start, erase_block)
    }

    /// Writes data at a "virtual" address (as seen by the program in the
    /// HEX file).
    fn write_virt(&self, model: &mut DevKitModel, addr: u32, data: &[u8]) -> Result<(), Error> {
        if let Some(config) = self.config_data_addr() {
            if addr >= config {
                debug!("skipping write to config data at 0x{:x}", addr);
                return Ok(());
            }
        }
        let phy = addr
            .checked_sub(self.flash_mem_offset())
            .ok_or(Error::OutOfRange { addr })?;
        model.write_phy(phy, data)
    }

    /// The address of a block position as supplied to the WRITE command.
    fn write_addr(&self, model: &DevKitModel, blk: usize, blk_off: u32) -> Result<u32, Error> {
        Ok(model.table[blk].start + blk_off)
    }

    /// The address of a block as supplied to the ERASE command.
    fn erase_addr(&self, model: &DevKitModel, blk: usize) -> Result<u32, Error> {
        self.write_addr(model, blk, 0)
    }

    /// Applies any changes to the staged image needed for the bootloader
    /// to keep working. With `disable_bootloader` set, the device will
    /// boot straight into the application where the family supports it.
    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        let _ = (model, disable_bootloader);
        Ok(())
    }
}

/// Builds a gap-free table of `erase_block`-sized blocks covering
/// `[0, boot_start)`.
pub(crate) fn uniform_table(boot_start: u32, erase_block: u32) -> Result<Vec<Block>, Error> {
    if erase_block == 0 || boot_start == 0 || boot_start % erase_block != 0 {
        return Err(Error::Descriptor(format!(
            "BootStart 0x{:x} is not a positive multiple of EraseBlock 0x{:x}",
            boot_start, erase_block
        )));
    }
    Ok((0..boot_start)
        .step_by(erase_block as usize)
        .map(|start| Block {
            start,
            end: start + erase_block,
        })
        .collect())
}

pub(crate) fn require<T>(field: Option<T>, name: &str) -> Result<T, Error> {
    field.ok_or_else(|| Error::Descriptor(format!("missing required field {:?}", name)))
}

/// Every devkit family known to this crate.
pub static FAMILIES: &[&dyn Family] = &[&GenericArm, &Stm32, &Pic18, &Pic24, &Pic32, &Pic32Mz];

/// Constructs the devkit model matching a BootInfo descriptor.
pub fn factory(info: &BootInfo) -> Result<DevKitModel, Error> {
    let mcu = require(info.mcu_type, "McuType")?;
    for &family in FAMILIES {
        if family.supported().contains(&mcu) {
            return DevKitModel::new(family, info);
        }
    }
    Err(Error::UnsupportedMcu(mcu))
}

/// The staged Flash image of one development kit.
#[derive(Debug)]
pub struct DevKitModel {
    family: &'static dyn Family,
    /// `BootStart` as the device reports it (virtual for PIC32, word
    /// units for PIC24; physical bytes everywhere else).
    boot_start: u32,
    erase_block: u32,
    table: Vec<Block>,
    /// Staged block buffers. A materialized buffer marks the block as
    /// dirty; the unmaterialized image is all-`0xFF`.
    blocks: Vec<Option<Vec<u8>>>,
    /// Last block written to. Starts the block search, exploiting the
    /// locality of HEX records.
    ptr: usize,
}

impl DevKitModel {
    pub fn new(family: &'static dyn Family, info: &BootInfo) -> Result<DevKitModel, Error> {
        let boot_start = require(info.boot_start, "BootStart")?;
        let erase_block = u32::from(require(info.erase_block, "EraseBlock")?);
        if boot_start == 0 {
            return Err(Error::Descriptor("BootStart is zero".to_string()));
        }
        // EraseBlock must be a multiple of the HID packet size, otherwise
        // the device buffer accounting in the transfer engine breaks.
        if erase_block == 0 || erase_block % HID_BUF_SIZE as u32 != 0 {
            return Err(Error::Descriptor(format!(
                "EraseBlock 0x{:x} is not a positive multiple of the HID packet size",
                erase_block
            )));
        }
        let table = family.block_table(info)?;
        let blocks = vec![None; table.len()];
        Ok(DevKitModel {
            family,
            boot_start,
            erase_block,
            table,
            blocks,
            ptr: 0,
        })
    }

    pub fn boot_start(&self) -> u32 {
        self.boot_start
    }

    pub fn erase_block(&self) -> u32 {
        self.erase_block
    }

    pub fn table(&self) -> &[Block] {
        &self.table
    }

    /// Indices of the blocks that will be flashed to the device.
    pub fn dirty_blocks(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(blk, buf)| buf.as_ref().map(|_| blk))
            .collect()
    }

    /// Finds the block containing `addr`, searching outward from the
    /// last block written.
    fn locate(&self, addr: u32) -> Result<usize, Error> {
        let mut blk = self.ptr.min(self.table.len().saturating_sub(1));
        loop {
            let b = *self.table.get(blk).ok_or(Error::OutOfRange { addr })?;
            if addr >= b.end {
                // Stepping up across a gap in the table means the
                // address belongs to no block at all.
                if let Some(next) = self.table.get(blk + 1) {
                    if addr < next.start {
                        return Err(Error::OutOfRange { addr });
                    }
                }
                blk += 1;
            } else if addr < b.start {
                match blk.checked_sub(1) {
                    Some(prev) if addr >= self.table[prev].end => {
                        return Err(Error::OutOfRange { addr })
                    }
                    Some(prev) => blk = prev,
                    None => return Err(Error::OutOfRange { addr }),
                }
            } else {
                return Ok(blk);
            }
        }
    }

    /// Writes data at a "virtual" address, going through the family's
    /// address translation.
    pub fn write_virt(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        let family = self.family;
        family.write_virt(self, addr, data)
    }

    /// Writes data at a physical Flash address, carrying across block
    /// boundaries as needed.
    pub fn write_phy(&mut self, mut addr: u32, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let blk = self.locate(addr)?;
            self.ptr = blk;
            let b = self.table[blk];
            let buf = self.blocks[blk].get_or_insert_with(|| vec![0xFF; b.len()]);
            let off = (addr - b.start) as usize;
            let n = ((b.end - addr) as usize).min(data.len());
            buf[off..off + n].copy_from_slice(&data[..n]);
            if n < data.len() {
                debug!(
                    "data trespassing block limits: addr=0x{:x}, write_len=0x{:x}",
                    addr, n
                );
            }
            addr += n as u32;
            data = &data[n..];
        }
        Ok(())
    }

    /// Reads `len` staged bytes starting at a physical address. Blocks
    /// never written read as erased Flash (`0xFF`).
    pub fn read_phy(&self, mut addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let blk = self.locate(addr)?;
            let b = self.table[blk];
            let off = (addr - b.start) as usize;
            let n = ((b.end - addr) as usize).min(len - out.len());
            match &self.blocks[blk] {
                Some(data) => out.extend_from_slice(&data[off..off + n]),
                None => out.resize(out.len() + n, 0xFF),
            }
            addr += n as u32;
        }
        Ok(out)
    }

    /// Applies the family's bootloader-preservation fixup.
    pub fn fix_bootloader(&mut self, disable_bootloader: bool) -> Result<(), Error> {
        let family = self.family;
        family.fix_bootloader(self, disable_bootloader)
    }

    /// Erases and writes one interval `[start, end)` of blocks.
    fn blk_interval<T: Transport>(
        &self,
        dev: &mut Device<T>,
        start: usize,
        end: usize,
    ) -> Result<(), Error> {
        // Size of the firmware's receive buffer: exactly one Erase Block.
        let dev_buf_size = self.erase_block as usize;
        let family = self.family;

        dev.send(&Command::new(
            CmdCode::Erase,
            family.erase_addr(self, end - 1)?,
            (end - start) as u16,
        ))?;
        dev.recv()?.expect(CmdCode::Erase);

        for blk in start..end {
            let blk_data = match &self.blocks[blk] {
                Some(data) => data,
                None => continue,
            };
            // Split the block into parts of at most WRITE_MAX bytes.
            for (chunk_idx, chunk) in blk_data.chunks(WRITE_MAX).enumerate() {
                let address = family.write_addr(self, blk, (chunk_idx * WRITE_MAX) as u32)?;
                debug!("WRITE {} bytes to address 0x{:x}", chunk.len(), address);
                dev.send(&Command::new(CmdCode::Write, address, chunk.len() as u16))?;
                let mut dev_buf_rem = dev_buf_size;
                // Split into USB HID packets.
                for pkt in chunk.chunks(HID_BUF_SIZE) {
                    dev.send_data(pkt)?;
                    dev_buf_rem -= pkt.len();
                    if dev_buf_rem == 0 {
                        // The device ACKs whenever its buffer gets full.
                        dev.recv()?.expect(CmdCode::Write);
                        dev_buf_rem = dev_buf_size;
                    }
                }
                if dev_buf_rem != dev_buf_size {
                    // The device also ACKs when the WRITE command ends,
                    // unless that coincided with a full buffer.
                    dev.recv()?.expect(CmdCode::Write);
                }
            }
        }
        Ok(())
    }

    /// Transfers the staged image to the device.
    ///
    /// Dirty blocks are grouped into maximal runs of physically
    /// contiguous blocks; each run costs one ERASE plus its WRITEs.
    pub fn transfer<T: Transport>(&self, dev: &mut Device<T>) -> Result<(), Error> {
        debug!("transfer to device starting");
        let dirty = self.dirty_blocks();
        let mut run_start = 0;
        for i in 0..dirty.len() {
            let run_ends = i + 1 == dirty.len()
                || dirty[i + 1] != dirty[i] + 1
                || self.table[dirty[i + 1]].start != self.table[dirty[i]].end;
            if run_ends {
                self.blk_interval(dev, dirty[run_start], dirty[i] + 1)?;
                run_start = i + 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bootinfo::McuType;

    /// Deterministic xorshift so failures are reproducible.
    pub(crate) struct XorShift(pub u32);

    impl XorShift {
        pub fn next(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            x
        }
    }

    pub(crate) fn stm32_info() -> BootInfo {
        BootInfo {
            mcu_type: Some(McuType::Stm32F4xx),
            erase_block: Some(0x4000),
            boot_start: Some(0xe0000),
            ..BootInfo::default()
        }
    }

    #[test]
    fn registry_has_no_overlapping_families() {
        let mut seen: Vec<McuType> = Vec::new();
        for family in FAMILIES {
            for mcu in family.supported() {
                assert!(!seen.contains(mcu), "{} claimed twice", mcu);
                seen.push(*mcu);
            }
        }
    }

    #[test]
    fn factory_rejects_unknown_mcu() {
        let mut info = stm32_info();
        info.mcu_type = Some(McuType::Unknown(99));
        match factory(&info) {
            Err(Error::UnsupportedMcu(_)) => {}
            other => panic!("expected UnsupportedMcu, got {:?}", other),
        }
    }

    #[test]
    fn factory_requires_geometry_fields() {
        let mut info = stm32_info();
        info.boot_start = None;
        assert!(matches!(factory(&info), Err(Error::Descriptor(_))));
    }

    #[test]
    fn erase_block_must_fit_hid_packets() {
        let mut info = stm32_info();
        info.mcu_type = Some(McuType::Arm);
        info.erase_block = Some(0x41);
        info.boot_start = Some(0x41 * 4);
        assert!(matches!(factory(&info), Err(Error::Descriptor(_))));
    }

    #[test]
    fn write_read_roundtrip() {
        let mut kit = factory(&stm32_info()).unwrap();
        kit.write_virt(0x0800_1234, b"hello flash").unwrap();
        assert_eq!(kit.read_phy(0x1234, 11).unwrap(), b"hello flash");
        // Neighbouring bytes stay erased.
        assert_eq!(kit.read_phy(0x1233, 1).unwrap(), [0xFF]);
        assert_eq!(kit.read_phy(0x1234 + 11, 1).unwrap(), [0xFF]);
    }

    #[test]
    fn write_carries_across_block_boundary() {
        let mut kit = factory(&stm32_info()).unwrap();
        // First STM32 sector is 16 KiB; write 8 bytes straddling it.
        kit.write_virt(0x0800_3FFC, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(kit.dirty_blocks(), vec![0, 1]);
        assert_eq!(
            kit.read_phy(0x3FFC, 8).unwrap(),
            [1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn full_flash_survives_roundtrip() {
        let mut kit = factory(&stm32_info()).unwrap();
        let memsize = 0xe0000;
        let mut rng = XorShift(0x1337);
        let image: Vec<u8> = (0..memsize).map(|_| rng.next() as u8).collect();
        kit.write_virt(0x0800_0000, &image).unwrap();
        assert_eq!(kit.read_phy(0, memsize).unwrap(), image);
        assert_eq!(kit.dirty_blocks().len(), kit.table().len());
    }

    #[test]
    fn sparse_writes_match_shadow_buffer() {
        let memsize = 0xe0000usize;
        let mut rng = XorShift(0xC0FFEE);
        for _ in 0..5 {
            let mut kit = factory(&stm32_info()).unwrap();
            let mut shadow = vec![0xFFu8; memsize];
            for _ in 0..5 {
                let size = rng.next() as usize % 0x9000 + 1;
                let addr = rng.next() as usize % (memsize - size);
                let data: Vec<u8> = (0..size).map(|_| rng.next() as u8).collect();
                shadow[addr..addr + size].copy_from_slice(&data);
                kit.write_virt(0x0800_0000 + addr as u32, &data).unwrap();
            }
            assert_eq!(kit.read_phy(0, memsize).unwrap(), shadow);
        }
    }

    #[test]
    fn out_of_range_writes_are_rejected() {
        let mut kit = factory(&stm32_info()).unwrap();
        assert!(matches!(
            kit.write_virt(0x0800_0000 - 1, &[0xFF]),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            kit.write_virt(0x0800_0000 + 0xe0000, &[0xFF]),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn empty_write_does_not_dirty_a_block() {
        let mut kit = factory(&stm32_info()).unwrap();
        kit.write_virt(0x0800_0000, &[]).unwrap();
        assert!(kit.dirty_blocks().is_empty());
    }

    #[test]
    fn uniform_table_requires_divisibility() {
        assert!(uniform_table(0x1001, 0x100).is_err());
        assert!(uniform_table(0, 0x100).is_err());
        let table = uniform_table(0x400, 0x100).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table[3], Block { start: 0x300, end: 0x400 });
    }
}
