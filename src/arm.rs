//! ARM Cortex-M devkit families.
//!
//! All of them share the same bootloader fix: the reset vector is
//! re-pointed at the bootloader, and a small ARM-Thumb program placed
//! right below `BootStart` restores the application's stack pointer and
//! entry address when the bootloader hands control back.

use crate::bootinfo::{BootInfo, McuType};
use crate::devkit::{require, Block, DevKitModel, Family};
use crate::encoder::{encode, Endian};
use crate::utils::HexSlice;
use crate::Error;
use log::{debug, warn};

/// Generic ARM-Thumb kits (including Stellaris and Tiva boards). These
/// use the default Flash block model, so only the bootloader fix
/// diverges from the base behavior.
#[derive(Debug)]
pub struct GenericArm;

impl Family for GenericArm {
    fn supported(&self) -> &'static [McuType] {
        &[
            McuType::Arm,
            McuType::StellarisM3,
            McuType::StellarisM4,
            McuType::Stellaris,
            McuType::TivaM4,
        ]
    }

    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        fix_arm_bootloader(model, disable_bootloader)
    }
}

/// STM32 kits: ARM-Thumb devices whose main Flash is mapped at
/// `0x0800_0000` and split into non-uniform sectors.
#[derive(Debug)]
pub struct Stm32;

/// Sector layout of the STM32F2/F4 main Flash: four 16 KiB sectors, one
/// 64 KiB sector, then 128 KiB sectors up to the bootloader.
const SECTOR_SCHEDULE: [(usize, u32); 3] = [(4, 16 * 1024), (1, 64 * 1024), (6, 128 * 1024)];

impl Family for Stm32 {
    fn supported(&self) -> &'static [McuType] {
        &[
            McuType::Stm32L1xx,
            McuType::Stm32F1xx,
            McuType::Stm32F2xx,
            McuType::Stm32F4xx,
        ]
    }

    fn flash_mem_offset(&self) -> u32 {
        0x0800_0000
    }

    fn block_table(&self, info: &BootInfo) -> Result<Vec<Block>, Error> {
        let boot_start = require(info.boot_start, "BootStart")?;
        let mut table = Vec::new();
        let mut start = 0u32;
        for &(count, size) in SECTOR_SCHEDULE.iter() {
            for _ in 0..count {
                table.push(Block {
                    start,
                    end: start + size,
                });
                start += size;
            }
        }
        if start != boot_start {
            return Err(Error::Descriptor(format!(
                "STM32 sector schedule covers 0x{:x} bytes but BootStart is 0x{:x}",
                start, boot_start
            )));
        }
        Ok(table)
    }

    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        fix_arm_bootloader(model, disable_bootloader)
    }
}

/// ARM-Thumb instructions loading a 32-bit value into r0 (movw/movt).
fn load_r0(value: u32) -> Result<Vec<u8>, Error> {
    let mut out = encode(
        "0fgh0000ijklmnop11110e100100abcd",
        Some(value & 0xffff),
        Endian::Little,
    )?;
    out.extend(encode(
        "0fgh0000ijklmnop11110e101100abcd",
        Some(value >> 16),
        Endian::Little,
    )?);
    Ok(out)
}

/// Points the reset vector at the bootloader and stages the 20-byte
/// startup stub (set SP, branch to the original reset address) in the
/// slot the bootloader expects right below `BootStart`.
fn fix_arm_bootloader(model: &mut DevKitModel, disable_bootloader: bool) -> Result<(), Error> {
    let head = model.read_phy(0, 8)?;
    let stackp = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let mut resetaddr = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    debug!("first block before fix: {:?}", HexSlice(&head));
    if resetaddr & 1 != 1 {
        warn!(
            "reset address 0x{:x} does not have a Thumb mark -- enforcing it",
            resetaddr
        );
        resetaddr |= 1;
    }
    if !disable_bootloader {
        // The CPU must come up in the bootloader, Thumb bit included.
        model.write_phy(4, &(model.boot_start() | 1).to_le_bytes())?;
        debug!(
            "first block after fix: {:?}",
            HexSlice(&model.read_phy(0, 8)?)
        );
    }

    let mut program = load_r0(stackp)?;
    program.extend(encode("0100011010000101", None, Endian::Little)?); // mov sp, r0
    program.extend(load_r0(resetaddr)?);
    program.extend(encode("0100011100000000", None, Endian::Little)?); // bx r0
    debug_assert_eq!(program.len(), 20); // length expected by the bootloader

    debug!("reset program: {:?}", HexSlice(&program));
    model.write_phy(model.boot_start() - program.len() as u32, &program)
}

#[cfg(test)]
mod tests {
    use crate::bootinfo::McuType;
    use crate::devkit::{factory, tests::stm32_info};

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn every_stm32_type_gets_the_sector_schedule() {
        for mcu in &[
            McuType::Stm32L1xx,
            McuType::Stm32F1xx,
            McuType::Stm32F2xx,
            McuType::Stm32F4xx,
        ] {
            let mut info = stm32_info();
            info.mcu_type = Some(*mcu);
            let kit = factory(&info).unwrap();
            assert_eq!(kit.table().len(), 11);
            assert_eq!(kit.table()[0].len(), 16 * 1024);
            assert_eq!(kit.table()[10].end, 0xe0000);
        }
    }

    #[test]
    fn generic_arm_uses_the_uniform_grid() {
        let mut info = stm32_info();
        info.mcu_type = Some(McuType::Arm);
        let kit = factory(&info).unwrap();
        assert_eq!(kit.table().len(), 0xe0000 / 0x4000);
    }

    #[test]
    fn stm32_bootloader_fix() {
        let mut kit = factory(&stm32_info()).unwrap();
        kit.write_virt(0x0800_0000, &unhex("FCFF0120997E0000417E0000417E0000"))
            .unwrap();
        kit.fix_bootloader(false).unwrap();
        // Reset pointer now targets the bootloader (BootStart | 1).
        assert_eq!(kit.read_phy(0, 8).unwrap(), unhex("FCFF012001000E00"));
        // The startup stub restores SP=0x2001FFFC and branches to the
        // original (Thumb) reset address 0x7E99.
        assert_eq!(
            kit.read_phy(0xe0000 - 20, 20).unwrap(),
            unhex("4FF6FC70C2F20100854647F69960C0F200000047")
        );
    }

    #[test]
    fn disabling_the_bootloader_keeps_the_reset_vector() {
        let mut kit = factory(&stm32_info()).unwrap();
        kit.write_virt(0x0800_0000, &unhex("FCFF0120997E0000"))
            .unwrap();
        kit.fix_bootloader(true).unwrap();
        assert_eq!(kit.read_phy(0, 8).unwrap(), unhex("FCFF0120997E0000"));
        // The stub is staged regardless, pointing at the application.
        assert_eq!(
            kit.read_phy(0xe0000 - 20, 20).unwrap(),
            unhex("4FF6FC70C2F20100854647F69960C0F200000047")
        );
    }

    #[test]
    fn missing_thumb_bit_is_enforced() {
        let mut kit = factory(&stm32_info()).unwrap();
        kit.write_virt(0x0800_0000, &unhex("FCFF0120987E0000"))
            .unwrap();
        kit.fix_bootloader(false).unwrap();
        // 0x7E98 must be branched to as 0x7E99.
        assert_eq!(
            kit.read_phy(0xe0000 - 10, 10).unwrap(),
            unhex("47F69960C0F200000047")
        );
    }
}
