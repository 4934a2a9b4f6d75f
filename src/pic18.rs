//! PIC18 devkit family.

use crate::bootinfo::McuType;
use crate::devkit::{DevKitModel, Family};
use crate::encoder::{encode, Endian};
use crate::utils::HexSlice;
use crate::Error;
use log::debug;

/// PIC18 kits use the default block model; only the reset vector needs
/// fixing, and writes to the configuration registers must be dropped
/// because the bootloader cannot program them.
#[derive(Debug)]
pub struct Pic18;

/// Start of the PIC configuration data registers.
const CONFIG_DATA_ADDR: u32 = 0x30_0000;

impl Family for Pic18 {
    fn supported(&self) -> &'static [McuType] {
        &[McuType::Pic18, McuType::Pic18Fj]
    }

    fn config_data_addr(&self) -> Option<u32> {
        Some(CONFIG_DATA_ADDR)
    }

    fn fix_bootloader(
        &self,
        model: &mut DevKitModel,
        disable_bootloader: bool,
    ) -> Result<(), Error> {
        let jump_to_main = model.read_phy(0, 4)?;
        debug!("first block before fix: {:?}", HexSlice(&jump_to_main));
        if !disable_bootloader {
            let boot_start = model.boot_start();
            if boot_start & 1 != 0 {
                return Err(Error::Misaligned {
                    addr: boot_start,
                    align: 2,
                });
            }
            let k = boot_start >> 1;
            // GOTO k (2-word instruction).
            let mut goto = encode("11101111abcdefgh", Some(k & 0xff), Endian::Little)?;
            goto.extend(encode("1111abcdefghijkl", Some(k >> 8), Endian::Little)?);
            model.write_phy(0, &goto)?;
        }
        debug!(
            "first block after fix: {:?}",
            HexSlice(&model.read_phy(0, 4)?)
        );
        // Relocate the original vector so the bootloader can chain into
        // the application.
        model.write_phy(model.boot_start() - 4, &jump_to_main)
    }
}
