//! Loads Intel HEX images into a devkit model.
//!
//! Only the record types MCU toolchains actually emit for UHB kits are
//! accepted: data, end-of-file and extended linear address. Anything
//! else, and any tokenizer error (bad checksum, malformed line), aborts
//! the session before a single byte goes out on the wire.

use crate::devkit::DevKitModel;
use crate::Error;
use ihex::{Reader, Record};
use std::io::Read;

/// Reads an Intel HEX stream and stages every data record in the model.
pub fn load<R: Read>(mut reader: R, kit: &mut DevKitModel) -> Result<(), Error> {
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    load_str(&contents, kit)
}

/// Like [`load`], for in-memory HEX contents.
pub fn load_str(hex: &str, kit: &mut DevKitModel) -> Result<(), Error> {
    let mut base_addr: u32 = 0;
    for record in Reader::new(hex) {
        match record.map_err(|e| Error::Hex(format!("{:?}", e)))? {
            Record::Data { offset, value } => {
                kit.write_virt(base_addr + u32::from(offset), &value)?
            }
            Record::EndOfFile => break,
            Record::ExtendedLinearAddress(upper) => base_addr = u32::from(upper) << 16,
            other => return Err(Error::Hex(format!("unsupported record: {:?}", other))),
        }
    }
    Ok(())
}
