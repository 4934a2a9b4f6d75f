//! Bit-template encoder for the handful of MCU instructions the
//! bootloader fixups have to synthesize.
//!
//! A template is a string of `'0'`/`'1'` bits, optionally containing
//! lowercase letters which are substituted by the bits of a field value,
//! `'a'` being the field's most significant bit. This mirrors the way
//! instruction set manuals draw their encodings, so the templates in the
//! family modules can be checked against the datasheet at a glance.

use crate::Error;

/// Byte order of the encoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Encodes an MCU instruction, returning it as a byte string.
///
/// The template must be 8, 16, 24 or 32 bits long. If it contains field
/// letters, `field` supplies their value, right-justified to the width
/// spanned by the highest letter used; excess high bits of `field` are
/// silently ignored. 24-bit instructions are encoded in a 32-bit
/// container whose padding byte is dropped.
pub fn encode(template: &str, field: Option<u32>, endian: Endian) -> Result<Vec<u8>, Error> {
    let num_bytes = match template.len() {
        8 => 1,
        16 => 2,
        24 => 3,
        32 => 4,
        n => {
            return Err(Error::InvalidTemplate(format!(
                "template length {} is not 8, 16, 24 or 32",
                n
            )))
        }
    };

    // Width of the field, in bits: the highest letter used decides.
    let mut width = 0u32;
    for c in template.chars() {
        match c {
            '0' | '1' => {}
            'a'..='z' => width = width.max(c as u32 - 'a' as u32 + 1),
            _ => {
                return Err(Error::InvalidTemplate(format!(
                    "char {:?} disallowed in template",
                    c
                )))
            }
        }
    }
    let field = if width != 0 {
        field.ok_or(Error::FieldRequired)?
    } else {
        0
    };

    let mut instruction = 0u32;
    for c in template.chars() {
        let bit = match c {
            '0' => 0,
            '1' => 1,
            _ => {
                let idx = c as u32 - 'a' as u32;
                (field >> (width - 1 - idx)) & 1
            }
        };
        instruction = instruction << 1 | bit;
    }

    Ok(match endian {
        Endian::Little => instruction.to_le_bytes()[..num_bytes].to_vec(),
        Endian::Big => instruction.to_be_bytes()[4 - num_bytes..].to_vec(),
    })
}
