//! Decoder for the BootInfo descriptor a UHB device returns in response
//! to the `INFO` command.
//!
//! The descriptor is a size-prefixed sequence of `(field id, value)`
//! records whose interior alignment depends on the MCU's compiler: 32-bit
//! parts align values naturally, PIC16/PIC18 parts pack them, and the
//! 16-bit PIC24/dsPIC parts align to two bytes. The device always emits
//! `McuType` first, so the alignment of the remaining fields can be
//! chosen while parsing.

use log::warn;
use std::fmt;

/// MCU type codes reported in the `McuType` descriptor field.
///
/// Codes outside the known set are retained numerically in
/// [`McuType::Unknown`] so they can still be reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuType {
    Pic16,
    Pic18,
    Pic18Fj,
    Pic24,
    DsPic,
    DsPic33,
    Pic32,
    Pic32Mz,
    Arm,
    StellarisM3,
    StellarisM4,
    Stellaris,
    Stm32L1xx,
    Stm32F1xx,
    Stm32F2xx,
    Stm32F4xx,
    TivaM4,
    Unknown(u8),
}

impl McuType {
    pub fn from_code(code: u8) -> McuType {
        match code {
            1 => McuType::Pic16,
            2 => McuType::Pic18,
            3 => McuType::Pic18Fj,
            4 => McuType::Pic24,
            10 => McuType::DsPic,
            11 => McuType::DsPic33,
            20 => McuType::Pic32,
            21 => McuType::Pic32Mz,
            30 => McuType::Arm,
            31 => McuType::StellarisM3,
            32 => McuType::StellarisM4,
            33 => McuType::Stellaris,
            34 => McuType::Stm32L1xx,
            35 => McuType::Stm32F1xx,
            36 => McuType::Stm32F2xx,
            37 => McuType::Stm32F4xx,
            38 => McuType::TivaM4,
            other => McuType::Unknown(other),
        }
    }
}

impl fmt::Display for McuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McuType::Pic16 => f.write_str("PIC16"),
            McuType::Pic18 => f.write_str("PIC18"),
            McuType::Pic18Fj => f.write_str("PIC18FJ"),
            McuType::Pic24 => f.write_str("PIC24"),
            McuType::DsPic => f.write_str("DSPIC"),
            McuType::DsPic33 => f.write_str("DSPIC33"),
            McuType::Pic32 => f.write_str("PIC32"),
            McuType::Pic32Mz => f.write_str("PIC32MZ"),
            McuType::Arm => f.write_str("ARM"),
            McuType::StellarisM3 => f.write_str("STELLARIS_M3"),
            McuType::StellarisM4 => f.write_str("STELLARIS_M4"),
            McuType::Stellaris => f.write_str("STELLARIS"),
            McuType::Stm32L1xx => f.write_str("STM32L1XX"),
            McuType::Stm32F1xx => f.write_str("STM32F1XX"),
            McuType::Stm32F2xx => f.write_str("STM32F2XX"),
            McuType::Stm32F4xx => f.write_str("STM32F4XX"),
            McuType::TivaM4 => f.write_str("TIVA_M4"),
            McuType::Unknown(code) => write!(f, "unknown MCU type {}", code),
        }
    }
}

/// Fields decoded from a BootInfo descriptor.
///
/// Every field is optional: the device decides which records it emits,
/// and unknown or malformed trailing records only truncate the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootInfo {
    pub mcu_type: Option<McuType>,
    pub mcu_id: Option<u32>,
    pub erase_block: Option<u16>,
    pub write_block: Option<u16>,
    pub boot_rev: Option<u16>,
    pub boot_start: Option<u32>,
    pub dev_dsc: Option<[u8; 20]>,
    pub mcu_size: Option<u32>,
}

/// Descriptor layout of each known field id.
fn field_info(id: u8) -> Option<(&'static str, usize)> {
    Some(match id {
        1 => ("McuType", 1),
        2 => ("McuId", 4),
        3 => ("EraseBlock", 2),
        4 => ("WriteBlock", 2),
        5 => ("BootRev", 2),
        6 => ("BootStart", 4),
        7 => ("DevDsc", 20),
        8 => ("McuSize", 4),
        _ => return None,
    })
}

fn replace<T: fmt::Debug>(slot: &mut Option<T>, name: &str, id: u8, value: T) {
    if let Some(old) = slot.take() {
        warn!(
            "field {:?} ({}) duplicated -- discarding old value: {:?}",
            name, id, old
        );
    }
    *slot = Some(value);
}

impl BootInfo {
    /// Parses a BootInfo descriptor buffer (values little-endian, as on
    /// every kit seen so far).
    ///
    /// Unknown field ids abort parsing with a warning; everything decoded
    /// up to that point is kept.
    pub fn parse(buf: &[u8]) -> BootInfo {
        let mut info = BootInfo::default();
        if buf.is_empty() {
            warn!("empty BootInfo descriptor");
            return info;
        }

        // Byte 0 declares sizeof(struct); nothing beyond it is valid.
        let b_size = buf[0] as usize;
        let buf = &buf[..b_size.min(buf.len())];
        let mut pos = 1;

        while pos < buf.len() {
            // Skip initial field padding.
            let mut pad = 0;
            while pos < buf.len() && buf[pos] == 0 {
                pos += 1;
                pad += 1;
            }
            if pos >= buf.len() {
                break;
            }

            let id = buf[pos];
            let (name, num_bytes) = match field_info(id) {
                Some(fi) => fi,
                None => {
                    warn!("field {} not recognized -- aborting parsing", id);
                    break;
                }
            };

            // Interior alignment of the value, decided by the MCU family
            // once McuType is known. The device emits McuType first.
            let mut align = num_bytes.min(4);
            match info.mcu_type {
                Some(McuType::Pic16)
                | Some(McuType::Pic18)
                | Some(McuType::Pic18Fj)
                | Some(McuType::Pic24)
                | Some(McuType::DsPic) => align = 1,
                Some(McuType::DsPic33) => align = num_bytes.min(2),
                _ => {}
            }
            if pad >= align || (num_bytes <= 4 && pos % align != 0) {
                warn!(
                    "initial padding of {} inadequate in field {:?} ({})",
                    pad, name, id
                );
            }

            // Go to the data, skipping the internal padding.
            pos += 1;
            if num_bytes <= 4 {
                pos += (align - pos % align) % align;
            }
            if pos + num_bytes > buf.len() {
                warn!("field {:?} ({}) truncated -- aborting parsing", name, id);
                break;
            }
            let data = &buf[pos..pos + num_bytes];
            pos += num_bytes;

            match id {
                1 => {
                    let mcu = McuType::from_code(data[0]);
                    if let McuType::Unknown(code) = mcu {
                        warn!(
                            "field \"McuType\" (1) contains value {} not mapped in its enum",
                            code
                        );
                    }
                    replace(&mut info.mcu_type, name, id, mcu);
                }
                2 => replace(&mut info.mcu_id, name, id, read_u32(data)),
                3 => replace(&mut info.erase_block, name, id, read_u16(data)),
                4 => replace(&mut info.write_block, name, id, read_u16(data)),
                5 => replace(&mut info.boot_rev, name, id, read_u16(data)),
                6 => replace(&mut info.boot_start, name, id, read_u32(data)),
                7 => {
                    let mut dsc = [0u8; 20];
                    dsc.copy_from_slice(data);
                    replace(&mut info.dev_dsc, name, id, dsc);
                }
                8 => replace(&mut info.mcu_size, name, id, read_u32(data)),
                _ => unreachable!(),
            }
        }
        info
    }

    /// The device description string, trimmed at the first NUL.
    pub fn description(&self) -> Option<&str> {
        let dsc = self.dev_dsc.as_ref()?;
        let end = dsc.iter().position(|&b| b == 0).unwrap_or(dsc.len());
        std::str::from_utf8(&dsc[..end]).ok()
    }
}

fn read_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

impl fmt::Display for BootInfo {
    /// Pretty-prints the fields in field-id order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.mcu_type {
            writeln!(f, "McuType: {}", v)?;
        }
        if let Some(v) = self.mcu_id {
            writeln!(f, "McuId: 0x{:x}", v)?;
        }
        if let Some(v) = self.erase_block {
            writeln!(f, "EraseBlock: 0x{:x}", v)?;
        }
        if let Some(v) = self.write_block {
            writeln!(f, "WriteBlock: 0x{:x}", v)?;
        }
        if let Some(v) = self.boot_rev {
            writeln!(f, "BootRev: 0x{:x}", v)?;
        }
        if let Some(v) = self.boot_start {
            writeln!(f, "BootStart: 0x{:x}", v)?;
        }
        if let Some(v) = self.description() {
            writeln!(f, "DevDsc: {:?}", v)?;
        }
        if let Some(v) = self.mcu_size {
            writeln!(f, "McuSize: 0x{:x}", v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fixture(data: &str) -> BootInfo {
        let raw: String = data.split_whitespace().collect();
        BootInfo::parse(&hex::decode(raw).unwrap())
    }

    fn dsc(s: &str) -> [u8; 20] {
        let mut d = [0u8; 20];
        d[..s.len()].copy_from_slice(s.as_bytes());
        d
    }

    #[test]
    fn mikromedia_stm32() {
        let info = parse_fixture(
            "38012500080000000000100003000040040004000500101306
             00000000000e00076d696b726f6d65646961000000000000000000000000
             000000000000000000",
        );
        assert_eq!(
            info,
            BootInfo {
                mcu_type: Some(McuType::Stm32F4xx),
                mcu_id: None,
                erase_block: Some(0x4000),
                write_block: Some(0x4),
                boot_rev: Some(0x1310),
                boot_start: Some(0xe0000),
                dev_dsc: Some(dsc("mikromedia")),
                mcu_size: Some(0x100000),
            }
        );
    }

    #[test]
    fn mikromedia_dspic33() {
        let info = parse_fixture(
            "32010b000800000408000300000c0400800105000013060000
             400500076d696b726f6d6564696100000000000000000000000000000000
             000000000000000000",
        );
        assert_eq!(
            info,
            BootInfo {
                mcu_type: Some(McuType::DsPic33),
                mcu_id: None,
                erase_block: Some(0xc00),
                write_block: Some(0x180),
                boot_rev: Some(0x1300),
                boot_start: Some(0x54000),
                dev_dsc: Some(dsc("mikromedia")),
                mcu_size: Some(0x80400),
            }
        );
    }

    #[test]
    fn pic18_board() {
        let info = parse_fixture(
            "2b010208008000000340000420000500120600630000074e4f
             204e414d4500000000000000000000000000000000000000000000000000
             000000000000000000",
        );
        assert_eq!(
            info,
            BootInfo {
                mcu_type: Some(McuType::Pic18),
                mcu_id: None,
                erase_block: Some(0x40),
                write_block: Some(0x20),
                boot_rev: Some(0x1200),
                boot_start: Some(0x6300),
                dev_dsc: Some(dsc("NO NAME")),
                mcu_size: Some(0x8000),
            }
        );
    }

    #[test]
    fn multimedia_board_pic32mx7() {
        let info = parse_fixture(
            "380114000300001004000002050000130600000000c0079d07
             4d4d42204d58370000000000000000000000000000000008000000000008
             000000000000000000",
        );
        assert_eq!(info.mcu_type, Some(McuType::Pic32));
        assert_eq!(info.erase_block, Some(0x1000));
        assert_eq!(info.write_block, Some(0x200));
        assert_eq!(info.boot_rev, Some(0x1300));
        assert_eq!(info.boot_start, Some(0x9d07c000));
        assert_eq!(info.dev_dsc, Some(dsc("MMB MX7")));
        assert_eq!(info.mcu_size, Some(0x80000));
    }

    #[test]
    fn unknown_field_aborts_without_losing_earlier_fields() {
        // McuType followed by an unrecognized field id.
        let info = BootInfo::parse(&[0x08, 0x01, 0x25, 0x7f, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(info.mcu_type, Some(McuType::Stm32F4xx));
        assert_eq!(info.boot_start, None);
    }

    #[test]
    fn unknown_enum_value_is_retained() {
        let info = BootInfo::parse(&[0x03, 0x01, 0x63]);
        assert_eq!(info.mcu_type, Some(McuType::Unknown(99)));
    }

    #[test]
    fn duplicate_field_overwrites() {
        let info = BootInfo::parse(&[0x05, 0x01, 0x02, 0x01, 0x14]);
        assert_eq!(info.mcu_type, Some(McuType::Pic32));
    }

    #[test]
    fn size_prefix_bounds_parsing() {
        // BootStart record beyond the declared size must be ignored.
        let mut raw = vec![0x03, 0x01, 0x25];
        raw.extend_from_slice(&[0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0e, 0x00]);
        let info = BootInfo::parse(&raw);
        assert_eq!(info.mcu_type, Some(McuType::Stm32F4xx));
        assert_eq!(info.boot_start, None);
    }

    #[test]
    fn renders_like_the_device_report() {
        let info = parse_fixture(
            "2b010208008000000340000420000500120600630000074e4f
             204e414d4500000000000000000000000000000000000000000000000000
             000000000000000000",
        );
        let rendered = info.to_string();
        assert!(rendered.contains("McuType: PIC18"));
        assert!(rendered.contains("BootStart: 0x6300"));
        assert!(rendered.contains("DevDsc: \"NO NAME\""));
    }
}
