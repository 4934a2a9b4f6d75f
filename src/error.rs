use crate::bootinfo::McuType;
use std::fmt::{self, Display};
use std::io;

/// The error type used by this library.
///
/// Anything that would produce a corrupted image on the device is
/// reported through this type; recoverable anomalies (unknown descriptor
/// fields, unexpected ACK codes) are only logged, because the protocol
/// has no way to recover from them anyway.
#[derive(Debug)]
pub enum Error {
    /// A HID transport read or write failed.
    Io(io::Error),

    /// The Intel HEX input is malformed or uses an unsupported record.
    Hex(String),

    /// The BootInfo descriptor lacks a field required for programming,
    /// or carries a value the Flash model cannot work with.
    Descriptor(String),

    /// No devkit family claims the reported MCU type.
    UnsupportedMcu(McuType),

    /// A write addressed a byte outside the modeled Flash blocks.
    OutOfRange { addr: u32 },

    /// An address or length violates the family's packing rules.
    Misaligned { addr: u32, align: u32 },

    /// An instruction template contains a disallowed character or has an
    /// unsupported bit length.
    InvalidTemplate(String),

    /// An instruction template uses field bits but no field was given.
    FieldRequired,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "HID transport error: {}", e),
            Error::Hex(msg) => write!(f, "HEX input error: {}", msg),
            Error::Descriptor(msg) => write!(f, "bad BootInfo descriptor: {}", msg),
            Error::UnsupportedMcu(mcu) => {
                write!(f, "support for {} devkits is not yet implemented", mcu)
            }
            Error::OutOfRange { addr } => {
                write!(f, "address 0x{:x} is outside the device Flash", addr)
            }
            Error::Misaligned { addr, align } => write!(
                f,
                "address 0x{:x} is not aligned to {} bytes",
                addr, align
            ),
            Error::InvalidTemplate(msg) => write!(f, "invalid instruction template: {}", msg),
            Error::FieldRequired => f.write_str("supplied template requires a field"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
