//! Firmware file formats used by DFU and DfuSe bootloaders
//!
//! - the 16 byte DFU file suffix binding an image to a vendor / product /
//!   device revision, protected by a CRC-32 (DFU 1.1, appendix B)
//! - the DfuSe container holding multiple targets and elements
//!   (STMicroelectronics UM0391)
//!
//! Both layouts are bit-exact: they must stay compatible with existing
//! images and bootloaders.

pub use dfuse::*;
pub use error::DfuFileError;
pub use suffix::*;

mod dfuse;
mod error;
mod suffix;

fn extract_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn extract_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
