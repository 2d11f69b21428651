use std::fmt;

use crate::error::IdentityResult;
use crate::reader::bytes_at;

/// A GUID in its on-disk mixed-endian layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Decode the 16-byte little-endian representation found in PDB streams
    /// and CodeView records.
    pub fn from_le_bytes(b: &[u8; 16]) -> Self {
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&b[8..16]);
        Self {
            data1: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            data2: u16::from_le_bytes([b[4], b[5]]),
            data3: u16::from_le_bytes([b[6], b[7]]),
            data4,
        }
    }

    pub fn to_le_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..16].copy_from_slice(&self.data4);
        out
    }

    pub(crate) fn read(data: &[u8], offset: usize) -> IdentityResult<Self> {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes_at(data, offset, 16)?);
        Ok(Self::from_le_bytes(&raw))
    }
}

/// Uppercase hex without separators, e.g. `DBF7CE25C6DC4E0EA9AD889187E296A2`.
impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}{:04X}{:04X}{}",
            self.data1,
            self.data2,
            self.data3,
            hex::encode_upper(self.data4)
        )
    }
}
