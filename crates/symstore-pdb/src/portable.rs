//! Portable PDB files (ECMA-335 metadata with a `#Pdb` stream).

use crate::error::{IdentityError, IdentityResult};
use crate::guid::Guid;
use crate::reader::{bytes_at, u16_at, u32_at};

pub const PORTABLE_SIGNATURE: &[u8; 4] = b"BSJB";
pub const PDB_STREAM_NAME: &str = "#Pdb";

/// Age reported for every portable PDB.
///
/// The debug directory of a managed image always records age 1, whatever
/// the `#Pdb` stream stamp says, so the stream value is never used.
pub const PORTABLE_AGE: u32 = 1;

/// One entry of the metadata stream table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Decoded metadata root of a portable PDB.
#[derive(Debug)]
pub struct PortablePdb {
    pub major_version: u16,
    pub minor_version: u16,
    pub version: String,
    pub streams: Vec<StreamHeader>,
    guid: Guid,
}

impl PortablePdb {
    /// Parse the metadata root and read the PDB id from `#Pdb`.
    ///
    /// Returns [`IdentityError::SignatureMismatch`] when the magic is not
    /// `BSJB`.
    pub fn parse(data: &[u8]) -> IdentityResult<Self> {
        if data.len() < PORTABLE_SIGNATURE.len() || &data[..4] != PORTABLE_SIGNATURE {
            return Err(IdentityError::SignatureMismatch);
        }
        let major_version = u16_at(data, 4)?;
        let minor_version = u16_at(data, 6)?;
        let version_len = u32_at(data, 12)? as usize;
        let version_raw = bytes_at(data, 16, version_len)?;
        let version = String::from_utf8_lossy(version_raw)
            .trim_end_matches('\0')
            .to_string();

        let mut cursor = 16 + version_len;
        let stream_count = u16_at(data, cursor + 2)? as usize;
        cursor += 4;

        let mut streams = Vec::with_capacity(stream_count);
        for _ in 0..stream_count {
            let offset = u32_at(data, cursor)?;
            let size = u32_at(data, cursor + 4)?;
            cursor += 8;
            let (name, consumed) = read_padded_name(data, cursor)?;
            cursor += consumed;
            streams.push(StreamHeader { name, offset, size });
        }

        let pdb = streams
            .iter()
            .find(|s| s.name == PDB_STREAM_NAME)
            .ok_or_else(|| IdentityError::corrupt(cursor, "no #Pdb stream"))?;
        let guid = Guid::read(data, pdb.offset as usize)?;

        Ok(Self {
            major_version,
            minor_version,
            version,
            streams,
            guid,
        })
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn age(&self) -> u32 {
        PORTABLE_AGE
    }
}

/// NUL-terminated name padded to a 4-byte boundary; returns the name and
/// the number of bytes consumed.
fn read_padded_name(data: &[u8], start: usize) -> IdentityResult<(String, usize)> {
    let mut name = Vec::new();
    let mut at = start;
    loop {
        let chunk = bytes_at(data, at, 4)?;
        at += 4;
        match chunk.iter().position(|b| *b == 0) {
            Some(end) => {
                name.extend_from_slice(&chunk[..end]);
                break;
            }
            None => name.extend_from_slice(chunk),
        }
    }
    let name = String::from_utf8(name)
        .map_err(|e| IdentityError::corrupt(start, format!("stream name is not UTF-8: {e}")))?;
    Ok((name, at - start))
}
