use std::fs::{self, File};
use std::path::Path;

use tracing::debug;

use crate::error::{IdentityError, IdentityResult};

/// Files above this size are memory-mapped instead of read into memory.
const MMAP_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Contents of a binary file, either memory-mapped or heap-allocated.
#[derive(Debug)]
pub enum FileBytes {
    Mmap(memmap2::Mmap),
    Vec(Vec<u8>),
}

impl FileBytes {
    /// Load `path`, mapping large files.
    pub fn open(path: &Path) -> IdentityResult<Self> {
        let size = fs::metadata(path)?.len();
        if size > MMAP_THRESHOLD {
            debug!(path = %path.display(), size, "mapping large file");
            let file = File::open(path)?;
            // SAFETY: the file is opened read-only and only parsed for the
            // lifetime of this value; concurrent truncation is not expected.
            let mmap = unsafe { memmap2::Mmap::map(&file)? };
            Ok(Self::Mmap(mmap))
        } else {
            Ok(Self::Vec(fs::read(path)?))
        }
    }
}

impl AsRef<[u8]> for FileBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileBytes::Mmap(mmap) => mmap.as_ref(),
            FileBytes::Vec(vec) => vec.as_ref(),
        }
    }
}

/// Bounds-checked slice of `len` bytes at `offset`.
pub(crate) fn bytes_at(data: &[u8], offset: usize, len: usize) -> IdentityResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            IdentityError::corrupt(
                offset,
                format!("need {len} bytes, file has {}", data.len()),
            )
        })
}

pub(crate) fn u16_at(data: &[u8], offset: usize) -> IdentityResult<u16> {
    let b = bytes_at(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn u32_at(data: &[u8], offset: usize) -> IdentityResult<u32> {
    let b = bytes_at(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Number of `unit`-sized blocks needed to hold `len` bytes.
pub(crate) fn blocks(len: u64, unit: u64) -> u64 {
    if unit == 0 {
        0
    } else {
        len.div_ceil(unit)
    }
}
