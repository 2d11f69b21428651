//! Native PDB files in the MSF 7.00 multi-stream container format.
//!
//! The file is an array of fixed-size pages. The superblock at offset 0
//! records the page size and the size of the stream directory. The directory
//! pages are listed in one or more "directory map" pages, whose indices sit
//! right after the superblock:
//!
//! ```text
//! [32 bytes: signature]
//! [u32: page size] [u32: free page map] [u32: page count]
//! [u32: directory size] [u32: reserved]
//! [u32 * n: directory map page indices]
//! ```
//!
//! The directory itself holds the stream count, every stream size, then the
//! page list of each stream in order.

use crate::error::{IdentityError, IdentityResult};
use crate::guid::Guid;
use crate::reader::{blocks, bytes_at, u32_at};

pub const MSF_SIGNATURE: &[u8; 32] = b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0";

const SUPERBLOCK_FIELDS: usize = MSF_SIGNATURE.len();
const DIRECTORY_MAP_OFFSET: usize = SUPERBLOCK_FIELDS + 20;

/// Stream 1 holds the PDB info header (version, signature, age, GUID).
pub const PDB_STREAM_INDEX: usize = 1;
/// Stream 3 holds the DBI header whose age is authoritative.
pub const DBI_STREAM_INDEX: usize = 3;

const PDB_STREAM_GUID_OFFSET: usize = 12;
const DBI_STREAM_AGE_OFFSET: usize = 8;

/// Size recorded for streams that were deleted.
const NIL_STREAM_SIZE: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Stream {
    size: u32,
    pages: Vec<u32>,
}

/// Decoded stream directory of an MSF file.
#[derive(Debug)]
pub struct MsfFile<'a> {
    data: &'a [u8],
    page_size: usize,
    streams: Vec<Stream>,
}

impl<'a> MsfFile<'a> {
    /// Check the signature and decode the stream directory.
    ///
    /// Returns [`IdentityError::SignatureMismatch`] when `data` is not an
    /// MSF 7.00 file; every other error means the container is damaged.
    pub fn parse(data: &'a [u8]) -> IdentityResult<Self> {
        if data.len() < MSF_SIGNATURE.len() || &data[..MSF_SIGNATURE.len()] != MSF_SIGNATURE {
            return Err(IdentityError::SignatureMismatch);
        }
        let page_size = u32_at(data, SUPERBLOCK_FIELDS)? as usize;
        if page_size == 0 {
            return Err(IdentityError::corrupt(SUPERBLOCK_FIELDS, "page size is zero"));
        }
        let directory_size = u32_at(data, SUPERBLOCK_FIELDS + 12)? as usize;
        if directory_size > data.len() {
            return Err(IdentityError::corrupt(
                SUPERBLOCK_FIELDS + 12,
                format!("directory size {directory_size} exceeds file size {}", data.len()),
            ));
        }

        let directory_pages = blocks(directory_size as u64, page_size as u64) as usize;
        let map_pages = blocks(directory_pages as u64 * 4, page_size as u64) as usize;

        // Concatenate the directory map pages, then read the directory page list.
        let mut map = Vec::with_capacity(map_pages.saturating_mul(page_size).min(data.len()));
        for i in 0..map_pages {
            let page = u32_at(data, DIRECTORY_MAP_OFFSET + i * 4)?;
            map.extend_from_slice(page_bytes(data, page_size, page)?);
        }
        let directory_page_list = (0..directory_pages)
            .map(|i| u32_at(&map, i * 4))
            .collect::<IdentityResult<Vec<_>>>()?;

        let directory = read_pages(data, page_size, &directory_page_list, directory_size)?;
        let streams = parse_directory(&directory, page_size)?;

        Ok(Self {
            data,
            page_size,
            streams,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Size in bytes of stream `index`; deleted streams report zero.
    pub fn stream_size(&self, index: usize) -> IdentityResult<u32> {
        let size = self.stream(index)?.size;
        Ok(if size == NIL_STREAM_SIZE { 0 } else { size })
    }

    fn stream(&self, index: usize) -> IdentityResult<&Stream> {
        self.streams
            .get(index)
            .ok_or(IdentityError::InvalidStreamIndex {
                index,
                count: self.streams.len(),
            })
    }

    /// Byte offset of `offset` within the first page of stream `index`,
    /// or `None` when the stream is empty.
    fn first_page_offset(&self, index: usize, offset: usize) -> IdentityResult<Option<usize>> {
        let stream = self.stream(index)?;
        Ok(stream
            .pages
            .first()
            .map(|page| *page as usize * self.page_size + offset))
    }

    /// GUID from the PDB info stream.
    pub fn guid(&self) -> IdentityResult<Guid> {
        let at = self
            .first_page_offset(PDB_STREAM_INDEX, PDB_STREAM_GUID_OFFSET)?
            .ok_or_else(|| IdentityError::corrupt(0, "PDB info stream is empty"))?;
        Guid::read(self.data, at)
    }

    /// Age from the DBI stream; `None` when the file has no DBI stream data.
    pub fn age(&self) -> IdentityResult<Option<u32>> {
        match self.first_page_offset(DBI_STREAM_INDEX, DBI_STREAM_AGE_OFFSET)? {
            Some(at) => Ok(Some(u32_at(self.data, at)?)),
            None => Ok(None),
        }
    }
}

fn page_bytes(data: &[u8], page_size: usize, page: u32) -> IdentityResult<&[u8]> {
    let start = (page as usize)
        .checked_mul(page_size)
        .ok_or_else(|| IdentityError::corrupt(0, format!("page {page} out of range")))?;
    bytes_at(data, start, page_size)
}

/// Read `len` bytes spread over `pages`.
fn read_pages(data: &[u8], page_size: usize, pages: &[u32], len: usize) -> IdentityResult<Vec<u8>> {
    let mut out = Vec::with_capacity(len.min(data.len()));
    for page in pages {
        let remaining = len - out.len();
        if remaining == 0 {
            break;
        }
        let chunk = page_bytes(data, page_size, *page)?;
        out.extend_from_slice(&chunk[..remaining.min(page_size)]);
    }
    if out.len() < len {
        return Err(IdentityError::corrupt(0, "stream directory is truncated"));
    }
    Ok(out)
}

fn parse_directory(directory: &[u8], page_size: usize) -> IdentityResult<Vec<Stream>> {
    let count = u32_at(directory, 0)? as usize;
    if count.saturating_mul(4) > directory.len() {
        return Err(IdentityError::corrupt(
            0,
            format!("stream count {count} exceeds directory size"),
        ));
    }
    let sizes = (0..count)
        .map(|i| u32_at(directory, 4 + i * 4))
        .collect::<IdentityResult<Vec<_>>>()?;

    let mut cursor = 4 + count * 4;
    let mut streams = Vec::with_capacity(count);
    for size in sizes {
        let page_count = if size == NIL_STREAM_SIZE {
            0
        } else {
            blocks(size as u64, page_size as u64) as usize
        };
        let pages = (0..page_count)
            .map(|i| u32_at(directory, cursor + i * 4))
            .collect::<IdentityResult<Vec<_>>>()?;
        cursor += page_count * 4;
        streams.push(Stream { size, pages });
    }
    Ok(streams)
}
