//! Synthetic binaries for tests.
//!
//! Builders produce the smallest files the parsers accept: a PE32+ image
//! with an optional CodeView record, an MSF 7.00 PDB with PDB info and DBI
//! streams, and a portable PDB metadata root.

use std::io;
use std::path::{Path, PathBuf};

use crate::guid::Guid;
use crate::msf::MSF_SIGNATURE;
use crate::pe::{CODEVIEW_RSDS, DEBUG_TYPE_CODEVIEW, OPTIONAL_MAGIC_PE32, OPTIONAL_MAGIC_PE32_PLUS};
use crate::portable::PORTABLE_SIGNATURE;

/// CodeView record written into [`pe_image`].
#[derive(Clone, Debug)]
pub struct CodeViewSpec {
    pub guid: Guid,
    pub age: u32,
    pub pdb_path: String,
}

const PE_HEADER_OFFSET: usize = 0x40;
const PE32_PLUS_OPTIONAL_SIZE: usize = 240;
const PE32_OPTIONAL_SIZE: usize = 224;
const SECTION_RVA: u32 = 0x1000;
const SECTION_FILE_OFFSET: usize = 0x200;
const PE_FILE_SIZE: usize = 0x400;

/// File offset of the `.rdata` section header inside [`pe_image`].
pub const PE_SECTION_HEADER_OFFSET: usize = PE_HEADER_OFFSET + 24 + PE32_PLUS_OPTIONAL_SIZE;
/// File offset of the debug data directory inside [`pe_image`].
pub const PE_DEBUG_DIRECTORY_OFFSET: usize = PE_HEADER_OFFSET + 24 + 112 + 6 * 8;

/// File offset of the CodeView record inside [`pe_image`].
pub const CODEVIEW_FILE_OFFSET: usize = 0x220;

pub const MSF_PAGE_SIZE: usize = 512;
pub const PDB_INFO_STREAM_SIZE: u32 = 28;
const DBI_STREAM_SIZE: u32 = 64;

/// File offset of the `#Pdb` stream name inside [`portable_pdb`].
pub const PORTABLE_PDB_NAME_OFFSET: usize = 40;

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn dos_and_nt_headers(buf: &mut [u8], time_date_stamp: u32, sections: u16, optional_size: u16) {
    buf[0..2].copy_from_slice(b"MZ");
    put_u32(buf, 0x3c, PE_HEADER_OFFSET as u32);
    buf[PE_HEADER_OFFSET..PE_HEADER_OFFSET + 4].copy_from_slice(b"PE\0\0");
    let fh = PE_HEADER_OFFSET + 4;
    put_u16(buf, fh, 0x8664);
    put_u16(buf, fh + 2, sections);
    put_u32(buf, fh + 4, time_date_stamp);
    put_u16(buf, fh + 16, optional_size);
    put_u16(buf, fh + 18, 0x22);
}

/// PE32+ image with one `.rdata` section holding the debug directory.
pub fn pe_image(time_date_stamp: u32, size_of_image: u32, codeview: Option<&CodeViewSpec>) -> Vec<u8> {
    let mut buf = vec![0u8; PE_FILE_SIZE];
    dos_and_nt_headers(&mut buf, time_date_stamp, 1, PE32_PLUS_OPTIONAL_SIZE as u16);

    let opt = PE_HEADER_OFFSET + 24;
    put_u16(&mut buf, opt, OPTIONAL_MAGIC_PE32_PLUS);
    put_u32(&mut buf, opt + 56, size_of_image);
    put_u32(&mut buf, opt + 108, 16);

    let section = PE_SECTION_HEADER_OFFSET;
    buf[section..section + 8].copy_from_slice(b".rdata\0\0");
    put_u32(&mut buf, section + 8, 0x200);
    put_u32(&mut buf, section + 12, SECTION_RVA);
    put_u32(&mut buf, section + 16, 0x200);
    put_u32(&mut buf, section + 20, SECTION_FILE_OFFSET as u32);

    if let Some(cv) = codeview {
        let debug_dir = PE_DEBUG_DIRECTORY_OFFSET;
        put_u32(&mut buf, debug_dir, SECTION_RVA);
        put_u32(&mut buf, debug_dir + 4, 28);

        let mut record = Vec::new();
        record.extend_from_slice(CODEVIEW_RSDS);
        record.extend_from_slice(&cv.guid.to_le_bytes());
        record.extend_from_slice(&cv.age.to_le_bytes());
        record.extend_from_slice(cv.pdb_path.as_bytes());
        record.push(0);

        let entry = SECTION_FILE_OFFSET;
        put_u32(&mut buf, entry + 12, DEBUG_TYPE_CODEVIEW);
        put_u32(&mut buf, entry + 16, record.len() as u32);
        put_u32(
            &mut buf,
            entry + 20,
            SECTION_RVA + (CODEVIEW_FILE_OFFSET - SECTION_FILE_OFFSET) as u32,
        );
        put_u32(&mut buf, entry + 24, CODEVIEW_FILE_OFFSET as u32);
        buf[CODEVIEW_FILE_OFFSET..CODEVIEW_FILE_OFFSET + record.len()].copy_from_slice(&record);
    }
    buf
}

/// PE32 image without sections or debug directory.
pub fn pe32_image(time_date_stamp: u32, size_of_image: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 0x200];
    dos_and_nt_headers(&mut buf, time_date_stamp, 0, PE32_OPTIONAL_SIZE as u16);
    let opt = PE_HEADER_OFFSET + 24;
    put_u16(&mut buf, opt, OPTIONAL_MAGIC_PE32);
    put_u32(&mut buf, opt + 56, size_of_image);
    put_u32(&mut buf, opt + 92, 16);
    buf
}

/// MSF 7.00 PDB with the four standard leading streams.
///
/// `age` of `None` leaves the DBI stream empty.
pub fn native_pdb(guid: Guid, age: Option<u32>) -> Vec<u8> {
    build_msf(guid, age, 4)
}

/// MSF 7.00 PDB declaring only `stream_count` streams.
pub fn native_pdb_with_streams(guid: Guid, stream_count: usize) -> Vec<u8> {
    build_msf(guid, Some(1), stream_count)
}

fn build_msf(guid: Guid, age: Option<u32>, stream_count: usize) -> Vec<u8> {
    const DIRECTORY_MAP_PAGE: u32 = 2;
    const DIRECTORY_PAGE: u32 = 3;
    const PDB_INFO_PAGE: u32 = 4;
    const DBI_PAGE: u32 = 5;
    let page = MSF_PAGE_SIZE;
    let mut buf = vec![0u8; page * 6];

    let mut sizes = vec![0u32; stream_count];
    let mut page_lists: Vec<Vec<u32>> = vec![Vec::new(); stream_count];
    if stream_count > 1 {
        sizes[1] = PDB_INFO_STREAM_SIZE;
        page_lists[1].push(PDB_INFO_PAGE);
    }
    if stream_count > 3 && age.is_some() {
        sizes[3] = DBI_STREAM_SIZE;
        page_lists[3].push(DBI_PAGE);
    }

    let mut directory = Vec::new();
    directory.extend_from_slice(&(stream_count as u32).to_le_bytes());
    for size in &sizes {
        directory.extend_from_slice(&size.to_le_bytes());
    }
    for pages in &page_lists {
        for p in pages {
            directory.extend_from_slice(&p.to_le_bytes());
        }
    }

    buf[..MSF_SIGNATURE.len()].copy_from_slice(MSF_SIGNATURE);
    put_u32(&mut buf, 32, page as u32);
    put_u32(&mut buf, 36, 1);
    put_u32(&mut buf, 40, 6);
    put_u32(&mut buf, 44, directory.len() as u32);
    put_u32(&mut buf, 52, DIRECTORY_MAP_PAGE);

    put_u32(&mut buf, DIRECTORY_MAP_PAGE as usize * page, DIRECTORY_PAGE);
    let dir_at = DIRECTORY_PAGE as usize * page;
    buf[dir_at..dir_at + directory.len()].copy_from_slice(&directory);

    let info = PDB_INFO_PAGE as usize * page;
    put_u32(&mut buf, info, 20000404);
    put_u32(&mut buf, info + 4, 0x5F3A_9C21);
    put_u32(&mut buf, info + 8, age.unwrap_or(1));
    buf[info + 12..info + 28].copy_from_slice(&guid.to_le_bytes());

    if let Some(age) = age {
        let dbi = DBI_PAGE as usize * page;
        put_u32(&mut buf, dbi, u32::MAX);
        put_u32(&mut buf, dbi + 4, 19990903);
        put_u32(&mut buf, dbi + 8, age);
    }
    buf
}

/// Portable PDB metadata root with `#Pdb`, `#~` and `#Strings` streams.
///
/// `stamp` fills the four bytes following the GUID in the PDB id.
pub fn portable_pdb(guid: Guid, stamp: u32) -> Vec<u8> {
    let version = b"PDB v1.0\0\0\0\0";
    let mut buf = Vec::new();
    buf.extend_from_slice(PORTABLE_SIGNATURE);
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(version.len() as u32).to_le_bytes());
    buf.extend_from_slice(version);
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&3u16.to_le_bytes());

    let streams: [(&[u8], u32, u32); 3] = [
        (b"#Pdb\0\0\0\0", 80, 32),
        (b"#~\0\0", 112, 8),
        (b"#Strings\0\0\0\0", 120, 4),
    ];
    for (name, offset, size) in streams {
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(name);
    }
    debug_assert_eq!(buf.len(), 80);

    buf.extend_from_slice(&guid.to_le_bytes());
    buf.extend_from_slice(&stamp.to_le_bytes());
    buf.resize(124, 0);
    buf
}

/// Write `bytes` to `dir/name` and return the path.
pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}
