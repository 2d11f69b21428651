//! PE/COFF image headers and the CodeView debug record.
//!
//! Only the fields needed for symbol identity are decoded: the COFF
//! `TimeDateStamp`, the optional header's `SizeOfImage`, the section table
//! (to translate RVAs) and the debug data directory.

use crate::error::{IdentityError, IdentityResult};
use crate::guid::Guid;
use crate::reader::{bytes_at, u16_at, u32_at};

const DOS_MAGIC: &[u8; 2] = b"MZ";
const NT_SIGNATURE: &[u8; 4] = b"PE\0\0";
const E_LFANEW_OFFSET: usize = 0x3c;
const FILE_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const DEBUG_DIRECTORY_INDEX: usize = 6;
const DEBUG_ENTRY_SIZE: usize = 28;

pub const OPTIONAL_MAGIC_PE32: u16 = 0x10b;
pub const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x20b;
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const CODEVIEW_RSDS: &[u8; 4] = b"RSDS";

#[derive(Clone, Copy, Debug)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

/// Parsed view over the headers of a PE image.
#[derive(Debug)]
pub struct PeImage<'a> {
    data: &'a [u8],
    time_date_stamp: u32,
    size_of_image: u32,
    sections: Vec<Section>,
    debug_directory: Option<(u32, u32)>,
}

/// Contents of an `RSDS` CodeView record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeView {
    pub guid: Guid,
    pub age: u32,
    /// PDB path as recorded by the linker, without the terminating NUL.
    pub pdb_path: String,
}

impl CodeView {
    /// File name part of the recorded PDB path, accepting both separators.
    pub fn pdb_file_name(&self) -> &str {
        self.pdb_path
            .rsplit(|c| c == '\\' || c == '/')
            .next()
            .unwrap_or(&self.pdb_path)
    }

    /// Symbol key: GUID followed by the age in uppercase hex.
    pub fn key(&self) -> String {
        format!("{}{:X}", self.guid, self.age)
    }
}

/// Outcome of looking up the CodeView debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugRecord {
    CodeView(CodeView),
    /// A CodeView entry exists but uses another format (e.g. `NB10`).
    Unsupported([u8; 4]),
    Missing,
}

fn pe_format(reason: impl Into<String>) -> IdentityError {
    IdentityError::PeFormat(reason.into())
}

impl<'a> PeImage<'a> {
    /// Parse the DOS, COFF and optional headers.
    ///
    /// Any failure here means the data is not a PE image and is reported as
    /// [`IdentityError::PeFormat`]. The section table and data directories
    /// are read leniently.
    pub fn parse(data: &'a [u8]) -> IdentityResult<Self> {
        if data.len() < 64 || &data[0..2] != DOS_MAGIC {
            return Err(pe_format("DOS header magic not found"));
        }
        let nt = u32_at(data, E_LFANEW_OFFSET).map_err(|_| pe_format("truncated DOS header"))?
            as usize;
        match bytes_at(data, nt, 4) {
            Ok(sig) if sig == NT_SIGNATURE => {}
            Ok(_) => return Err(pe_format("NT headers signature not found")),
            Err(_) => return Err(pe_format(format!("invalid e_lfanew value {nt:#x}"))),
        }

        let file_header = nt + 4;
        let header = bytes_at(data, file_header, FILE_HEADER_SIZE)
            .map_err(|_| pe_format("truncated file header"))?;
        let section_count = u16::from_le_bytes([header[2], header[3]]) as usize;
        let time_date_stamp = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let optional_size = u16::from_le_bytes([header[16], header[17]]) as usize;

        let optional = file_header + FILE_HEADER_SIZE;
        let magic = u16_at(data, optional).map_err(|_| pe_format("missing optional header"))?;
        let (dir_count_offset, dirs_offset) = match magic {
            OPTIONAL_MAGIC_PE32 => (92, 96),
            OPTIONAL_MAGIC_PE32_PLUS => (108, 112),
            other => return Err(pe_format(format!("unknown optional header magic {other:#x}"))),
        };
        let size_of_image =
            u32_at(data, optional + 56).map_err(|_| pe_format("truncated optional header"))?;

        let debug_directory = u32_at(data, optional + dir_count_offset)
            .ok()
            .filter(|count| *count as usize > DEBUG_DIRECTORY_INDEX)
            .and_then(|_| {
                let at = optional + dirs_offset + DEBUG_DIRECTORY_INDEX * 8;
                let rva = u32_at(data, at).ok()?;
                let size = u32_at(data, at + 4).ok()?;
                (rva != 0 && size != 0).then_some((rva, size))
            });

        let table = optional + optional_size;
        let sections = (0..section_count)
            .map_while(|i| {
                let at = table + i * SECTION_HEADER_SIZE;
                bytes_at(data, at, SECTION_HEADER_SIZE).ok()?;
                Some(Section {
                    virtual_size: u32_at(data, at + 8).ok()?,
                    virtual_address: u32_at(data, at + 12).ok()?,
                    raw_size: u32_at(data, at + 16).ok()?,
                    raw_pointer: u32_at(data, at + 20).ok()?,
                })
            })
            .collect();

        Ok(Self {
            data,
            time_date_stamp,
            size_of_image,
            sections,
            debug_directory,
        })
    }

    pub fn time_date_stamp(&self) -> u32 {
        self.time_date_stamp
    }

    pub fn size_of_image(&self) -> u32 {
        self.size_of_image
    }

    /// Image key: `TimeDateStamp` then `SizeOfImage`, uppercase hex, unpadded.
    pub fn key(&self) -> String {
        format!("{:X}{:X}", self.time_date_stamp, self.size_of_image)
    }

    /// Translate a relative virtual address to a file offset.
    fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let section = self.sections.iter().find(|s| {
            let span = s.virtual_size.max(s.raw_size);
            rva >= s.virtual_address && rva - s.virtual_address < span
        });
        match section {
            Some(s) => (rva - s.virtual_address)
                .checked_add(s.raw_pointer)
                .map(|offset| offset as usize),
            // Addresses before the first section map onto the headers.
            None => self
                .sections
                .iter()
                .all(|s| rva < s.virtual_address)
                .then_some(rva as usize),
        }
    }

    /// Locate and decode the first CodeView entry of the debug directory.
    pub fn debug_record(&self) -> IdentityResult<DebugRecord> {
        let Some((rva, size)) = self.debug_directory else {
            return Ok(DebugRecord::Missing);
        };
        let dir = self
            .rva_to_offset(rva)
            .ok_or_else(|| IdentityError::corrupt(rva as usize, "debug directory outside sections"))?;

        for i in 0..(size as usize / DEBUG_ENTRY_SIZE) {
            let entry = dir + i * DEBUG_ENTRY_SIZE;
            if u32_at(self.data, entry + 12)? != DEBUG_TYPE_CODEVIEW {
                continue;
            }
            let data_size = u32_at(self.data, entry + 16)? as usize;
            let data_rva = u32_at(self.data, entry + 20)?;
            let mut data_ptr = u32_at(self.data, entry + 24)? as usize;
            if data_ptr == 0 {
                data_ptr = self.rva_to_offset(data_rva).ok_or_else(|| {
                    IdentityError::corrupt(entry, "CodeView data outside sections")
                })?;
            }
            let record = bytes_at(self.data, data_ptr, data_size)?;
            return parse_codeview(record, data_ptr);
        }
        Ok(DebugRecord::Missing)
    }
}

fn parse_codeview(record: &[u8], offset: usize) -> IdentityResult<DebugRecord> {
    let magic = bytes_at(record, 0, 4).map_err(|_| IdentityError::corrupt(offset, "empty CodeView record"))?;
    if magic != CODEVIEW_RSDS {
        let mut tag = [0u8; 4];
        tag.copy_from_slice(magic);
        return Ok(DebugRecord::Unsupported(tag));
    }
    let guid = Guid::read(record, 4)?;
    let age = u32_at(record, 20)?;
    let name = &record[24.min(record.len())..];
    let name = match name.iter().position(|b| *b == 0) {
        Some(end) => &name[..end],
        None => name,
    };
    let pdb_path = std::str::from_utf8(name)
        .map_err(|e| IdentityError::corrupt(offset + 24, format!("PDB path is not UTF-8: {e}")))?
        .to_string();
    Ok(DebugRecord::CodeView(CodeView {
        guid,
        age,
        pdb_path,
    }))
}
