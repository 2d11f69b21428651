//! Identity keys for symbol files.
//!
//! A stored symbol file is addressed by its file name plus a key derived
//! from the binary itself:
//!
//! - PE images (`.exe`, `.dll`): `TimeDateStamp` then `SizeOfImage`
//! - native PDBs (MSF 7.00): GUID of the PDB info stream plus the DBI age
//! - portable PDBs: GUID of the `#Pdb` stream plus a fixed age of 1
//!
//! [`compute_hash_key`] tries the formats in that order. [`extract_dbg_info`]
//! goes the other way and reads, from a PE image, the name and key of the
//! PDB that matches it.

pub mod error;
pub mod guid;
pub mod msf;
pub mod pe;
pub mod portable;
pub mod reader;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

pub use error::{IdentityError, IdentityResult};
pub use guid::Guid;
pub use msf::MsfFile;
pub use pe::{CodeView, DebugRecord, PeImage};
pub use portable::PortablePdb;
pub use reader::FileBytes;

/// Binary format recognised by [`identify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    PeImage,
    NativePdb,
    PortablePdb,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileKind::PeImage => "pe",
            FileKind::NativePdb => "pdb",
            FileKind::PortablePdb => "portable-pdb",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileIdentity {
    pub kind: FileKind,
    pub key: String,
}

/// PDB reference embedded in a PE image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugInfo {
    /// File name of the PDB, without directories.
    pub pdb_name: String,
    /// Key under which that PDB is stored.
    pub key: String,
}

/// Extensions whose PDBs must carry an age.
const AGE_REQUIRED_EXTENSIONS: [&str; 2] = ["bsc", "bsr"];

fn parse_error(path: &Path, err: IdentityError) -> IdentityError {
    match err {
        IdentityError::SignatureMismatch => IdentityError::SignatureNotFound(path.to_path_buf()),
        other => IdentityError::ParseFile {
            path: path.to_path_buf(),
            source: Box::new(other),
        },
    }
}

fn native_pdb_key(path: &Path, data: &[u8]) -> IdentityResult<String> {
    let msf = MsfFile::parse(data).map_err(|e| parse_error(path, e))?;
    let guid = msf.guid().map_err(|e| parse_error(path, e))?;
    let age = msf.age().map_err(|e| parse_error(path, e))?;

    let age_required = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            AGE_REQUIRED_EXTENSIONS
                .iter()
                .any(|req| ext.eq_ignore_ascii_case(req))
        });
    if age.is_none() && age_required {
        return Err(parse_error(
            path,
            IdentityError::corrupt(0, "DBI stream has no age"),
        ));
    }

    Ok(match age.filter(|age| *age != 0) {
        Some(age) => format!("{guid}{age:X}"),
        None => guid.to_string(),
    })
}

fn portable_pdb_key(path: &Path, data: &[u8]) -> IdentityResult<String> {
    let pdb = PortablePdb::parse(data).map_err(|e| parse_error(path, e))?;
    Ok(format!("{}{:X}", pdb.guid(), pdb.age()))
}

/// Determine the format of `path` and compute its identity key.
pub fn identify(path: &Path) -> IdentityResult<FileIdentity> {
    if !path.exists() {
        return Err(IdentityError::FileNotExists(path.to_path_buf()));
    }
    let bytes = FileBytes::open(path)?;
    let data = bytes.as_ref();

    match PeImage::parse(data) {
        Ok(image) => {
            return Ok(FileIdentity {
                kind: FileKind::PeImage,
                key: image.key(),
            })
        }
        Err(err) => debug!(path = %path.display(), %err, "not a PE image"),
    }

    let attempts: [(FileKind, fn(&Path, &[u8]) -> IdentityResult<String>); 2] = [
        (FileKind::NativePdb, native_pdb_key),
        (FileKind::PortablePdb, portable_pdb_key),
    ];
    for (kind, key_of) in attempts {
        match key_of(path, data) {
            Ok(key) => return Ok(FileIdentity { kind, key }),
            Err(err @ (IdentityError::SignatureNotFound(_) | IdentityError::ParseFile { .. })) => {
                debug!(path = %path.display(), %kind, %err, "format rejected");
            }
            Err(err) => return Err(err),
        }
    }

    Err(IdentityError::UnknownFileType(path.to_path_buf()))
}

/// Identity key of `path`, see [`identify`].
pub fn compute_hash_key(path: &Path) -> IdentityResult<String> {
    identify(path).map(|identity| identity.key)
}

/// Read the CodeView record of a PE image.
///
/// A file that is not a PE image is an error ([`IdentityError::InvalidPeFile`]).
/// A valid image without a usable `RSDS` record, or with a damaged debug
/// directory, yields `Ok(None)`.
pub fn extract_dbg_info(path: &Path) -> IdentityResult<Option<DebugInfo>> {
    if !path.exists() {
        return Err(IdentityError::FileNotExists(path.to_path_buf()));
    }
    let bytes = FileBytes::open(path)?;
    let image = PeImage::parse(bytes.as_ref()).map_err(|err| IdentityError::InvalidPeFile {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    match image.debug_record() {
        Ok(DebugRecord::CodeView(cv)) => Ok(Some(DebugInfo {
            pdb_name: cv.pdb_file_name().to_string(),
            key: cv.key(),
        })),
        Ok(DebugRecord::Unsupported(tag)) => {
            warn!(
                path = %path.display(),
                tag = %String::from_utf8_lossy(&tag),
                "unsupported CodeView record"
            );
            Ok(None)
        }
        Ok(DebugRecord::Missing) => {
            warn!(path = %path.display(), "no symbol information in image");
            Ok(None)
        }
        Err(err) => {
            debug!(path = %path.display(), %err, "unreadable debug directory");
            Ok(None)
        }
    }
}
