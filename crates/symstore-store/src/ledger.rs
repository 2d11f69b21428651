//! Line-oriented ledger files under the admin directory.
//!
//! Ledgers are plain text with one record per line. `server.txt` and the
//! manifests terminate every line; `history.txt` leaves its last line open
//! and repairs the separator before the next append.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{StoreError, StoreResult};

#[cfg(windows)]
pub const LINE_SEPARATOR: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &str = "\n";

/// Non-empty lines of `path`; a missing file has none.
pub(crate) fn read_lines(path: &Path) -> StoreResult<Vec<String>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::read(path, e)),
    };
    Ok(text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

fn open_append(path: &Path) -> StoreResult<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::write(path, e))
}

/// Append `line` followed by a separator.
pub(crate) fn append_line(path: &Path, line: &str) -> StoreResult<()> {
    let mut file = open_append(path)?;
    file.write_all(format!("{line}{LINE_SEPARATOR}").as_bytes())
        .map_err(|e| StoreError::write(path, e))?;
    debug!(path = %path.display(), "ledger append");
    Ok(())
}

/// Append `line` without a trailing separator, first terminating the
/// previous line if the file does not already end with one.
pub(crate) fn append_open_line(path: &Path, line: &str) -> StoreResult<()> {
    let mut file = open_append(path)?;
    let len = file
        .metadata()
        .map_err(|e| StoreError::write(path, e))?
        .len();

    let mut record = String::new();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| StoreError::read(path, e))?;
        if last[0] != b'\n' {
            record.push_str(LINE_SEPARATOR);
        }
    }
    record.push_str(line);
    file.write_all(record.as_bytes())
        .map_err(|e| StoreError::write(path, e))?;
    debug!(path = %path.display(), "ledger append");
    Ok(())
}

/// Replace the content of `path` with `lines`, each terminated.
///
/// Writes a sibling temporary file then renames it over the original.
pub(crate) fn rewrite_lines<I, S>(path: &Path, lines: I) -> StoreResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut content = String::new();
    for line in lines {
        content.push_str(line.as_ref());
        content.push_str(LINE_SEPARATOR);
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).map_err(|e| StoreError::write(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::RenameFile {
        src: tmp.clone(),
        dest: path.to_path_buf(),
        source: e,
    })
}
