use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::layout::StoreLayout;

/// Largest file that can still be stored as a cabinet.
pub const MAX_COMPRESSED_FILE_SIZE: u64 = 2_147_482_624;

/// One file instance inside a transaction.
///
/// The `(file_name, file_hash)` pair selects a directory shared by every
/// transaction that stores the same binary, which is how identical files
/// are deduplicated across the store.
#[derive(Clone, Debug)]
pub struct TransactionEntry {
    layout: Arc<StoreLayout>,
    file_name: String,
    file_hash: String,
    source_file: PathBuf,
    compressed: bool,
}

/// Stored name of a compressed file: last character replaced by `_`.
pub fn compressed_name(file_name: &str) -> String {
    let mut name = file_name.to_string();
    name.pop();
    name.push('_');
    name
}

impl TransactionEntry {
    pub fn new(
        layout: Arc<StoreLayout>,
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        source_file: impl Into<PathBuf>,
        compressed: bool,
    ) -> Self {
        Self {
            layout,
            file_name: file_name.into(),
            file_hash: file_hash.into(),
            source_file: source_file.into(),
            compressed,
        }
    }

    /// Build an entry for `path`, computing its identity key.
    pub fn from_file(layout: Arc<StoreLayout>, path: &Path, compressed: bool) -> StoreResult<Self> {
        let file_hash = symstore_pdb::compute_hash_key(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::Unexpected(format!("{}: no file name", path.display())))?;
        let source = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self::new(layout, file_name, file_hash, source, compressed))
    }

    /// Rebuild an entry from a manifest line.
    ///
    /// Manifests do not record compression; it is inferred from which of
    /// the two possible stored names exists.
    pub fn load(
        layout: Arc<StoreLayout>,
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        source_file: impl Into<PathBuf>,
    ) -> Self {
        let mut entry = Self::new(layout, file_name, file_hash, source_file, false);
        entry.compressed = entry
            .stored_dir()
            .join(compressed_name(&entry.file_name))
            .exists();
        entry
    }

    pub fn layout(&self) -> &Arc<StoreLayout> {
        &self.layout
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Returns `true` when both entries address the same stored file.
    pub fn same_identity(&self, file_name: &str, file_hash: &str) -> bool {
        self.file_name == file_name && self.file_hash == file_hash
    }

    pub fn stored_dir(&self) -> PathBuf {
        self.layout.entry_dir(&self.file_name, &self.file_hash)
    }

    pub fn stored_file_name(&self) -> String {
        if self.compressed {
            compressed_name(&self.file_name)
        } else {
            self.file_name.clone()
        }
    }

    /// Stored path relative to the store root.
    pub fn rel_path(&self) -> PathBuf {
        Path::new(&self.file_name)
            .join(&self.file_hash)
            .join(self.stored_file_name())
    }

    pub fn stored_path(&self) -> PathBuf {
        self.stored_dir().join(self.stored_file_name())
    }

    pub fn is_committed(&self) -> bool {
        self.stored_path().exists()
    }

    /// Copy (or compress) the file into the store.
    ///
    /// Returns `false` without touching anything when the file is already
    /// stored and `force` is not set. With `promote_from`, the bytes come
    /// from the same entry directory of that other store.
    pub fn commit(&mut self, force: bool, promote_from: Option<&StoreLayout>) -> StoreResult<bool> {
        if !force && self.is_committed() {
            debug!(path = %self.rel_path().display(), "already stored");
            return Ok(false);
        }
        let dest_dir = self.stored_dir();
        fs::create_dir_all(&dest_dir).map_err(|e| StoreError::write(&dest_dir, e))?;

        if let Some(source_store) = promote_from {
            let stored_name = self
                .source_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.stored_file_name());
            let src = source_store
                .entry_dir(&self.file_name, &self.file_hash)
                .join(&stored_name);
            let dest = dest_dir.join(&stored_name);
            fs::copy(&src, &dest).map_err(|e| StoreError::copy(&src, &dest, e))?;
            self.compressed = stored_name != self.file_name && stored_name == compressed_name(&self.file_name);
            return Ok(true);
        }

        if self.compressed {
            let size = fs::metadata(&self.source_file)
                .map_err(|e| StoreError::read(&self.source_file, e))?
                .len();
            if size > MAX_COMPRESSED_FILE_SIZE {
                warn!(
                    path = %self.source_file.display(),
                    size,
                    "file too large to compress, storing uncompressed"
                );
                self.compressed = false;
            }
        }

        let dest = self.stored_path();
        if self.compressed {
            let codec = self.layout.codec().ok_or(StoreError::CompressionNotSupported)?;
            codec.compress(&self.source_file, &dest)?;
        } else {
            fs::copy(&self.source_file, &dest)
                .map_err(|e| StoreError::copy(&self.source_file, &dest, e))?;
        }
        debug!(path = %self.rel_path().display(), compressed = self.compressed, "stored");
        Ok(true)
    }

    /// Copy the stored file into `dest_dir`, decompressing it if needed.
    pub fn extract(&self, dest_dir: &Path) -> StoreResult<PathBuf> {
        fs::create_dir_all(dest_dir).map_err(|e| StoreError::write(dest_dir, e))?;
        let dest = dest_dir.join(&self.file_name);
        let stored = self.stored_path();
        if self.compressed {
            let codec = self.layout.codec().ok_or(StoreError::DecompressionNotSupported)?;
            codec.decompress(&stored, dest_dir)?;
        } else {
            fs::copy(&stored, &dest).map_err(|e| StoreError::copy(&stored, &dest, e))?;
        }
        Ok(dest)
    }

    /// Copy of this entry bound to another store.
    ///
    /// A promoted copy takes the stored file as its source and starts
    /// uncompressed; committing it recovers the stored form.
    pub fn clone_for(&self, layout: Arc<StoreLayout>, promoted: bool) -> Self {
        if promoted {
            Self::new(layout, &self.file_name, &self.file_hash, self.stored_path(), false)
        } else {
            Self::new(
                layout,
                &self.file_name,
                &self.file_hash,
                &self.source_file,
                self.compressed,
            )
        }
    }

    /// Size of the stored file, 0 when absent.
    pub fn disk_usage(&self) -> u64 {
        fs::metadata(self.stored_path()).map(|m| m.len()).unwrap_or(0)
    }

    /// Parse a manifest line: `"name\hash","source"`.
    pub fn parse_manifest_line(layout: &Arc<StoreLayout>, line: &str) -> Option<Self> {
        let line = line.trim();
        let (key, source) = match line.split_once("\",\"") {
            Some((key, source)) => (key, source),
            None => (line.split(',').next().unwrap_or(line), ""),
        };
        let key = key.trim_matches('"');
        let source = source.trim_end_matches(',').trim_matches('"');
        let (name, hash) = key.split_once('\\')?;
        if name.is_empty() || hash.is_empty() {
            return None;
        }
        Some(Self::load(Arc::clone(layout), name, hash, source))
    }
}

/// Manifest line form.
impl fmt::Display for TransactionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\\{}\",\"{}\"",
            self.file_name,
            self.file_hash,
            self.source_file.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_codec_layout, plain_layout};
    use symstore_pdb::fixtures;

    #[test]
    fn compressed_name_mangles_last_char() {
        assert_eq!(compressed_name("dummyapp.pdb"), "dummyapp.pd_");
        assert_eq!(compressed_name("a.dll"), "a.dl_");
    }

    #[test]
    fn from_file_computes_identity() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(0xB85047B8, 0x8000, None)).unwrap();
        let entry = TransactionEntry::from_file(layout, &exe, false).unwrap();
        assert_eq!(entry.file_name(), "app.exe");
        assert_eq!(entry.file_hash(), "B85047B88000");
        assert!(entry.source_file().is_absolute());
        assert_eq!(entry.rel_path(), Path::new("app.exe").join("B85047B88000").join("app.exe"));
    }

    #[test]
    fn commit_copies_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(1, 0x2000, None)).unwrap();
        let mut entry = TransactionEntry::from_file(layout, &exe, false).unwrap();

        assert!(entry.commit(false, None).unwrap());
        assert!(entry.is_committed());
        assert_eq!(fs::read(entry.stored_path()).unwrap(), fs::read(&exe).unwrap());

        assert!(!entry.commit(false, None).unwrap());
        assert!(entry.commit(true, None).unwrap());
        assert!(entry.disk_usage() > 0);
    }

    #[test]
    fn commit_missing_source_is_copy_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        let mut entry = TransactionEntry::new(layout, "gone.pdb", "ABC", dir.path().join("gone.pdb"), false);
        assert!(matches!(entry.commit(false, None), Err(StoreError::CopyFile { .. })));
    }

    #[test]
    fn compressed_commit_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let layout = fake_codec_layout(dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(2, 0x2000, None)).unwrap();
        let mut entry = TransactionEntry::from_file(layout.clone(), &exe, true).unwrap();
        assert!(entry.commit(false, None).unwrap());
        assert!(entry.stored_path().ends_with("app.ex_"));

        let reloaded = TransactionEntry::load(layout, "app.exe", entry.file_hash(), &exe);
        assert!(reloaded.is_compressed());

        let out = dir.path().join("out");
        let extracted = reloaded.extract(&out).unwrap();
        assert_eq!(extracted, out.join("app.exe"));
        assert_eq!(fs::read(extracted).unwrap(), fs::read(&exe).unwrap());
    }

    #[test]
    fn compression_without_codec_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(3, 0x2000, None)).unwrap();
        let mut entry = TransactionEntry::from_file(layout.clone(), &exe, true).unwrap();
        assert!(matches!(entry.commit(false, None), Err(StoreError::CompressionNotSupported)));

        let stored = layout.entry_dir("app.exe", entry.file_hash());
        fs::write(stored.join("app.ex_"), b"cab").unwrap();
        let reloaded = TransactionEntry::load(layout, "app.exe", entry.file_hash(), &exe);
        assert!(matches!(
            reloaded.extract(&dir.path().join("out")),
            Err(StoreError::DecompressionNotSupported)
        ));
    }

    #[test]
    fn promoted_clone_copies_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source_layout = fake_codec_layout(dir.path().join("snapshot"));
        let target_layout = plain_layout(dir.path().join("release"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(4, 0x2000, None)).unwrap();

        let mut entry = TransactionEntry::from_file(source_layout.clone(), &exe, true).unwrap();
        entry.commit(false, None).unwrap();

        let mut promoted = entry.clone_for(target_layout, true);
        assert!(!promoted.is_compressed());
        assert_eq!(promoted.source_file(), entry.stored_path());

        assert!(promoted.commit(true, Some(&source_layout)).unwrap());
        assert!(promoted.is_compressed());
        assert_eq!(
            fs::read(promoted.stored_path()).unwrap(),
            fs::read(entry.stored_path()).unwrap()
        );
    }

    #[test]
    fn manifest_line_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path());
        let entry = TransactionEntry::new(layout.clone(), "a.pdb", "ABCDEF1", "/src/dir, with comma/a.pdb", false);
        let line = entry.to_string();
        assert_eq!(line, "\"a.pdb\\ABCDEF1\",\"/src/dir, with comma/a.pdb\"");

        let parsed = TransactionEntry::parse_manifest_line(&layout, &line).unwrap();
        assert!(parsed.same_identity("a.pdb", "ABCDEF1"));
        assert_eq!(parsed.source_file(), Path::new("/src/dir, with comma/a.pdb"));
    }

    #[test]
    fn manifest_line_tolerates_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path());
        let parsed = TransactionEntry::parse_manifest_line(&layout, "\"a.pdb\\ABC\"").unwrap();
        assert_eq!(parsed.file_hash(), "ABC");
        assert_eq!(parsed.source_file(), Path::new(""));
        assert!(TransactionEntry::parse_manifest_line(&layout, "garbage").is_none());
    }
}
