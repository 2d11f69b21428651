use std::cell::OnceCell;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use symstore_types::{timestamp, TransactionId, TransactionType};
use tracing::{debug, error, warn};

use crate::entry::TransactionEntry;
use crate::error::{StoreError, StoreResult};
use crate::layout::{StoreLayout, DELETED_SUFFIX, PROMOTED_SUFFIX};
use crate::ledger::{self, LINE_SEPARATOR};
use crate::summary::{OpStatus, Summary};

/// Upper bound on the commit worker pool.
const MAX_COMMIT_WORKERS: usize = 32;

/// One atomic unit of change in a store.
///
/// A transaction is built in memory, filled with entries and then committed,
/// which assigns its id and writes its manifest. Committed transactions are
/// immutable; deletion and promotion only leave marker files next to the
/// manifest. Entries of a committed ADD transaction are read from the
/// manifest the first time they are needed.
#[derive(Clone, Debug)]
pub struct Transaction {
    layout: Arc<StoreLayout>,
    id: Option<TransactionId>,
    kind: TransactionType,
    reference: String,
    timestamp: Option<NaiveDateTime>,
    product: String,
    version: String,
    comment: String,
    deleted_id: Option<TransactionId>,
    entries: OnceCell<Vec<TransactionEntry>>,
}

impl Transaction {
    /// New, uncommitted ADD transaction.
    pub fn new(
        layout: Arc<StoreLayout>,
        product: impl Into<String>,
        version: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            layout,
            id: None,
            kind: TransactionType::Add,
            reference: "file".to_string(),
            timestamp: None,
            product: product.into(),
            version: version.into(),
            comment: comment.into(),
            deleted_id: None,
            entries: OnceCell::from(Vec::new()),
        }
    }

    /// DEL record `id` retiring `deleted_id`.
    pub fn deletion(layout: Arc<StoreLayout>, id: TransactionId, deleted_id: TransactionId) -> Self {
        Self {
            layout,
            id: Some(id),
            kind: TransactionType::Del,
            reference: String::new(),
            timestamp: None,
            product: String::new(),
            version: String::new(),
            comment: String::new(),
            deleted_id: Some(deleted_id),
            entries: OnceCell::from(Vec::new()),
        }
    }

    /// Parse one `server.txt`/`history.txt` line.
    ///
    /// ```text
    /// 0000000001,add,file,03/14/2024,09:26:53,"product","version","comment",
    /// 0000000002,del,0000000001
    /// ```
    ///
    /// Returns `None` for lines that do not follow either form.
    pub fn parse_line(layout: &Arc<StoreLayout>, line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(3, ',');
        let id: TransactionId = parts.next()?.parse().ok()?;
        let kind = parts.next()?;
        let tail = parts.next()?;

        match kind {
            "add" => {
                let (reference, rest) = tail.split_once(',')?;
                if reference != "file" && reference != "ptr" {
                    return None;
                }
                let (date, rest) = rest.split_once(',')?;
                let (time, rest) = rest.split_once(',')?;
                let timestamp = timestamp::parse(date, time).ok()?;
                let (product, rest) = quoted_field(rest)?;
                let (version, rest) = quoted_field(rest)?;
                let (comment, _) = quoted_field(rest)?;
                Some(Self {
                    layout: Arc::clone(layout),
                    id: Some(id),
                    kind: TransactionType::Add,
                    reference: reference.to_string(),
                    timestamp: Some(timestamp),
                    product: product.to_string(),
                    version: version.to_string(),
                    comment: comment.to_string(),
                    deleted_id: None,
                    entries: OnceCell::new(),
                })
            }
            "del" => {
                let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
                let deleted_id = digits.parse().ok()?;
                Some(Self::deletion(Arc::clone(layout), id, deleted_id))
            }
            _ => None,
        }
    }

    pub fn layout(&self) -> &Arc<StoreLayout> {
        &self.layout
    }

    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub fn kind(&self) -> TransactionType {
        self.kind
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn deleted_id(&self) -> Option<TransactionId> {
        self.deleted_id
    }

    pub fn is_committed(&self) -> bool {
        self.id.is_some()
    }

    /// DEL records, and ADD transactions whose manifest carries the
    /// `.deleted` marker.
    pub fn is_deleted(&self) -> bool {
        if self.kind == TransactionType::Del {
            return true;
        }
        self.marker_exists(DELETED_SUFFIX)
    }

    pub fn is_promoted(&self) -> bool {
        self.marker_exists(PROMOTED_SUFFIX)
    }

    fn marker_exists(&self, suffix: &str) -> bool {
        self.id
            .is_some_and(|id| self.layout.marker_path(id, suffix).exists())
    }

    fn load_entries(&self) -> StoreResult<Vec<TransactionEntry>> {
        let Some(id) = self.id else {
            return Ok(Vec::new());
        };
        if self.kind != TransactionType::Add {
            return Ok(Vec::new());
        }
        let manifest = self.layout.manifest_path(id);
        let mut entries = Vec::new();
        for line in ledger::read_lines(&manifest)? {
            match TransactionEntry::parse_manifest_line(&self.layout, &line) {
                Some(entry) => entries.push(entry),
                None => warn!(id = %id, line = %line, "skipping malformed manifest line"),
            }
        }
        debug!(id = %id, entries = entries.len(), "manifest loaded");
        Ok(entries)
    }

    /// Entries in registration order, loading the manifest on first use.
    pub fn entries(&self) -> StoreResult<&[TransactionEntry]> {
        if let Some(entries) = self.entries.get() {
            return Ok(entries);
        }
        let loaded = self.load_entries()?;
        Ok(self.entries.get_or_init(|| loaded))
    }

    fn entries_mut(&mut self) -> StoreResult<&mut Vec<TransactionEntry>> {
        if self.entries.get().is_none() {
            let loaded = self.load_entries()?;
            let _ = self.entries.set(loaded);
        }
        self.entries
            .get_mut()
            .ok_or_else(|| StoreError::Unexpected("transaction entries unavailable".into()))
    }

    pub fn count(&self) -> StoreResult<usize> {
        Ok(self.entries()?.len())
    }

    /// Identify `path` and register it as a new entry.
    ///
    /// Returns `false` when no identity key could be derived.
    pub fn register_entry(&mut self, path: &Path, compress: bool) -> StoreResult<bool> {
        if compress && !self.layout.supports_compression() {
            return Err(StoreError::CompressionNotSupported);
        }
        let entry = TransactionEntry::from_file(Arc::clone(&self.layout), path, compress)?;
        if entry.file_hash().is_empty() {
            return Ok(false);
        }
        self.add_entry(entry)?;
        Ok(true)
    }

    pub fn add_entry(&mut self, entry: TransactionEntry) -> StoreResult<()> {
        self.entries_mut()?.push(entry);
        Ok(())
    }

    pub fn find_entry(&self, file_name: &str, file_hash: &str) -> StoreResult<Option<&TransactionEntry>> {
        Ok(self
            .entries()?
            .iter()
            .find(|e| e.same_identity(file_name, file_hash)))
    }

    /// Store every entry and write the manifest.
    ///
    /// Entries are committed in parallel; a failing entry is reported in the
    /// summary without stopping the others. The summary is SUCCESS unless
    /// every entry failed. The manifest lists all registered entries in
    /// registration order, whatever their individual outcome.
    pub fn commit(
        &mut self,
        id: TransactionId,
        timestamp: NaiveDateTime,
        force: bool,
        promote_from: Option<&StoreLayout>,
    ) -> StoreResult<Summary> {
        let mut summary = Summary::new(Some(id), OpStatus::Skipped, Some(TransactionType::Add));
        if let Some(existing) = self.id {
            warn!(id = %existing, "transaction already committed, ignoring");
            summary.set_transaction_id(Some(existing));
            return Ok(summary);
        }
        let Some(entries) = self.entries.get_mut().filter(|e| !e.is_empty()) else {
            warn!("no entry registered, nothing to commit");
            return Ok(summary);
        };

        let workers = commit_workers(entries.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| StoreError::Unexpected(format!("failed to start commit workers: {e}")))?;
        let results: Vec<StoreResult<bool>> = pool.install(|| {
            entries
                .par_iter_mut()
                .map(|entry| entry.commit(force, promote_from))
                .collect()
        });

        let mut stored = 0usize;
        for (entry, result) in entries.iter().zip(results) {
            match result {
                Ok(written) => {
                    let status = if written { OpStatus::Success } else { OpStatus::Skipped };
                    summary.add_entry(entry, status, Some(TransactionType::Add), None);
                    stored += 1;
                }
                Err(e) => {
                    error!(file = %entry.source_file().display(), error = %e, "failed to store file");
                    summary.add_entry(entry, OpStatus::Failed, Some(TransactionType::Add), Some(e.to_string()));
                }
            }
        }

        if stored == 0 {
            summary.set_status(OpStatus::Failed);
            return Ok(summary);
        }
        summary.set_status(OpStatus::Success);

        let manifest = self.layout.manifest_path(id);
        let lines: Vec<String> = entries.iter().map(ToString::to_string).collect();
        ledger::append_line(&manifest, &lines.join(LINE_SEPARATOR))?;

        self.id = Some(id);
        self.timestamp = Some(timestamp);
        debug!(id = %id, entries = lines.len(), workers, "transaction committed");
        Ok(summary)
    }

    /// Rename the manifest to `<id>.deleted`.
    pub fn mark_deleted(&self) -> StoreResult<()> {
        let Some(id) = self.id else {
            return Ok(());
        };
        let src = self.layout.manifest_path(id);
        if !src.is_file() {
            warn!(path = %src.display(), "manifest not found, cannot mark it deleted");
            return Ok(());
        }
        let dest = self.layout.marker_path(id, DELETED_SUFFIX);
        fs::rename(&src, &dest).map_err(|e| StoreError::RenameFile { src, dest, source: e })
    }

    /// Copy the manifest to `<id>.promoted`, leaving the original in place.
    pub fn mark_promoted(&self) -> StoreResult<()> {
        let Some(id) = self.id else {
            return Ok(());
        };
        let src = self.layout.manifest_path(id);
        if !src.is_file() {
            warn!(path = %src.display(), "manifest not found, cannot mark it promoted");
            return Ok(());
        }
        let dest = self.layout.marker_path(id, PROMOTED_SUFFIX);
        fs::copy(&src, &dest).map_err(|e| StoreError::copy(&src, &dest, e))?;
        Ok(())
    }

    /// Bytes used by the stored files of this transaction.
    pub fn compute_disk_usage(&self) -> StoreResult<u64> {
        Ok(self.entries()?.iter().map(TransactionEntry::disk_usage).sum())
    }
}

/// Ledger line form; empty for transactions that cannot be written yet.
impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(id) = self.id else {
            return Ok(());
        };
        match self.kind {
            TransactionType::Del => match self.deleted_id {
                Some(deleted) => write!(f, "{id},del,{deleted}"),
                None => Ok(()),
            },
            _ => match &self.timestamp {
                Some(ts) => write!(
                    f,
                    "{id},{},{},{},\"{}\",\"{}\",\"{}\",",
                    self.kind,
                    self.reference,
                    timestamp::format(ts),
                    self.product,
                    self.version,
                    self.comment
                ),
                None => Ok(()),
            },
        }
    }
}

/// Split `"value",rest` into `value` and `rest`.
fn quoted_field(s: &str) -> Option<(&str, &str)> {
    let s = s.strip_prefix('"')?;
    let (value, rest) = s.split_once('"')?;
    let rest = rest.strip_prefix(',')?;
    Some((value, rest))
}

fn commit_workers(entries: usize) -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    (cpus + 4).min(MAX_COMMIT_WORKERS).min(entries).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_codec_layout, plain_layout};
    use chrono::NaiveDate;
    use symstore_pdb::{fixtures, Guid};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 53)
            .unwrap()
    }

    #[test]
    fn parse_add_line() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path());
        let line = r#"0000000001,add,file,03/14/2024,09:26:53,"MyApp","1.0","nightly, x64","#;
        let t = Transaction::parse_line(&layout, line).unwrap();
        assert_eq!(t.id(), Some(TransactionId::new(1)));
        assert_eq!(t.kind(), TransactionType::Add);
        assert_eq!(t.timestamp(), Some(ts()));
        assert_eq!((t.product(), t.version(), t.comment()), ("MyApp", "1.0", "nightly, x64"));
        assert_eq!(t.to_string(), line);
    }

    #[test]
    fn parse_del_line() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path());
        let t = Transaction::parse_line(&layout, "0000000005,del,0000000002").unwrap();
        assert_eq!(t.kind(), TransactionType::Del);
        assert_eq!(t.deleted_id(), Some(TransactionId::new(2)));
        assert!(t.is_deleted());
        assert!(t.entries().unwrap().is_empty());
        assert_eq!(t.to_string(), "0000000005,del,0000000002");
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path());
        for line in [
            "",
            "garbage",
            "0000000001,mod,file",
            "0000000001,add,blob,03/14/2024,09:26:53,\"a\",\"b\",\"c\",",
            "0000000001,add,file,14/03/2024,09:26:53,\"a\",\"b\",\"c\",",
            "0000000001,add,file,03/14/2024,09:26:53,\"a\",\"b\"",
            "0000000001,del,",
            "abc,del,0000000001",
        ] {
            assert!(Transaction::parse_line(&layout, line).is_none(), "{line}");
        }
    }

    #[test]
    fn uncommitted_renders_empty() {
        let dir = tempfile::tempdir().unwrap();
        let t = Transaction::new(plain_layout(dir.path()), "p", "v", "");
        assert_eq!(t.to_string(), "");
        assert!(!t.is_committed());
        assert!(!t.is_deleted());
    }

    #[test]
    fn commit_stores_entries_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(0xB85047B8, 0x8000, None)).unwrap();
        let pdb = fixtures::write(dir.path(), "app.pdb", &fixtures::native_pdb(Guid::new(0xDBF7CE25, 0xC6DC, 0x4E0E, [0xA9, 0xAD, 0x88, 0x91, 0x87, 0xE2, 0x96, 0xA2]), Some(1))).unwrap();

        let mut t = Transaction::new(layout.clone(), "MyApp", "1.0", "first");
        assert!(t.register_entry(&exe, false).unwrap());
        assert!(t.register_entry(&pdb, false).unwrap());
        let summary = t.commit(TransactionId::new(1), ts(), false, None).unwrap();

        assert_eq!(summary.status(), OpStatus::Success);
        assert_eq!(summary.success(false), 2);
        assert_eq!(t.id(), Some(TransactionId::new(1)));
        assert!(layout.rootdir().join("app.exe/B85047B88000/app.exe").is_file());

        let manifest = fs::read_to_string(layout.manifest_path(TransactionId::new(1))).unwrap();
        let lines: Vec<_> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("\"app.exe\\B85047B88000\","));
        assert!(lines[1].starts_with("\"app.pdb\\"));

        let again = t.commit(TransactionId::new(2), ts(), false, None).unwrap();
        assert_eq!(again.status(), OpStatus::Skipped);
        assert_eq!(again.transaction_id(), Some(TransactionId::new(1)));
    }

    #[test]
    fn commit_without_entries_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = Transaction::new(plain_layout(dir.path()), "p", "v", "");
        let summary = t.commit(TransactionId::new(1), ts(), false, None).unwrap();
        assert_eq!(summary.status(), OpStatus::Skipped);
        assert!(!t.is_committed());
    }

    #[test]
    fn partial_failure_keeps_full_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(7, 0x2000, None)).unwrap();

        let mut t = Transaction::new(layout.clone(), "p", "v", "");
        t.add_entry(TransactionEntry::new(layout.clone(), "gone.pdb", "ABC1", dir.path().join("gone.pdb"), false))
            .unwrap();
        t.register_entry(&exe, false).unwrap();
        let summary = t.commit(TransactionId::new(1), ts(), false, None).unwrap();

        assert_eq!(summary.status(), OpStatus::Success);
        assert_eq!(summary.failed(false), 1);
        assert_eq!(summary.success(false), 1);
        assert!(summary.files()[0].error.is_some());

        let manifest = fs::read_to_string(layout.manifest_path(TransactionId::new(1))).unwrap();
        let lines: Vec<_> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("\"gone.pdb\\ABC1\""));
    }

    #[test]
    fn total_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let mut t = Transaction::new(layout.clone(), "p", "v", "");
        t.add_entry(TransactionEntry::new(layout.clone(), "gone.pdb", "ABC1", dir.path().join("gone.pdb"), false))
            .unwrap();

        let summary = t.commit(TransactionId::new(1), ts(), false, None).unwrap();
        assert_eq!(summary.status(), OpStatus::Failed);
        assert!(!t.is_committed());
        assert!(!layout.manifest_path(TransactionId::new(1)).exists());
    }

    #[test]
    fn duplicate_content_is_skipped_but_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(8, 0x2000, None)).unwrap();

        let mut first = Transaction::new(layout.clone(), "p", "v", "");
        first.register_entry(&exe, false).unwrap();
        first.commit(TransactionId::new(1), ts(), false, None).unwrap();

        let mut second = Transaction::new(layout.clone(), "p", "v", "");
        second.register_entry(&exe, false).unwrap();
        let summary = second.commit(TransactionId::new(2), ts(), false, None).unwrap();
        assert_eq!(summary.status(), OpStatus::Success);
        assert_eq!(summary.skipped(false), 1);
        assert!(layout.manifest_path(TransactionId::new(2)).is_file());
    }

    #[test]
    fn committed_entries_load_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = fake_codec_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(9, 0x2000, None)).unwrap();

        let mut t = Transaction::new(layout.clone(), "p", "v", "c");
        t.register_entry(&exe, true).unwrap();
        t.commit(TransactionId::new(1), ts(), false, None).unwrap();

        let reloaded = Transaction::parse_line(&layout, &t.to_string()).unwrap();
        let entries = reloaded.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_compressed());
        assert_eq!(entries[0].source_file(), std::path::absolute(&exe).unwrap());
        assert!(reloaded.find_entry("app.exe", entries[0].file_hash()).unwrap().is_some());
        assert!(reloaded.find_entry("app.exe", "nope").unwrap().is_none());
        assert!(reloaded.compute_disk_usage().unwrap() > 0);
    }

    #[test]
    fn compressed_entry_needs_codec() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(10, 0x2000, None)).unwrap();
        let mut t = Transaction::new(plain_layout(dir.path().join("store")), "p", "v", "");
        assert!(matches!(t.register_entry(&exe, true), Err(StoreError::CompressionNotSupported)));
        assert!(t.register_entry(&exe, false).unwrap());
        assert_eq!(t.count().unwrap(), 1);
    }

    #[test]
    fn unknown_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("notes.txt");
        fs::write(&txt, b"plain text, not a binary").unwrap();
        let mut t = Transaction::new(plain_layout(dir.path().join("store")), "p", "v", "");
        assert!(matches!(t.register_entry(&txt, false), Err(StoreError::Identity(_))));
        assert_eq!(t.count().unwrap(), 0);
    }

    #[test]
    fn markers() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(11, 0x2000, None)).unwrap();
        let mut t = Transaction::new(layout.clone(), "p", "v", "");
        t.register_entry(&exe, false).unwrap();
        t.commit(TransactionId::new(1), ts(), false, None).unwrap();

        t.mark_promoted().unwrap();
        assert!(t.is_promoted());
        assert!(layout.manifest_path(TransactionId::new(1)).is_file());

        t.mark_deleted().unwrap();
        assert!(t.is_deleted());
        assert!(!layout.manifest_path(TransactionId::new(1)).exists());

        // Second call finds no manifest and only warns.
        t.mark_deleted().unwrap();
    }
}
