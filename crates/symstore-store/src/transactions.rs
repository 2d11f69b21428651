use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use symstore_types::{TransactionId, TransactionType};
use tracing::{debug, error, warn};

use crate::error::StoreResult;
use crate::layout::StoreLayout;
use crate::ledger;
use crate::summary::{OpStatus, Summary};
use crate::transaction::Transaction;

/// Which live transactions reference each stored `(file_name, file_hash)`.
#[derive(Debug, Default)]
pub struct FilesUsage {
    entries: HashMap<(String, String), Vec<TransactionId>>,
}

impl FilesUsage {
    pub fn add(&mut self, file_name: &str, file_hash: &str, id: Option<TransactionId>) {
        let ids = self
            .entries
            .entry((file_name.to_string(), file_hash.to_string()))
            .or_default();
        if let Some(id) = id {
            ids.push(id);
        }
    }

    /// References recorded for one stored file.
    pub fn references(&self, file_name: &str, file_hash: &str) -> &[TransactionId] {
        self.entries
            .get(&(file_name.to_string(), file_hash.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Stored files referenced by `id` and nothing else.
    pub fn find_unused_entries(&self, id: TransactionId) -> Vec<(String, String)> {
        let mut unused: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, ids)| !ids.is_empty() && ids.iter().all(|other| *other == id))
            .map(|(key, _)| key.clone())
            .collect();
        unused.sort();
        unused
    }
}

/// In-memory index of `server.txt`, loaded on first use.
#[derive(Debug)]
pub struct Transactions {
    layout: Arc<StoreLayout>,
    map: Option<BTreeMap<TransactionId, Transaction>>,
}

impl Transactions {
    pub fn new(layout: Arc<StoreLayout>) -> Self {
        Self { layout, map: None }
    }

    fn parse(&self) -> StoreResult<BTreeMap<TransactionId, Transaction>> {
        let path = self.layout.server_file();
        let mut map = BTreeMap::new();
        for line in ledger::read_lines(&path)? {
            match Transaction::parse_line(&self.layout, &line) {
                Some(t) => {
                    if let Some(id) = t.id() {
                        map.insert(id, t);
                    }
                }
                None => warn!(path = %path.display(), line = %line, "skipping malformed ledger line"),
            }
        }
        debug!(path = %path.display(), transactions = map.len(), "server ledger loaded");
        Ok(map)
    }

    fn map(&mut self) -> StoreResult<&mut BTreeMap<TransactionId, Transaction>> {
        if self.map.is_none() {
            self.map = Some(self.parse()?);
        }
        Ok(self.map.get_or_insert_with(BTreeMap::new))
    }

    /// All indexed transactions ordered by id.
    pub fn transactions(&mut self) -> StoreResult<&BTreeMap<TransactionId, Transaction>> {
        Ok(self.map()?)
    }

    pub fn find(&mut self, id: TransactionId) -> StoreResult<Option<&Transaction>> {
        Ok(self.map()?.get(&id))
    }

    /// Append a committed transaction to `server.txt`.
    pub fn add(&mut self, transaction: &Transaction) -> StoreResult<()> {
        let Some(id) = transaction.id() else {
            return Ok(());
        };
        ledger::append_line(&self.layout.server_file(), &transaction.to_string())?;
        self.map()?.insert(id, transaction.clone());
        Ok(())
    }

    /// Reference counts over every indexed transaction.
    pub fn files_usage(&mut self) -> StoreResult<FilesUsage> {
        let mut usage = FilesUsage::default();
        for transaction in self.map()?.values() {
            for entry in transaction.entries()? {
                usage.add(entry.file_name(), entry.file_hash(), transaction.id());
            }
        }
        Ok(usage)
    }

    /// Remove stored files only `id` references, then drop it from the
    /// ledger.
    ///
    /// With `dry_run` the summary lists what would be removed and nothing
    /// changes on disk.
    pub fn delete(&mut self, id: TransactionId, dry_run: bool) -> StoreResult<Summary> {
        let unused = self.files_usage()?.find_unused_entries(id);
        let mut summary = Summary::new(Some(id), OpStatus::Success, Some(TransactionType::Del));
        if let Some(transaction) = self.map()?.get(&id) {
            summary.set_references(transaction.count()?);
        }

        for (file_name, file_hash) in unused {
            let dir = self.layout.entry_dir(&file_name, &file_hash);
            let label = dir.display().to_string();
            if !dir.is_dir() {
                summary.add_file(label, OpStatus::Skipped, None);
                continue;
            }
            if dry_run {
                summary.add_file(label, OpStatus::Success, None);
                continue;
            }
            match remove_entry_dir(&dir) {
                Ok(()) => {
                    summary.add_file(label, OpStatus::Success, None);
                }
                Err(e) => {
                    error!(path = %label, error = %e, "failed to remove stored file");
                    summary.add_file(label, OpStatus::Failed, Some(e.to_string()));
                }
            }
        }

        if dry_run {
            return Ok(summary);
        }

        let map = self.map()?;
        map.remove(&id);
        let lines: Vec<String> = map.values().map(ToString::to_string).collect();
        ledger::rewrite_lines(&self.layout.server_file(), lines)?;
        debug!(id = %id, removed = summary.success(false), "transaction removed from ledger");
        Ok(summary)
    }

    /// Drop the cache; the next access re-reads `server.txt`.
    pub fn reset(&mut self) {
        self.map = None;
    }
}

/// Remove `<root>/<name>/<hash>` and `<root>/<name>` once it is empty.
fn remove_entry_dir(dir: &Path) -> std::io::Result<()> {
    fs::remove_dir_all(dir)?;
    if let Some(parent) = dir.parent() {
        let empty = fs::read_dir(parent)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if empty {
            if let Err(e) = fs::remove_dir(parent) {
                warn!(path = %parent.display(), error = %e, "failed to remove empty directory");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::plain_layout;
    use symstore_pdb::fixtures;
    use symstore_types::timestamp;

    fn commit_file(
        layout: &Arc<StoreLayout>,
        index: &mut Transactions,
        id: u64,
        file: &Path,
    ) -> Transaction {
        let mut t = Transaction::new(layout.clone(), "p", "v", "");
        t.register_entry(file, false).unwrap();
        t.commit(TransactionId::new(id), timestamp::now(), false, None).unwrap();
        index.add(&t).unwrap();
        t
    }

    #[test]
    fn files_usage_counts_references() {
        let mut usage = FilesUsage::default();
        usage.add("a.pdb", "1", Some(TransactionId::new(1)));
        usage.add("a.pdb", "1", Some(TransactionId::new(2)));
        usage.add("b.pdb", "2", Some(TransactionId::new(2)));
        usage.add("c.pdb", "3", None);
        usage.add("d.pdb", "4", Some(TransactionId::new(3)));
        usage.add("d.pdb", "4", Some(TransactionId::new(3)));

        assert_eq!(usage.references("a.pdb", "1").len(), 2);
        assert!(usage.references("c.pdb", "3").is_empty());
        assert!(usage.find_unused_entries(TransactionId::new(1)).is_empty());
        assert_eq!(
            usage.find_unused_entries(TransactionId::new(2)),
            vec![("b.pdb".to_string(), "2".to_string())]
        );
        assert_eq!(
            usage.find_unused_entries(TransactionId::new(3)),
            vec![("d.pdb".to_string(), "4".to_string())]
        );
    }

    #[test]
    fn missing_server_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Transactions::new(plain_layout(dir.path()));
        assert!(index.transactions().unwrap().is_empty());
    }

    #[test]
    fn loads_and_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path());
        layout.ensure_dirs().unwrap();
        fs::write(
            layout.server_file(),
            "0000000002,add,file,01/02/2024,10:00:00,\"p\",\"v\",\"\",\nnot a line\n0000000001,add,file,01/01/2024,10:00:00,\"p\",\"v\",\"\",\n",
        )
        .unwrap();

        let mut index = Transactions::new(layout);
        let ids: Vec<u64> = index.transactions().unwrap().keys().map(|id| id.value()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn add_appends_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(1, 0x1000, None)).unwrap();

        let mut index = Transactions::new(layout.clone());
        let t = commit_file(&layout, &mut index, 1, &exe);
        assert!(index.find(TransactionId::new(1)).unwrap().is_some());
        assert_eq!(
            fs::read_to_string(layout.server_file()).unwrap(),
            format!("{t}{}", ledger::LINE_SEPARATOR)
        );

        index.reset();
        assert_eq!(index.transactions().unwrap().len(), 1);
    }

    #[test]
    fn delete_keeps_shared_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let shared = fixtures::write(dir.path(), "shared.exe", &fixtures::pe_image(2, 0x1000, None)).unwrap();
        let own = fixtures::write(dir.path(), "own.exe", &fixtures::pe_image(3, 0x1000, None)).unwrap();

        let mut index = Transactions::new(layout.clone());
        let mut first = Transaction::new(layout.clone(), "p", "v", "");
        first.register_entry(&shared, false).unwrap();
        first.register_entry(&own, false).unwrap();
        first.commit(TransactionId::new(1), timestamp::now(), false, None).unwrap();
        index.add(&first).unwrap();
        commit_file(&layout, &mut index, 2, &shared);

        let shared_dir = layout.entry_dir("shared.exe", "21000");
        let own_dir = layout.entry_dir("own.exe", "31000");

        let preview = index.delete(TransactionId::new(1), true).unwrap();
        assert_eq!(preview.success(false), 1);
        assert!(own_dir.is_dir());
        assert!(index.find(TransactionId::new(1)).unwrap().is_some());

        let summary = index.delete(TransactionId::new(1), false).unwrap();
        assert_eq!(summary.referenced(false), 2);
        assert_eq!(summary.success(false), 1);
        assert!(!own_dir.exists());
        assert!(!layout.rootdir().join("own.exe").exists());
        assert!(shared_dir.is_dir());
        assert!(index.find(TransactionId::new(1)).unwrap().is_none());

        let server = fs::read_to_string(layout.server_file()).unwrap();
        assert_eq!(server.lines().count(), 1);
        assert!(server.starts_with("0000000002,add,"));

        let summary = index.delete(TransactionId::new(2), false).unwrap();
        assert_eq!(summary.success(false), 1);
        assert!(!shared_dir.exists());
    }

    #[test]
    fn delete_reports_missing_directories_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let layout = plain_layout(dir.path().join("store"));
        layout.ensure_dirs().unwrap();
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(4, 0x1000, None)).unwrap();

        let mut index = Transactions::new(layout.clone());
        commit_file(&layout, &mut index, 1, &exe);
        fs::remove_dir_all(layout.entry_dir("app.exe", "41000")).unwrap();

        let summary = index.delete(TransactionId::new(1), false).unwrap();
        assert_eq!(summary.success(false), 0);
        assert_eq!(summary.skipped(false), 1);
        assert_eq!(fs::read_to_string(layout.server_file()).unwrap(), "");
    }
}
