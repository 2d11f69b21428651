use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use symstore_types::{timestamp, TransactionId, TransactionType};
use tracing::{debug, info, warn};

use crate::cab::{self, CabCodec};
use crate::entry::TransactionEntry;
use crate::error::{StoreError, StoreResult};
use crate::history::History;
use crate::layout::StoreLayout;
use crate::summary::{OpStatus, Summary};
use crate::transaction::Transaction;
use crate::transactions::Transactions;

/// `(transaction, entry)` pairs yielded by [`Store::iter_entries`].
pub type EntryIter<'a> =
    Box<dyn Iterator<Item = StoreResult<(&'a Transaction, &'a TransactionEntry)>> + 'a>;

/// One symbol store rooted at a directory.
///
/// The store owns the `server.txt` index and the history ledger, both read
/// lazily and cached until [`reset`](Self::reset). It assumes a single
/// writer: nothing here locks the ledgers against other processes.
#[derive(Debug)]
pub struct Store {
    layout: Arc<StoreLayout>,
    transactions: Transactions,
    history: History,
    next_id: Option<TransactionId>,
}

impl Store {
    /// Open the store at `rootdir`, using whatever CAB tool is installed.
    pub fn open(rootdir: impl AsRef<Path>) -> Self {
        Self::with_codec(rootdir, cab::probe())
    }

    pub fn with_codec(rootdir: impl AsRef<Path>, codec: Option<Arc<dyn CabCodec>>) -> Self {
        let layout = Arc::new(StoreLayout::new(rootdir.as_ref(), codec));
        Self {
            transactions: Transactions::new(Arc::clone(&layout)),
            history: History::new(Arc::clone(&layout)),
            layout,
            next_id: None,
        }
    }

    pub fn rootdir(&self) -> &Path {
        self.layout.rootdir()
    }

    pub fn layout(&self) -> &Arc<StoreLayout> {
        &self.layout
    }

    pub fn supports_compression(&self) -> bool {
        self.layout.supports_compression()
    }

    /// Id the next successful commit will receive.
    pub fn next_transaction_id(&mut self) -> StoreResult<TransactionId> {
        if let Some(id) = self.next_id {
            return Ok(id);
        }
        let path = self.layout.lastid_file();
        let last = match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<u64>().map_err(|_| {
                StoreError::Unexpected(format!("{}: invalid last id {:?}", path.display(), text.trim()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StoreError::read(&path, e)),
        };
        let id = TransactionId::new(last)
            .next()
            .ok_or_else(|| StoreError::Unexpected(format!("{}: transaction ids exhausted", path.display())))?;
        self.next_id = Some(id);
        Ok(id)
    }

    pub fn new_transaction(
        &self,
        product: impl Into<String>,
        version: impl Into<String>,
        comment: impl Into<String>,
    ) -> Transaction {
        Transaction::new(Arc::clone(&self.layout), product, version, comment)
    }

    pub fn transactions(&mut self) -> StoreResult<&BTreeMap<TransactionId, Transaction>> {
        self.transactions.transactions()
    }

    pub fn history(&mut self) -> &mut History {
        &mut self.history
    }

    /// Look up a live transaction, optionally requiring its kind.
    pub fn find_transaction(
        &mut self,
        id: TransactionId,
        kind: Option<TransactionType>,
    ) -> StoreResult<&Transaction> {
        let transaction = self
            .transactions
            .find(id)?
            .ok_or(StoreError::TransactionNotFound(id))?;
        match kind {
            Some(expected) if transaction.kind() != expected => Err(StoreError::ImproperTransactionType {
                id,
                expected,
                actual: transaction.kind(),
            }),
            _ => Ok(transaction),
        }
    }

    /// Commit `transaction` under the next id.
    ///
    /// The ledgers and `lastid.txt` only change when the summary is
    /// SUCCESS, so a failed commit leaves the id available for the next one.
    pub fn commit(
        &mut self,
        transaction: &mut Transaction,
        force: bool,
        promote_from: Option<&StoreLayout>,
    ) -> StoreResult<Summary> {
        self.layout.ensure_dirs()?;
        let id = self.next_transaction_id()?;
        let summary = transaction.commit(id, timestamp::now(), force, promote_from)?;
        if summary.status() == OpStatus::Success {
            self.transactions.add(transaction)?;
            self.history.add(transaction)?;
            self.update_global(id)?;
            info!(id = %id, files = summary.files().len(), "transaction committed");
        }
        Ok(summary)
    }

    fn update_global(&mut self, id: TransactionId) -> StoreResult<()> {
        let lastid = self.layout.lastid_file();
        fs::write(&lastid, id.to_string()).map_err(|e| StoreError::write(&lastid, e))?;
        self.next_id = None;

        let pingme = self.layout.pingme_file();
        let touched = if pingme.exists() {
            File::options()
                .write(true)
                .open(&pingme)
                .and_then(|f| f.set_modified(SystemTime::now()))
        } else {
            File::create(&pingme).map(|_| ())
        };
        touched.map_err(|e| StoreError::write(&pingme, e))
    }

    /// Delete ADD transaction `id` and every stored file only it uses.
    ///
    /// Outside `dry_run` the manifest is renamed `.deleted`, and a DEL
    /// record with a freshly allocated id goes to the history.
    pub fn delete_transaction(&mut self, id: TransactionId, dry_run: bool) -> StoreResult<Summary> {
        let transaction = self.find_transaction(id, Some(TransactionType::Add))?.clone();
        let summary = self.transactions.delete(id, dry_run)?;
        if !dry_run {
            transaction.mark_deleted()?;
            let del_id = self.next_transaction_id()?;
            self.history.delete(id, del_id)?;
            self.update_global(del_id)?;
            info!(id = %id, del_id = %del_id, removed = summary.success(false), "transaction deleted");
        }
        Ok(summary)
    }

    /// Copy committed ADD `source` from another store into this one.
    ///
    /// Stored bytes are copied as they are. Without `comment` the new
    /// transaction says where it was promoted from.
    pub fn promote_transaction(
        &mut self,
        source: &Transaction,
        comment: Option<&str>,
    ) -> StoreResult<Summary> {
        if source.kind() != TransactionType::Add {
            return Ok(Summary::with_message(
                source.id(),
                OpStatus::Failed,
                None,
                "Invalid transaction type",
            ));
        }
        let Some(source_id) = source.id() else {
            return Ok(Summary::with_message(
                None,
                OpStatus::Failed,
                None,
                "Transaction is not committed",
            ));
        };

        let source_root = source.layout().rootdir().display().to_string();
        let comment = match comment {
            Some(c) => c.to_string(),
            None if source.comment().is_empty() => format!("Promote {source_id} from {source_root}"),
            None => format!("{} : Promote {source_id} from {source_root}", source.comment()),
        };
        info!(id = %source_id, from = %source_root, "promoting transaction");

        let mut promoted = self.new_transaction(source.product(), source.version(), comment);
        for entry in source.entries()? {
            promoted.add_entry(entry.clone_for(Arc::clone(&self.layout), true))?;
        }
        let summary = self.commit(&mut promoted, true, Some(source.layout()))?;
        if summary.status() == OpStatus::Success {
            source.mark_promoted()?;
        }
        Ok(summary)
    }

    /// Delete all but the `keep` newest live transactions of
    /// `product`/`version`, oldest first.
    ///
    /// `keep == 0` keeps everything. Each deletion contributes one summary
    /// to the returned chain.
    pub fn remove_old_versions(
        &mut self,
        product: &str,
        version: &str,
        keep: usize,
        comment: Option<&str>,
        dry_run: bool,
    ) -> StoreResult<Summary> {
        let candidates: Vec<TransactionId> = self
            .transactions
            .transactions()?
            .values()
            .filter(|t| {
                t.kind() == TransactionType::Add
                    && t.product() == product
                    && t.version() == version
                    && comment.map_or(true, |c| t.comment() == c)
                    && !t.is_deleted()
            })
            .filter_map(Transaction::id)
            .collect();

        if keep == 0 || candidates.len() <= keep {
            debug!(product, version, found = candidates.len(), keep, "nothing to clean");
            return Ok(Summary::new(None, OpStatus::Skipped, Some(TransactionType::Del)));
        }

        let mut chain: Option<Summary> = None;
        for id in &candidates[..candidates.len() - keep] {
            let summary = match self.delete_transaction(*id, dry_run) {
                Ok(summary) => summary,
                Err(e @ (StoreError::TransactionNotFound(_) | StoreError::ImproperTransactionType { .. })) => {
                    warn!(id = %id, error = %e, "cannot delete transaction");
                    Summary::with_message(Some(*id), OpStatus::Failed, Some(TransactionType::Del), e.to_string())
                }
                Err(e) => return Err(e),
            };
            match chain.as_mut() {
                Some(head) => head.append(summary),
                None => chain = Some(summary),
            }
        }
        Ok(chain.unwrap_or_else(|| Summary::new(None, OpStatus::Skipped, Some(TransactionType::Del))))
    }

    /// Find the PDB referenced by the debug directory of PE image `path`.
    ///
    /// Returns the first stored match in id order, or `None` when the image
    /// has no CodeView record or nothing matches.
    pub fn fetch_symbol(
        &mut self,
        path: &Path,
    ) -> StoreResult<Option<(&Transaction, &TransactionEntry)>> {
        let Some(info) = symstore_pdb::extract_dbg_info(path)? else {
            return Ok(None);
        };
        for transaction in self.transactions.transactions()?.values() {
            for entry in transaction.entries()? {
                if entry.same_identity(&info.pdb_name, &info.key) {
                    return Ok(Some((transaction, entry)));
                }
            }
        }
        Ok(None)
    }

    /// Stored copies of the file at `path`; only the first one unless `full`.
    pub fn find_entries(
        &mut self,
        path: &Path,
        full: bool,
    ) -> StoreResult<Vec<(&Transaction, &TransactionEntry)>> {
        let probe = TransactionEntry::from_file(Arc::clone(&self.layout), path, false)?;
        let mut found = Vec::new();
        for transaction in self.transactions.transactions()?.values() {
            for entry in transaction.entries()? {
                if entry.same_identity(probe.file_name(), probe.file_hash()) {
                    found.push((transaction, entry));
                    if !full {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }

    /// Every `(transaction, entry)` pair of the transactions accepted by
    /// `filter`, in id order.
    pub fn iter_entries<'a, F>(&'a mut self, filter: F) -> StoreResult<EntryIter<'a>>
    where
        F: Fn(&Transaction) -> bool + 'a,
    {
        let map = self.transactions.transactions()?;
        Ok(Box::new(map.values().filter(move |t| filter(*t)).flat_map(
            |t| -> EntryIter<'a> {
                match t.entries() {
                    Ok(entries) => Box::new(entries.iter().map(move |e| Ok((t, e)))),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                }
            },
        )))
    }

    /// Forget cached ledgers so the next access reads the disk again.
    pub fn reset(&mut self) {
        self.transactions.reset();
        self.history.reset();
        self.next_id = None;
    }
}
