use std::sync::Arc;

use symstore_types::TransactionId;
use tracing::debug;

use crate::error::StoreResult;
use crate::layout::StoreLayout;
use crate::ledger;
use crate::transaction::Transaction;

/// Append-only audit trail kept in `history.txt`.
///
/// Unlike `server.txt` it is never rewritten: every add and every delete
/// leaves one line behind.
#[derive(Debug)]
pub struct History {
    layout: Arc<StoreLayout>,
    records: Option<Vec<Transaction>>,
}

impl History {
    pub fn new(layout: Arc<StoreLayout>) -> Self {
        Self {
            layout,
            records: None,
        }
    }

    fn records(&mut self) -> StoreResult<&mut Vec<Transaction>> {
        if self.records.is_none() {
            let path = self.layout.history_file();
            let records: Vec<Transaction> = ledger::read_lines(&path)?
                .iter()
                .filter_map(|line| Transaction::parse_line(&self.layout, line))
                .collect();
            debug!(path = %path.display(), records = records.len(), "history loaded");
            self.records = Some(records);
        }
        Ok(self.records.get_or_insert_with(Vec::new))
    }

    /// Record a committed ADD transaction.
    pub fn add(&mut self, transaction: &Transaction) -> StoreResult<()> {
        self.write(transaction.to_string())?;
        if let Some(records) = self.records.as_mut() {
            records.push(transaction.clone());
        }
        Ok(())
    }

    /// Record that `deleted_id` was retired by the DEL record `id`.
    pub fn delete(&mut self, deleted_id: TransactionId, id: TransactionId) -> StoreResult<()> {
        let record = Transaction::deletion(Arc::clone(&self.layout), id, deleted_id);
        self.write(record.to_string())?;
        if let Some(records) = self.records.as_mut() {
            records.push(record);
        }
        Ok(())
    }

    fn write(&self, line: String) -> StoreResult<()> {
        self.layout.ensure_dirs()?;
        ledger::append_open_line(&self.layout.history_file(), &line)
    }

    pub fn len(&mut self) -> StoreResult<usize> {
        Ok(self.records()?.len())
    }

    pub fn is_empty(&mut self) -> StoreResult<bool> {
        Ok(self.records()?.is_empty())
    }

    pub fn get(&mut self, index: usize) -> StoreResult<Option<&Transaction>> {
        Ok(self.records()?.get(index))
    }

    pub fn iter(&mut self) -> StoreResult<std::slice::Iter<'_, Transaction>> {
        Ok(self.records()?.iter())
    }

    pub fn reset(&mut self) {
        self.records = None;
    }
}
