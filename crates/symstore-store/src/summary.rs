//! Operation results.
//!
//! A [`Summary`] describes one transaction-level outcome. Commands touching
//! several transactions chain their summaries through `linked`.

use std::fmt;
use std::fs;

use chrono::{DateTime, Local};
use serde::Serialize;
use symstore_types::{TransactionId, TransactionType};

use crate::entry::TransactionEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OpStatus {
    #[serde(rename = "fail")]
    Failed,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "skip")]
    Skipped,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "fail",
            Self::Success => "success",
            Self::Skipped => "skip",
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific fields of a [`FileRecord`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FileDetail {
    /// A source file stored by an add.
    Added { mtime: String, size: u64 },
    /// A query hit for the given input file.
    Queried { input: String, compressed: bool },
    /// A symbol extracted for the given input image.
    Fetched { input: String, compressed: bool },
    /// A stored file not accessed since the cut-off date.
    Unused {
        date: String,
        transaction_id: TransactionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        del_size: Option<u64>,
    },
}

/// Result for one file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub status: OpStatus,
    pub error: Option<String>,
    #[serde(flatten)]
    pub detail: Option<FileDetail>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    transaction_id: Option<TransactionId>,
    transaction_type: Option<TransactionType>,
    status: OpStatus,
    success: usize,
    failure: usize,
    skip: usize,
    references: usize,
    files: Vec<FileRecord>,
    error_msg: Option<String>,
    linked: Option<Box<Summary>>,
}

impl Summary {
    pub fn new(
        transaction_id: Option<TransactionId>,
        status: OpStatus,
        transaction_type: Option<TransactionType>,
    ) -> Self {
        Self {
            transaction_id,
            transaction_type,
            status,
            success: 0,
            failure: usize::from(status == OpStatus::Failed),
            skip: 0,
            references: 0,
            files: Vec::new(),
            error_msg: None,
            linked: None,
        }
    }

    pub fn with_message(
        transaction_id: Option<TransactionId>,
        status: OpStatus,
        transaction_type: Option<TransactionType>,
        message: impl Into<String>,
    ) -> Self {
        let mut summary = Self::new(transaction_id, status, transaction_type);
        summary.error_msg = Some(message.into());
        summary
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn set_transaction_id(&mut self, id: Option<TransactionId>) {
        self.transaction_id = id;
    }

    pub fn transaction_type(&self) -> Option<TransactionType> {
        self.transaction_type
    }

    pub fn status(&self) -> OpStatus {
        self.status
    }

    pub fn set_status(&mut self, status: OpStatus) {
        self.status = status;
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    pub fn set_error_msg(&mut self, message: impl Into<String>) {
        self.error_msg = Some(message.into());
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn set_references(&mut self, references: usize) {
        self.references = references;
    }

    fn total(&self, full: bool, field: impl Fn(&Summary) -> usize) -> usize {
        if full {
            self.iter().map(field).sum()
        } else {
            field(self)
        }
    }

    /// Successful files, over the whole chain when `full`.
    pub fn success(&self, full: bool) -> usize {
        self.total(full, |s| s.success)
    }

    pub fn failed(&self, full: bool) -> usize {
        self.total(full, |s| s.failure)
    }

    pub fn skipped(&self, full: bool) -> usize {
        self.total(full, |s| s.skip)
    }

    pub fn referenced(&self, full: bool) -> usize {
        self.total(full, |s| s.references)
    }

    /// Number of summaries in the chain, optionally only successful ones.
    pub fn count(&self, success_only: bool) -> usize {
        self.iter()
            .filter(|s| !success_only || s.status == OpStatus::Success)
            .count()
    }

    /// Record a file result and bump the matching counter.
    pub fn add_file(
        &mut self,
        path: impl Into<String>,
        status: OpStatus,
        error: Option<String>,
    ) -> &mut FileRecord {
        match status {
            OpStatus::Success => self.success += 1,
            OpStatus::Failed => self.failure += 1,
            OpStatus::Skipped => self.skip += 1,
        }
        self.files.push(FileRecord {
            path: path.into(),
            status,
            error,
            detail: None,
        });
        let last = self.files.len() - 1;
        &mut self.files[last]
    }

    /// Record the result for a transaction entry.
    ///
    /// The path is the stored path relative to the store root. A stored
    /// add also records the source file's modification time and size.
    pub fn add_entry(
        &mut self,
        entry: &TransactionEntry,
        status: OpStatus,
        transaction_type: Option<TransactionType>,
        error: Option<String>,
    ) -> &mut FileRecord {
        let detail = if status == OpStatus::Success && transaction_type == Some(TransactionType::Add) {
            fs::metadata(entry.source_file()).ok().and_then(|meta| {
                let mtime = meta.modified().ok()?;
                let mtime: DateTime<Local> = mtime.into();
                Some(FileDetail::Added {
                    mtime: mtime.naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                    size: meta.len(),
                })
            })
        } else {
            None
        };
        let record = self.add_file(entry.rel_path().to_string_lossy(), status, error);
        record.detail = detail;
        record
    }

    pub fn linked(&self) -> Option<&Summary> {
        self.linked.as_deref()
    }

    /// Replace whatever follows this node.
    pub fn set_linked(&mut self, next: Summary) {
        self.linked = Some(Box::new(next));
    }

    /// Attach `next` at the end of the chain.
    pub fn append(&mut self, next: Summary) {
        let mut tail = &mut self.linked;
        while let Some(node) = tail {
            tail = &mut node.linked;
        }
        *tail = Some(Box::new(next));
    }

    pub fn iter(&self) -> SummaryIter<'_> {
        SummaryIter { next: Some(self) }
    }
}

pub struct SummaryIter<'a> {
    next: Option<&'a Summary>,
}

impl<'a> Iterator for SummaryIter<'a> {
    type Item = &'a Summary;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.linked();
        Some(current)
    }
}
