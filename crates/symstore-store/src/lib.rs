//! Transactional symbol store.
//!
//! A store is a directory tree in the Microsoft `symstore` layout:
//!
//! ```text
//! <root>/
//!   000Admin/server.txt     live transactions, one line each
//!   000Admin/history.txt    every add and delete ever made
//!   000Admin/lastid.txt     last allocated transaction id
//!   000Admin/<id>           manifest of one transaction
//!   pingme.txt              touched after each ledger update
//!   <file_name>/<key>/<file_name>
//! ```
//!
//! Files are grouped into [`Transaction`]s. Each stored file lives in a
//! directory named after its identity key, so identical binaries added by
//! several transactions share one copy; deleting a transaction only removes
//! the files no other live transaction references.
//!
//! # Key Types
//!
//! - [`Store`]: facade over one store root
//! - [`Transaction`] / [`TransactionEntry`]: a unit of change and its files
//! - [`Summary`]: linked per-transaction operation results
//! - [`CabCodec`]: compression through an external CAB tool

pub mod cab;
pub mod discover;
pub mod entry;
pub mod error;
pub mod history;
pub mod layout;
pub mod ledger;
pub mod store;
pub mod summary;
pub mod transaction;
pub mod transactions;

#[cfg(test)]
mod testutil;

pub use cab::{CabCodec, Gcab, Makecab};
pub use discover::build_files_list;
pub use entry::{compressed_name, TransactionEntry, MAX_COMPRESSED_FILE_SIZE};
pub use error::{StoreError, StoreResult};
pub use history::History;
pub use layout::StoreLayout;
pub use store::{EntryIter, Store};
pub use summary::{FileDetail, FileRecord, OpStatus, Summary};
pub use transaction::Transaction;
pub use transactions::{FilesUsage, Transactions};
