//! Foundation types for the symbol store.
//!
//! Every other symstore crate depends on `symstore-types`. The types here
//! define the textual forms that end up in the ledger files, so their
//! `Display`/`FromStr` pairs are part of the on-disk format.
//!
//! # Key Types
//!
//! - [`TransactionId`]: Ten-digit, zero-padded transaction number
//! - [`TransactionType`]: Operation kind recorded in ledgers and summaries
//! - [`timestamp`]: `MM/DD/YYYY,HH:MM:SS` ledger timestamp helpers

pub mod error;
pub mod id;
pub mod kind;
pub mod timestamp;

pub use error::TypeError;
pub use id::TransactionId;
pub use kind::TransactionType;
