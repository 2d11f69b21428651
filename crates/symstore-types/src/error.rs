use thiserror::Error;

/// Errors produced when parsing foundation types from their textual form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid transaction id: {0:?}")]
    InvalidTransactionId(String),

    #[error("unknown transaction type: {0:?}")]
    UnknownTransactionType(String),

    #[error("invalid ledger timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}
