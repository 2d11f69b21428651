use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Kind of operation a transaction or summary describes.
///
/// Only [`Add`](Self::Add) and [`Del`](Self::Del) ever appear in the ledger
/// files; the remaining kinds label read-only operations in summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Add,
    Del,
    Query,
    Fetch,
    Unused,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Del => "del",
            Self::Query => "query",
            Self::Fetch => "fetch",
            Self::Unused => "unused",
        }
    }

    /// Returns `true` for kinds that are persisted as ledger lines.
    pub fn is_ledger_kind(&self) -> bool {
        matches!(self, Self::Add | Self::Del)
    }
}

impl FromStr for TransactionType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "del" => Ok(Self::Del),
            "query" => Ok(Self::Query),
            "fetch" => Ok(Self::Fetch),
            "unused" => Ok(Self::Unused),
            other => Err(TypeError::UnknownTransactionType(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
