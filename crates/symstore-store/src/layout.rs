use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symstore_types::TransactionId;

use crate::cab::CabCodec;
use crate::error::{StoreError, StoreResult};

pub const ADMIN_DIR: &str = "000Admin";
pub const LASTID_FILE: &str = "lastid.txt";
pub const HISTORY_FILE: &str = "history.txt";
pub const SERVER_FILE: &str = "server.txt";
pub const PINGME_FILE: &str = "pingme.txt";
pub const DELETED_SUFFIX: &str = "deleted";
pub const PROMOTED_SUFFIX: &str = "promoted";

/// On-disk layout of one store plus the compression collaborator it uses.
///
/// Shared through an `Arc` by the store and every transaction and entry
/// loaded from it.
#[derive(Clone, Debug)]
pub struct StoreLayout {
    rootdir: PathBuf,
    codec: Option<Arc<dyn CabCodec>>,
}

impl StoreLayout {
    pub fn new(rootdir: impl Into<PathBuf>, codec: Option<Arc<dyn CabCodec>>) -> Self {
        Self {
            rootdir: rootdir.into(),
            codec,
        }
    }

    pub fn rootdir(&self) -> &Path {
        &self.rootdir
    }

    pub fn admin_dir(&self) -> PathBuf {
        self.rootdir.join(ADMIN_DIR)
    }

    pub fn server_file(&self) -> PathBuf {
        self.admin_dir().join(SERVER_FILE)
    }

    pub fn history_file(&self) -> PathBuf {
        self.admin_dir().join(HISTORY_FILE)
    }

    pub fn lastid_file(&self) -> PathBuf {
        self.admin_dir().join(LASTID_FILE)
    }

    pub fn pingme_file(&self) -> PathBuf {
        self.rootdir.join(PINGME_FILE)
    }

    /// Manifest of a committed transaction: `000Admin/<id>`.
    pub fn manifest_path(&self, id: TransactionId) -> PathBuf {
        self.admin_dir().join(id.to_string())
    }

    /// Manifest marker such as `000Admin/<id>.deleted`.
    pub fn marker_path(&self, id: TransactionId, suffix: &str) -> PathBuf {
        self.admin_dir().join(format!("{id}.{suffix}"))
    }

    /// Directory shared by every copy of `(file_name, file_hash)`.
    pub fn entry_dir(&self, file_name: &str, file_hash: &str) -> PathBuf {
        self.rootdir.join(file_name).join(file_hash)
    }

    pub fn codec(&self) -> Option<&dyn CabCodec> {
        self.codec.as_deref()
    }

    pub fn supports_compression(&self) -> bool {
        self.codec.is_some()
    }

    /// Create the root and admin directories if missing.
    pub fn ensure_dirs(&self) -> StoreResult<()> {
        let admin = self.admin_dir();
        fs::create_dir_all(&admin).map_err(|e| {
            StoreError::Unexpected(format!("failed to create {}: {e}", admin.display()))
        })
    }
}
