use std::time::Duration;

use ethfs_types::ChainId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Maximum number of store redirects followed for one path.
    pub max_redirect_depth: usize,

    /// Age after which a snapshot is rebuilt on the next read. 0 disables
    /// expiry; snapshots are still rebuilt after every mutation.
    pub snapshot_ttl_secs: u64,

    /// Chain assumed for store bindings that do not name one.
    pub default_chain_id: ChainId,

    /// Largest file size a write or truncate may produce, in bytes.
    pub max_file_size: u64,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            max_redirect_depth: 8,
            snapshot_ttl_secs: 0,
            default_chain_id: ChainId(1337),
            max_file_size: 64 << 20,
        }
    }
}

impl NamespaceConfig {
    pub fn snapshot_ttl(&self) -> Option<Duration> {
        match self.snapshot_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
