//! Store registry: live handles for every store the namespace touches.
//!
//! Each chain has one default (top-level) store. Stores named by directory
//! redirect targets are connected lazily and cached by `(chain, address)`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ethfs_client::{RecordStore, StoreConnector};
use ethfs_types::{make_error_msg, Address, ChainId, NamespaceCode, Result};
use parking_lot::RwLock;
use tokio::sync::OwnedMutexGuard;
use tracing::info;

use crate::slot_index::{SlotIndex, SlotResolver};

/// Identity of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    pub chain: ChainId,
    pub address: Address,
}

impl StoreKey {
    pub fn new(chain: ChainId, address: Address) -> Self {
        Self { chain, address }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

/// A connected store with its slot index and mutation lock.
pub struct StoreHandle {
    key: StoreKey,
    client: Arc<dyn RecordStore>,
    slots: RwLock<SlotIndex>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl StoreHandle {
    pub fn new(chain: ChainId, client: Arc<dyn RecordStore>) -> Self {
        Self {
            key: StoreKey::new(chain, client.address()),
            client,
            slots: RwLock::new(SlotIndex::new()),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn key(&self) -> StoreKey {
        self.key
    }

    pub fn client(&self) -> &dyn RecordStore {
        self.client.as_ref()
    }

    pub fn slots(&self) -> SlotResolver<'_> {
        SlotResolver::new(self.client.as_ref(), &self.slots)
    }

    /// Copy of the slot index, for inspection.
    pub fn slot_index(&self) -> SlotIndex {
        self.slots.read().clone()
    }

    /// Serializes mutations against this store.
    pub async fn lock_for_write(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.write_lock).lock_owned().await
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle").field("key", &self.key).finish()
    }
}

pub struct StoreRegistry {
    connector: Arc<dyn StoreConnector>,
    defaults: RwLock<BTreeMap<ChainId, Address>>,
    handles: RwLock<HashMap<StoreKey, Arc<StoreHandle>>>,
}

impl StoreRegistry {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            defaults: RwLock::new(BTreeMap::new()),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Connect to `address` and make it the default store of `chain`.
    pub async fn bind(&self, chain: ChainId, address: Address) -> Result<Arc<StoreHandle>> {
        let handle = self.get_or_connect(chain, address).await?;
        self.defaults.write().insert(chain, address);
        info!(%chain, %address, "default store bound");
        Ok(handle)
    }

    /// Chains with a default store, ascending.
    pub fn chains(&self) -> Vec<ChainId> {
        self.defaults.read().keys().copied().collect()
    }

    pub fn bindings(&self) -> Vec<(ChainId, Address)> {
        self.defaults.read().iter().map(|(c, a)| (*c, *a)).collect()
    }

    pub fn default_store(&self, chain: ChainId) -> Result<Arc<StoreHandle>> {
        let address = match self.defaults.read().get(&chain) {
            Some(address) => *address,
            None => {
                return make_error_msg(NamespaceCode::NOT_FOUND, format!("no store for chain {}", chain))
            }
        };
        match self.get(StoreKey::new(chain, address)) {
            Some(handle) => Ok(handle),
            None => make_error_msg(
                NamespaceCode::INCONSISTENT,
                format!("default store {} of chain {} has no handle", address, chain),
            ),
        }
    }

    pub fn get(&self, key: StoreKey) -> Option<Arc<StoreHandle>> {
        self.handles.read().get(&key).cloned()
    }

    /// The cached handle for `(chain, address)`, connecting on first use.
    pub async fn get_or_connect(&self, chain: ChainId, address: Address) -> Result<Arc<StoreHandle>> {
        let key = StoreKey::new(chain, address);
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }
        let client = self.connector.connect(chain, address).await?;
        let mut handles = self.handles.write();
        // Another task may have connected meanwhile; keep the first handle.
        let handle = handles
            .entry(key)
            .or_insert_with(|| Arc::new(StoreHandle::new(chain, client)))
            .clone();
        info!(store = %key, "store handle created");
        Ok(handle)
    }

    /// Every registered handle, ordered by key.
    pub fn handles(&self) -> Vec<Arc<StoreHandle>> {
        let mut handles: Vec<_> = self.handles.read().values().cloned().collect();
        handles.sort_by_key(|h| h.key());
        handles
    }
}
