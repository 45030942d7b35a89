//! Slot index: the derived mapping between `(owner, path)` and record
//! indices of one store.
//!
//! The store offers no lookup by name, so the ground truth is an exhaustive
//! scan of its live records. The index only remembers what a scan or a
//! creation already found, and every hit is re-validated against the store
//! before it is trusted.

use std::collections::{HashMap, HashSet};

use ethfs_client::{Record, RecordStore};
use ethfs_types::{Address, RecordIndex, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::OwnerScope;

/// Forward `(owner, path) -> index` and inverse `(owner, index) -> path`
/// maps, kept as a bijection.
#[derive(Debug, Default, Clone)]
pub struct SlotIndex {
    forward: HashMap<(Address, String), RecordIndex>,
    inverse: HashMap<(Address, RecordIndex), String>,
}

impl SlotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: Address, path: &str) -> Option<RecordIndex> {
        self.forward.get(&(owner, path.to_string())).copied()
    }

    pub fn path_of(&self, owner: Address, index: RecordIndex) -> Option<&str> {
        self.inverse.get(&(owner, index)).map(String::as_str)
    }

    /// Any mapping for `path`, trying `owner` first, then the lowest owner
    /// address.
    pub fn get_any(&self, owner: Address, path: &str) -> Option<(Address, RecordIndex)> {
        if let Some(index) = self.get(owner, path) {
            return Some((owner, index));
        }
        self.forward
            .iter()
            .filter(|((_, p), _)| p == path)
            .map(|((o, _), index)| (*o, *index))
            .min_by_key(|(o, _)| *o)
    }

    /// Map `(owner, path)` to `index`, dropping any pair that shares either
    /// key with it.
    pub fn insert(&mut self, owner: Address, path: &str, index: RecordIndex) {
        if let Some(old_index) = self.forward.remove(&(owner, path.to_string())) {
            self.inverse.remove(&(owner, old_index));
        }
        if let Some(old_path) = self.inverse.remove(&(owner, index)) {
            self.forward.remove(&(owner, old_path));
        }
        self.forward.insert((owner, path.to_string()), index);
        self.inverse.insert((owner, index), path.to_string());
    }

    pub fn remove(&mut self, owner: Address, path: &str) -> Option<RecordIndex> {
        let index = self.forward.remove(&(owner, path.to_string()))?;
        self.inverse.remove(&(owner, index));
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Whether forward and inverse maps agree.
    pub fn is_consistent(&self) -> bool {
        self.forward.len() == self.inverse.len()
            && self
                .forward
                .iter()
                .all(|((owner, path), index)| self.inverse.get(&(*owner, *index)) == Some(path))
    }
}

/// Resolves paths to records of one store through its slot index.
pub struct SlotResolver<'a> {
    store: &'a dyn RecordStore,
    slots: &'a RwLock<SlotIndex>,
}

impl<'a> SlotResolver<'a> {
    pub fn new(store: &'a dyn RecordStore, slots: &'a RwLock<SlotIndex>) -> Self {
        Self { store, slots }
    }

    /// Find the live record named `path`, or `None` if the store has none
    /// visible under `scope`. `OwnerScope::Any` prefers `owner`'s record,
    /// then the one with the lowest owner address.
    ///
    /// A cached mapping is trusted only after the record is re-fetched and
    /// still matches; otherwise it is dropped and the store is scanned.
    pub async fn resolve(
        &self,
        owner: Address,
        path: &str,
        scope: OwnerScope,
    ) -> Result<Option<Record>> {
        let cached = match scope {
            OwnerScope::Owner => self.slots.read().get(owner, path).map(|i| (owner, i)),
            OwnerScope::Any => self.slots.read().get_any(owner, path),
        };
        if let Some((mapped_owner, index)) = cached {
            match self.store.get_record(index).await {
                Ok(record) if Self::matches(&record, owner, path, scope) => return Ok(Some(record)),
                Ok(_) | Err(ethfs_client::ClientError::RecordNotFound(_)) => {
                    debug!(store = %self.store.address(), %index, path, "stale slot mapping");
                    self.slots.write().remove(mapped_owner, path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.scan(owner, path, scope).await
    }

    /// After a committed creation, find the index the store assigned by
    /// diffing its live indices against `before`.
    pub async fn discover_created(
        &self,
        before: &HashSet<RecordIndex>,
        owner: Address,
        path: &str,
    ) -> Result<Option<Record>> {
        let mut created: Vec<RecordIndex> = self
            .store
            .list_live_indices()
            .await?
            .into_iter()
            .filter(|i| !before.contains(i))
            .collect();
        created.sort_unstable_by(|a, b| b.cmp(a));

        for index in created {
            let record = self.store.get_record(index).await?;
            if Self::matches(&record, owner, path, OwnerScope::Owner) {
                self.slots.write().insert(owner, path, index);
                return Ok(Some(record));
            }
        }
        debug!(store = %self.store.address(), path, "created index not in diff, scanning");
        self.resolve(owner, path, OwnerScope::Owner).await
    }

    pub async fn live_indices(&self) -> Result<HashSet<RecordIndex>> {
        Ok(self.store.list_live_indices().await?.into_iter().collect())
    }

    /// Forget the mapping of a deleted record.
    pub fn forget(&self, owner: Address, path: &str) {
        self.slots.write().remove(owner, path);
    }

    async fn scan(&self, owner: Address, path: &str, scope: OwnerScope) -> Result<Option<Record>> {
        let mut fallback: Option<Record> = None;
        for index in self.store.list_live_indices().await? {
            let record = self.store.get_record(index).await?;
            if !record.exists {
                continue;
            }
            match record.path() {
                Ok(name) if name == path => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(store = %self.store.address(), %index, error = %e, "skipping record");
                    continue;
                }
            }
            if record.owner == owner {
                self.slots.write().insert(record.owner, path, index);
                return Ok(Some(record));
            }
            let lower = fallback.as_ref().map_or(true, |f| record.owner < f.owner);
            if scope == OwnerScope::Any && lower {
                fallback = Some(record);
            }
        }
        if let Some(record) = &fallback {
            self.slots.write().insert(record.owner, path, record.index);
        }
        Ok(fallback)
    }

    fn matches(record: &Record, owner: Address, path: &str, scope: OwnerScope) -> bool {
        record.exists
            && record.path().map(|p| p == path).unwrap_or(false)
            && (scope == OwnerScope::Any || record.owner == owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethfs_client::{MemoryStore, RecordKind};
    use ethfs_types::ChainId;

    fn alice() -> Address {
        Address::from_low_u64(0xa11ce)
    }

    fn bob() -> Address {
        Address::from_low_u64(0xb0b)
    }

    fn store() -> MemoryStore {
        MemoryStore::new(ChainId(1337), Address::from_low_u64(0x5100))
    }

    #[test]
    fn test_insert_keeps_bijection() {
        let mut idx = SlotIndex::new();
        idx.insert(alice(), "a", RecordIndex(1));
        idx.insert(alice(), "b", RecordIndex(2));
        // Same path, new index.
        idx.insert(alice(), "a", RecordIndex(3));
        assert_eq!(idx.get(alice(), "a"), Some(RecordIndex(3)));
        assert_eq!(idx.path_of(alice(), RecordIndex(1)), None);
        // Same index, new path.
        idx.insert(alice(), "c", RecordIndex(2));
        assert_eq!(idx.get(alice(), "b"), None);
        assert_eq!(idx.path_of(alice(), RecordIndex(2)), Some("c"));
        assert!(idx.is_consistent());
        assert_eq!(idx.len(), 2);

        assert_eq!(idx.remove(alice(), "c"), Some(RecordIndex(2)));
        assert_eq!(idx.path_of(alice(), RecordIndex(2)), None);
        assert!(idx.is_consistent());
    }

    #[test]
    fn test_owners_are_separate_keys() {
        let mut idx = SlotIndex::new();
        idx.insert(alice(), "a", RecordIndex(1));
        idx.insert(bob(), "a", RecordIndex(2));
        assert_eq!(idx.get(alice(), "a"), Some(RecordIndex(1)));
        assert_eq!(idx.get_any(bob(), "a"), Some((bob(), RecordIndex(2))));
        // A stranger gets the lowest owner address.
        assert_eq!(
            idx.get_any(Address::from_low_u64(9), "a"),
            Some((bob(), RecordIndex(2)))
        );
        assert!(idx.get_any(alice(), "zzz").is_none());
    }

    #[tokio::test]
    async fn test_resolve_scans_then_caches() {
        let store = store();
        store.insert_committed(bob(), RecordKind::File, "other", "", None);
        let idx = store.insert_committed(alice(), RecordKind::File, "docs/a.txt", "hi", None);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);

        let record = resolver
            .resolve(alice(), "docs/a.txt", OwnerScope::Owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.index, idx);
        assert_eq!(record.body, b"hi");
        assert_eq!(slots.read().get(alice(), "docs/a.txt"), Some(idx));
        assert_eq!(store.stats().scans, 1);

        // Second resolution is served by the mapping: no further scan.
        resolver
            .resolve(alice(), "docs/a.txt", OwnerScope::Owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.stats().scans, 1);
    }

    #[tokio::test]
    async fn test_owner_scope_and_any_scope() {
        let store = store();
        let idx = store.insert_committed(alice(), RecordKind::File, "a.txt", "data", None);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);

        assert!(resolver
            .resolve(bob(), "a.txt", OwnerScope::Owner)
            .await
            .unwrap()
            .is_none());
        let seen_by_bob = resolver
            .resolve(bob(), "a.txt", OwnerScope::Any)
            .await
            .unwrap()
            .unwrap();
        let seen_by_alice = resolver
            .resolve(alice(), "a.txt", OwnerScope::Owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen_by_bob, seen_by_alice);
        assert_eq!(seen_by_bob.index, idx);
        // Scan matches are recorded under the real owner.
        assert_eq!(slots.read().get(bob(), "a.txt"), None);
        assert_eq!(slots.read().get(alice(), "a.txt"), Some(idx));
    }

    #[tokio::test]
    async fn test_any_scope_scan_prefers_lowest_owner() {
        let store = store();
        store.insert_committed(alice(), RecordKind::File, "a.txt", "alice", None);
        let bobs = store.insert_committed(bob(), RecordKind::File, "a.txt", "bob", None);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);

        let record = resolver
            .resolve(Address::from_low_u64(0xca201), "a.txt", OwnerScope::Any)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.index, bobs);
        assert_eq!(record.owner, bob());
    }

    #[tokio::test]
    async fn test_stale_mapping_falls_back_to_scan() {
        let store = store();
        let old = store.insert_committed(alice(), RecordKind::File, "a", "", None);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);
        resolver.resolve(alice(), "a", OwnerScope::Owner).await.unwrap();

        // Deleted and recreated behind the index's back.
        let tx = store.delete_record(alice(), old).await.unwrap();
        store.wait_for_commit(&tx).await.unwrap();
        let new = store.insert_committed(alice(), RecordKind::File, "a", "v2", None);

        let record = resolver
            .resolve(alice(), "a", OwnerScope::Owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.index, new);
        assert_eq!(slots.read().get(alice(), "a"), Some(new));
        assert!(slots.read().is_consistent());
    }

    #[tokio::test]
    async fn test_undecodable_names_skipped() {
        let store = store();
        store.insert_committed(alice(), RecordKind::File, vec![0xff, 0xfe], "", None);
        let idx = store.insert_committed(alice(), RecordKind::File, "ok", "", None);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);
        let record = resolver.resolve(alice(), "ok", OwnerScope::Owner).await.unwrap();
        assert_eq!(record.map(|r| r.index), Some(idx));
    }

    #[tokio::test]
    async fn test_discover_created() {
        let store = store();
        store.insert_committed(alice(), RecordKind::File, "x", "", None);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);

        let before = resolver.live_indices().await.unwrap();
        let tx = store.create_record(alice(), "new.txt", b"n", 0).await.unwrap();
        store.wait_for_commit(&tx).await.unwrap();
        let record = resolver
            .discover_created(&before, alice(), "new.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.index, RecordIndex(1));
        assert_eq!(slots.read().get(alice(), "new.txt"), Some(RecordIndex(1)));
    }

    #[tokio::test]
    async fn test_remote_failure_propagates() {
        let store = store();
        store.set_unavailable(true);
        let slots = RwLock::new(SlotIndex::new());
        let resolver = SlotResolver::new(&store, &slots);
        let err = resolver.resolve(alice(), "a", OwnerScope::Owner).await.unwrap_err();
        assert_eq!(err.code(), ethfs_types::RemoteCode::UNAVAILABLE);
    }
}
