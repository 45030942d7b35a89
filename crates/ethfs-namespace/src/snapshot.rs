//! Snapshot cache: a full materialization of every live record.
//!
//! A [`Snapshot`] is immutable once built. [`SnapshotCache`] publishes the
//! current one behind an `Arc` swap, so readers see either the previous or
//! the next snapshot and never a half-built one. Listings and attributes
//! are answered from here without remote calls.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ethfs_client::{Record, RecordKind};
use ethfs_types::{Address, ChainId, RecordIndex, Result};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::path;
use crate::registry::{StoreHandle, StoreKey, StoreRegistry};
use crate::OwnerScope;

/// One cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub store: StoreKey,
    pub index: RecordIndex,
    pub kind: RecordKind,
    pub owner: Address,
    pub path: String,
    pub size: u64,
    pub timestamp: u64,
    pub redirect: Option<Address>,
}

impl EntryInfo {
    fn from_record(store: StoreKey, path: String, record: &Record) -> Self {
        Self {
            store,
            index: record.index,
            kind: record.kind,
            owner: record.owner,
            path,
            size: record.size,
            timestamp: record.timestamp,
            redirect: record.redirect(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == RecordKind::Directory
    }
}

type EntryKey = (StoreKey, Address, String);

#[derive(Debug, Default)]
pub struct Snapshot {
    entries: BTreeMap<EntryKey, EntryInfo>,
    stores: BTreeSet<StoreKey>,
    built_at: Option<Instant>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan every registered store, plus every store reachable through a
    /// directory redirect, into a new snapshot.
    pub async fn build(registry: &StoreRegistry) -> Result<Snapshot> {
        let mut snapshot = Snapshot::empty();
        let mut worklist = registry.handles();
        let mut seen: HashSet<StoreKey> = worklist.iter().map(|h| h.key()).collect();

        while let Some(handle) = worklist.pop() {
            let key = handle.key();
            for entry in scan_store(&handle).await? {
                if let Some(target) = entry.redirect {
                    let target_key = StoreKey::new(key.chain, target);
                    if seen.insert(target_key) {
                        match registry.get_or_connect(key.chain, target).await {
                            Ok(h) => worklist.push(h),
                            Err(e) => warn!(
                                store = %target_key,
                                dir = %entry.path,
                                error = %e,
                                "redirect target unreachable, not listed"
                            ),
                        }
                    }
                }
                snapshot
                    .entries
                    .insert((key, entry.owner, entry.path.clone()), entry);
            }
            snapshot.stores.insert(key);
        }
        snapshot.built_at = Some(Instant::now());
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn built_at(&self) -> Option<Instant> {
        self.built_at
    }

    /// Stores that were scanned into this snapshot.
    pub fn stores(&self) -> impl Iterator<Item = &StoreKey> {
        self.stores.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntryInfo> {
        self.entries.values()
    }

    /// Whether both snapshots hold the same records.
    pub fn same_entries(&self, other: &Snapshot) -> bool {
        self.entries == other.entries
    }

    /// The record named `path`. With `OwnerScope::Any` a miss on `owner`
    /// falls back to the record of that name with the lowest owner address.
    pub fn lookup(
        &self,
        store: StoreKey,
        owner: Address,
        path: &str,
        scope: OwnerScope,
    ) -> Option<&EntryInfo> {
        if let Some(entry) = self.entries.get(&(store, owner, path.to_string())) {
            return Some(entry);
        }
        match scope {
            OwnerScope::Owner => None,
            OwnerScope::Any => self.store_entries(store).find(|e| e.path == path),
        }
    }

    /// Whether anything lies below `dir` in `store`, optionally only records
    /// of one owner. `dir == ""` asks whether the store holds anything.
    pub fn has_descendants(&self, store: StoreKey, owner: Option<Address>, dir: &str) -> bool {
        self.descendants(store, owner, dir).next().is_some()
    }

    /// Owner and newest descendant timestamp of a directory that has no
    /// record of its own but has entries below it.
    pub fn implicit_dir(
        &self,
        store: StoreKey,
        owner: Address,
        dir: &str,
        scope: OwnerScope,
    ) -> Option<(Address, u64)> {
        if dir.is_empty() {
            return None;
        }
        let newest = |owner: Option<Address>| {
            self.descendants(store, owner, dir)
                .max_by_key(|e| e.timestamp)
                .map(|e| (e.owner, e.timestamp))
        };
        match scope {
            OwnerScope::Owner => newest(Some(owner)),
            OwnerScope::Any => newest(Some(owner)).or_else(|| newest(None)),
        }
    }

    /// Immediate children of `dir` as `(name, kind)`, sorted by name.
    ///
    /// Names only implied by deeper entries are reported as directories; an
    /// explicit record of the same name wins. With `OwnerScope::Any` and no
    /// children of `owner`, children of every owner are listed.
    pub fn children(
        &self,
        store: StoreKey,
        owner: Address,
        dir: &str,
        scope: OwnerScope,
    ) -> Vec<(String, RecordKind)> {
        let own = self.collect_children(store, Some(owner), dir);
        if !own.is_empty() || scope == OwnerScope::Owner {
            return own;
        }
        self.collect_children(store, None, dir)
    }

    /// Owners with at least one record in any store of `chain`.
    pub fn owners(&self, chain: ChainId) -> Vec<Address> {
        self.entries
            .keys()
            .filter(|(store, _, _)| store.chain == chain)
            .map(|(_, owner, _)| *owner)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn store_entries(&self, store: StoreKey) -> impl Iterator<Item = &EntryInfo> {
        self.entries
            .range((store, Address::ZERO, String::new())..)
            .take_while(move |((s, _, _), _)| *s == store)
            .map(|(_, e)| e)
    }

    fn descendants<'a>(
        &'a self,
        store: StoreKey,
        owner: Option<Address>,
        dir: &'a str,
    ) -> impl Iterator<Item = &'a EntryInfo> + 'a {
        self.store_entries(store)
            .filter(move |e| owner.map_or(true, |o| e.owner == o))
            .filter(move |e| path::is_under(&e.path, dir))
    }

    fn collect_children(
        &self,
        store: StoreKey,
        owner: Option<Address>,
        dir: &str,
    ) -> Vec<(String, RecordKind)> {
        let mut children: BTreeMap<String, RecordKind> = BTreeMap::new();
        for entry in self.descendants(store, owner, dir) {
            let Some(rel) = path::relative_to(&entry.path, dir) else {
                continue;
            };
            match rel.split_once(path::SEPARATOR) {
                None => {
                    children.insert(rel.to_string(), entry.kind);
                }
                Some((name, _)) => {
                    children
                        .entry(name.to_string())
                        .or_insert(RecordKind::Directory);
                }
            }
        }
        children.into_iter().collect()
    }
}

async fn scan_store(handle: &StoreHandle) -> Result<Vec<EntryInfo>> {
    let client = handle.client();
    let key = handle.key();
    let mut entries = Vec::new();
    for index in client.list_live_indices().await? {
        let record = client.get_record(index).await?;
        if !record.exists {
            continue;
        }
        match record.path() {
            Ok(path) => entries.push(EntryInfo::from_record(key, path.to_string(), &record)),
            Err(e) => warn!(store = %key, %index, error = %e, "skipping undecodable record"),
        }
    }
    debug!(store = %key, entries = entries.len(), "store scanned");
    Ok(entries)
}

/// Publishes the current [`Snapshot`] and rebuilds it on demand.
///
/// The cache starts stale. It becomes stale again when a rebuild after a
/// mutation fails, or when the snapshot outlives the configured TTL.
pub struct SnapshotCache {
    current: RwLock<Arc<Snapshot>>,
    stale: AtomicBool,
    ttl_secs: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SnapshotCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
            stale: AtomicBool::new(true),
            ttl_secs: AtomicU64::new(ttl.map_or(0, |t| t.as_secs())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The published snapshot, fresh or not.
    pub fn get(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read())
    }

    /// The published snapshot, rebuilt first if it is stale or expired.
    pub async fn current(&self, registry: &StoreRegistry) -> Result<Arc<Snapshot>> {
        if !self.needs_rebuild() {
            return Ok(self.get());
        }
        let _guard = self.refresh_lock.lock().await;
        if !self.needs_rebuild() {
            return Ok(self.get());
        }
        self.rebuild(registry).await
    }

    /// Rebuild unconditionally. On failure the previous snapshot stays
    /// published.
    pub async fn refresh(&self, registry: &StoreRegistry) -> Result<Arc<Snapshot>> {
        let _guard = self.refresh_lock.lock().await;
        self.rebuild(registry).await
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn set_ttl(&self, ttl: Option<Duration>) {
        self.ttl_secs.store(ttl.map_or(0, |t| t.as_secs()), Ordering::SeqCst);
    }

    pub fn ttl(&self) -> Option<Duration> {
        match self.ttl_secs.load(Ordering::SeqCst) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn needs_rebuild(&self) -> bool {
        if self.is_stale() {
            return true;
        }
        match (self.ttl(), self.get().built_at()) {
            (Some(ttl), Some(built_at)) => built_at.elapsed() >= ttl,
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }

    async fn rebuild(&self, registry: &StoreRegistry) -> Result<Arc<Snapshot>> {
        let start = Instant::now();
        let snapshot = Arc::new(Snapshot::build(registry).await?);
        *self.current.write() = Arc::clone(&snapshot);
        self.stale.store(false, Ordering::SeqCst);
        info!(
            entries = snapshot.len(),
            stores = snapshot.stores.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "snapshot refreshed"
        );
        Ok(snapshot)
    }
}
