//! The namespace facade consumed by the filesystem callback layer.
//!
//! Reads are answered from the snapshot (listings, attributes) or from the
//! store through the slot index (file contents). When several owners hold
//! the same path, a foreign reader sees the record the snapshot picks, for
//! attributes and contents alike.
//!
//! Every mutation runs under the write locks of the stores it touches as
//! resolve store -> resolve or allocate index -> remote write -> commit wait
//! -> slot index update -> snapshot rebuild, so a caller observes its own
//! write as soon as the call returns. Existence and emptiness checks read
//! the snapshot published under those locks. A failed remote call leaves
//! both caches untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethfs_client::record::splice;
use ethfs_client::{ClientError, CommitStatus, RecordKind, TxHandle};
use ethfs_types::{make_error_msg, Address, ChainId, NamespaceCode, RecordIndex, Result, StatusCode};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::config::NamespaceConfig;
use crate::path;
use crate::registry::{StoreHandle, StoreKey, StoreRegistry};
use crate::resolver::{Resolved, StoreResolver};
use crate::snapshot::{EntryInfo, Snapshot, SnapshotCache};
use crate::OwnerScope;

/// Attributes of a namespace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: RecordKind,
    pub size: u64,
    pub timestamp: u64,
    pub owner: Address,
    /// `None` for directories that exist only through their descendants.
    pub index: Option<RecordIndex>,
    pub store: StoreKey,
    pub redirect: Option<Address>,
}

impl Attributes {
    pub fn is_dir(&self) -> bool {
        self.kind == RecordKind::Directory
    }

    pub fn is_implicit(&self) -> bool {
        self.index.is_none()
    }
}

impl From<&EntryInfo> for Attributes {
    fn from(e: &EntryInfo) -> Self {
        Self {
            kind: e.kind,
            size: e.size,
            timestamp: e.timestamp,
            owner: e.owner,
            index: Some(e.index),
            store: e.store,
            redirect: e.redirect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: RecordKind,
}

pub struct Namespace {
    registry: Arc<StoreRegistry>,
    cache: SnapshotCache,
    max_redirect_depth: usize,
    max_file_size: AtomicU64,
    signer: Option<Address>,
}

/// Write locks held for one mutation, with the snapshot and resolution
/// taken while holding them.
struct Locked {
    snapshot: Arc<Snapshot>,
    target: Resolved,
    /// Store and prefix of the entries below the target.
    children: Resolved,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Namespace {
    /// `signer`, when set, sends every transaction; mutations are then only
    /// allowed below the signer's own owner directory.
    pub fn new(registry: Arc<StoreRegistry>, config: &NamespaceConfig, signer: Option<Address>) -> Self {
        Self {
            registry,
            cache: SnapshotCache::new(config.snapshot_ttl()),
            max_redirect_depth: config.max_redirect_depth,
            max_file_size: AtomicU64::new(config.max_file_size),
            signer,
        }
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn signer(&self) -> Option<Address> {
        self.signer
    }

    /// Apply the hot-updatable part of `config`.
    pub fn apply_config(&self, config: &NamespaceConfig) {
        self.cache.set_ttl(config.snapshot_ttl());
        self.max_file_size.store(config.max_file_size, Ordering::Relaxed);
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Chains with a bound store.
    pub fn chains(&self) -> Vec<ChainId> {
        self.registry.chains()
    }

    /// Owners with at least one record on `chain`.
    pub async fn owners(&self, chain: ChainId) -> Result<Vec<Address>> {
        self.registry.default_store(chain)?;
        let snapshot = self.cache.current(&self.registry).await?;
        Ok(snapshot.owners(chain))
    }

    pub async fn attributes(&self, chain: ChainId, owner: Address, path: &str) -> Result<Attributes> {
        check_entry_path(path)?;
        let snapshot = self.cache.current(&self.registry).await?;
        match self.stat(&snapshot, chain, owner, path, OwnerScope::Any).await? {
            Some(attrs) => Ok(attrs),
            None => not_found(chain, owner, path),
        }
    }

    /// Immediate children of `dir`; `""` lists the owner's top level.
    pub async fn list_children(&self, chain: ChainId, owner: Address, dir: &str) -> Result<Vec<DirEntry>> {
        let snapshot = self.cache.current(&self.registry).await?;
        let scope = if dir.is_empty() {
            OwnerScope::Owner
        } else {
            match self.stat(&snapshot, chain, owner, dir, OwnerScope::Any).await? {
                Some(attrs) if attrs.is_dir() => {}
                Some(_) => return make_error_msg(NamespaceCode::NOT_DIRECTORY, dir.to_string()),
                None => return not_found(chain, owner, dir),
            }
            OwnerScope::Any
        };
        let resolved = self
            .resolver(&snapshot)
            .resolve_children_store(chain, owner, dir, scope)
            .await?;
        Ok(snapshot
            .children(resolved.store.key(), owner, &resolved.path, scope)
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    /// Up to `length` bytes of the file at `path` from `offset`, clamped to
    /// the file size.
    pub async fn read(
        &self,
        chain: ChainId,
        owner: Address,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        check_entry_path(path)?;
        let snapshot = self.cache.current(&self.registry).await?;
        let resolved = self
            .resolver(&snapshot)
            .resolve_store(chain, owner, path, OwnerScope::Any)
            .await?;
        let store = &resolved.store;
        let record_owner = snapshot
            .lookup(store.key(), owner, &resolved.path, OwnerScope::Any)
            .map_or(owner, |entry| entry.owner);
        let record = match store
            .slots()
            .resolve(record_owner, &resolved.path, OwnerScope::Owner)
            .await?
        {
            Some(record) => record,
            None => {
                return match self.stat(&snapshot, chain, owner, path, OwnerScope::Any).await? {
                    Some(attrs) if attrs.is_dir() => {
                        make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string())
                    }
                    _ => not_found(chain, owner, path),
                };
            }
        };
        if record.is_dir() {
            return make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string());
        }
        if offset >= record.size || length == 0 {
            return Ok(Vec::new());
        }
        let length = length.min(record.size - offset);
        debug!(%chain, %owner, path, offset, length, index = %record.index, "read");

        match store.client().read_record(record.index, offset, length).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!(
                    store = %store.key(),
                    index = %record.index,
                    error = %e,
                    "ranged read failed, using record body"
                );
                let start = (offset as usize).min(record.body.len());
                let end = ((offset + length) as usize).min(record.body.len());
                Ok(record.body[start..end].to_vec())
            }
        }
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Write `data` at `offset`, creating the file if it does not exist.
    /// Returns the number of bytes written.
    pub async fn write(
        &self,
        chain: ChainId,
        owner: Address,
        path: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<u64> {
        check_entry_path(path)?;
        let sender = self.sender_for(owner)?;
        self.check_size(path, offset.saturating_add(data.len() as u64))?;
        let locked = self.lock_for_mutation(chain, owner, path).await?;
        let snapshot = &locked.snapshot;
        let store = &locked.target.store;
        let rel = locked.target.path.as_str();
        let slots = store.slots();
        debug!(%chain, %owner, path, store = %store.key(), offset, len = data.len(), "write");

        match slots.resolve(owner, rel, OwnerScope::Owner).await? {
            Some(record) if record.is_dir() => {
                return make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string());
            }
            Some(record) => {
                let client = store.client();
                let tx = if client.supports_offset_write() {
                    client.write_record(sender, record.index, offset, data).await?
                } else {
                    let mut body = record.body;
                    splice(&mut body, offset, data);
                    client.update_record(sender, record.index, &body, 0).await?
                };
                commit(store, tx).await?;
            }
            None => {
                if let Some(attrs) = self.stat(snapshot, chain, owner, path, OwnerScope::Owner).await? {
                    if attrs.is_dir() {
                        return make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string());
                    }
                }
                self.check_parent(snapshot, chain, owner, path).await?;
                let before = slots.live_indices().await?;
                let tx = store.client().create_record(sender, rel, data, offset).await?;
                commit(store, tx).await?;
                slots.discover_created(&before, owner, rel).await?;
            }
        }
        self.refresh_after_mutation().await;
        Ok(data.len() as u64)
    }

    pub async fn create_file(&self, chain: ChainId, owner: Address, path: &str) -> Result<()> {
        self.create(chain, owner, path, RecordKind::File, None).await
    }

    /// Create a directory. With `redirect` set, everything below it is
    /// stored in that store.
    pub async fn create_directory(
        &self,
        chain: ChainId,
        owner: Address,
        path: &str,
        redirect: Option<Address>,
    ) -> Result<()> {
        self.create(chain, owner, path, RecordKind::Directory, redirect).await
    }

    pub async fn remove_file(&self, chain: ChainId, owner: Address, path: &str) -> Result<()> {
        check_entry_path(path)?;
        let sender = self.sender_for(owner)?;
        let locked = self.lock_for_mutation(chain, owner, path).await?;
        let resolved = &locked.target;
        let store = &resolved.store;
        let slots = store.slots();

        let record = match slots.resolve(owner, &resolved.path, OwnerScope::Owner).await? {
            Some(record) => record,
            None => return self.missing_or_dir(&locked.snapshot, chain, owner, path).await,
        };
        if record.is_dir() {
            return make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string());
        }
        debug!(%chain, %owner, path, index = %record.index, "remove file");
        let tx = store.client().delete_record(sender, record.index).await?;
        commit(store, tx).await?;
        slots.forget(owner, &resolved.path);
        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Remove an empty directory. A directory with entries below it, of any
    /// owner, is refused before any remote call; these are the entries its
    /// listing shows.
    pub async fn remove_directory(&self, chain: ChainId, owner: Address, path: &str) -> Result<()> {
        check_entry_path(path)?;
        let sender = self.sender_for(owner)?;
        let locked = self.lock_for_mutation(chain, owner, path).await?;
        let snapshot = &locked.snapshot;
        match self.stat(snapshot, chain, owner, path, OwnerScope::Owner).await? {
            Some(attrs) if attrs.is_dir() => {}
            Some(_) => return make_error_msg(NamespaceCode::NOT_DIRECTORY, path.to_string()),
            None => return not_found(chain, owner, path),
        }
        let children = &locked.children;
        if snapshot.has_descendants(children.store.key(), None, &children.path) {
            return make_error_msg(NamespaceCode::NOT_EMPTY, path.to_string());
        }

        let resolved = &locked.target;
        let store = &resolved.store;
        let slots = store.slots();
        let record = match slots.resolve(owner, &resolved.path, OwnerScope::Owner).await? {
            Some(record) if record.is_dir() => record,
            Some(_) => return make_error_msg(NamespaceCode::NOT_DIRECTORY, path.to_string()),
            None => return not_found(chain, owner, path),
        };
        debug!(%chain, %owner, path, index = %record.index, "remove directory");
        let tx = store.client().delete_record(sender, record.index).await?;
        commit(store, tx).await?;
        slots.forget(owner, &resolved.path);
        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Cut or zero-extend the file at `path` to `length` bytes.
    pub async fn truncate(&self, chain: ChainId, owner: Address, path: &str, length: u64) -> Result<()> {
        check_entry_path(path)?;
        let sender = self.sender_for(owner)?;
        self.check_size(path, length)?;
        let locked = self.lock_for_mutation(chain, owner, path).await?;
        let resolved = &locked.target;
        let store = &resolved.store;

        let record = match store.slots().resolve(owner, &resolved.path, OwnerScope::Owner).await? {
            Some(record) => record,
            None => return self.missing_or_dir(&locked.snapshot, chain, owner, path).await,
        };
        if record.is_dir() {
            return make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string());
        }
        if record.size == length {
            return Ok(());
        }
        debug!(%chain, %owner, path, from = record.size, to = length, "truncate");
        let tx = store
            .client()
            .update_record(sender, record.index, &[], length)
            .await?;
        commit(store, tx).await?;
        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Renames have no remote equivalent.
    pub async fn rename(&self, _chain: ChainId, _owner: Address, from: &str, to: &str) -> Result<()> {
        make_error_msg(
            StatusCode::NOT_IMPLEMENTED,
            format!("rename {} -> {} is not supported", from, to),
        )
    }

    pub async fn symlink(&self, _chain: ChainId, _owner: Address, path: &str, _target: &str) -> Result<()> {
        make_error_msg(
            StatusCode::NOT_IMPLEMENTED,
            format!("symlink {} is not supported", path),
        )
    }

    /// Rebuild the snapshot from the stores now.
    pub async fn refresh(&self) -> Result<()> {
        self.cache.refresh(&self.registry).await?;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn resolver<'a>(&'a self, snapshot: &'a Snapshot) -> StoreResolver<'a> {
        StoreResolver::new(&self.registry, snapshot, self.max_redirect_depth)
    }

    /// Lock the store governing `path` and the store holding its children,
    /// in key order, then resolve both again with the snapshot current under
    /// the locks. If a mutation that held a lock meanwhile moved `path` to
    /// other stores, the locks are released and taken again.
    async fn lock_for_mutation(&self, chain: ChainId, owner: Address, path: &str) -> Result<Locked> {
        let snapshot = self.cache.current(&self.registry).await?;
        let (mut target, mut children) = self.resolve_for_mutation(&snapshot, chain, owner, path).await?;
        loop {
            let stores = lock_order(&target, &children);
            let mut guards = Vec::with_capacity(stores.len());
            for store in &stores {
                guards.push(store.lock_for_write().await);
            }
            let snapshot = self.cache.current(&self.registry).await?;
            let (now_target, now_children) =
                self.resolve_for_mutation(&snapshot, chain, owner, path).await?;
            let unchanged = lock_order(&now_target, &now_children)
                .iter()
                .map(|s| s.key())
                .eq(stores.iter().map(|s| s.key()));
            if unchanged {
                return Ok(Locked {
                    snapshot,
                    target: now_target,
                    children: now_children,
                    _guards: guards,
                });
            }
            debug!(%chain, %owner, path, "governing store changed while locking, retrying");
            target = now_target;
            children = now_children;
        }
    }

    async fn resolve_for_mutation(
        &self,
        snapshot: &Snapshot,
        chain: ChainId,
        owner: Address,
        path: &str,
    ) -> Result<(Resolved, Resolved)> {
        let resolver = self.resolver(snapshot);
        let target = resolver
            .resolve_store(chain, owner, path, OwnerScope::Owner)
            .await?;
        let children = resolver
            .resolve_children_store(chain, owner, path, OwnerScope::Owner)
            .await?;
        Ok((target, children))
    }

    fn check_size(&self, path: &str, size: u64) -> Result<()> {
        let max = self.max_file_size.load(Ordering::Relaxed);
        if size > max {
            return make_error_msg(
                NamespaceCode::FILE_TOO_LARGE,
                format!("{} would grow to {} bytes, limit is {}", path, size, max),
            );
        }
        Ok(())
    }

    /// Attributes of `path` from the snapshot, explicit record first.
    async fn stat(
        &self,
        snapshot: &Snapshot,
        chain: ChainId,
        owner: Address,
        path: &str,
        scope: OwnerScope,
    ) -> Result<Option<Attributes>> {
        let resolved = self
            .resolver(snapshot)
            .resolve_store(chain, owner, path, scope)
            .await?;
        let key = resolved.store.key();
        if let Some(entry) = snapshot.lookup(key, owner, &resolved.path, scope) {
            return Ok(Some(entry.into()));
        }
        Ok(snapshot
            .implicit_dir(key, owner, &resolved.path, scope)
            .map(|(owner, timestamp)| Attributes {
                kind: RecordKind::Directory,
                size: 0,
                timestamp,
                owner,
                index: None,
                store: key,
                redirect: None,
            }))
    }

    async fn create(
        &self,
        chain: ChainId,
        owner: Address,
        path: &str,
        kind: RecordKind,
        redirect: Option<Address>,
    ) -> Result<()> {
        check_entry_path(path)?;
        let sender = self.sender_for(owner)?;
        let locked = self.lock_for_mutation(chain, owner, path).await?;
        let snapshot = &locked.snapshot;
        let store = &locked.target.store;
        let rel = locked.target.path.as_str();
        let slots = store.slots();

        if slots.resolve(owner, rel, OwnerScope::Owner).await?.is_some()
            || self
                .stat(snapshot, chain, owner, path, OwnerScope::Owner)
                .await?
                .is_some()
        {
            return make_error_msg(NamespaceCode::EXISTS, path.to_string());
        }
        self.check_parent(snapshot, chain, owner, path).await?;
        debug!(%chain, %owner, path, store = %store.key(), ?kind, ?redirect, "create");

        let before = slots.live_indices().await?;
        let tx = match kind {
            RecordKind::Directory => {
                let redirect = redirect.filter(|a| !a.is_zero());
                store.client().create_directory(sender, rel, redirect).await?
            }
            _ => store.client().create_record(sender, rel, &[], 0).await?,
        };
        commit(store, tx).await?;
        slots.discover_created(&before, owner, rel).await?;
        self.refresh_after_mutation().await;
        Ok(())
    }

    /// The parent of a new entry must be an existing directory, explicit or
    /// implicit. The owner root always exists.
    async fn check_parent(
        &self,
        snapshot: &Snapshot,
        chain: ChainId,
        owner: Address,
        path: &str,
    ) -> Result<()> {
        let parent = path::parent(path);
        if parent.is_empty() {
            return Ok(());
        }
        match self.stat(snapshot, chain, owner, parent, OwnerScope::Owner).await? {
            Some(attrs) if attrs.is_dir() => Ok(()),
            Some(_) => make_error_msg(NamespaceCode::NOT_DIRECTORY, parent.to_string()),
            None => not_found(chain, owner, parent),
        }
    }

    async fn missing_or_dir(
        &self,
        snapshot: &Snapshot,
        chain: ChainId,
        owner: Address,
        path: &str,
    ) -> Result<()> {
        match self.stat(snapshot, chain, owner, path, OwnerScope::Owner).await? {
            Some(attrs) if attrs.is_dir() => {
                make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string())
            }
            _ => not_found(chain, owner, path),
        }
    }

    fn sender_for(&self, owner: Address) -> Result<Address> {
        match self.signer {
            Some(signer) if signer != owner => make_error_msg(
                NamespaceCode::NO_PERMISSION,
                format!("signer {} cannot modify entries of {}", signer, owner),
            ),
            Some(signer) => Ok(signer),
            None => Ok(owner),
        }
    }

    async fn refresh_after_mutation(&self) {
        if let Err(e) = self.cache.refresh(&self.registry).await {
            warn!(error = %e, "snapshot refresh after mutation failed, marked stale");
            self.cache.mark_stale();
        }
    }
}

fn lock_order(target: &Resolved, children: &Resolved) -> Vec<Arc<StoreHandle>> {
    let mut stores = vec![Arc::clone(&target.store), Arc::clone(&children.store)];
    stores.sort_by_key(|s| s.key());
    stores.dedup_by_key(|s| s.key());
    stores
}

async fn commit(store: &StoreHandle, tx: TxHandle) -> Result<()> {
    match store.client().wait_for_commit(&tx).await? {
        CommitStatus::Committed => Ok(()),
        CommitStatus::Failed(reason) => Err(ClientError::CommitFailed { tx: tx.id, reason }.into()),
    }
}

fn check_entry_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with(path::SEPARATOR) || path.ends_with(path::SEPARATOR) {
        return make_error_msg(StatusCode::INVALID_ARG, format!("bad entry path {:?}", path));
    }
    Ok(())
}

fn not_found<T>(chain: ChainId, owner: Address, path: &str) -> Result<T> {
    make_error_msg(
        NamespaceCode::NOT_FOUND,
        format!("/{}/{}/{}", chain, owner, path),
    )
}
