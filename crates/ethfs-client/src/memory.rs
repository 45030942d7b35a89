//! In-memory ledger backend.
//!
//! A [`MemoryStore`] behaves like a deployed store contract: mutations are
//! queued as pending transactions and applied when their commit is awaited,
//! indices are assigned by the store in creation order, deletes leave
//! tombstones, and only a record's owner may change it. Tests use the call
//! counters and fault switches to observe which remote calls were issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethfs_types::{Address, ChainId, RecordIndex, TxId};
use parking_lot::{Mutex, RwLock};

use crate::error::{ClientError, ClientResult};
use crate::record::{replace_tail, splice, Record, RecordKind};
use crate::store::{CommitStatus, RecordStore, StoreConnector, TxHandle};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Counters of the calls a store has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `list_live_indices` calls.
    pub scans: u64,
    /// `get_record` and `read_record` calls.
    pub reads: u64,
    /// Submitted creates, updates and writes.
    pub writes: u64,
    /// Submitted deletes.
    pub deletes: u64,
}

enum PendingOp {
    Create {
        owner: Address,
        kind: RecordKind,
        name: Vec<u8>,
        body: Vec<u8>,
        redirect_target: Option<Address>,
    },
    Update {
        index: RecordIndex,
        body: Vec<u8>,
        offset: u64,
    },
    Write {
        index: RecordIndex,
        offset: u64,
        body: Vec<u8>,
    },
    Delete {
        index: RecordIndex,
    },
}

struct StoreState {
    records: Vec<Record>,
    pending: HashMap<TxId, PendingOp>,
    next_tx: u64,
    clock: u64,
}

impl StoreState {
    fn tick(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn live(&self, index: RecordIndex) -> Option<&Record> {
        self.records.get(*index as usize).filter(|r| r.exists)
    }

    fn push(
        &mut self,
        owner: Address,
        kind: RecordKind,
        name: Vec<u8>,
        body: Vec<u8>,
        redirect_target: Option<Address>,
    ) -> RecordIndex {
        let index = RecordIndex(self.records.len() as u64);
        let timestamp = self.tick();
        self.records.push(Record {
            index,
            kind,
            owner,
            name,
            size: body.len() as u64,
            body,
            timestamp,
            exists: true,
            redirect_target,
        });
        index
    }

    fn apply(&mut self, op: PendingOp) -> CommitStatus {
        match op {
            PendingOp::Create {
                owner,
                kind,
                name,
                body,
                redirect_target,
            } => {
                self.push(owner, kind, name, body, redirect_target);
                CommitStatus::Committed
            }
            PendingOp::Update {
                index,
                body,
                offset,
            } => self.modify(index, |r| replace_tail(&mut r.body, offset, &body)),
            PendingOp::Write {
                index,
                offset,
                body,
            } => self.modify(index, |r| splice(&mut r.body, offset, &body)),
            PendingOp::Delete { index } => self.modify(index, |r| r.exists = false),
        }
    }

    fn modify(&mut self, index: RecordIndex, f: impl FnOnce(&mut Record)) -> CommitStatus {
        if self.live(index).is_none() {
            return CommitStatus::Failed(format!("record {} no longer exists", index));
        }
        let timestamp = self.tick();
        let record = &mut self.records[*index as usize];
        f(record);
        record.size = record.body.len() as u64;
        record.timestamp = timestamp;
        CommitStatus::Committed
    }
}

/// One in-memory store.
pub struct MemoryStore {
    chain: ChainId,
    address: Address,
    state: Mutex<StoreState>,
    offset_write: AtomicBool,
    unavailable: AtomicBool,
    reject_next_write: AtomicBool,
    fail_next_commit: AtomicBool,
    scans: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryStore {
    pub fn new(chain: ChainId, address: Address) -> Self {
        Self {
            chain,
            address,
            state: Mutex::new(StoreState {
                records: Vec::new(),
                pending: HashMap::new(),
                next_tx: 1,
                clock: 0,
            }),
            offset_write: AtomicBool::new(true),
            unavailable: AtomicBool::new(false),
            reject_next_write: AtomicBool::new(false),
            fail_next_commit: AtomicBool::new(false),
            scans: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Insert an already committed record, bypassing transactions and owner
    /// checks. Used to seed stores and to simulate writes by other actors.
    pub fn insert_committed(
        &self,
        owner: Address,
        kind: RecordKind,
        name: impl Into<Vec<u8>>,
        body: impl Into<Vec<u8>>,
        redirect_target: Option<Address>,
    ) -> RecordIndex {
        self.state
            .lock()
            .push(owner, kind, name.into(), body.into(), redirect_target)
    }

    /// Number of records ever created, tombstones included.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of submitted transactions not yet awaited.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            scans: self.scans.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Refuse the next submitted mutation with `Rejected`.
    pub fn reject_next_write(&self) {
        self.reject_next_write.store(true, Ordering::SeqCst);
    }

    /// Report the next awaited transaction as failed.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Toggle support for in-place `write_record`.
    pub fn set_offset_write(&self, enabled: bool) {
        self.offset_write.store(enabled, Ordering::SeqCst);
    }

    fn check_available(&self) -> ClientResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable(format!(
                "store {} on chain {} is unreachable",
                self.address, self.chain
            )));
        }
        Ok(())
    }

    fn submit(&self, sender: Address, op: PendingOp) -> ClientResult<TxHandle> {
        self.check_available()?;
        match op {
            PendingOp::Delete { .. } => self.deletes.fetch_add(1, Ordering::Relaxed),
            _ => self.writes.fetch_add(1, Ordering::Relaxed),
        };
        if self.reject_next_write.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Rejected("transaction reverted".into()));
        }

        let mut state = self.state.lock();
        match &op {
            PendingOp::Update { index, .. }
            | PendingOp::Write { index, .. }
            | PendingOp::Delete { index } => {
                let index = *index;
                let record = state.live(index).ok_or(ClientError::RecordNotFound(index))?;
                if record.owner != sender {
                    return Err(ClientError::Rejected(format!(
                        "{} is not the owner of record {}",
                        sender, index
                    )));
                }
            }
            PendingOp::Create { .. } => {}
        }
        let id = TxId(state.next_tx);
        state.next_tx += 1;
        state.pending.insert(id, op);
        Ok(TxHandle {
            store: self.address,
            id,
        })
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn address(&self) -> Address {
        self.address
    }

    async fn create_record(
        &self,
        sender: Address,
        name: &str,
        body: &[u8],
        offset: u64,
    ) -> ClientResult<TxHandle> {
        let mut placed = Vec::new();
        splice(&mut placed, offset, body);
        self.submit(
            sender,
            PendingOp::Create {
                owner: sender,
                kind: RecordKind::File,
                name: name.as_bytes().to_vec(),
                body: placed,
                redirect_target: None,
            },
        )
    }

    async fn create_directory(
        &self,
        sender: Address,
        name: &str,
        redirect_target: Option<Address>,
    ) -> ClientResult<TxHandle> {
        self.submit(
            sender,
            PendingOp::Create {
                owner: sender,
                kind: RecordKind::Directory,
                name: name.as_bytes().to_vec(),
                body: Vec::new(),
                redirect_target,
            },
        )
    }

    async fn update_record(
        &self,
        sender: Address,
        index: RecordIndex,
        body: &[u8],
        offset: u64,
    ) -> ClientResult<TxHandle> {
        self.submit(
            sender,
            PendingOp::Update {
                index,
                body: body.to_vec(),
                offset,
            },
        )
    }

    async fn delete_record(&self, sender: Address, index: RecordIndex) -> ClientResult<TxHandle> {
        self.submit(sender, PendingOp::Delete { index })
    }

    async fn write_record(
        &self,
        sender: Address,
        index: RecordIndex,
        offset: u64,
        body: &[u8],
    ) -> ClientResult<TxHandle> {
        if !self.supports_offset_write() {
            return Err(ClientError::Rejected("write_record is not supported".into()));
        }
        self.submit(
            sender,
            PendingOp::Write {
                index,
                offset,
                body: body.to_vec(),
            },
        )
    }

    async fn read_record(
        &self,
        index: RecordIndex,
        offset: u64,
        length: u64,
    ) -> ClientResult<Vec<u8>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock();
        let record = state.live(index).ok_or(ClientError::RecordNotFound(index))?;
        let len = record.body.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        Ok(record.body[start..end].to_vec())
    }

    async fn get_record(&self, index: RecordIndex) -> ClientResult<Record> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .records
            .get(*index as usize)
            .cloned()
            .ok_or(ClientError::RecordNotFound(index))
    }

    async fn list_live_indices(&self) -> ClientResult<Vec<RecordIndex>> {
        self.check_available()?;
        self.scans.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| r.exists)
            .map(|r| r.index)
            .collect())
    }

    async fn wait_for_commit(&self, tx: &TxHandle) -> ClientResult<CommitStatus> {
        self.check_available()?;
        if tx.store != self.address {
            return Err(ClientError::Internal(format!(
                "transaction {} belongs to store {}, not {}",
                tx.id, tx.store, self.address
            )));
        }
        let mut state = self.state.lock();
        let op = match state.pending.remove(&tx.id) {
            Some(op) => op,
            None => return Ok(CommitStatus::Failed(format!("unknown transaction {}", tx.id))),
        };
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Ok(CommitStatus::Failed("transaction reverted".into()));
        }
        Ok(state.apply(op))
    }

    fn supports_offset_write(&self) -> bool {
        self.offset_write.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A set of in-memory stores keyed by `(chain, address)`.
///
/// Connecting to an address nobody deployed fails with `Unavailable`, the
/// way a call to an empty account would.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    stores: Arc<RwLock<HashMap<(ChainId, Address), Arc<MemoryStore>>>>,
    next_address: Arc<AtomicU64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a new store at a fresh address.
    pub fn deploy(&self, chain: ChainId) -> Arc<MemoryStore> {
        let n = self.next_address.fetch_add(1, Ordering::Relaxed);
        self.deploy_at(chain, Address::from_low_u64(0x5700 + n))
    }

    /// Deploy a store at `address`, or return the one already there.
    pub fn deploy_at(&self, chain: ChainId, address: Address) -> Arc<MemoryStore> {
        self.stores
            .write()
            .entry((chain, address))
            .or_insert_with(|| Arc::new(MemoryStore::new(chain, address)))
            .clone()
    }

    pub fn store(&self, chain: ChainId, address: Address) -> Option<Arc<MemoryStore>> {
        self.stores.read().get(&(chain, address)).cloned()
    }
}

#[async_trait]
impl StoreConnector for MemoryLedger {
    async fn connect(&self, chain: ChainId, address: Address) -> ClientResult<Arc<dyn RecordStore>> {
        match self.store(chain, address) {
            Some(store) => Ok(store),
            None => Err(ClientError::Unavailable(format!(
                "no store deployed at {} on chain {}",
                address, chain
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::from_low_u64(0xa11ce)
    }

    fn bob() -> Address {
        Address::from_low_u64(0xb0b)
    }

    async fn commit(store: &MemoryStore, tx: TxHandle) {
        assert_eq!(store.wait_for_commit(&tx).await.unwrap(), CommitStatus::Committed);
    }

    #[tokio::test]
    async fn test_mutation_pending_until_commit() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        let tx = store.create_record(alice(), "a.txt", b"hi", 0).await.unwrap();
        assert!(store.list_live_indices().await.unwrap().is_empty());
        assert_eq!(store.pending(), 1);

        commit(&store, tx).await;
        assert_eq!(store.list_live_indices().await.unwrap(), vec![RecordIndex(0)]);
        let r = store.get_record(RecordIndex(0)).await.unwrap();
        assert_eq!(r.owner, alice());
        assert_eq!(r.path().unwrap(), "a.txt");
        assert_eq!(r.body, b"hi");
        assert_eq!(r.size, 2);
        assert!(r.is_file());
    }

    #[tokio::test]
    async fn test_create_at_offset_zero_fills() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        let tx = store.create_record(alice(), "f", b"xy", 3).await.unwrap();
        commit(&store, tx).await;
        assert_eq!(store.get_record(RecordIndex(0)).await.unwrap().body, b"\0\0\0xy");
    }

    #[tokio::test]
    async fn test_update_write_and_read() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        let idx = store.insert_committed(alice(), RecordKind::File, "f", "hello world", None);

        let tx = store.write_record(alice(), idx, 6, b"there").await.unwrap();
        commit(&store, tx).await;
        assert_eq!(store.read_record(idx, 0, 100).await.unwrap(), b"hello there");
        assert_eq!(store.read_record(idx, 6, 3).await.unwrap(), b"the");
        assert!(store.read_record(idx, 50, 3).await.unwrap().is_empty());

        let tx = store.update_record(alice(), idx, b"!", 5).await.unwrap();
        commit(&store, tx).await;
        let r = store.get_record(idx).await.unwrap();
        assert_eq!(r.body, b"hello!");
        assert_eq!(r.size, 6);
    }

    #[tokio::test]
    async fn test_non_owner_rejected() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        let idx = store.insert_committed(alice(), RecordKind::File, "f", "x", None);
        let err = store.delete_record(bob(), idx).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
        let err = store.write_record(bob(), idx, 0, b"y").await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
        assert!(store.get_record(idx).await.unwrap().exists);
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        let a = store.insert_committed(alice(), RecordKind::File, "a", "", None);
        let b = store.insert_committed(alice(), RecordKind::File, "b", "", None);
        let tx = store.delete_record(alice(), a).await.unwrap();
        commit(&store, tx).await;

        assert_eq!(store.list_live_indices().await.unwrap(), vec![b]);
        assert!(!store.get_record(a).await.unwrap().exists);
        assert!(matches!(
            store.read_record(a, 0, 1).await,
            Err(ClientError::RecordNotFound(_))
        ));
        // Indices are never reused.
        let c = store.insert_committed(alice(), RecordKind::File, "c", "", None);
        assert_eq!(c, RecordIndex(2));
    }

    #[tokio::test]
    async fn test_fault_injection_and_stats() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        store.reject_next_write();
        assert!(matches!(
            store.create_record(alice(), "a", b"", 0).await,
            Err(ClientError::Rejected(_))
        ));
        let tx = store.create_record(alice(), "a", b"", 0).await.unwrap();
        store.fail_next_commit();
        assert!(matches!(
            store.wait_for_commit(&tx).await.unwrap(),
            CommitStatus::Failed(_)
        ));

        store.set_unavailable(true);
        assert!(matches!(
            store.list_live_indices().await,
            Err(ClientError::Unavailable(_))
        ));
        store.set_unavailable(false);
        store.list_live_indices().await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.deletes, 0);
        assert_eq!(stats.scans, 1);
    }

    #[tokio::test]
    async fn test_timestamps_increase() {
        let store = MemoryStore::new(ChainId(1337), Address::from_low_u64(1));
        let a = store.insert_committed(alice(), RecordKind::File, "a", "", None);
        let b = store.insert_committed(alice(), RecordKind::File, "b", "", None);
        let ta = store.get_record(a).await.unwrap().timestamp;
        let tb = store.get_record(b).await.unwrap().timestamp;
        assert!(tb > ta);
    }

    #[tokio::test]
    async fn test_ledger_connect() {
        let ledger = MemoryLedger::new();
        let s1 = ledger.deploy(ChainId(1));
        let s2 = ledger.deploy(ChainId(1));
        assert_ne!(s1.address(), s2.address());

        let handle = ledger.connect(ChainId(1), s2.address()).await.unwrap();
        assert_eq!(handle.address(), s2.address());

        // Same address on another chain is a different (undeployed) store.
        assert!(ledger.connect(ChainId(2), s2.address()).await.is_err());
        assert!(ledger
            .connect(ChainId(1), Address::from_low_u64(0xdead))
            .await
            .is_err());
    }
}
