//! The record-store trait consumed by the namespace layer.

use std::sync::Arc;

use async_trait::async_trait;
use ethfs_types::{Address, ChainId, RecordIndex, TxId};

use crate::error::ClientResult;
use crate::record::Record;

/// A submitted, not yet confirmed, mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle {
    pub store: Address,
    pub id: TxId,
}

/// Final outcome of a submitted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Committed,
    Failed(String),
}

/// One remote store instance.
///
/// Mutating calls only submit a transaction; its effect is visible once
/// [`RecordStore::wait_for_commit`] reports `Committed`. Every mutation
/// carries the sending identity, and the store refuses updates, deletes and
/// writes to records the sender does not own.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Address of this store.
    fn address(&self) -> Address;

    /// Create a file record named `name` whose body holds `body` at `offset`.
    async fn create_record(
        &self,
        sender: Address,
        name: &str,
        body: &[u8],
        offset: u64,
    ) -> ClientResult<TxHandle>;

    /// Create a directory record, optionally redirecting its descendants to
    /// another store.
    async fn create_directory(
        &self,
        sender: Address,
        name: &str,
        redirect_target: Option<Address>,
    ) -> ClientResult<TxHandle>;

    /// Keep the first `offset` bytes of the body and replace the rest.
    async fn update_record(
        &self,
        sender: Address,
        index: RecordIndex,
        body: &[u8],
        offset: u64,
    ) -> ClientResult<TxHandle>;

    async fn delete_record(&self, sender: Address, index: RecordIndex) -> ClientResult<TxHandle>;

    /// Splice `body` into the record at `offset`.
    async fn write_record(
        &self,
        sender: Address,
        index: RecordIndex,
        offset: u64,
        body: &[u8],
    ) -> ClientResult<TxHandle>;

    /// Read up to `length` bytes starting at `offset`.
    async fn read_record(&self, index: RecordIndex, offset: u64, length: u64)
        -> ClientResult<Vec<u8>>;

    async fn get_record(&self, index: RecordIndex) -> ClientResult<Record>;

    /// Indices of every record with `exists == true`, ascending.
    async fn list_live_indices(&self) -> ClientResult<Vec<RecordIndex>>;

    async fn wait_for_commit(&self, tx: &TxHandle) -> ClientResult<CommitStatus>;

    /// Whether `write_record` is available. When it is not, partial writes
    /// fall back to read-modify-write through `update_record`.
    fn supports_offset_write(&self) -> bool {
        true
    }
}

/// Creates store handles on demand, e.g. for redirect targets discovered
/// while resolving paths.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, chain: ChainId, address: Address) -> ClientResult<Arc<dyn RecordStore>>;
}
