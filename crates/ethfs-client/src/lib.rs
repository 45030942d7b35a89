//! Client-side boundary to the remote record stores that back an ethfs
//! namespace.
//!
//! A store is reached through the [`RecordStore`] trait; new handles for
//! stores discovered at runtime come from a [`StoreConnector`]. The
//! [`MemoryLedger`] backend implements both in-process with eventual-finality
//! semantics, and [`EndpointRegistry`] discovers which chain each configured
//! RPC endpoint serves.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod record;
pub mod retry;
pub mod store;

pub use config::RpcConfig;
pub use endpoint::{ChainIdProbe, EndpointRegistry, EndpointTable, HttpChainIdProbe};
pub use error::{ClientError, ClientResult};
pub use memory::{MemoryLedger, MemoryStore, StoreStats};
pub use record::{Record, RecordKind};
pub use retry::ExponentialBackoff;
pub use store::{CommitStatus, RecordStore, StoreConnector, TxHandle};
