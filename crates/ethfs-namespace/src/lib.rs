//! ethfs-namespace: the hierarchical view over flat ledger records.
//!
//! Paths of the form `/<chain>/<owner>/<rel/path>` are resolved in three
//! steps. The [`resolver::StoreResolver`] picks the store that governs the
//! path (following directory redirects into other stores), the
//! [`slot_index::SlotResolver`] maps `(owner, path)` to a record index in that
//! store, and the [`snapshot::SnapshotCache`] answers listings and attribute
//! queries from a full materialization of every live record. The
//! [`Namespace`] facade composes them and rebuilds the snapshot after every
//! committed mutation.

pub mod config;
pub mod namespace;
pub mod path;
pub mod registry;
pub mod resolver;
pub mod slot_index;
pub mod snapshot;

pub use config::NamespaceConfig;
pub use namespace::{Attributes, DirEntry, Namespace};
pub use path::NsPath;
pub use registry::{StoreHandle, StoreKey, StoreRegistry};
pub use resolver::{Resolved, StoreResolver};
pub use slot_index::{SlotIndex, SlotResolver};
pub use snapshot::{EntryInfo, Snapshot, SnapshotCache};

/// Whose records a lookup may match.
///
/// Reads are world-readable and use `Any`, which still prefers the
/// requested owner's record. Mutations use `Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    Owner,
    Any,
}
