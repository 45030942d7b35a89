//! ethfs-fuse: filesystem callback layer for the ethfs namespace.
//!
//! The kernel-facing transport hands path-based callbacks to [`FuseOps`].
//! [`EthFs`] answers them from a [`Namespace`](ethfs_namespace::Namespace):
//!
//! - **[`config`]** - `MountConfig` (stores, signer, rpc, namespace, mount,
//!   log sections) and the store binding sources.
//! - **[`types`]** - `FileAttr`, directory entries and the request context.
//! - **[`reply`]** - reply types per callback.
//! - **[`ops`]** - the `FuseOps` trait; every default returns `ENOSYS`.
//! - **[`filesystem`]** - `EthFs`, mapping callbacks to the namespace and
//!   statuses to errno values.

pub mod config;
pub mod filesystem;
pub mod ops;
pub mod reply;
pub mod types;

pub use config::{Bindings, MountConfig, MountSection};
pub use filesystem::EthFs;
pub use ops::FuseOps;
pub use reply::FuseResult;
pub use types::{FileAttr, FuseDirEntry, FuseRequestContext};
