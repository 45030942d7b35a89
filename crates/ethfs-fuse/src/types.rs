//! Attribute and directory-entry types handed back to the kernel transport.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethfs_client::RecordKind;
use ethfs_namespace::Attributes;

// ── File type bits (matching libc S_IF* constants) ──────────────────────────

/// Regular file.
pub const S_IFREG: u32 = libc::S_IFREG as u32;
/// Directory.
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;

pub const DIR_PERM: u32 = 0o755;
pub const FILE_PERM: u32 = 0o644;

/// Preferred I/O block size reported for every entry.
pub const BLOCK_SIZE: u32 = 4096;

/// Mirrors the `struct stat` fields the transport fills in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    /// Number of 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// File type and permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Default for FileAttr {
    fn default() -> Self {
        Self {
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: BLOCK_SIZE,
        }
    }
}

impl FileAttr {
    /// Root, chain and owner levels: directories that exist by construction.
    pub fn synthetic_dir(now: SystemTime, uid: u32, gid: u32) -> Self {
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            mode: S_IFDIR | DIR_PERM,
            nlink: 2,
            uid,
            gid,
            ..Default::default()
        }
    }

    /// Attributes of a namespace entry. Links are presented as regular files.
    pub fn from_attributes(attrs: &Attributes, uid: u32, gid: u32) -> Self {
        let time = system_time_from_secs(attrs.timestamp);
        let (mode, nlink, size) = match attrs.kind {
            RecordKind::Directory => (S_IFDIR | DIR_PERM, 2, 0),
            RecordKind::File | RecordKind::Link => (S_IFREG | FILE_PERM, 1, attrs.size),
        };
        Self {
            size,
            blocks: size.div_ceil(512),
            atime: time,
            mtime: time,
            ctime: time,
            mode,
            nlink,
            uid,
            gid,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == S_IFDIR
    }
}

/// Caller of a request. Mirrors `fuse_req_ctx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuseRequestContext {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// A single directory entry returned by readdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuseDirEntry {
    /// Offset of the next entry (opaque cursor).
    pub offset: i64,
    /// `DT_REG` or `DT_DIR`.
    pub file_type: u32,
    pub name: String,
}

impl FuseDirEntry {
    pub fn for_kind(name: impl Into<String>, kind: RecordKind, offset: i64) -> Self {
        let file_type = match kind {
            RecordKind::Directory => libc::DT_DIR,
            RecordKind::File | RecordKind::Link => libc::DT_REG,
        };
        Self {
            offset,
            file_type: file_type as u32,
            name: name.into(),
        }
    }
}

/// Seconds since the epoch to `SystemTime`.
pub fn system_time_from_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethfs_namespace::StoreKey;
    use ethfs_types::{Address, ChainId, RecordIndex};

    fn attrs(kind: RecordKind, size: u64) -> Attributes {
        Attributes {
            kind,
            size,
            timestamp: 1_700_000_000,
            owner: Address::from_low_u64(1),
            index: Some(RecordIndex(0)),
            store: StoreKey::new(ChainId(1337), Address::from_low_u64(2)),
            redirect: None,
        }
    }

    #[test]
    fn test_file_attr() {
        let attr = FileAttr::from_attributes(&attrs(RecordKind::File, 1025), 1000, 100);
        assert_eq!(attr.mode, S_IFREG | 0o644);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 1025);
        assert_eq!(attr.blocks, 3);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 100);
        assert_eq!(attr.mtime, system_time_from_secs(1_700_000_000));
        assert_eq!(attr.atime, attr.ctime);
        assert!(!attr.is_dir());
    }

    #[test]
    fn test_dir_attr() {
        let attr = FileAttr::from_attributes(&attrs(RecordKind::Directory, 99), 0, 0);
        assert_eq!(attr.mode, S_IFDIR | 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.blocks, 0);
        assert!(attr.is_dir());
    }

    #[test]
    fn test_link_shown_as_file() {
        let attr = FileAttr::from_attributes(&attrs(RecordKind::Link, 4), 0, 0);
        assert_eq!(attr.mode & libc::S_IFMT as u32, S_IFREG);
    }

    #[test]
    fn test_synthetic_dir() {
        let now = SystemTime::now();
        let attr = FileAttr::synthetic_dir(now, 5, 6);
        assert!(attr.is_dir());
        assert_eq!(attr.mode & 0o777, 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.mtime, now);
    }

    #[test]
    fn test_dir_entry_types() {
        let d = FuseDirEntry::for_kind(".", RecordKind::Directory, 1);
        assert_eq!(d.file_type, libc::DT_DIR as u32);
        let e = FuseDirEntry::for_kind("a", RecordKind::File, 3);
        assert_eq!(e.file_type, libc::DT_REG as u32);
        assert_eq!(e.offset, 3);
    }
}
