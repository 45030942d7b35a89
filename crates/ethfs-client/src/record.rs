//! Records as the ledger stores them.

use ethfs_types::{make_error_msg, Address, NamespaceCode, RecordIndex, Result};
use serde::{Deserialize, Serialize};

/// What a record represents in the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    File,
    Directory,
    Link,
}

/// One record of a store, addressed by its index.
///
/// `name` holds the full path of the entry relative to the store, not just
/// the leaf name. Records with `exists == false` are tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub index: RecordIndex,
    pub kind: RecordKind,
    pub owner: Address,
    pub name: Vec<u8>,
    pub body: Vec<u8>,
    pub size: u64,
    pub timestamp: u64,
    pub exists: bool,
    pub redirect_target: Option<Address>,
}

impl Record {
    /// Decode `name` as a path. Fails with `DECODE_ERROR` for non UTF-8 names.
    pub fn path(&self) -> Result<&str> {
        match std::str::from_utf8(&self.name) {
            Ok(path) => Ok(path),
            Err(e) => make_error_msg(
                NamespaceCode::DECODE_ERROR,
                format!("record {} has an undecodable name: {}", self.index, e),
            ),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == RecordKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == RecordKind::File
    }

    /// Redirect target of a directory, ignoring the zero address.
    pub fn redirect(&self) -> Option<Address> {
        match self.kind {
            RecordKind::Directory => self.redirect_target.filter(|a| !a.is_zero()),
            _ => None,
        }
    }
}

/// Splice `data` into `body` at `offset`, zero-filling any gap and keeping
/// bytes past the spliced range.
pub fn splice(body: &mut Vec<u8>, offset: u64, data: &[u8]) {
    let offset = offset as usize;
    let end = offset + data.len();
    if body.len() < end {
        body.resize(end, 0);
    }
    body[offset..end].copy_from_slice(data);
}

/// Keep the first `offset` bytes of `body` (zero-padded) and replace the
/// rest with `data`.
pub fn replace_tail(body: &mut Vec<u8>, offset: u64, data: &[u8]) {
    body.resize(offset as usize, 0);
    body.extend_from_slice(data);
}
