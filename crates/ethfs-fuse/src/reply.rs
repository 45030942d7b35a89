//! Reply types for filesystem callbacks.
//!
//! The transport turns each reply into the matching kernel response, so the
//! callbacks can be driven and tested without a mounted filesystem.

use std::time::Duration;

use crate::types::{FileAttr, FuseDirEntry};

/// Reply for callbacks that produce an entry (create, mkdir).
#[derive(Debug, Clone)]
pub struct ReplyEntry {
    pub attr: FileAttr,
    pub attr_timeout: Duration,
    pub entry_timeout: Duration,
}

/// Reply for getattr.
#[derive(Debug, Clone)]
pub struct ReplyAttr {
    pub attr: FileAttr,
    pub attr_timeout: Duration,
}

#[derive(Debug)]
pub struct ReplyData {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyWrite {
    /// Number of bytes written.
    pub written: u32,
}

#[derive(Debug)]
pub struct ReplyDirectory {
    pub entries: Vec<FuseDirEntry>,
}

/// Result type for filesystem callbacks.
///
/// The error is an errno value (positive integer).
pub type FuseResult<T> = std::result::Result<T, i32>;
