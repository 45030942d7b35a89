//! Path-based filesystem callbacks.
//!
//! Every callback receives an absolute path inside the mount
//! (`/`, `/<chain>`, `/<chain>/<owner>`, `/<chain>/<owner>/<rel...>`).

use std::time::SystemTime;

use crate::reply::*;
use crate::types::*;

/// Trait defining the filesystem callbacks.
///
/// Default implementations return `ENOSYS` (function not implemented).
///
/// Operations return `FuseResult<T>` where the error value is an errno
/// (positive integer, e.g., `libc::ENOENT`).
#[async_trait::async_trait]
pub trait FuseOps: Send + Sync + 'static {
    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Called when the filesystem is mounted.
    async fn init(&self) -> FuseResult<()> {
        Ok(())
    }

    /// Called when the filesystem is unmounted.
    async fn destroy(&self) {}

    // ── Attributes ──────────────────────────────────────────────────────

    async fn getattr(&self, ctx: FuseRequestContext, path: &str) -> FuseResult<ReplyAttr> {
        let _ = (ctx, path);
        Err(libc::ENOSYS)
    }

    async fn chmod(&self, ctx: FuseRequestContext, path: &str, mode: u32) -> FuseResult<()> {
        let _ = (ctx, path, mode);
        Err(libc::ENOSYS)
    }

    async fn chown(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FuseResult<()> {
        let _ = (ctx, path, uid, gid);
        Err(libc::ENOSYS)
    }

    async fn utimens(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> FuseResult<()> {
        let _ = (ctx, path, atime, mtime);
        Err(libc::ENOSYS)
    }

    /// Cut or extend a file to `size` bytes.
    async fn truncate(&self, ctx: FuseRequestContext, path: &str, size: u64) -> FuseResult<()> {
        let _ = (ctx, path, size);
        Err(libc::ENOSYS)
    }

    // ── Directories ─────────────────────────────────────────────────────

    /// List a directory starting after `offset` entries.
    async fn readdir(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        offset: i64,
    ) -> FuseResult<ReplyDirectory> {
        let _ = (ctx, path, offset);
        Err(libc::ENOSYS)
    }

    async fn mkdir(&self, ctx: FuseRequestContext, path: &str, mode: u32) -> FuseResult<ReplyEntry> {
        let _ = (ctx, path, mode);
        Err(libc::ENOSYS)
    }

    async fn rmdir(&self, ctx: FuseRequestContext, path: &str) -> FuseResult<()> {
        let _ = (ctx, path);
        Err(libc::ENOSYS)
    }

    // ── Files ───────────────────────────────────────────────────────────

    /// Create an empty regular file.
    async fn create(&self, ctx: FuseRequestContext, path: &str, mode: u32) -> FuseResult<ReplyEntry> {
        let _ = (ctx, path, mode);
        Err(libc::ENOSYS)
    }

    async fn unlink(&self, ctx: FuseRequestContext, path: &str) -> FuseResult<()> {
        let _ = (ctx, path);
        Err(libc::ENOSYS)
    }

    async fn read(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let _ = (ctx, path, offset, size);
        Err(libc::ENOSYS)
    }

    async fn write(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        offset: u64,
        data: &[u8],
    ) -> FuseResult<ReplyWrite> {
        let _ = (ctx, path, offset, data);
        Err(libc::ENOSYS)
    }

    // ── Rename / links ──────────────────────────────────────────────────

    async fn rename(&self, ctx: FuseRequestContext, from: &str, to: &str) -> FuseResult<()> {
        let _ = (ctx, from, to);
        Err(libc::ENOSYS)
    }

    /// Create a symbolic link at `link` pointing to `target`.
    async fn symlink(&self, ctx: FuseRequestContext, target: &str, link: &str) -> FuseResult<()> {
        let _ = (ctx, target, link);
        Err(libc::ENOSYS)
    }
}
