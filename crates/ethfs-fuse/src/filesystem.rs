//! `EthFs`: the filesystem callbacks answered from the namespace.
//!
//! The top three levels of the mount are synthetic: `/` lists the bound
//! chains, `/<chain>` lists the owners with records on that chain and
//! `/<chain>/<owner>` is the owner's tree. Those levels cannot be modified
//! (`EACCES`). Below them every callback maps onto one namespace operation.

use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use ethfs_client::{RecordKind, StoreConnector};
use ethfs_namespace::{Namespace, NsPath, StoreRegistry};
use ethfs_types::{Address, ChainId, Result, Status};
use tracing::{debug, info};

use crate::config::{Bindings, MountConfig, MountSection};
use crate::ops::FuseOps;
use crate::reply::*;
use crate::types::*;

pub struct EthFs {
    namespace: Arc<Namespace>,
    mount: ArcSwap<MountSection>,
}

impl EthFs {
    pub fn new(namespace: Arc<Namespace>, mount: MountSection) -> Self {
        Self {
            namespace,
            mount: ArcSwap::from_pointee(mount),
        }
    }

    /// Bind every store in `bindings` through `connector` and build the
    /// namespace described by `config`.
    pub async fn connect(
        config: &MountConfig,
        bindings: &Bindings,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self> {
        let registry = Arc::new(StoreRegistry::new(connector));
        for (chain, address) in bindings.iter() {
            registry.bind(chain, address).await?;
        }
        info!(
            chains = bindings.len(),
            signer = ?config.signer,
            readonly = config.mount.readonly,
            "namespace ready"
        );
        let namespace = Namespace::new(registry, &config.namespace, config.signer);
        Ok(Self::new(Arc::new(namespace), config.mount.clone()))
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn mount(&self) -> Arc<MountSection> {
        self.mount.load_full()
    }

    /// Apply the hot-updatable settings of a reloaded config.
    pub fn apply_config(&self, config: &MountConfig) {
        let mut mount = MountSection::clone(&self.mount.load());
        mount.readonly = config.mount.readonly;
        mount.attr_timeout_secs = config.mount.attr_timeout_secs;
        mount.entry_timeout_secs = config.mount.entry_timeout_secs;
        info!(readonly = mount.readonly, "mount config updated");
        self.mount.store(Arc::new(mount));
        self.namespace.apply_config(&config.namespace);
    }

    fn check_readonly(&self) -> FuseResult<()> {
        if self.mount.load().readonly {
            Err(libc::EROFS)
        } else {
            Ok(())
        }
    }

    fn owner_ids(&self, ctx: &FuseRequestContext) -> (u32, u32) {
        let mount = self.mount.load();
        (mount.uid.unwrap_or(ctx.uid), mount.gid.unwrap_or(ctx.gid))
    }

    fn synthetic_dir(&self, ctx: &FuseRequestContext) -> FileAttr {
        let (uid, gid) = self.owner_ids(ctx);
        FileAttr::synthetic_dir(SystemTime::now(), uid, gid)
    }

    fn check_chain(&self, chain: ChainId) -> FuseResult<()> {
        self.namespace
            .registry()
            .default_store(chain)
            .map(|_| ())
            .map_err(to_errno)
    }

    /// Split a path naming an entry below an owner directory. The synthetic
    /// levels above it cannot be modified.
    fn entry(&self, path: &str) -> FuseResult<(ChainId, Address, String)> {
        match NsPath::parse(path).map_err(to_errno)? {
            NsPath::Entry { chain, owner, path } => Ok((chain, owner, path)),
            NsPath::Root | NsPath::Chain(_) | NsPath::Owner { .. } => Err(libc::EACCES),
        }
    }

    async fn entry_reply(
        &self,
        ctx: &FuseRequestContext,
        chain: ChainId,
        owner: Address,
        path: &str,
    ) -> FuseResult<ReplyEntry> {
        let attrs = self
            .namespace
            .attributes(chain, owner, path)
            .await
            .map_err(to_errno)?;
        let (uid, gid) = self.owner_ids(ctx);
        let mount = self.mount.load();
        Ok(ReplyEntry {
            attr: FileAttr::from_attributes(&attrs, uid, gid),
            attr_timeout: mount.attr_timeout(),
            entry_timeout: mount.entry_timeout(),
        })
    }
}

fn to_errno(status: Status) -> i32 {
    debug!(%status, "request failed");
    status.errno()
}

#[async_trait::async_trait]
impl FuseOps for EthFs {
    async fn init(&self) -> FuseResult<()> {
        info!(
            mountpoint = %self.mount.load().mountpoint,
            chains = ?self.namespace.chains(),
            "ethfs init"
        );
        Ok(())
    }

    async fn destroy(&self) {
        info!("ethfs destroy");
    }

    async fn getattr(&self, ctx: FuseRequestContext, path: &str) -> FuseResult<ReplyAttr> {
        debug!(path, pid = ctx.pid, "getattr");
        let attr = match NsPath::parse(path).map_err(to_errno)? {
            NsPath::Root => self.synthetic_dir(&ctx),
            NsPath::Chain(chain) | NsPath::Owner { chain, .. } => {
                self.check_chain(chain)?;
                self.synthetic_dir(&ctx)
            }
            NsPath::Entry { chain, owner, path } => {
                let attrs = self
                    .namespace
                    .attributes(chain, owner, &path)
                    .await
                    .map_err(to_errno)?;
                let (uid, gid) = self.owner_ids(&ctx);
                FileAttr::from_attributes(&attrs, uid, gid)
            }
        };
        Ok(ReplyAttr {
            attr,
            attr_timeout: self.mount.load().attr_timeout(),
        })
    }

    async fn chmod(&self, ctx: FuseRequestContext, path: &str, mode: u32) -> FuseResult<()> {
        debug!(path, mode, pid = ctx.pid, "chmod ignored");
        Ok(())
    }

    async fn chown(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FuseResult<()> {
        debug!(path, ?uid, ?gid, pid = ctx.pid, "chown ignored");
        Ok(())
    }

    async fn utimens(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        _atime: Option<SystemTime>,
        _mtime: Option<SystemTime>,
    ) -> FuseResult<()> {
        debug!(path, pid = ctx.pid, "utimens ignored");
        Ok(())
    }

    async fn truncate(&self, ctx: FuseRequestContext, path: &str, size: u64) -> FuseResult<()> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(path)?;
        debug!(path, size, pid = ctx.pid, "truncate");
        self.namespace
            .truncate(chain, owner, &rel, size)
            .await
            .map_err(to_errno)
    }

    async fn readdir(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        offset: i64,
    ) -> FuseResult<ReplyDirectory> {
        debug!(path, offset, pid = ctx.pid, "readdir");
        let children: Vec<(String, RecordKind)> = match NsPath::parse(path).map_err(to_errno)? {
            NsPath::Root => self
                .namespace
                .chains()
                .into_iter()
                .map(|chain| (chain.to_string(), RecordKind::Directory))
                .collect(),
            NsPath::Chain(chain) => self
                .namespace
                .owners(chain)
                .await
                .map_err(to_errno)?
                .into_iter()
                .map(|owner| (owner.to_string(), RecordKind::Directory))
                .collect(),
            NsPath::Owner { chain, owner } => self
                .namespace
                .list_children(chain, owner, "")
                .await
                .map_err(to_errno)?
                .into_iter()
                .map(|e| (e.name, e.kind))
                .collect(),
            NsPath::Entry { chain, owner, path } => self
                .namespace
                .list_children(chain, owner, &path)
                .await
                .map_err(to_errno)?
                .into_iter()
                .map(|e| (e.name, e.kind))
                .collect(),
        };

        let dots = [".", ".."].map(|name| (name.to_string(), RecordKind::Directory));
        let entries = dots
            .into_iter()
            .chain(children)
            .enumerate()
            .skip(offset.max(0) as usize)
            .map(|(idx, (name, kind))| FuseDirEntry::for_kind(name, kind, (idx + 1) as i64))
            .collect();
        Ok(ReplyDirectory { entries })
    }

    async fn mkdir(&self, ctx: FuseRequestContext, path: &str, mode: u32) -> FuseResult<ReplyEntry> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(path)?;
        debug!(path, mode, pid = ctx.pid, "mkdir");
        self.namespace
            .create_directory(chain, owner, &rel, None)
            .await
            .map_err(to_errno)?;
        self.entry_reply(&ctx, chain, owner, &rel).await
    }

    async fn rmdir(&self, ctx: FuseRequestContext, path: &str) -> FuseResult<()> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(path)?;
        debug!(path, pid = ctx.pid, "rmdir");
        self.namespace
            .remove_directory(chain, owner, &rel)
            .await
            .map_err(to_errno)
    }

    async fn create(&self, ctx: FuseRequestContext, path: &str, mode: u32) -> FuseResult<ReplyEntry> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(path)?;
        debug!(path, mode, pid = ctx.pid, "create");
        self.namespace
            .create_file(chain, owner, &rel)
            .await
            .map_err(to_errno)?;
        self.entry_reply(&ctx, chain, owner, &rel).await
    }

    async fn unlink(&self, ctx: FuseRequestContext, path: &str) -> FuseResult<()> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(path)?;
        debug!(path, pid = ctx.pid, "unlink");
        self.namespace
            .remove_file(chain, owner, &rel)
            .await
            .map_err(to_errno)
    }

    async fn read(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        debug!(path, offset, size, pid = ctx.pid, "read");
        let (chain, owner, rel) = match NsPath::parse(path).map_err(to_errno)? {
            NsPath::Entry { chain, owner, path } => (chain, owner, path),
            _ => return Err(libc::EISDIR),
        };
        let data = self
            .namespace
            .read(chain, owner, &rel, offset, size as u64)
            .await
            .map_err(to_errno)?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        ctx: FuseRequestContext,
        path: &str,
        offset: u64,
        data: &[u8],
    ) -> FuseResult<ReplyWrite> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(path)?;
        debug!(path, offset, len = data.len(), pid = ctx.pid, "write");
        let written = self
            .namespace
            .write(chain, owner, &rel, offset, data)
            .await
            .map_err(to_errno)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn rename(&self, ctx: FuseRequestContext, from: &str, to: &str) -> FuseResult<()> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(from)?;
        debug!(from, to, pid = ctx.pid, "rename");
        self.namespace
            .rename(chain, owner, &rel, to)
            .await
            .map_err(to_errno)
    }

    async fn symlink(&self, ctx: FuseRequestContext, target: &str, link: &str) -> FuseResult<()> {
        self.check_readonly()?;
        let (chain, owner, rel) = self.entry(link)?;
        debug!(target, link, pid = ctx.pid, "symlink");
        self.namespace
            .symlink(chain, owner, &rel, target)
            .await
            .map_err(to_errno)
    }
}

impl std::fmt::Debug for EthFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthFs")
            .field("chains", &self.namespace.chains())
            .field("mount", &self.mount.load_full())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethfs_client::{MemoryLedger, MemoryStore, RecordStore};

    const CHAIN: ChainId = ChainId(1337);

    fn alice() -> Address {
        Address::from_low_u64(0xa11ce)
    }

    fn ctx() -> FuseRequestContext {
        FuseRequestContext {
            uid: 1000,
            gid: 1000,
            pid: 42,
        }
    }

    fn p(rel: &str) -> String {
        format!("/{}/{}/{}", CHAIN, alice(), rel)
    }

    async fn make_fs_with(config: MountConfig) -> (EthFs, Arc<MemoryStore>) {
        let ledger = MemoryLedger::new();
        let store = ledger.deploy(CHAIN);
        let mut bindings = Bindings::default();
        bindings.bind(CHAIN, store.address());
        let fs = EthFs::connect(&config, &bindings, Arc::new(ledger))
            .await
            .unwrap();
        (fs, store)
    }

    async fn make_fs() -> (EthFs, Arc<MemoryStore>) {
        make_fs_with(MountConfig::default()).await
    }

    fn names(reply: &ReplyDirectory) -> Vec<&str> {
        reply.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_init() {
        let (fs, _) = make_fs().await;
        assert!(fs.init().await.is_ok());
        fs.destroy().await;
    }

    #[tokio::test]
    async fn test_getattr_synthetic_levels() {
        let (fs, _) = make_fs().await;
        for path in ["/".to_string(), format!("/{}", CHAIN), format!("/{}/{}", CHAIN, alice())] {
            let reply = fs.getattr(ctx(), &path).await.unwrap();
            assert!(reply.attr.is_dir(), "{}", path);
            assert_eq!(reply.attr.mode & 0o777, 0o755);
            assert_eq!(reply.attr.nlink, 2);
            assert_eq!(reply.attr.uid, 1000);
        }
        assert_eq!(fs.getattr(ctx(), "/5").await.unwrap_err(), libc::ENOENT);
        assert_eq!(fs.getattr(ctx(), "/mainnet").await.unwrap_err(), libc::ENOENT);
        assert_eq!(
            fs.getattr(ctx(), &format!("/{}/not-an-address", CHAIN))
                .await
                .unwrap_err(),
            libc::ENOENT
        );
        assert_eq!(fs.getattr(ctx(), &p("missing")).await.unwrap_err(), libc::ENOENT);
    }

    #[tokio::test]
    async fn test_mkdir_create_write_read() {
        let (fs, _) = make_fs().await;
        let entry = fs.mkdir(ctx(), &p("docs"), 0o755).await.unwrap();
        assert!(entry.attr.is_dir());

        let entry = fs.create(ctx(), &p("docs/a.txt"), 0o644).await.unwrap();
        assert_eq!(entry.attr.size, 0);
        assert_eq!(entry.attr.mode, S_IFREG | 0o644);

        let written = fs.write(ctx(), &p("docs/a.txt"), 0, b"hello").await.unwrap();
        assert_eq!(written.written, 5);
        let data = fs.read(ctx(), &p("docs/a.txt"), 1, 100).await.unwrap();
        assert_eq!(data.data, b"ello");

        let attr = fs.getattr(ctx(), &p("docs/a.txt")).await.unwrap().attr;
        assert_eq!(attr.size, 5);
        assert_eq!(attr.blocks, 1);
    }

    #[tokio::test]
    async fn test_readdir_levels() {
        let (fs, _) = make_fs().await;
        fs.mkdir(ctx(), &p("docs"), 0o755).await.unwrap();
        fs.write(ctx(), &p("docs/a.txt"), 0, b"x").await.unwrap();
        fs.write(ctx(), &p("top.txt"), 0, b"y").await.unwrap();

        let root = fs.readdir(ctx(), "/", 0).await.unwrap();
        assert_eq!(names(&root), vec![".", "..", "1337"]);

        let chain = fs.readdir(ctx(), &format!("/{}", CHAIN), 0).await.unwrap();
        let owner = alice().to_string();
        assert_eq!(names(&chain), vec![".", "..", owner.as_str()]);

        let owner_dir = fs
            .readdir(ctx(), &format!("/{}/{}", CHAIN, alice()), 0)
            .await
            .unwrap();
        assert_eq!(names(&owner_dir), vec![".", "..", "docs", "top.txt"]);
        assert_eq!(owner_dir.entries[2].file_type, libc::DT_DIR as u32);
        assert_eq!(owner_dir.entries[3].file_type, libc::DT_REG as u32);

        let docs = fs.readdir(ctx(), &p("docs"), 0).await.unwrap();
        assert_eq!(names(&docs), vec![".", "..", "a.txt"]);
        let rest = fs.readdir(ctx(), &p("docs"), 2).await.unwrap();
        assert_eq!(names(&rest), vec!["a.txt"]);
        assert_eq!(rest.entries[0].offset, 3);

        assert_eq!(
            fs.readdir(ctx(), &p("top.txt"), 0).await.unwrap_err(),
            libc::ENOTDIR
        );
    }

    #[tokio::test]
    async fn test_synthetic_levels_are_not_writable() {
        let (fs, _) = make_fs().await;
        let owner_dir = format!("/{}/{}", CHAIN, alice());
        assert_eq!(fs.mkdir(ctx(), "/", 0o755).await.unwrap_err(), libc::EACCES);
        assert_eq!(
            fs.mkdir(ctx(), &format!("/{}", CHAIN), 0o755).await.unwrap_err(),
            libc::EACCES
        );
        assert_eq!(fs.rmdir(ctx(), &owner_dir).await.unwrap_err(), libc::EACCES);
        assert_eq!(
            fs.create(ctx(), &format!("/{}", CHAIN), 0o644).await.unwrap_err(),
            libc::EACCES
        );
        assert_eq!(fs.read(ctx(), &owner_dir, 0, 1).await.unwrap_err(), libc::EISDIR);
    }

    #[tokio::test]
    async fn test_readonly_refuses_mutations() {
        let mut config = MountConfig::default();
        config.mount.readonly = true;
        let (fs, store) = make_fs_with(config.clone()).await;
        store.insert_committed(alice(), RecordKind::File, "f", "data", None);

        assert_eq!(fs.write(ctx(), &p("f"), 0, b"x").await.unwrap_err(), libc::EROFS);
        assert_eq!(fs.create(ctx(), &p("g"), 0o644).await.unwrap_err(), libc::EROFS);
        assert_eq!(fs.mkdir(ctx(), &p("d"), 0o755).await.unwrap_err(), libc::EROFS);
        assert_eq!(fs.unlink(ctx(), &p("f")).await.unwrap_err(), libc::EROFS);
        assert_eq!(fs.truncate(ctx(), &p("f"), 0).await.unwrap_err(), libc::EROFS);
        assert_eq!(fs.rename(ctx(), &p("f"), &p("g")).await.unwrap_err(), libc::EROFS);
        assert_eq!(store.stats().writes, 0);
        assert_eq!(fs.read(ctx(), &p("f"), 0, 4).await.unwrap().data, b"data");

        config.mount.readonly = false;
        fs.apply_config(&config);
        fs.unlink(ctx(), &p("f")).await.unwrap();
        assert_eq!(store.stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_errno_mapping() {
        let (fs, _) = make_fs().await;
        fs.mkdir(ctx(), &p("d"), 0o755).await.unwrap();
        fs.create(ctx(), &p("d/f"), 0o644).await.unwrap();

        assert_eq!(fs.rmdir(ctx(), &p("d")).await.unwrap_err(), libc::ENOTEMPTY);
        assert_eq!(fs.unlink(ctx(), &p("d")).await.unwrap_err(), libc::EISDIR);
        assert_eq!(fs.rmdir(ctx(), &p("d/f")).await.unwrap_err(), libc::ENOTDIR);
        assert_eq!(fs.create(ctx(), &p("d/f"), 0o644).await.unwrap_err(), libc::EEXIST);
        assert_eq!(fs.create(ctx(), &p("x/f"), 0o644).await.unwrap_err(), libc::ENOENT);
        assert_eq!(fs.read(ctx(), &p("d"), 0, 1).await.unwrap_err(), libc::EISDIR);
        assert_eq!(fs.getattr(ctx(), &p("d/../f")).await.unwrap_err(), libc::EINVAL);
        assert_eq!(fs.write(ctx(), &p("d/f"), 1 << 40, b"x").await.unwrap_err(), libc::EFBIG);

        fs.unlink(ctx(), &p("d/f")).await.unwrap();
        fs.rmdir(ctx(), &p("d")).await.unwrap();
        assert_eq!(fs.getattr(ctx(), &p("d")).await.unwrap_err(), libc::ENOENT);
    }

    #[tokio::test]
    async fn test_truncate() {
        let (fs, _) = make_fs().await;
        fs.write(ctx(), &p("f"), 0, b"abcdef").await.unwrap();
        fs.truncate(ctx(), &p("f"), 2).await.unwrap();
        assert_eq!(fs.getattr(ctx(), &p("f")).await.unwrap().attr.size, 2);
        fs.truncate(ctx(), &p("f"), 4).await.unwrap();
        assert_eq!(fs.read(ctx(), &p("f"), 0, 10).await.unwrap().data, b"ab\0\0");
    }

    #[tokio::test]
    async fn test_unsupported_and_ignored() {
        let (fs, _) = make_fs().await;
        fs.create(ctx(), &p("f"), 0o644).await.unwrap();
        assert_eq!(fs.rename(ctx(), &p("f"), &p("g")).await.unwrap_err(), libc::ENOSYS);
        assert_eq!(fs.symlink(ctx(), "f", &p("l")).await.unwrap_err(), libc::ENOSYS);

        fs.chmod(ctx(), &p("f"), 0o600).await.unwrap();
        fs.chown(ctx(), &p("f"), Some(0), Some(0)).await.unwrap();
        fs.utimens(ctx(), &p("f"), None, Some(SystemTime::now()))
            .await
            .unwrap();
        let attr = fs.getattr(ctx(), &p("f")).await.unwrap().attr;
        assert_eq!(attr.mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_configured_owner_ids() {
        let mut config = MountConfig::default();
        config.mount.uid = Some(0);
        config.mount.gid = Some(7);
        let (fs, _) = make_fs_with(config).await;
        let attr = fs.getattr(ctx(), "/").await.unwrap().attr;
        assert_eq!((attr.uid, attr.gid), (0, 7));
    }

    #[tokio::test]
    async fn test_signer_mismatch_is_eperm() {
        let mut config = MountConfig::default();
        config.signer = Some(Address::from_low_u64(0xb0b));
        let (fs, store) = make_fs_with(config).await;
        assert_eq!(fs.create(ctx(), &p("f"), 0o644).await.unwrap_err(), libc::EPERM);
        assert_eq!(store.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_remote_failure_is_eio() {
        let (fs, store) = make_fs().await;
        fs.create(ctx(), &p("f"), 0o644).await.unwrap();
        store.set_unavailable(true);
        assert_eq!(fs.read(ctx(), &p("f"), 0, 1).await.unwrap_err(), libc::EIO);
        store.set_unavailable(false);
        store.reject_next_write();
        assert_eq!(fs.write(ctx(), &p("f"), 0, b"x").await.unwrap_err(), libc::EACCES);
    }
}
