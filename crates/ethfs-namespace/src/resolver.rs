//! Store resolution: which store governs a path, and under which name.
//!
//! A directory record may carry a redirect target. Everything below such a
//! directory is stored in the target store, named relative to the
//! directory. Resolution walks the ancestors of a path from the deepest up,
//! and the nearest redirecting directory wins. The walk then restarts inside
//! the target store with the rewritten path, so redirect chains nest.

use std::sync::Arc;

use ethfs_types::{make_error_msg, Address, ChainId, NamespaceCode, Result};
use tracing::{debug, warn};

use crate::path;
use crate::registry::{StoreHandle, StoreRegistry};
use crate::snapshot::Snapshot;
use crate::OwnerScope;

/// The governing store of a path and the path relative to it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub store: Arc<StoreHandle>,
    pub path: String,
    /// Redirects followed.
    pub hops: usize,
}

/// Resolves stores against one snapshot.
pub struct StoreResolver<'a> {
    registry: &'a StoreRegistry,
    snapshot: &'a Snapshot,
    max_redirect_depth: usize,
}

impl<'a> StoreResolver<'a> {
    pub fn new(registry: &'a StoreRegistry, snapshot: &'a Snapshot, max_redirect_depth: usize) -> Self {
        Self {
            registry,
            snapshot,
            max_redirect_depth,
        }
    }

    /// Store and store-relative path of the entry at `path`.
    pub async fn resolve_store(
        &self,
        chain: ChainId,
        owner: Address,
        path: &str,
        scope: OwnerScope,
    ) -> Result<Resolved> {
        self.walk(chain, owner, path, scope, false).await
    }

    /// Store holding the children of directory `dir`, and the prefix they
    /// are named under. A redirect on `dir` itself applies, so the prefix
    /// is `""` for a redirecting directory.
    pub async fn resolve_children_store(
        &self,
        chain: ChainId,
        owner: Address,
        dir: &str,
        scope: OwnerScope,
    ) -> Result<Resolved> {
        self.walk(chain, owner, dir, scope, true).await
    }

    async fn walk(
        &self,
        chain: ChainId,
        owner: Address,
        path: &str,
        scope: OwnerScope,
        include_self: bool,
    ) -> Result<Resolved> {
        let default = self.registry.default_store(chain)?;
        let mut store = Arc::clone(&default);
        let mut rel = path.to_string();
        let mut hops = 0;

        loop {
            let Some((dir, target)) = self.nearest_redirect(&store, owner, &rel, scope, include_self)
            else {
                return Ok(Resolved {
                    store,
                    path: rel,
                    hops,
                });
            };

            hops += 1;
            if hops > self.max_redirect_depth {
                return make_error_msg(
                    NamespaceCode::TOO_MANY_REDIRECTS,
                    format!("{} exceeds {} redirects", path, self.max_redirect_depth),
                );
            }

            match self.registry.get_or_connect(chain, target).await {
                Ok(next) => {
                    let next_rel = if dir == rel {
                        String::new()
                    } else {
                        rel[dir.len() + 1..].to_string()
                    };
                    debug!(from = %store.key(), to = %next.key(), %dir, path = %next_rel, "redirect");
                    store = next;
                    rel = next_rel;
                }
                Err(e) => {
                    warn!(
                        %chain,
                        %target,
                        error = %e,
                        "redirect target unavailable, using default store"
                    );
                    return Ok(Resolved {
                        store: default,
                        path: path.to_string(),
                        hops: 0,
                    });
                }
            }
        }
    }

    /// Deepest redirecting directory at or above `rel` in `store`.
    fn nearest_redirect(
        &self,
        store: &StoreHandle,
        owner: Address,
        rel: &str,
        scope: OwnerScope,
        include_self: bool,
    ) -> Option<(String, Address)> {
        let own = include_self.then_some(rel).filter(|r| !r.is_empty());
        own.into_iter().chain(path::ancestors(rel)).find_map(|dir| {
            self.snapshot
                .lookup(store.key(), owner, dir, scope)
                .filter(|e| e.is_dir())
                .and_then(|e| e.redirect)
                .map(|target| (dir.to_string(), target))
        })
    }
}
