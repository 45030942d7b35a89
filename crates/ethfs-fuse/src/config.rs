//! Mount configuration and store binding sources.
//!
//! A mount is configured from one TOML file with the sections `stores`,
//! `signer`, `rpc`, `namespace`, `mount` and `log`. Store bindings may also
//! come from `--contract` specs, the environment and a `deployment.json`;
//! [`collect_bindings`] merges them, earlier sources winning per chain.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use ethfs_client::RpcConfig;
use ethfs_config::{check_range, from_toml_serde, render_serde, Config, ConfigError};
use ethfs_logging::LogConfig;
use ethfs_namespace::NamespaceConfig;
use ethfs_types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Name of the deployment descriptor looked up when no other binding exists.
pub const DEPLOYMENT_FILE: &str = "deployment.json";

/// The `[mount]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSection {
    pub mountpoint: String,

    /// Refuse every mutation with `EROFS`. Hot-updatable.
    pub readonly: bool,

    pub attr_timeout_secs: u64,
    pub entry_timeout_secs: u64,

    /// Owner reported for every entry. `None` reports the calling process.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Default for MountSection {
    fn default() -> Self {
        Self {
            mountpoint: String::new(),
            readonly: false,
            attr_timeout_secs: 1,
            entry_timeout_secs: 1,
            uid: None,
            gid: None,
        }
    }
}

impl MountSection {
    pub fn attr_timeout(&self) -> Duration {
        Duration::from_secs(self.attr_timeout_secs)
    }

    pub fn entry_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Chain id (decimal text) to top-level store address.
    pub stores: BTreeMap<String, Address>,

    /// Identity that signs every transaction. Without it, transactions are
    /// sent as the owner named by the path.
    pub signer: Option<Address>,

    pub rpc: RpcConfig,
    pub namespace: NamespaceConfig,
    pub mount: MountSection,
    pub log: LogConfig,
}

impl MountConfig {
    /// The `[stores]` table with parsed chain ids.
    pub fn store_bindings(&self) -> Result<Vec<(ChainId, Address)>, ConfigError> {
        self.stores
            .iter()
            .map(|(chain, address)| {
                let chain = chain.parse::<ChainId>().map_err(|e| ConfigError::InvalidValue {
                    field: format!("stores.{}", chain),
                    reason: format!("chain id must be a decimal number: {}", e),
                })?;
                Ok((chain, *address))
            })
            .collect()
    }
}

impl Config for MountConfig {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        from_toml_serde(value)
    }

    fn hot_update(&mut self, other: &Self) {
        self.mount.readonly = other.mount.readonly;
        self.mount.attr_timeout_secs = other.mount.attr_timeout_secs;
        self.mount.entry_timeout_secs = other.mount.entry_timeout_secs;
        self.namespace.snapshot_ttl_secs = other.namespace.snapshot_ttl_secs;
        self.namespace.max_file_size = other.namespace.max_file_size;
    }

    fn render(&self) -> String {
        render_serde(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.store_bindings()?;
        check_range(
            "namespace.max_redirect_depth",
            self.namespace.max_redirect_depth,
            1,
            64,
        )?;
        check_range("namespace.max_file_size", self.namespace.max_file_size, 1, 1 << 32)?;
        check_range("mount.attr_timeout_secs", self.mount.attr_timeout_secs, 0, 3600)?;
        check_range("mount.entry_timeout_secs", self.mount.entry_timeout_secs, 0, 3600)?;
        if self.rpc.probe_retry_init_wait > self.rpc.probe_retry_max_wait {
            return Err(ConfigError::InvalidValue {
                field: "rpc.probe_retry_init_wait".into(),
                reason: "must not exceed rpc.probe_retry_max_wait".into(),
            });
        }
        for url in &self.rpc.urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "rpc.urls".into(),
                    reason: format!("{:?} is not an http(s) url", url),
                });
            }
        }
        Ok(())
    }
}

// ── Store bindings ──────────────────────────────────────────────────────

/// Chain to top-level store bindings. The first binding seen for a chain
/// is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<ChainId, Address>);

impl Bindings {
    /// Record `chain -> address` unless the chain is already bound.
    /// Returns whether the binding was taken.
    pub fn bind(&mut self, chain: ChainId, address: Address) -> bool {
        if let Some(existing) = self.0.get(&chain) {
            if *existing != address {
                debug!(%chain, %existing, ignored = %address, "chain already bound");
            }
            return false;
        }
        self.0.insert(chain, address);
        true
    }

    pub fn get(&self, chain: ChainId) -> Option<Address> {
        self.0.get(&chain).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChainId, Address)> + '_ {
        self.0.iter().map(|(c, a)| (*c, *a))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse `CHAIN_ID:ADDRESS` or a bare `ADDRESS` bound to `default_chain`.
pub fn parse_contract_spec(
    spec: &str,
    default_chain: ChainId,
) -> Result<(ChainId, Address), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: "contract".into(),
        reason,
    };
    let (chain, address) = match spec.trim().split_once(':') {
        Some((chain, address)) => {
            let chain = chain
                .trim()
                .parse::<ChainId>()
                .map_err(|e| invalid(format!("bad chain id in {:?}: {}", spec, e)))?;
            (chain, address)
        }
        None => (default_chain, spec),
    };
    let address = address
        .trim()
        .parse::<Address>()
        .map_err(|e| invalid(format!("bad address in {:?}: {}", spec, e)))?;
    Ok((chain, address))
}

/// `CONTRACT_ADDRESS` with an optional `CHAIN_ID` from `lookup`.
pub fn env_binding_with(
    lookup: impl Fn(&str) -> Option<String>,
    default_chain: ChainId,
) -> Result<Option<(ChainId, Address)>, ConfigError> {
    let Some(address) = lookup("CONTRACT_ADDRESS").filter(|a| !a.trim().is_empty()) else {
        return Ok(None);
    };
    let address = address
        .trim()
        .parse::<Address>()
        .map_err(|e| ConfigError::InvalidValue {
            field: "CONTRACT_ADDRESS".into(),
            reason: e.to_string(),
        })?;
    let chain = match lookup("CHAIN_ID") {
        Some(chain) => chain.trim().parse::<ChainId>().map_err(|e| ConfigError::InvalidValue {
            field: "CHAIN_ID".into(),
            reason: e.to_string(),
        })?,
        None => default_chain,
    };
    Ok(Some((chain, address)))
}

#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(rename = "chainId")]
    chain_id: ChainId,
    address: Address,
}

/// Read a `{ "chainId": N, "address": "0x..." }` descriptor. A missing file
/// is not an error.
pub fn read_deployment(path: &Path) -> Result<Option<(ChainId, Address)>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let deployment: Deployment =
        serde_json::from_str(&text).map_err(|e| ConfigError::InvalidValue {
            field: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(Some((deployment.chain_id, deployment.address)))
}

/// Merge every binding source. Precedence: `--contract` specs, the
/// `[stores]` table, the environment, then `deployment`.
pub fn collect_bindings(
    config: &MountConfig,
    contract_specs: &[String],
    env: impl Fn(&str) -> Option<String>,
    deployment: Option<&Path>,
) -> Result<Bindings, ConfigError> {
    let default_chain = config.namespace.default_chain_id;
    let mut bindings = Bindings::default();
    for spec in contract_specs {
        let (chain, address) = parse_contract_spec(spec, default_chain)?;
        bindings.bind(chain, address);
    }
    for (chain, address) in config.store_bindings()? {
        bindings.bind(chain, address);
    }
    if let Some((chain, address)) = env_binding_with(env, default_chain)? {
        bindings.bind(chain, address);
    }
    if let Some(path) = deployment {
        match read_deployment(path) {
            Ok(Some((chain, address))) => {
                bindings.bind(chain, address);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable deployment file"),
        }
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn test_defaults() {
        let cfg = MountConfig::default();
        assert!(cfg.stores.is_empty());
        assert!(cfg.signer.is_none());
        assert!(!cfg.mount.readonly);
        assert_eq!(cfg.mount.attr_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.namespace.max_redirect_depth, 8);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_from_toml_str() {
        let text = format!(
            r#"
signer = "{signer}"

[stores]
1337 = "{store}"

[rpc]
urls = ["http://10.0.0.1:8545"]
probe_timeout = 2.5

[namespace]
snapshot_ttl_secs = 30

[mount]
mountpoint = "/mnt/ethfs"
readonly = true
uid = 1000

[log]
level = "debug"
"#,
            signer = addr(7),
            store = addr(9)
        );
        let cfg = MountConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg.signer, Some(addr(7)));
        assert_eq!(cfg.store_bindings().unwrap(), vec![(ChainId(1337), addr(9))]);
        assert_eq!(cfg.rpc.probe_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.namespace.snapshot_ttl_secs, 30);
        assert_eq!(cfg.mount.mountpoint, "/mnt/ethfs");
        assert!(cfg.mount.readonly);
        assert_eq!(cfg.mount.uid, Some(1000));
        assert_eq!(cfg.mount.gid, None);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn test_validate() {
        let text = format!("[stores]\nmainnet = \"{}\"", addr(1));
        let err = MountConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "stores.mainnet"));

        let err = MountConfig::from_toml_str("[namespace]\nmax_redirect_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        let err = MountConfig::from_toml_str("[namespace]\nmax_file_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { ref field, .. } if field == "namespace.max_file_size"));

        let err = MountConfig::from_toml_str("[rpc]\nurls = [\"ftp://x\"]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "rpc.urls"));
    }

    #[test]
    fn test_hot_update() {
        let mut live = MountConfig::default();
        let mut next = MountConfig::default();
        next.mount.readonly = true;
        next.mount.mountpoint = "/elsewhere".into();
        next.namespace.snapshot_ttl_secs = 5;
        next.namespace.max_redirect_depth = 2;
        next.namespace.max_file_size = 1024;
        live.hot_update(&next);
        assert_eq!(live.namespace.max_file_size, 1024);
        assert!(live.mount.readonly);
        assert_eq!(live.namespace.snapshot_ttl_secs, 5);
        assert_eq!(live.mount.mountpoint, "");
        assert_eq!(live.namespace.max_redirect_depth, 8);
    }

    #[test]
    fn test_render_roundtrip() {
        let mut cfg = MountConfig::default();
        cfg.stores.insert("1".into(), addr(3));
        cfg.mount.gid = Some(10);
        let parsed = MountConfig::from_toml_str(&cfg.render()).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn test_parse_contract_spec() {
        let a = addr(0xabc);
        assert_eq!(
            parse_contract_spec(&format!("5:{}", a), ChainId(1337)).unwrap(),
            (ChainId(5), a)
        );
        assert_eq!(
            parse_contract_spec(&a.to_string(), ChainId(1337)).unwrap(),
            (ChainId(1337), a)
        );
        assert!(parse_contract_spec("x:0x01", ChainId(1)).is_err());
        assert!(parse_contract_spec("5:nothex", ChainId(1)).is_err());
    }

    #[test]
    fn test_env_binding() {
        let env: HashMap<&str, String> = [
            ("CONTRACT_ADDRESS", addr(4).to_string()),
            ("CHAIN_ID", "31337".to_string()),
        ]
        .into_iter()
        .collect();
        let found = env_binding_with(|k| env.get(k).cloned(), ChainId(1337)).unwrap();
        assert_eq!(found, Some((ChainId(31337), addr(4))));

        let only_address = |k: &str| (k == "CONTRACT_ADDRESS").then(|| addr(4).to_string());
        let found = env_binding_with(only_address, ChainId(1337)).unwrap();
        assert_eq!(found, Some((ChainId(1337), addr(4))));

        assert_eq!(env_binding_with(|_| None, ChainId(1)).unwrap(), None);
    }

    #[test]
    fn test_read_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPLOYMENT_FILE);
        assert_eq!(read_deployment(&path).unwrap(), None);

        std::fs::write(
            &path,
            format!(r#"{{"chainId": 11155111, "address": "{}"}}"#, addr(8)),
        )
        .unwrap();
        assert_eq!(
            read_deployment(&path).unwrap(),
            Some((ChainId(11155111), addr(8)))
        );

        std::fs::write(&path, "{").unwrap();
        assert!(read_deployment(&path).is_err());
    }

    #[test]
    fn test_collect_bindings_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPLOYMENT_FILE);
        std::fs::write(
            &path,
            format!(r#"{{"chainId": 1, "address": "{}"}}"#, addr(40)),
        )
        .unwrap();

        let mut cfg = MountConfig::default();
        cfg.stores.insert("1337".into(), addr(20));
        cfg.stores.insert("5".into(), addr(21));
        let env = |k: &str| match k {
            "CONTRACT_ADDRESS" => Some(addr(30).to_string()),
            "CHAIN_ID" => Some("5".to_string()),
            _ => None,
        };
        let specs = vec![format!("1337:{}", addr(10))];

        let bindings = collect_bindings(&cfg, &specs, env, Some(&path)).unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings.get(ChainId(1337)), Some(addr(10)));
        assert_eq!(bindings.get(ChainId(5)), Some(addr(21)));
        assert_eq!(bindings.get(ChainId(1)), Some(addr(40)));
    }

    #[test]
    fn test_collect_bindings_rejects_bad_spec() {
        let cfg = MountConfig::default();
        let err = collect_bindings(&cfg, &["1:zz".to_string()], |_| None, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
