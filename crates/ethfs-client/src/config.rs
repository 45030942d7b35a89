//! RPC endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoint used when no URL is configured anywhere.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Endpoints to probe for their chain id. Empty means the local default.
    pub urls: Vec<String>,

    /// Timeout of a single probe request.
    #[serde(with = "secs_f64")]
    pub probe_timeout: Duration,

    #[serde(with = "secs_f64")]
    pub probe_retry_init_wait: Duration,

    #[serde(with = "secs_f64")]
    pub probe_retry_max_wait: Duration,

    /// Total time spent retrying one endpoint before it is skipped.
    #[serde(with = "secs_f64")]
    pub probe_retry_total_time: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            probe_timeout: Duration::from_secs(5),
            probe_retry_init_wait: Duration::from_millis(500),
            probe_retry_max_wait: Duration::from_secs(2),
            probe_retry_total_time: Duration::from_secs(10),
        }
    }
}

impl RpcConfig {
    /// URLs to probe, falling back to [`DEFAULT_RPC_URL`].
    pub fn effective_urls(&self) -> Vec<String> {
        if self.urls.is_empty() {
            vec![DEFAULT_RPC_URL.to_string()]
        } else {
            self.urls.clone()
        }
    }
}

/// Collect `RPC_URL`, `RPC_URL_1`, `RPC_URL_2`, ... from `lookup`. The
/// numbered list stops at the first missing number.
pub fn rpc_urls_from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut urls = Vec::new();
    if let Some(url) = lookup("RPC_URL") {
        urls.push(url);
    }
    for n in 1.. {
        match lookup(&format!("RPC_URL_{}", n)) {
            Some(url) => urls.push(url),
            None => break,
        }
    }
    urls.retain(|u| !u.trim().is_empty());
    urls
}

pub fn rpc_urls_from_env() -> Vec<String> {
    rpc_urls_from_env_with(|key| std::env::var(key).ok())
}

/// Durations as fractional seconds in config files.
mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
