//! Discovery of which chain each RPC endpoint serves.
//!
//! Every configured URL is asked for its chain id at startup. The result is
//! an immutable [`EndpointTable`] published through [`EndpointRegistry`];
//! readers clone the `Arc` and never block a re-probe.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethfs_types::ChainId;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::RpcConfig;
use crate::error::{ClientError, ClientResult};
use crate::retry::{retry, ExponentialBackoff};

/// Asks an endpoint which chain it serves.
#[async_trait]
pub trait ChainIdProbe: Send + Sync {
    async fn chain_id(&self, url: &str) -> ClientResult<ChainId>;
}

/// `eth_chainId` over HTTP JSON-RPC.
pub struct HttpChainIdProbe {
    client: reqwest::Client,
}

impl HttpChainIdProbe {
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChainIdProbe for HttpChainIdProbe {
    async fn chain_id(&self, url: &str) -> ClientResult<ChainId> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": "eth_chainId",
            "params": [],
            "id": 1,
        });
        let rsp = self.client.post(url).json(&request).send().await?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(ClientError::Unavailable(format!("{} returned HTTP {}", url, status)));
        }
        let body: Value = rsp
            .json()
            .await
            .map_err(|e| ClientError::BadResponse(format!("{}: {}", url, e)))?;
        parse_chain_id_response(&body)
    }
}

/// Extract the chain id from an `eth_chainId` JSON-RPC response body.
pub fn parse_chain_id_response(body: &Value) -> ClientResult<ChainId> {
    if let Some(err) = body.get("error") {
        return Err(ClientError::Rejected(format!("eth_chainId: {}", err)));
    }
    let result = body
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::BadResponse(format!("missing result in {}", body)))?;
    let digits = result
        .strip_prefix("0x")
        .ok_or_else(|| ClientError::BadResponse(format!("chain id is not hex: {}", result)))?;
    u64::from_str_radix(digits, 16)
        .map(ChainId)
        .map_err(|e| ClientError::BadResponse(format!("chain id {}: {}", result, e)))
}

/// Result of one probe round.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    /// First endpoint found for each chain.
    pub endpoints: BTreeMap<ChainId, String>,
    /// Endpoints that never answered.
    pub unreachable: Vec<String>,
    pub last_refresh: Instant,
}

impl EndpointTable {
    pub fn empty() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            unreachable: Vec::new(),
            last_refresh: Instant::now(),
        }
    }

    pub fn endpoint(&self, chain: ChainId) -> Option<&str> {
        self.endpoints.get(&chain).map(String::as_str)
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.endpoints.keys().copied().collect()
    }
}

/// Thread-safe handle to the current endpoint table.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    inner: Arc<RwLock<Arc<EndpointTable>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(EndpointTable::empty()))),
        }
    }

    pub fn get(&self) -> Arc<EndpointTable> {
        Arc::clone(&*self.inner.read())
    }

    pub fn update(&self, table: EndpointTable) {
        *self.inner.write() = Arc::new(table);
    }

    pub fn endpoint(&self, chain: ChainId) -> Option<String> {
        self.get().endpoint(chain).map(str::to_string)
    }

    /// Probe `config`'s endpoints in order and publish the result. The first
    /// URL reporting a chain id keeps it; unreachable URLs are skipped.
    pub async fn probe(&self, config: &RpcConfig, probe: &dyn ChainIdProbe) -> Arc<EndpointTable> {
        let mut table = EndpointTable::empty();
        for url in config.effective_urls() {
            let backoff = ExponentialBackoff::for_probe(config);
            match retry(backoff, "eth_chainId", || probe.chain_id(&url)).await {
                Ok(chain) => {
                    if let Some(existing) = table.endpoints.get(&chain) {
                        debug!(%url, %chain, %existing, "chain already served, endpoint ignored");
                        continue;
                    }
                    info!(%url, %chain, "rpc endpoint discovered");
                    table.endpoints.insert(chain, url);
                }
                Err(e) => {
                    warn!(%url, error = %e, "rpc endpoint unreachable, skipped");
                    table.unreachable.push(url);
                }
            }
        }
        self.update(table);
        self.get()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
