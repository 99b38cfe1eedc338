use std::fmt;
use std::time::Duration;

use alloy::primitives::B256;
use alloy_provider::{ConnectionConfig, DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{BlockNumberOrTag, Log};
use alloy_transport::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::filter::LogFilter;

const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub parent_hash: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "{n}"),
            BlockTag::Latest => f.write_str("latest"),
        }
    }
}

impl From<BlockTag> for BlockNumberOrTag {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Number(n) => BlockNumberOrTag::Number(n),
            BlockTag::Latest => BlockNumberOrTag::Latest,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("rpc: {0}")]
    Rpc(#[from] TransportError),
    #[error("block {0} not found")]
    BlockNotFound(BlockTag),
    #[error("log source unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the chain: logs, headers and the current tip.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, SourceError>;

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, SourceError>;

    async fn get_block_number(&self) -> Result<u64, SourceError>;
}

/// [`LogSource`] backed by a JSON-RPC provider.
#[derive(Clone)]
pub struct RpcLogSource {
    provider: DynProvider,
}

impl RpcLogSource {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    pub async fn connect(url: &Url) -> Result<Self, TransportError> {
        build_provider(url).await.map(Self::new)
    }
}

impl fmt::Debug for RpcLogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcLogSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, SourceError> {
        debug!(
            from = filter.from_block,
            to = filter.to_block,
            addresses = filter.addresses.len(),
            "eth_getLogs"
        );
        Ok(self.provider.get_logs(&filter.to_rpc()).await?)
    }

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, SourceError> {
        let block = self
            .provider
            .get_block_by_number(tag.into())
            .await?
            .ok_or(SourceError::BlockNotFound(tag))?;
        Ok(BlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
            parent_hash: block.header.parent_hash,
        })
    }

    async fn get_block_number(&self) -> Result<u64, SourceError> {
        Ok(self.provider.get_block_number().await?)
    }
}

/// HTTP endpoints go through a reqwest client with a connect timeout; anything else
/// (ws, ipc) uses the retrying connection config.
pub async fn build_provider(url: &Url) -> Result<DynProvider, TransportError> {
    match url.scheme() {
        "http" | "https" => {
            let client = reqwest::Client::builder()
                .connect_timeout(RPC_CONNECT_TIMEOUT)
                .build()
                .map_err(TransportErrorKind::custom)?;
            Ok(ProviderBuilder::new()
                .connect_reqwest(client, url.clone())
                .erased())
        }
        _ => {
            let config = ConnectionConfig::new()
                .with_max_retries(20)
                .with_retry_interval(Duration::from_secs(5));
            ProviderBuilder::new()
                .connect_with_config(url.as_str(), config)
                .await
                .map(Provider::erased)
        }
    }
}
