pub mod bulk;
pub mod chain;
pub mod snapshot;
pub mod types;
pub mod warp_sync;

use alloy_transport::TransportError;
use content_store::ContentError;
use derived_store::StoreError;
use warp_core::{DecodeError, FilterError, SourceError};

pub use bulk::BulkSyncStrategy;
pub use chain::SyncController;
pub use types::{ControllerConfig, DEFAULT_REORG_DEPTH};
pub use warp_sync::WarpSyncStrategy;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("log source error: {0}")]
    Source(#[from] SourceError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
    #[error("snapshot json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0:?}")]
    UnsupportedVersion(String),
    #[error("chunk size must be positive")]
    InvalidChunkSize,
}

impl SyncError {
    pub fn is_rpc_throttled(&self) -> bool {
        match self {
            Self::Source(SourceError::Rpc(TransportError::ErrorResp(resp))) => {
                resp.message.contains("limit exceeded")
            }
            Self::Source(SourceError::Rpc(TransportError::Transport(resp))) => resp
                .as_http_error()
                .is_some_and(|err| err.status == 429 || err.body.contains("limit exceeded")),
            _ => false,
        }
    }
}
