//! Checkpoint builder: exports the derived store as content-addressed snapshots.

mod chunks;
mod controller;
mod tree;

pub use chunks::{ChunkPolicy, PlannedChunk, plan_chunks};
pub use controller::{WARP_ROOT_KEY, WarpController};

use content_store::ContentError;
use derived_store::StoreError;
use sync_service::SyncError;
use warp_core::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum WarpError {
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
    #[error("log source error: {0}")]
    Source(#[from] SourceError),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid block range {begin}..={end}")]
    InvalidRange { begin: u64, end: u64 },
    #[error("invalid checkpoint entry {0}")]
    InvalidCheckpointName(String),
}

impl From<StoreError> for WarpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidQuery(reason) => WarpError::InvalidQuery(reason),
            other => WarpError::Store(other),
        }
    }
}
