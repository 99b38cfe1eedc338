use std::sync::Arc;

use derived_store::DerivedStore;
use tracing::{debug, info, warn};
use warp_core::{BlockTag, ContractRegistry, EventName, LogDecoder, LogSource, build_filter};

use crate::SyncError;

/// Historical backfill over bounded block ranges.
///
/// Each sub-range is fetched, decoded and merged together with its cursor advance in a
/// single store transaction, so a failed sub-range leaves nothing behind and can be
/// retried from scratch. Errors are returned to the caller without retrying.
#[derive(Clone)]
pub struct BulkSyncStrategy {
    source: Arc<dyn LogSource>,
    decoder: Arc<dyn LogDecoder>,
    registry: Arc<ContractRegistry>,
    store: DerivedStore,
    chunk_size: u64,
    events: Vec<EventName>,
}

impl BulkSyncStrategy {
    pub fn new(
        source: Arc<dyn LogSource>,
        decoder: Arc<dyn LogDecoder>,
        registry: Arc<ContractRegistry>,
        store: DerivedStore,
        chunk_size: u64,
    ) -> Result<Self, SyncError> {
        if chunk_size == 0 {
            return Err(SyncError::InvalidChunkSize);
        }
        let unresolved: Vec<EventName> = registry.unresolved_events().collect();
        if !unresolved.is_empty() {
            warn!(
                ?unresolved,
                "no contract address configured, these events will not be synced"
            );
        }
        let events = registry.known_events().collect();
        Ok(Self {
            source,
            decoder,
            registry,
            store,
            chunk_size,
            events,
        })
    }

    pub fn store(&self) -> &DerivedStore {
        &self.store
    }

    pub fn source(&self) -> &Arc<dyn LogSource> {
        &self.source
    }

    /// Event types whose cursors this strategy advances.
    pub fn events(&self) -> &[EventName] {
        &self.events
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Syncs `[from_block, to_block]` in order. Returns the number of records merged.
    /// An empty range is a no-op.
    pub async fn start(&self, from_block: u64, to_block: u64) -> Result<usize, SyncError> {
        if from_block > to_block {
            debug!(from_block, to_block, "nothing to sync");
            return Ok(0);
        }
        let mut merged = 0;
        let mut chunk_from = from_block;
        loop {
            let chunk_to = chunk_from
                .saturating_add(self.chunk_size - 1)
                .min(to_block);
            merged += self.sync_range(chunk_from, chunk_to).await?;
            if chunk_to >= to_block {
                break;
            }
            chunk_from = chunk_to + 1;
        }
        Ok(merged)
    }

    async fn sync_range(&self, from_block: u64, to_block: u64) -> Result<usize, SyncError> {
        let filter = build_filter(&self.registry, &self.events, from_block, to_block)?;
        let logs = self.source.get_logs(&filter).await?;
        let records = self.decoder.parse_logs(&logs)?;
        let header = self.source.get_block(BlockTag::Number(to_block)).await?;
        let stats = self.store.merge_events_and_advance(
            &records,
            &self.events,
            to_block,
            Some(&header),
        )?;
        info!(
            from_block,
            to_block,
            num_logs = logs.len(),
            applied = stats.applied,
            retracted = stats.retracted,
            "synced block range"
        );
        Ok(records.len())
    }
}
