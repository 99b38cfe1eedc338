use std::sync::Arc;

use alloy::primitives::Address;
use content_store::{ContentAddress, ContentStore, NodeKind};
use derived_store::{DerivedStore, RollupRow};
use tracing::{info, warn};
use warp_core::events::sort_records;
use warp_core::{BlockHeader, EventName, EventRecord};

use crate::SyncError;
use crate::snapshot::{
    INDEX_FILE, RootIndex, SNAPSHOT_VERSION, TABLES_DIR, VERSION_FILE, account_path, market_path,
    parse_ndjson, table_path,
};

/// Hydrates a store from a published snapshot. Reads are limited to the snapshot and
/// writes only add to the destination store.
#[derive(Clone)]
pub struct WarpSyncStrategy {
    content: Arc<dyn ContentStore>,
    store: DerivedStore,
}

impl WarpSyncStrategy {
    pub fn new(content: Arc<dyn ContentStore>, store: DerivedStore) -> Self {
        Self { content, store }
    }

    /// Merges the bundle of one market. Cursors are left alone since the rest of the
    /// chain is not covered. Returns the highest block in the bundle.
    pub async fn sync_market(
        &self,
        root: &ContentAddress,
        market: &Address,
    ) -> Result<u64, SyncError> {
        self.sync_bundle(root, &market_path(market)).await
    }

    /// Same as [`Self::sync_market`] for one account.
    pub async fn sync_account(
        &self,
        root: &ContentAddress,
        account: &Address,
    ) -> Result<u64, SyncError> {
        self.sync_bundle(root, &account_path(account)).await
    }

    /// Full hydration from every table in the snapshot, merged in chain order. All
    /// cursors are set to the snapshot end, which is returned; the tail after it is left
    /// to bulk sync.
    pub async fn start(&self, root: &ContentAddress) -> Result<u64, SyncError> {
        let index = self.root_index(root).await?;
        let mut records = Vec::new();
        for entry in self.content.ls(root, TABLES_DIR).await? {
            if entry.kind != NodeKind::Dir {
                continue;
            }
            let Ok(name) = entry.name.parse::<EventName>() else {
                warn!(table = %entry.name, "skipping unknown snapshot table");
                continue;
            };
            let table = self.content.cat(root, &table_path(name)).await?;
            records.extend(parse_ndjson(&table)?);
        }
        sort_records(&mut records);

        let stats = self.store.merge_events_and_advance(
            &records,
            &EventName::ALL,
            index.end.number,
            Some(&index.end),
        )?;
        info!(
            %root,
            applied = stats.applied,
            end_block = index.end.number,
            "warp synced from snapshot"
        );
        Ok(index.end.number)
    }

    /// Checks the version marker and reads the root manifest.
    pub async fn root_index(&self, root: &ContentAddress) -> Result<RootIndex, SyncError> {
        let version = self.content.cat(root, VERSION_FILE).await?;
        let version = String::from_utf8_lossy(&version).trim().to_string();
        if version != SNAPSHOT_VERSION {
            return Err(SyncError::UnsupportedVersion(version));
        }
        Ok(serde_json::from_slice(&self.content.cat(root, INDEX_FILE).await?)?)
    }

    /// Last block covered by the snapshot.
    pub async fn snapshot_end(&self, root: &ContentAddress) -> Result<BlockHeader, SyncError> {
        Ok(self.root_index(root).await?.end)
    }

    async fn sync_bundle(&self, root: &ContentAddress, path: &str) -> Result<u64, SyncError> {
        self.root_index(root).await?;
        let row: RollupRow = serde_json::from_slice(&self.content.cat(root, path).await?)?;
        let events: Vec<EventRecord> = row.events.into_iter().filter(|e| !e.removed).collect();
        let stats = self.store.merge_events(&events)?;
        let last_block = events.iter().map(|e| e.block_number).max().unwrap_or(0);
        info!(%root, path, applied = stats.applied, last_block, "warp synced bundle");
        Ok(last_block)
    }
}
