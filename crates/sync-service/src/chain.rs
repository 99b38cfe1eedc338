use std::sync::Arc;

use derived_store::DerivedStore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use warp_core::{BlockTag, LogSource, SourceError};

use crate::SyncError;
use crate::bulk::BulkSyncStrategy;
use crate::types::ControllerConfig;

/// Keeps a store following the chain tip with [`BulkSyncStrategy`].
#[derive(Clone)]
pub struct SyncController {
    bulk: BulkSyncStrategy,
    config: ControllerConfig,
}

impl SyncController {
    pub fn new(bulk: BulkSyncStrategy, config: ControllerConfig) -> Self {
        Self { bulk, config }
    }

    pub fn store(&self) -> &DerivedStore {
        self.bulk.store()
    }

    pub fn source(&self) -> &Arc<dyn LogSource> {
        self.bulk.source()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Last block considered final.
    pub async fn safe_head(&self) -> Result<u64, SyncError> {
        let head = self.source().get_block_number().await?;
        Ok(head.saturating_sub(self.config.finality_depth))
    }

    /// Syncs from the lowest cursor (or the upload block) up to `highest`, or to the
    /// safe head when not given. Returns the last synced block, `None` when already
    /// up to date.
    pub async fn sync(&self, highest: Option<u64>) -> Result<Option<u64>, SyncError> {
        self.check_reorg().await?;

        let to_block = match highest {
            Some(block) => block,
            None => self.safe_head().await?,
        };
        let from_block = self
            .store()
            .min_cursor(self.bulk.events())?
            .map_or(self.config.upload_block, |cursor| cursor.saturating_add(1))
            .max(self.config.upload_block);
        if from_block > to_block {
            debug!(from_block, to_block, "already synced");
            return Ok(None);
        }

        let merged = self.bulk.start(from_block, to_block).await?;
        info!(from_block, to_block, merged, "sync complete");
        Ok(Some(to_block))
    }

    /// Rewinds the store when the block it last synced to is no longer on the chain.
    /// Returns whether a rewind happened.
    pub async fn check_reorg(&self) -> Result<bool, SyncError> {
        let Some(stored) = self.store().sync_head()? else {
            return Ok(false);
        };
        let canonical = match self.source().get_block(BlockTag::Number(stored.number)).await {
            Ok(header) => Some(header.hash),
            Err(SourceError::BlockNotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        if canonical == Some(stored.hash) {
            return Ok(false);
        }
        let rewind_to = stored.number.saturating_sub(self.config.reorg_depth);
        warn!(
            block = stored.number,
            stored_hash = %stored.hash,
            rewind_to,
            "sync head is no longer canonical, rewinding"
        );
        self.store().rewind(rewind_to)?;
        Ok(true)
    }

    /// Polls the chain every `poll_interval` until cancelled. Retrieval errors are
    /// logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        async {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        if let Err(err) = self.sync(None).await {
                            if err.is_rpc_throttled() {
                                warn!("rpc is throttled, will retry...");
                            } else {
                                warn!(?err, "sync failed, retrying...");
                            }
                        }
                    }
                }
            }
        }
        .instrument(tracing::info_span!("sync_tip"))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use alloy::primitives::B256;
    use local_db::DbConfig;
    use warp_core::ContractEventDecoder;
    use warp_core::testing::{self, AUGUR, AUGUR_TRADING, MemoryLogSource, TestChain, addr};

    use super::*;

    fn temp_store(name: &str) -> (DerivedStore, PathBuf) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!(
            "sync-chain-{name}-{}-{nanos}",
            std::process::id()
        ));
        let store = DerivedStore::open(DbConfig {
            root_dir: root.clone(),
        })
        .unwrap();
        (store, root)
    }

    fn controller(
        source: Arc<MemoryLogSource>,
        store: DerivedStore,
        config: ControllerConfig,
    ) -> SyncController {
        let registry = Arc::new(testing::test_registry());
        let bulk = BulkSyncStrategy::new(
            source,
            Arc::new(ContractEventDecoder::new(registry.clone())),
            registry,
            store,
            25,
        )
        .unwrap();
        SyncController::new(bulk, config)
    }

    #[tokio::test]
    async fn resumes_from_cursor_and_respects_finality() {
        let (store, root) = temp_store("resume");
        let mut chain = TestChain::new();
        chain.emit(5, AUGUR, testing::market_created(addr(0x10), addr(1), 0, &[], ""));
        chain.emit(70, AUGUR, testing::market_created(addr(0x11), addr(1), 0, &[], ""));
        chain.mine_to(100);
        let source = MemoryLogSource::new(chain);
        let sync = controller(
            source.clone(),
            store.clone(),
            ControllerConfig {
                upload_block: 3,
                finality_depth: 40,
                ..ControllerConfig::default()
            },
        );

        assert_eq!(sync.sync(None).await.unwrap(), Some(60));
        assert_eq!(store.markets().unwrap().len(), 1);
        assert_eq!(sync.sync(Some(60)).await.unwrap(), None);

        source.with_chain(|chain| chain.mine_to(120));
        let calls = source.log_calls();
        assert_eq!(sync.sync(None).await.unwrap(), Some(80));
        assert_eq!(source.log_calls(), calls + 1);
        assert_eq!(store.markets().unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn reorg_below_sync_head_rewinds_and_resyncs() {
        let (store, root) = temp_store("reorg");
        let mut chain = TestChain::new();
        chain.emit(10, AUGUR, testing::market_created(addr(0x10), addr(1), 0, &[], ""));
        chain.emit(
            30,
            AUGUR_TRADING,
            testing::order_created(addr(0x10), B256::repeat_byte(4), addr(2), 1, 0, 5, 5),
        );
        chain.mine_to(40);
        let source = MemoryLogSource::new(chain);
        let sync = controller(
            source.clone(),
            store.clone(),
            ControllerConfig {
                reorg_depth: 15,
                ..ControllerConfig::default()
            },
        );
        sync.sync(None).await.unwrap();
        assert!(store.order(&B256::repeat_byte(4)).unwrap().is_some());

        source.with_chain(|chain| {
            chain.reorg_to(20);
            chain.mine_to(45);
        });
        assert!(sync.check_reorg().await.unwrap());
        assert!(store.order(&B256::repeat_byte(4)).unwrap().is_none());
        assert_eq!(store.min_cursor(&[warp_core::EventName::OrderCreated]).unwrap(), Some(25));
        assert!(!sync.check_reorg().await.unwrap());

        assert_eq!(sync.sync(None).await.unwrap(), Some(45));
        assert!(store.order(&B256::repeat_byte(4)).unwrap().is_none());
        assert_eq!(store.markets().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (store, root) = temp_store("run");
        let mut chain = TestChain::new();
        chain.mine_to(10);
        let source = MemoryLogSource::new(chain);
        let sync = controller(
            source,
            store.clone(),
            ControllerConfig {
                poll_interval: Duration::from_millis(10),
                ..ControllerConfig::default()
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let sync = sync.clone();
            let cancel = cancel.clone();
            async move { sync.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.cursor(warp_core::EventName::MarketCreated).unwrap(), Some(10));

        let _ = std::fs::remove_dir_all(root);
    }
}
