use std::sync::Arc;
use std::time::{Duration, Instant};

use content_store::{ContentAddress, ContentStore, GatewayContentStore, LocalContentStore};
use derived_store::DerivedStore;
use eyre::{Result, WrapErr, eyre};
use sync_service::{SyncController, WarpSyncStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use url::Url;
use warp::{WarpController, WarpError};

/// Follows the chain and periodically republishes the snapshot tree.
pub struct Node {
    pub store: DerivedStore,
    pub content: Arc<LocalContentStore>,
    pub gateway: Option<Url>,
    pub sync: Option<SyncController>,
    pub warp: Option<WarpController>,
    pub poll_interval: Duration,
    pub checkpoint_interval: Duration,
}

impl Node {
    /// Hydrates an empty database from the snapshot at `root`, fetching it through the
    /// gateway when it is not held locally.
    pub async fn warm_start(&self, root: &str) -> Result<()> {
        if let Some(head) = self.store.sync_head()? {
            info!(block = head.number, "database already synced, skipping warp sync");
            return Ok(());
        }
        let root: ContentAddress = root.parse().wrap_err("parse warp root")?;

        if !self.content.has_object(&root).await? {
            let gateway = self.gateway.clone().ok_or_else(|| {
                eyre!("warp root {root} is not stored locally and no gateway is set")
            })?;
            let gateway = GatewayContentStore::new(gateway)?;
            let copied = content_store::replicate(&gateway, self.content.as_ref(), &root)
                .await
                .wrap_err("fetch warp root")?;
            self.content.pin(&root).await?;
            info!(%root, copied, "fetched snapshot");
        }

        let end = WarpSyncStrategy::new(self.content.clone(), self.store.clone())
            .start(&root)
            .await
            .wrap_err("warp sync")?;
        info!(%root, end, "warm started from snapshot");
        Ok(())
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut last_checkpoint: Option<Instant> = None;
        async {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {
                        if let Some(sync) = &self.sync
                            && let Err(err) = sync.sync(None).await
                        {
                            if err.is_rpc_throttled() {
                                warn!("rpc is throttled, will retry...");
                            } else {
                                warn!(?err, "sync failed, retrying...");
                            }
                            continue;
                        }
                        let recent = last_checkpoint
                            .is_some_and(|at| at.elapsed() < self.checkpoint_interval);
                        if recent {
                            continue;
                        }
                        match self.create_checkpoints().await {
                            Ok(Some(root)) => {
                                debug!(%root, "snapshot published");
                                last_checkpoint = Some(Instant::now());
                            }
                            Ok(None) => {}
                            Err(err) => warn!(?err, "checkpoint pass failed"),
                        }
                    }
                }
            }
        }
        .instrument(tracing::info_span!("node"))
        .await;
        info!("node stopped");
    }

    async fn create_checkpoints(&self) -> Result<Option<ContentAddress>, WarpError> {
        let Some(warp) = &self.warp else {
            return Ok(None);
        };
        let Some(head) = self.store.sync_head()? else {
            debug!("nothing synced yet");
            return Ok(None);
        };
        Ok(Some(warp.create_all_checkpoints(head).await?))
    }
}
