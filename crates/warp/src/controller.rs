use std::sync::Arc;

use content_store::{
    ContentAddress, ContentNode, ContentStore, DirEntry, GatewayContentStore, parse_gateway_url,
    replicate,
};
use derived_store::{DerivedStore, block_header, header_meta};
use local_db::{CheckpointMeta, ContentMeta, now_epoch_secs};
use sync_service::snapshot::{CHECKPOINTS_DIR, CheckpointEntry, to_ndjson};
use tracing::{debug, info, warn};
use warp_core::{BlockHeader, BlockTag, EventName, EventRecord, LogSource, SourceError};

use crate::chunks::{ChunkPolicy, plan_chunks};
use crate::tree::build_snapshot;
use crate::WarpError;

/// Meta key holding the hex address of the latest snapshot root.
pub const WARP_ROOT_KEY: &str = "warp_root";

/// Builds checkpoints over the derived store and publishes them as one snapshot tree.
///
/// Sync and checkpoint building are expected to be sequenced by the caller; the builder
/// reads the whole store while a pass runs.
#[derive(Clone)]
pub struct WarpController {
    store: DerivedStore,
    content: Arc<dyn ContentStore>,
    source: Arc<dyn LogSource>,
    upload_block: u64,
    policy: ChunkPolicy,
}

impl WarpController {
    pub fn new(
        store: DerivedStore,
        content: Arc<dyn ContentStore>,
        source: Arc<dyn LogSource>,
        upload_block: u64,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            store,
            content,
            source,
            upload_block,
            policy,
        }
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    /// Extends (or after a rollback, trims and rebuilds) the checkpoint set up to
    /// `new_end`, writes the snapshot tree and returns its root address.
    ///
    /// Content is written before checkpoint records, so an interrupted pass leaves at
    /// most unreferenced objects behind.
    pub async fn create_all_checkpoints(
        &self,
        new_end: BlockHeader,
    ) -> Result<ContentAddress, WarpError> {
        let tip = new_end.number;
        let existing = self.store.checkpoints()?;

        let mut kept = Vec::with_capacity(existing.len());
        let mut removed = Vec::new();
        for checkpoint in existing {
            if checkpoint.end.number > tip {
                removed.push(checkpoint.id);
            } else {
                kept.push(checkpoint);
            }
        }
        // A reorg below the end of a kept checkpoint leaves its end off the chain. Once
        // an end is canonical, everything before it is too.
        while let Some(last) = kept.last() {
            if self.is_canonical(&block_header(&last.end), &new_end).await? {
                break;
            }
            if let Some(orphaned) = kept.pop() {
                warn!(
                    begin = orphaned.begin.number,
                    end = orphaned.end.number,
                    "checkpoint end is no longer canonical"
                );
                removed.push(orphaned.id);
            }
        }
        if !removed.is_empty() {
            info!(tip, removed = removed.len(), "rolling back checkpoints past new tip");
        }
        if kept.last().is_some_and(|last| !last.sealed)
            && let Some(reopened) = kept.pop()
        {
            debug!(begin = reopened.begin.number, "reopening unsealed checkpoint");
            removed.push(reopened.id);
        }

        let resume_from = kept
            .last()
            .map_or(self.upload_block, |last| last.end.number + 1);
        let mut next_id = kept.iter().map(|c| c.id).max().map_or(1, |id| id + 1);
        let mut added = Vec::new();
        if resume_from <= tip {
            let counts = self.store.event_block_counts(resume_from, tip)?;
            for chunk in plan_chunks(resume_from, tip, &counts, self.policy) {
                let begin = self.header(chunk.begin, &new_end).await?;
                let end = self.header(chunk.end, &new_end).await?;
                let (entry, event_count) = self.export_range(&begin, &end).await?;
                added.push(CheckpointMeta {
                    id: next_id,
                    begin: header_meta(&begin),
                    end: header_meta(&end),
                    content: Some(ContentMeta {
                        name: begin.number.to_string(),
                        hash: entry.hash.to_hex(),
                        size: entry.size,
                    }),
                    sealed: chunk.sealed,
                    event_count,
                    created_at: now_epoch_secs().map_err(derived_store::StoreError::from)?,
                });
                next_id += 1;
            }
        }

        let checkpoints: Vec<CheckpointEntry> = kept
            .iter()
            .chain(&added)
            .map(checkpoint_entry)
            .collect::<Result<_, _>>()?;
        let begin = checkpoints.first().map_or(new_end, |c| c.begin);
        let (tree, index) = build_snapshot(&self.store, begin, new_end, checkpoints)?;
        let root = self.content.add(&tree).await?;

        self.store.replace_checkpoints(&removed, &added)?;
        self.store.put_meta(WARP_ROOT_KEY, &root.hash.to_hex())?;
        info!(
            root = %root.hash,
            tip,
            checkpoints = index.checkpoints.len(),
            added = added.len(),
            markets = index.markets,
            accounts = index.accounts,
            "created checkpoints"
        );
        Ok(root.hash)
    }

    /// Exports every record in `[begin, end]` as newline-delimited JSON.
    pub async fn create_checkpoint(
        &self,
        begin: &BlockHeader,
        end: &BlockHeader,
    ) -> Result<DirEntry, WarpError> {
        Ok(self.export_range(begin, end).await?.0)
    }

    /// Chunk boundaries published under `checkpoints/` of a snapshot, ascending.
    pub async fn get_available_checkpoints_by_hash(
        &self,
        root: &ContentAddress,
    ) -> Result<Vec<u64>, WarpError> {
        let mut blocks = self
            .content
            .ls(root, CHECKPOINTS_DIR)
            .await?
            .into_iter()
            .map(|entry| {
                entry
                    .name
                    .parse::<u64>()
                    .map_err(|_| WarpError::InvalidCheckpointName(entry.name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        blocks.sort_unstable();
        Ok(blocks)
    }

    /// Records of `event` in `[from_block, to_block]` of the live store where any of
    /// `fields` equals `value`.
    pub fn query_db(
        &self,
        event: EventName,
        fields: &[&str],
        value: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, WarpError> {
        Ok(self.store.query(event, fields, value, from_block, to_block)?)
    }

    /// First and last block covered by recorded checkpoints.
    pub fn get_checkpoint_block_range(&self) -> Result<Option<(u64, u64)>, WarpError> {
        let checkpoints = self.store.checkpoints()?;
        Ok(checkpoints
            .first()
            .zip(checkpoints.last())
            .map(|(first, last)| (first.begin.number, last.end.number)))
    }

    /// Root address of the latest snapshot built by this store.
    pub fn latest_root(&self) -> Result<Option<ContentAddress>, WarpError> {
        let Some(hex) = self.store.meta::<String>(WARP_ROOT_KEY)? else {
            return Ok(None);
        };
        Ok(Some(hex.parse()?))
    }

    /// Retains content published behind a gateway URL (`https://host/<prefix>/<address>`)
    /// by copying it into the local store and pinning it there.
    pub async fn pin_hash_by_gateway_url(&self, url: &str) -> Result<ContentAddress, WarpError> {
        let result = self.pin_from_gateway(url).await;
        if let Err(err) = &result {
            warn!(url, ?err, "failed to pin content");
        }
        result
    }

    async fn pin_from_gateway(&self, url: &str) -> Result<ContentAddress, WarpError> {
        let (base, hash) = parse_gateway_url(url)?;
        let gateway = GatewayContentStore::new(base)?;
        self.pin_hash_from(&gateway, &hash).await
    }

    /// Copies the graph under `hash` from `source` and pins it.
    pub async fn pin_hash_from(
        &self,
        source: &dyn ContentStore,
        hash: &ContentAddress,
    ) -> Result<ContentAddress, WarpError> {
        let copied = replicate(source, self.content.as_ref(), hash).await?;
        self.content.pin(hash).await?;
        info!(%hash, copied, "pinned content");
        Ok(*hash)
    }

    async fn export_range(
        &self,
        begin: &BlockHeader,
        end: &BlockHeader,
    ) -> Result<(DirEntry, u64), WarpError> {
        if begin.number > end.number {
            return Err(WarpError::InvalidRange {
                begin: begin.number,
                end: end.number,
            });
        }
        let records = self.store.events_in_range(begin.number, end.number)?;
        let entry = self
            .content
            .add(&ContentNode::file(to_ndjson(&records)?))
            .await?;
        debug!(
            begin = begin.number,
            end = end.number,
            records = records.len(),
            hash = %entry.hash,
            "exported checkpoint"
        );
        Ok((entry, records.len() as u64))
    }

    async fn is_canonical(
        &self,
        header: &BlockHeader,
        tip: &BlockHeader,
    ) -> Result<bool, WarpError> {
        if header.number == tip.number {
            return Ok(header.hash == tip.hash);
        }
        match self.source.get_block(BlockTag::Number(header.number)).await {
            Ok(canonical) => Ok(canonical.hash == header.hash),
            Err(SourceError::BlockNotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn header(&self, number: u64, tip: &BlockHeader) -> Result<BlockHeader, WarpError> {
        if number == tip.number {
            return Ok(*tip);
        }
        Ok(self.source.get_block(BlockTag::Number(number)).await?)
    }
}

fn checkpoint_entry(meta: &CheckpointMeta) -> Result<CheckpointEntry, WarpError> {
    let content = meta
        .content
        .as_ref()
        .ok_or_else(|| WarpError::InvalidCheckpointName(meta.begin.number.to_string()))?;
    Ok(CheckpointEntry {
        id: meta.id,
        begin: block_header(&meta.begin),
        end: block_header(&meta.end),
        hash: content.hash.parse()?,
        size: content.size,
        event_count: meta.event_count,
        sealed: meta.sealed,
    })
}
