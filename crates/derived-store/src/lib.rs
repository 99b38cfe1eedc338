//! Derived Store: relational rows materialized from event records.
//!
//! Every accepted record is kept in a per-event table and contributes to one or more
//! rollup rows (markets, orders, accounts, profit/loss, token balances). A rollup row holds
//! its contributing records and a view folded from them, so applying a record twice is a
//! no-op and a `removed` delivery restores the row exactly as it was before.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use local_db::{
    CheckpointMeta, CursorMeta, DbConfig, DbError, DbStore, DbWriteTxn, HeaderMeta, Table,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use warp_core::events::sort_records;
use warp_core::{BlockHeader, EventName, EventRecord, LogId};

mod query;
mod rollup;
mod views;

pub use query::{record_matches, validate_fields};
pub use rollup::{
    Collection, RollupRow, RollupView, address_key, order_key, profit_loss_key, rollup_keys,
    storage_key, token_balance_key,
};
pub use views::{
    AccountView, InitialReport, MarketExtraInfo, MarketInfo, MarketType, MarketView, OrderState,
    OrderType, OrderView, OutcomeLiquidity, ProfitLossView, TokenBalanceView,
};

const SYNC_HEAD_KEY: &str = "sync_head";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(#[from] DbError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Outcome of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub applied: usize,
    pub duplicates: usize,
    pub retracted: usize,
    /// Removals of records that were never applied.
    pub ignored: usize,
    pub rows_written: usize,
    pub rows_deleted: usize,
}

#[derive(Debug, Clone)]
pub struct DerivedStore {
    db: Arc<DbStore>,
}

impl DerivedStore {
    pub fn new(db: Arc<DbStore>) -> Self {
        Self { db }
    }

    pub fn open(config: DbConfig) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(DbStore::open(config)?)))
    }

    pub fn db(&self) -> &Arc<DbStore> {
        &self.db
    }

    /// Applies a batch without touching cursors.
    pub fn merge_events(&self, events: &[EventRecord]) -> Result<MergeStats, StoreError> {
        let mut txn = self.db.write()?;
        let stats = apply(&mut txn, events)?;
        txn.commit()?;
        log_stats(&stats);
        Ok(stats)
    }

    /// Applies a batch and advances the cursors of `names` to `to_block` in the same
    /// transaction. If anything fails, neither rows nor cursors change. Cursors and the
    /// sync head only move forward.
    pub fn merge_events_and_advance(
        &self,
        events: &[EventRecord],
        names: &[EventName],
        to_block: u64,
        head: Option<&BlockHeader>,
    ) -> Result<MergeStats, StoreError> {
        let mut txn = self.db.write()?;
        let stats = apply(&mut txn, events)?;
        advance_cursors(&mut txn, names, to_block)?;
        if let Some(head) = head {
            let current: Option<BlockHeader> = txn.get(Table::Meta, SYNC_HEAD_KEY)?;
            if current.is_none_or(|current| current.number <= head.number) {
                txn.put(Table::Meta, SYNC_HEAD_KEY, head)?;
            }
        }
        txn.commit()?;
        log_stats(&stats);
        Ok(stats)
    }

    /// Retracts every record above `to_block` and lowers cursors to it. Used when the
    /// chain the store was synced from no longer exists.
    pub fn rewind(&self, to_block: u64) -> Result<MergeStats, StoreError> {
        let retracted: Vec<EventRecord> = self
            .events_in_range(to_block.saturating_add(1), u64::MAX)?
            .iter()
            .map(EventRecord::retracted)
            .collect();
        let mut txn = self.db.write()?;
        let stats = apply(&mut txn, &retracted)?;
        for (name, cursor) in txn.scan::<CursorMeta>(Table::Cursors, "")? {
            if cursor.block > to_block {
                txn.put_cursor(&name, to_block)?;
            }
        }
        txn.delete(Table::Meta, SYNC_HEAD_KEY)?;
        txn.commit()?;
        info!(to_block, retracted = stats.retracted, "rewound derived store");
        Ok(stats)
    }

    pub fn cursor(&self, name: EventName) -> Result<Option<u64>, StoreError> {
        Ok(self.db.get_cursor(name.as_str())?.map(|c| c.block))
    }

    pub fn cursors(&self) -> Result<BTreeMap<EventName, u64>, StoreError> {
        Ok(self
            .db
            .list_cursors()?
            .into_iter()
            .filter_map(|(name, meta)| name.parse().ok().map(|name| (name, meta.block)))
            .collect())
    }

    /// Lowest cursor among `names`; `None` if any of them has never advanced.
    pub fn min_cursor(&self, names: &[EventName]) -> Result<Option<u64>, StoreError> {
        let cursors = self.cursors()?;
        Ok(names
            .iter()
            .map(|name| cursors.get(name).copied())
            .collect::<Option<Vec<_>>>()
            .and_then(|blocks| blocks.into_iter().min()))
    }

    pub fn set_cursors(&self, names: &[EventName], block: u64) -> Result<(), StoreError> {
        let mut txn = self.db.write()?;
        advance_cursors(&mut txn, names, block)?;
        txn.commit()?;
        Ok(())
    }

    /// Header of the last block a sync batch ended on.
    pub fn sync_head(&self) -> Result<Option<BlockHeader>, StoreError> {
        Ok(self.db.get(Table::Meta, SYNC_HEAD_KEY)?)
    }

    pub fn meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.db.get(Table::Meta, key)?)
    }

    pub fn put_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut txn = self.db.write()?;
        txn.put(Table::Meta, key, value)?;
        txn.commit()?;
        Ok(())
    }

    pub fn rollup(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<RollupRow>, StoreError> {
        Ok(self.db.get(Table::Rollups, &storage_key(collection, key))?)
    }

    pub fn rollups(&self, collection: Collection) -> Result<Vec<RollupRow>, StoreError> {
        self.rollups_with_prefix(collection, "")
    }

    fn rollups_with_prefix(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<RollupRow>, StoreError> {
        let rows: Vec<(String, RollupRow)> = self
            .db
            .read()?
            .scan(Table::Rollups, &storage_key(collection, prefix))?;
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    pub fn market(&self, market: &Address) -> Result<Option<MarketView>, StoreError> {
        Ok(self
            .rollup(Collection::Markets, &address_key(market))?
            .and_then(|row| match row.view {
                Some(RollupView::Market(view)) => Some(view),
                _ => None,
            }))
    }

    pub fn markets(&self) -> Result<Vec<MarketView>, StoreError> {
        Ok(self
            .rollups(Collection::Markets)?
            .into_iter()
            .filter_map(|row| match row.view {
                Some(RollupView::Market(view)) => Some(view),
                _ => None,
            })
            .collect())
    }

    pub fn order(&self, order_id: &B256) -> Result<Option<OrderView>, StoreError> {
        Ok(self
            .rollup(Collection::Orders, &order_key(order_id))?
            .and_then(|row| match row.view {
                Some(RollupView::Order(view)) => Some(view),
                _ => None,
            }))
    }

    /// Orders, optionally restricted to one market.
    pub fn orders(&self, market: Option<&Address>) -> Result<Vec<OrderView>, StoreError> {
        Ok(self
            .rollups(Collection::Orders)?
            .into_iter()
            .filter_map(|row| match row.view {
                Some(RollupView::Order(view)) => Some(view),
                _ => None,
            })
            .filter(|order| market.is_none_or(|m| order.market == *m))
            .collect())
    }

    pub fn account(&self, account: &Address) -> Result<Option<AccountView>, StoreError> {
        Ok(self
            .rollup(Collection::Accounts, &address_key(account))?
            .and_then(|row| match row.view {
                Some(RollupView::Account(view)) => Some(view),
                _ => None,
            }))
    }

    pub fn profit_loss(
        &self,
        account: &Address,
        market: &Address,
    ) -> Result<Vec<ProfitLossView>, StoreError> {
        let prefix = format!("{account:#x}|{market:#x}|");
        Ok(self
            .rollups_with_prefix(Collection::ProfitLoss, &prefix)?
            .into_iter()
            .filter_map(|row| match row.view {
                Some(RollupView::ProfitLoss(view)) => Some(view),
                _ => None,
            })
            .collect())
    }

    pub fn token_balances(&self, account: &Address) -> Result<Vec<TokenBalanceView>, StoreError> {
        let prefix = format!("{account:#x}|");
        Ok(self
            .rollups_with_prefix(Collection::TokenBalances, &prefix)?
            .into_iter()
            .filter_map(|row| match row.view {
                Some(RollupView::TokenBalance(view)) => Some(view),
                _ => None,
            })
            .collect())
    }

    /// Full per-event table in chain order.
    pub fn events(&self, name: EventName) -> Result<Vec<EventRecord>, StoreError> {
        let rows: Vec<(String, EventRecord)> = self
            .db
            .read()?
            .scan(Table::Events, &format!("{name}|"))?;
        let mut events: Vec<EventRecord> = rows.into_iter().map(|(_, record)| record).collect();
        sort_records(&mut events);
        Ok(events)
    }

    /// Records of every event type with `from <= block <= to`, in chain order.
    pub fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<EventRecord>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let txn = self.db.read()?;
        let index: Vec<(String, String)> =
            txn.range(Table::EventBlocks, &block_prefix(from), &block_range_end(to))?;
        let mut out = Vec::with_capacity(index.len());
        for (_, event_key) in index {
            if let Some(record) = txn.get::<EventRecord>(Table::Events, &event_key)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn events_by_name_in_range(
        &self,
        name: EventName,
        from: u64,
        to: u64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .events_in_range(from, to)?
            .into_iter()
            .filter(|record| record.name() == name)
            .collect())
    }

    /// Number of records per block in `[from, to]`, for blocks that have any.
    pub fn event_block_counts(&self, from: u64, to: u64) -> Result<BTreeMap<u64, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        if from > to {
            return Ok(counts);
        }
        let index: Vec<(String, String)> = self.db.read()?.range(
            Table::EventBlocks,
            &block_prefix(from),
            &block_range_end(to),
        )?;
        for (key, _) in index {
            if let Some(block) = key.split('|').next().and_then(|b| b.parse::<u64>().ok()) {
                *counts.entry(block).or_default() += 1;
            }
        }
        Ok(counts)
    }

    pub fn latest_event_block(&self) -> Result<Option<u64>, StoreError> {
        let keys = self.db.dump(Table::EventBlocks, "")?;
        Ok(keys
            .last()
            .and_then(|(key, _)| key.split('|').next())
            .and_then(|block| block.parse().ok()))
    }

    /// Records of `name` in `[from, to]` where any of `fields` equals `value`. Unknown
    /// fields are rejected before reading.
    pub fn query(
        &self,
        name: EventName,
        fields: &[&str],
        value: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        validate_fields(name, fields)?;
        let mut out = Vec::new();
        for record in self.events_by_name_in_range(name, from, to)? {
            if record_matches(&record, fields, value)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Checkpoint records ordered by their first block.
    pub fn checkpoints(&self) -> Result<Vec<CheckpointMeta>, StoreError> {
        let mut checkpoints = self.db.list_checkpoints()?;
        checkpoints.sort_by_key(|c| (c.begin.number, c.id));
        Ok(checkpoints)
    }

    /// Deletes and inserts checkpoint records in one transaction.
    pub fn replace_checkpoints(
        &self,
        remove: &[u64],
        add: &[CheckpointMeta],
    ) -> Result<(), StoreError> {
        let mut txn = self.db.write()?;
        for id in remove {
            txn.delete_checkpoint(*id)?;
        }
        for meta in add {
            txn.put_checkpoint(meta)?;
        }
        txn.commit()?;
        debug!(removed = remove.len(), added = add.len(), "replaced checkpoints");
        Ok(())
    }
}

fn log_stats(stats: &MergeStats) {
    debug!(
        applied = stats.applied,
        duplicates = stats.duplicates,
        retracted = stats.retracted,
        ignored = stats.ignored,
        rows_written = stats.rows_written,
        rows_deleted = stats.rows_deleted,
        "merged events"
    );
}

fn advance_cursors(
    txn: &mut DbWriteTxn,
    names: &[EventName],
    block: u64,
) -> Result<(), StoreError> {
    for name in names {
        let current = txn.get_cursor(name.as_str())?;
        if current.is_none_or(|c| c.block < block) {
            txn.put_cursor(name.as_str(), block)?;
        }
    }
    Ok(())
}

fn apply(txn: &mut DbWriteTxn, events: &[EventRecord]) -> Result<MergeStats, StoreError> {
    let mut ordered = events.to_vec();
    sort_records(&mut ordered);

    let mut stats = MergeStats::default();
    let mut dirty: BTreeMap<String, RollupRow> = BTreeMap::new();

    for record in &ordered {
        let id = record.log_id();
        let key = event_key(record.name(), &id);
        let existing: Option<EventRecord> = txn.get(Table::Events, &key)?;

        if record.removed {
            // Only the delivery from the orphaned block is retracted; a copy re-included
            // elsewhere stays.
            let Some(existing) = existing.filter(|e| e.block_hash == record.block_hash) else {
                stats.ignored += 1;
                continue;
            };
            txn.delete(Table::Events, &key)?;
            unlink(txn, &mut dirty, &existing)?;
            stats.retracted += 1;
            continue;
        }

        if let Some(existing) = existing {
            if existing == *record {
                stats.duplicates += 1;
                continue;
            }
            // Same log re-delivered from another block.
            unlink(txn, &mut dirty, &existing)?;
        }
        txn.put(Table::Events, &key, record)?;
        txn.put(Table::EventBlocks, &block_key(record), &key)?;
        for (collection, row_key) in rollup_keys(record) {
            dirty_row(txn, &mut dirty, collection, row_key)?.upsert(record);
        }
        stats.applied += 1;
    }

    for (key, mut row) in dirty {
        row.refold();
        if row.events.is_empty() {
            if txn.delete(Table::Rollups, &key)? {
                stats.rows_deleted += 1;
            }
        } else {
            txn.put(Table::Rollups, &key, &row)?;
            stats.rows_written += 1;
        }
    }
    Ok(stats)
}

fn unlink(
    txn: &mut DbWriteTxn,
    dirty: &mut BTreeMap<String, RollupRow>,
    existing: &EventRecord,
) -> Result<(), StoreError> {
    txn.delete(Table::EventBlocks, &block_key(existing))?;
    let id = existing.log_id();
    for (collection, row_key) in rollup_keys(existing) {
        dirty_row(txn, dirty, collection, row_key)?.retract(&id);
    }
    Ok(())
}

fn dirty_row<'a>(
    txn: &DbWriteTxn,
    dirty: &'a mut BTreeMap<String, RollupRow>,
    collection: Collection,
    key: String,
) -> Result<&'a mut RollupRow, StoreError> {
    match dirty.entry(storage_key(collection, &key)) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let row = txn
                .get::<RollupRow>(Table::Rollups, entry.key())?
                .unwrap_or_else(|| RollupRow::new(collection, key));
            Ok(entry.insert(row))
        }
    }
}

fn event_key(name: EventName, id: &LogId) -> String {
    format!("{name}|{:#x}|{:010}", id.transaction_hash, id.log_index)
}

fn block_key(record: &EventRecord) -> String {
    format!(
        "{:020}|{:010}|{:#x}",
        record.block_number, record.log_index, record.transaction_hash
    )
}

fn block_prefix(block: u64) -> String {
    format!("{block:020}|")
}

fn block_range_end(block: u64) -> String {
    format!("{block:020}|~")
}

#[must_use]
pub fn header_meta(header: &BlockHeader) -> HeaderMeta {
    HeaderMeta {
        number: header.number,
        hash: header.hash.0,
        timestamp: header.timestamp,
        parent_hash: header.parent_hash.0,
    }
}

#[must_use]
pub fn block_header(meta: &HeaderMeta) -> BlockHeader {
    BlockHeader {
        number: meta.number,
        hash: B256::from(meta.hash),
        timestamp: meta.timestamp,
        parent_hash: B256::from(meta.parent_hash),
    }
}

#[cfg(test)]
mod tests;
