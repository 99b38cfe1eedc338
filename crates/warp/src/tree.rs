use content_store::{ContentNode, NodeKind};
use derived_store::{Collection, DerivedStore, RollupView};
use sync_service::snapshot::{
    ACCOUNTS_DIR, CHECKPOINTS_DIR, CheckpointEntry, INDEX_FILE, MARKETS_DIR, RootIndex,
    SNAPSHOT_VERSION, TABLES_DIR, TableEntry, VERSION_FILE, to_ndjson,
};
use warp_core::{BlockHeader, EventName};

use crate::WarpError;

/// Builds the snapshot tree of `store` as of `end`. Rows above `end.number` are left out
/// and rollup views are refolded from what remains.
pub(crate) fn build_snapshot(
    store: &DerivedStore,
    begin: BlockHeader,
    end: BlockHeader,
    checkpoints: Vec<CheckpointEntry>,
) -> Result<(ContentNode, RootIndex), WarpError> {
    let tip = end.number;

    let mut tables_dir = ContentNode::dir();
    let mut tables = Vec::with_capacity(EventName::ALL.len());
    for name in EventName::ALL {
        let rows: Vec<_> = store
            .events(name)?
            .into_iter()
            .filter(|record| record.block_number <= tip && !record.removed)
            .collect();
        tables.push(TableEntry {
            name,
            rows: rows.len() as u64,
        });
        tables_dir.insert(
            name.as_str(),
            ContentNode::dir().with(INDEX_FILE, ContentNode::file(to_ndjson(&rows)?)),
        );
    }

    let (markets_dir, markets) = rollup_dir(store, Collection::Markets, tip, |view| match view {
        RollupView::Market(view) => Some(view.clone()),
        _ => None,
    })?;
    let (accounts_dir, accounts) = rollup_dir(store, Collection::Accounts, tip, |view| match view {
        RollupView::Account(view) => Some(view.clone()),
        _ => None,
    })?;
    let markets_dir =
        markets_dir.with(INDEX_FILE, ContentNode::file(serde_json::to_vec(&markets)?));
    let accounts_dir =
        accounts_dir.with(INDEX_FILE, ContentNode::file(serde_json::to_vec(&accounts)?));

    let mut checkpoints_dir = ContentNode::dir();
    for entry in &checkpoints {
        checkpoints_dir.insert(
            entry.begin.number.to_string(),
            ContentNode::Link {
                hash: entry.hash,
                kind: NodeKind::File,
                size: entry.size,
            },
        );
    }

    let index = RootIndex {
        version: SNAPSHOT_VERSION.to_string(),
        begin,
        end,
        checkpoints,
        tables,
        markets: markets.len() as u64,
        accounts: accounts.len() as u64,
    };

    let root = ContentNode::dir()
        .with(VERSION_FILE, ContentNode::file(SNAPSHOT_VERSION))
        .with(INDEX_FILE, ContentNode::file(serde_json::to_vec(&index)?))
        .with(ACCOUNTS_DIR, accounts_dir)
        .with(MARKETS_DIR, markets_dir)
        .with(TABLES_DIR, tables_dir)
        .with(CHECKPOINTS_DIR, checkpoints_dir);
    Ok((root, index))
}

/// One file per rollup row plus the list of folded views.
fn rollup_dir<V>(
    store: &DerivedStore,
    collection: Collection,
    tip: u64,
    view: impl Fn(&RollupView) -> Option<V>,
) -> Result<(ContentNode, Vec<V>), WarpError> {
    let mut dir = ContentNode::dir();
    let mut views = Vec::new();
    for row in store.rollups(collection)? {
        let Some(row) = row.bounded(tip) else {
            continue;
        };
        if let Some(folded) = row.view.as_ref().and_then(&view) {
            views.push(folded);
        }
        dir.insert(row.key.clone(), ContentNode::file(serde_json::to_vec(&row)?));
    }
    Ok((dir, views))
}
