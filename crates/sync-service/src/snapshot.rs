//! Snapshot tree layout shared by the checkpoint builder and warp sync.
//!
//! ```text
//! <root>/
//!   VERSION                         "1"
//!   index                           RootIndex (JSON)
//!   accounts/<address>              RollupRow (JSON)
//!   accounts/index                  AccountView list (JSON)
//!   markets/<market>                RollupRow (JSON)
//!   markets/index                   MarketView list (JSON)
//!   tables/<EventName>/index        EventRecord per line
//!   checkpoints/<beginBlockNumber>  chunk export, EventRecord per line
//! ```

use alloy::primitives::Address;
use content_store::ContentAddress;
use serde::{Deserialize, Serialize};
use warp_core::{BlockHeader, EventName, EventRecord};

pub const SNAPSHOT_VERSION: &str = "1";

pub const VERSION_FILE: &str = "VERSION";
pub const INDEX_FILE: &str = "index";
pub const ACCOUNTS_DIR: &str = "accounts";
pub const MARKETS_DIR: &str = "markets";
pub const TABLES_DIR: &str = "tables";
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Root manifest of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootIndex {
    pub version: String,
    pub begin: BlockHeader,
    pub end: BlockHeader,
    pub checkpoints: Vec<CheckpointEntry>,
    pub tables: Vec<TableEntry>,
    pub markets: u64,
    pub accounts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    pub id: u64,
    pub begin: BlockHeader,
    pub end: BlockHeader,
    pub hash: ContentAddress,
    pub size: u64,
    pub event_count: u64,
    pub sealed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableEntry {
    pub name: EventName,
    pub rows: u64,
}

#[must_use]
pub fn market_path(market: &Address) -> String {
    format!("{MARKETS_DIR}/{market:#x}")
}

#[must_use]
pub fn account_path(account: &Address) -> String {
    format!("{ACCOUNTS_DIR}/{account:#x}")
}

#[must_use]
pub fn table_path(name: EventName) -> String {
    format!("{TABLES_DIR}/{name}/{INDEX_FILE}")
}

/// One JSON record per line, each line terminated by `\n`.
pub fn to_ndjson<'a>(
    records: impl IntoIterator<Item = &'a EventRecord>,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn parse_ndjson(bytes: &[u8]) -> Result<Vec<EventRecord>, serde_json::Error> {
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(serde_json::from_slice)
        .collect()
}
