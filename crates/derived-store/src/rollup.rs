use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use warp_core::{EventPayload, EventRecord, LogId, events::sort_records};

use crate::views::{
    AccountView, MarketView, OrderView, ProfitLossView, TokenBalanceView, fold_account,
    fold_market, fold_orders, fold_profit_loss, fold_token_balance,
};

/// Materialized collections built from several event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    Markets,
    Orders,
    Accounts,
    ProfitLoss,
    TokenBalances,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Markets,
        Collection::Orders,
        Collection::Accounts,
        Collection::ProfitLoss,
        Collection::TokenBalances,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Collection::Markets => "Markets",
            Collection::Orders => "Orders",
            Collection::Accounts => "Accounts",
            Collection::ProfitLoss => "ProfitLoss",
            Collection::TokenBalances => "TokenBalances",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown collection: {s}"))
    }
}

#[must_use]
pub fn address_key(address: &Address) -> String {
    format!("{address:#x}")
}

#[must_use]
pub fn order_key(order_id: &B256) -> String {
    format!("{order_id:#x}")
}

#[must_use]
pub fn profit_loss_key(account: &Address, market: &Address, outcome: u8) -> String {
    format!("{account:#x}|{market:#x}|{outcome:03}")
}

#[must_use]
pub fn token_balance_key(account: &Address, token: &Address) -> String {
    format!("{account:#x}|{token:#x}")
}

/// Rows an event contributes to.
#[must_use]
pub fn rollup_keys(record: &EventRecord) -> Vec<(Collection, String)> {
    let mut keys = match &record.payload {
        EventPayload::MarketCreated(e) => vec![(Collection::Markets, address_key(&e.market))],
        EventPayload::InitialReportSubmitted(e) => {
            vec![(Collection::Markets, address_key(&e.market))]
        }
        EventPayload::TokensMinted(e) | EventPayload::TokensBurned(e) => vec![(
            Collection::TokenBalances,
            token_balance_key(&e.target, &e.token),
        )],
        EventPayload::OrderCreated(e) => vec![
            (Collection::Orders, order_key(&e.order_id)),
            (Collection::Markets, address_key(&e.market)),
        ],
        EventPayload::OrderFilled(e) => vec![
            (Collection::Orders, order_key(&e.order_id)),
            (Collection::Markets, address_key(&e.market)),
        ],
        EventPayload::OrderCanceled(e) => vec![
            (Collection::Orders, order_key(&e.order_id)),
            (Collection::Markets, address_key(&e.market)),
        ],
        EventPayload::ProfitLossChanged(e) => vec![(
            Collection::ProfitLoss,
            profit_loss_key(&e.account, &e.market, e.outcome),
        )],
        EventPayload::MarketVolumeChanged(e) => {
            vec![(Collection::Markets, address_key(&e.market))]
        }
        EventPayload::TransferSingle(_) => Vec::new(),
    };
    keys.extend(
        record
            .payload
            .accounts()
            .iter()
            .map(|account| (Collection::Accounts, address_key(account))),
    );
    keys
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupView {
    Market(MarketView),
    Order(OrderView),
    Account(AccountView),
    ProfitLoss(ProfitLossView),
    TokenBalance(TokenBalanceView),
}

/// One materialized row: its contributing events in chain order, and the view folded
/// from them. The view is a pure function of the event set.
///
/// Every batch touching a row rewrites it whole and refolds all of its contributions, so
/// a busy market costs time proportional to its full history on each chunk.
// TODO: fold forward from the stored view when every new contribution sorts after the
// last stored one, and keep the full refold for retractions and out-of-order inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupRow {
    pub collection: Collection,
    pub key: String,
    pub events: Vec<EventRecord>,
    pub view: Option<RollupView>,
}

impl RollupRow {
    #[must_use]
    pub fn new(collection: Collection, key: String) -> Self {
        Self {
            collection,
            key,
            events: Vec::new(),
            view: None,
        }
    }

    #[must_use]
    pub fn storage_key(&self) -> String {
        storage_key(self.collection, &self.key)
    }

    /// Adds or replaces the contribution with the same log id.
    pub fn upsert(&mut self, record: &EventRecord) {
        let id = record.log_id();
        match self.events.iter_mut().find(|e| e.log_id() == id) {
            Some(existing) => *existing = record.clone(),
            None => self.events.push(record.clone()),
        }
    }

    /// Returns whether a contribution was removed.
    pub fn retract(&mut self, id: &LogId) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.log_id() != *id);
        self.events.len() != before
    }

    pub fn refold(&mut self) {
        sort_records(&mut self.events);
        self.view = fold(self.collection, &self.key, &self.events);
    }

    /// The row as it was at `tip`: contributions above it dropped and the view refolded.
    /// `None` when nothing is left.
    #[must_use]
    pub fn bounded(&self, tip: u64) -> Option<Self> {
        let mut row = Self {
            collection: self.collection,
            key: self.key.clone(),
            events: self
                .events
                .iter()
                .filter(|e| e.block_number <= tip)
                .cloned()
                .collect(),
            view: None,
        };
        if row.events.is_empty() {
            return None;
        }
        row.refold();
        Some(row)
    }

    #[must_use]
    pub fn last_block(&self) -> u64 {
        self.events.iter().map(|e| e.block_number).max().unwrap_or(0)
    }
}

#[must_use]
pub fn storage_key(collection: Collection, key: &str) -> String {
    format!("{collection}|{key}")
}

fn fold(collection: Collection, key: &str, events: &[EventRecord]) -> Option<RollupView> {
    if events.is_empty() {
        return None;
    }
    match collection {
        Collection::Markets => {
            let market = key.parse::<Address>().ok()?;
            Some(RollupView::Market(fold_market(market, events)))
        }
        Collection::Orders => {
            let order_id = key.parse::<B256>().ok()?;
            fold_orders(events)
                .remove(&order_id)
                .map(RollupView::Order)
        }
        Collection::Accounts => {
            let account = key.parse::<Address>().ok()?;
            Some(RollupView::Account(fold_account(account, events)))
        }
        Collection::ProfitLoss => fold_profit_loss(events).map(RollupView::ProfitLoss),
        Collection::TokenBalances => fold_token_balance(events).map(RollupView::TokenBalance),
    }
}
