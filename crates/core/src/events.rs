use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};

use crate::registry::ContractName;

/// Every event kind the sync engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventName {
    MarketCreated,
    InitialReportSubmitted,
    TokensMinted,
    TokensBurned,
    OrderCreated,
    OrderFilled,
    OrderCanceled,
    ProfitLossChanged,
    MarketVolumeChanged,
    TransferSingle,
}

impl EventName {
    pub const ALL: [EventName; 10] = [
        EventName::MarketCreated,
        EventName::InitialReportSubmitted,
        EventName::TokensMinted,
        EventName::TokensBurned,
        EventName::OrderCreated,
        EventName::OrderFilled,
        EventName::OrderCanceled,
        EventName::ProfitLossChanged,
        EventName::MarketVolumeChanged,
        EventName::TransferSingle,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventName::MarketCreated => "MarketCreated",
            EventName::InitialReportSubmitted => "InitialReportSubmitted",
            EventName::TokensMinted => "TokensMinted",
            EventName::TokensBurned => "TokensBurned",
            EventName::OrderCreated => "OrderCreated",
            EventName::OrderFilled => "OrderFilled",
            EventName::OrderCanceled => "OrderCanceled",
            EventName::ProfitLossChanged => "ProfitLossChanged",
            EventName::MarketVolumeChanged => "MarketVolumeChanged",
            EventName::TransferSingle => "TransferSingle",
        }
    }

    /// The contract that emits this event.
    #[must_use]
    pub const fn contract(self) -> ContractName {
        match self {
            EventName::TransferSingle => ContractName::ShareToken,
            EventName::OrderCreated
            | EventName::OrderFilled
            | EventName::OrderCanceled
            | EventName::ProfitLossChanged
            | EventName::MarketVolumeChanged => ContractName::AugurTrading,
            EventName::MarketCreated
            | EventName::InitialReportSubmitted
            | EventName::TokensMinted
            | EventName::TokensBurned => ContractName::Augur,
        }
    }

    /// JSON field names of the decoded payload, as used by record queries.
    #[must_use]
    pub const fn field_names(self) -> &'static [&'static str] {
        match self {
            EventName::MarketCreated => &[
                "universe",
                "market",
                "marketCreator",
                "designatedReporter",
                "endTime",
                "feePerCashInAttoCash",
                "prices",
                "marketType",
                "numTicks",
                "outcomes",
                "noShowBond",
                "timestamp",
                "extraInfo",
            ],
            EventName::InitialReportSubmitted => &[
                "universe",
                "reporter",
                "market",
                "initialReporter",
                "amountStaked",
                "isDesignatedReporter",
                "payoutNumerators",
                "description",
                "nextWindowStartTime",
                "nextWindowEndTime",
                "timestamp",
            ],
            EventName::TokensMinted | EventName::TokensBurned => &[
                "universe",
                "token",
                "target",
                "amount",
                "tokenType",
                "market",
                "totalSupply",
            ],
            EventName::OrderCreated => &[
                "universe",
                "market",
                "orderId",
                "creator",
                "outcome",
                "orderType",
                "price",
                "amount",
                "tradeGroupId",
                "timestamp",
            ],
            EventName::OrderFilled => &[
                "universe",
                "market",
                "orderId",
                "creator",
                "filler",
                "outcome",
                "orderType",
                "price",
                "amountFilled",
                "tradeGroupId",
                "timestamp",
            ],
            EventName::OrderCanceled => &[
                "universe",
                "market",
                "orderId",
                "creator",
                "outcome",
                "orderType",
                "timestamp",
            ],
            EventName::ProfitLossChanged => &[
                "universe",
                "market",
                "account",
                "outcome",
                "netPosition",
                "avgPrice",
                "realizedProfit",
                "frozenFunds",
                "realizedCost",
                "timestamp",
            ],
            EventName::MarketVolumeChanged => {
                &["universe", "market", "volume", "outcomeVolumes", "timestamp"]
            }
            EventName::TransferSingle => &["operator", "from", "to", "id", "value"],
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEventName(s.to_string()))
    }
}

/// Identity of a log on chain. Two records with the same id describe the same emission,
/// whether they arrive once, twice, or as a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogId {
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{}", self.transaction_hash, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub address: Address,
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
    pub payload: EventPayload,
}

impl EventRecord {
    #[must_use]
    pub fn name(&self) -> EventName {
        self.payload.name()
    }

    #[must_use]
    pub fn log_id(&self) -> LogId {
        LogId {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    /// Chain order: block number, then log index within the block.
    #[must_use]
    pub fn ordering_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    /// The same record flagged as removed by a reorg.
    #[must_use]
    pub fn retracted(&self) -> Self {
        Self {
            removed: true,
            ..self.clone()
        }
    }
}

/// Sorts records into chain order. The sort is stable so duplicates keep arrival order.
pub fn sort_records(records: &mut [EventRecord]) {
    records.sort_by_key(EventRecord::ordering_key);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    MarketCreated(MarketCreated),
    InitialReportSubmitted(InitialReportSubmitted),
    TokensMinted(TokenSupplyChanged),
    TokensBurned(TokenSupplyChanged),
    OrderCreated(OrderCreated),
    OrderFilled(OrderFilled),
    OrderCanceled(OrderCanceled),
    ProfitLossChanged(ProfitLossChanged),
    MarketVolumeChanged(MarketVolumeChanged),
    TransferSingle(TransferSingle),
}

impl EventPayload {
    #[must_use]
    pub fn name(&self) -> EventName {
        match self {
            EventPayload::MarketCreated(_) => EventName::MarketCreated,
            EventPayload::InitialReportSubmitted(_) => EventName::InitialReportSubmitted,
            EventPayload::TokensMinted(_) => EventName::TokensMinted,
            EventPayload::TokensBurned(_) => EventName::TokensBurned,
            EventPayload::OrderCreated(_) => EventName::OrderCreated,
            EventPayload::OrderFilled(_) => EventName::OrderFilled,
            EventPayload::OrderCanceled(_) => EventName::OrderCanceled,
            EventPayload::ProfitLossChanged(_) => EventName::ProfitLossChanged,
            EventPayload::MarketVolumeChanged(_) => EventName::MarketVolumeChanged,
            EventPayload::TransferSingle(_) => EventName::TransferSingle,
        }
    }

    /// Market the event belongs to, if any.
    #[must_use]
    pub fn market(&self) -> Option<Address> {
        match self {
            EventPayload::MarketCreated(e) => Some(e.market),
            EventPayload::InitialReportSubmitted(e) => Some(e.market),
            EventPayload::TokensMinted(e) | EventPayload::TokensBurned(e) => {
                (!e.market.is_zero()).then_some(e.market)
            }
            EventPayload::OrderCreated(e) => Some(e.market),
            EventPayload::OrderFilled(e) => Some(e.market),
            EventPayload::OrderCanceled(e) => Some(e.market),
            EventPayload::ProfitLossChanged(e) => Some(e.market),
            EventPayload::MarketVolumeChanged(e) => Some(e.market),
            EventPayload::TransferSingle(_) => None,
        }
    }

    /// Accounts that took part in the event. Zero addresses (mints and burns) are skipped.
    #[must_use]
    pub fn accounts(&self) -> Vec<Address> {
        let accounts = match self {
            EventPayload::MarketCreated(e) => vec![e.market_creator, e.designated_reporter],
            EventPayload::InitialReportSubmitted(e) => vec![e.reporter],
            EventPayload::TokensMinted(e) | EventPayload::TokensBurned(e) => vec![e.target],
            EventPayload::OrderCreated(e) => vec![e.creator],
            EventPayload::OrderFilled(e) => vec![e.creator, e.filler],
            EventPayload::OrderCanceled(e) => vec![e.creator],
            EventPayload::ProfitLossChanged(e) => vec![e.account],
            EventPayload::MarketVolumeChanged(_) => Vec::new(),
            EventPayload::TransferSingle(e) => vec![e.from, e.to],
        };
        let mut out: Vec<Address> = Vec::with_capacity(accounts.len());
        for account in accounts {
            if !account.is_zero() && !out.contains(&account) {
                out.push(account);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCreated {
    pub universe: Address,
    pub market: Address,
    pub market_creator: Address,
    pub designated_reporter: Address,
    pub end_time: U256,
    pub fee_per_cash_in_atto_cash: U256,
    pub prices: Vec<U256>,
    pub market_type: u8,
    pub num_ticks: U256,
    pub outcomes: Vec<B256>,
    pub no_show_bond: U256,
    pub timestamp: U256,
    /// Raw JSON blob as emitted; parsed when the market row is folded.
    pub extra_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialReportSubmitted {
    pub universe: Address,
    pub reporter: Address,
    pub market: Address,
    pub initial_reporter: Address,
    pub amount_staked: U256,
    pub is_designated_reporter: bool,
    pub payout_numerators: Vec<U256>,
    pub description: String,
    pub next_window_start_time: U256,
    pub next_window_end_time: U256,
    pub timestamp: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSupplyChanged {
    pub universe: Address,
    pub token: Address,
    pub target: Address,
    pub amount: U256,
    pub token_type: u8,
    pub market: Address,
    pub total_supply: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub universe: Address,
    pub market: Address,
    pub order_id: B256,
    pub creator: Address,
    pub outcome: u8,
    pub order_type: u8,
    pub price: U256,
    pub amount: U256,
    pub trade_group_id: B256,
    pub timestamp: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilled {
    pub universe: Address,
    pub market: Address,
    pub order_id: B256,
    pub creator: Address,
    pub filler: Address,
    pub outcome: u8,
    pub order_type: u8,
    pub price: U256,
    pub amount_filled: U256,
    pub trade_group_id: B256,
    pub timestamp: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCanceled {
    pub universe: Address,
    pub market: Address,
    pub order_id: B256,
    pub creator: Address,
    pub outcome: u8,
    pub order_type: u8,
    pub timestamp: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitLossChanged {
    pub universe: Address,
    pub market: Address,
    pub account: Address,
    pub outcome: u8,
    pub net_position: I256,
    pub avg_price: U256,
    pub realized_profit: I256,
    pub frozen_funds: I256,
    pub realized_cost: I256,
    pub timestamp: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketVolumeChanged {
    pub universe: Address,
    pub market: Address,
    pub volume: U256,
    pub outcome_volumes: Vec<U256>,
    pub timestamp: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSingle {
    pub operator: Address,
    pub from: Address,
    pub to: Address,
    pub id: U256,
    pub value: U256,
}
