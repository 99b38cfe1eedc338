use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use tracing::warn;
use warp_core::events::{MarketCreated, OrderFilled};
use warp_core::{EventName, EventPayload, EventRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketType {
    YesNo,
    Categorical,
    Scalar,
}

impl MarketType {
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MarketType::YesNo),
            1 => Some(MarketType::Categorical),
            2 => Some(MarketType::Scalar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Bid,
    Ask,
}

impl OrderType {
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        if raw == 0 { OrderType::Bid } else { OrderType::Ask }
    }
}

/// Market metadata decoded from the `extraInfo` JSON blob of `MarketCreated`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketExtraInfo {
    pub description: String,
    pub long_description: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub scalar_denomination: Option<String>,
}

impl MarketExtraInfo {
    /// `None` for an empty blob or anything that is not a JSON object of the expected shape.
    pub fn parse(market: &Address, raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(raw) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(%market, ?err, "malformed market extraInfo");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeLiquidity {
    pub outcome: u8,
    /// Open bid amount on this outcome.
    pub bids: U256,
    /// Open ask amount on this outcome.
    pub asks: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialReport {
    pub reporter: Address,
    pub is_designated_reporter: bool,
    pub payout_numerators: Vec<U256>,
    pub amount_staked: U256,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub universe: Address,
    pub creator: Address,
    pub designated_reporter: Address,
    pub market_type: Option<MarketType>,
    pub outcomes: Vec<String>,
    pub end_time: U256,
    pub fee_per_cash_in_atto_cash: U256,
    pub num_ticks: U256,
    pub prices: Vec<U256>,
    pub no_show_bond: U256,
    pub extra_info: Option<MarketExtraInfo>,
    pub creation_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketView {
    pub market: Address,
    /// Present once `MarketCreated` has been merged.
    pub info: Option<MarketInfo>,
    pub initial_report: Option<InitialReport>,
    pub liquidity: Vec<OutcomeLiquidity>,
    /// Last volume reported by `MarketVolumeChanged`.
    pub volume: U256,
    pub outcome_volumes: Vec<U256>,
    /// Sum of all fill amounts.
    pub filled: U256,
    pub open_orders: u64,
    pub last_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Open,
    Filled,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: B256,
    pub market: Address,
    pub creator: Address,
    pub outcome: u8,
    pub order_type: OrderType,
    pub price: U256,
    pub amount: U256,
    pub filled: U256,
    pub fillers: Vec<Address>,
    pub state: OrderState,
    pub created_block: Option<u64>,
    pub last_block: u64,
}

impl OrderView {
    #[must_use]
    pub fn remaining(&self) -> U256 {
        if self.state == OrderState::Open {
            self.amount.saturating_sub(self.filled)
        } else {
            U256::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub account: Address,
    pub event_counts: BTreeMap<EventName, u64>,
    pub markets: BTreeSet<Address>,
    pub first_block: u64,
    pub last_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitLossView {
    pub account: Address,
    pub market: Address,
    pub outcome: u8,
    pub net_position: I256,
    pub avg_price: U256,
    pub realized_profit: I256,
    pub frozen_funds: I256,
    pub realized_cost: I256,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceView {
    pub account: Address,
    pub token: Address,
    pub market: Option<Address>,
    pub balance: U256,
    pub last_block: u64,
}

/// Bytes32 outcome names are right-padded with zeros.
fn outcome_name(raw: &B256) -> String {
    let end = raw
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |pos| pos + 1);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn market_info(created: &MarketCreated, block_number: u64) -> MarketInfo {
    MarketInfo {
        universe: created.universe,
        creator: created.market_creator,
        designated_reporter: created.designated_reporter,
        market_type: MarketType::from_raw(created.market_type),
        outcomes: created.outcomes.iter().map(outcome_name).collect(),
        end_time: created.end_time,
        fee_per_cash_in_atto_cash: created.fee_per_cash_in_atto_cash,
        num_ticks: created.num_ticks,
        prices: created.prices.clone(),
        no_show_bond: created.no_show_bond,
        extra_info: MarketExtraInfo::parse(&created.market, &created.extra_info),
        creation_block: block_number,
    }
}

/// Yes/no and scalar markets trade three outcomes (invalid, no/short, yes/long);
/// categorical markets trade invalid plus one per declared outcome.
fn outcome_count(info: Option<&MarketInfo>) -> usize {
    match info {
        Some(info) if info.market_type == Some(MarketType::Categorical) => info.outcomes.len() + 1,
        _ => 3,
    }
}

/// Folds order lifecycle events, in chain order, into order views keyed by id.
pub(crate) fn fold_orders<'a>(
    events: impl IntoIterator<Item = &'a EventRecord>,
) -> BTreeMap<B256, OrderView> {
    let mut orders: BTreeMap<B256, OrderView> = BTreeMap::new();
    for record in events {
        match &record.payload {
            EventPayload::OrderCreated(e) => {
                let order = orders.entry(e.order_id).or_insert_with(|| OrderView {
                    order_id: e.order_id,
                    market: e.market,
                    creator: e.creator,
                    outcome: e.outcome,
                    order_type: OrderType::from_raw(e.order_type),
                    price: e.price,
                    amount: U256::ZERO,
                    filled: U256::ZERO,
                    fillers: Vec::new(),
                    state: OrderState::Open,
                    created_block: None,
                    last_block: record.block_number,
                });
                order.amount = e.amount;
                order.price = e.price;
                order.created_block = Some(record.block_number);
                order.last_block = record.block_number;
                order.state = if order.filled >= order.amount {
                    OrderState::Filled
                } else {
                    OrderState::Open
                };
            }
            EventPayload::OrderFilled(e) => {
                let order = orders
                    .entry(e.order_id)
                    .or_insert_with(|| order_from_fill(e, record.block_number));
                order.filled = order.filled.saturating_add(e.amount_filled);
                if !order.fillers.contains(&e.filler) {
                    order.fillers.push(e.filler);
                }
                order.last_block = record.block_number;
                if order.state == OrderState::Open
                    && order.created_block.is_some()
                    && order.filled >= order.amount
                {
                    order.state = OrderState::Filled;
                }
            }
            EventPayload::OrderCanceled(e) => {
                let order = orders.entry(e.order_id).or_insert_with(|| OrderView {
                    order_id: e.order_id,
                    market: e.market,
                    creator: e.creator,
                    outcome: e.outcome,
                    order_type: OrderType::from_raw(e.order_type),
                    price: U256::ZERO,
                    amount: U256::ZERO,
                    filled: U256::ZERO,
                    fillers: Vec::new(),
                    state: OrderState::Canceled,
                    created_block: None,
                    last_block: record.block_number,
                });
                order.state = OrderState::Canceled;
                order.last_block = record.block_number;
            }
            _ => {}
        }
    }
    orders
}

fn order_from_fill(fill: &OrderFilled, block_number: u64) -> OrderView {
    OrderView {
        order_id: fill.order_id,
        market: fill.market,
        creator: fill.creator,
        outcome: fill.outcome,
        order_type: OrderType::from_raw(fill.order_type),
        price: fill.price,
        amount: U256::ZERO,
        filled: U256::ZERO,
        fillers: Vec::new(),
        state: OrderState::Open,
        created_block: None,
        last_block: block_number,
    }
}

pub(crate) fn fold_market(market: Address, events: &[EventRecord]) -> MarketView {
    let mut view = MarketView {
        market,
        info: None,
        initial_report: None,
        liquidity: Vec::new(),
        volume: U256::ZERO,
        outcome_volumes: Vec::new(),
        filled: U256::ZERO,
        open_orders: 0,
        last_block: 0,
    };

    for record in events {
        view.last_block = view.last_block.max(record.block_number);
        match &record.payload {
            EventPayload::MarketCreated(e) => {
                view.info = Some(market_info(e, record.block_number));
            }
            EventPayload::InitialReportSubmitted(e) => {
                view.initial_report = Some(InitialReport {
                    reporter: e.reporter,
                    is_designated_reporter: e.is_designated_reporter,
                    payout_numerators: e.payout_numerators.clone(),
                    amount_staked: e.amount_staked,
                    block_number: record.block_number,
                });
            }
            EventPayload::MarketVolumeChanged(e) => {
                view.volume = e.volume;
                view.outcome_volumes = e.outcome_volumes.clone();
            }
            EventPayload::OrderFilled(e) => {
                view.filled = view.filled.saturating_add(e.amount_filled);
            }
            _ => {}
        }
    }

    let orders = fold_orders(events);
    let traded_outcomes = orders
        .values()
        .map(|order| usize::from(order.outcome) + 1)
        .max()
        .unwrap_or(0);
    let count = outcome_count(view.info.as_ref()).max(traded_outcomes);
    view.liquidity = (0..count)
        .map(|outcome| OutcomeLiquidity {
            outcome: u8::try_from(outcome).unwrap_or(u8::MAX),
            ..OutcomeLiquidity::default()
        })
        .collect();
    for order in orders.values() {
        let remaining = order.remaining();
        if remaining.is_zero() {
            continue;
        }
        view.open_orders += 1;
        let slot = &mut view.liquidity[usize::from(order.outcome)];
        match order.order_type {
            OrderType::Bid => slot.bids = slot.bids.saturating_add(remaining),
            OrderType::Ask => slot.asks = slot.asks.saturating_add(remaining),
        }
    }
    view
}

pub(crate) fn fold_account(account: Address, events: &[EventRecord]) -> AccountView {
    let mut view = AccountView {
        account,
        event_counts: BTreeMap::new(),
        markets: BTreeSet::new(),
        first_block: events.first().map_or(0, |e| e.block_number),
        last_block: 0,
    };
    for record in events {
        *view.event_counts.entry(record.name()).or_default() += 1;
        if let Some(market) = record.payload.market() {
            view.markets.insert(market);
        }
        view.first_block = view.first_block.min(record.block_number);
        view.last_block = view.last_block.max(record.block_number);
    }
    view
}

pub(crate) fn fold_profit_loss(events: &[EventRecord]) -> Option<ProfitLossView> {
    events.iter().rev().find_map(|record| match &record.payload {
        EventPayload::ProfitLossChanged(e) => Some(ProfitLossView {
            account: e.account,
            market: e.market,
            outcome: e.outcome,
            net_position: e.net_position,
            avg_price: e.avg_price,
            realized_profit: e.realized_profit,
            frozen_funds: e.frozen_funds,
            realized_cost: e.realized_cost,
            block_number: record.block_number,
        }),
        _ => None,
    })
}

pub(crate) fn fold_token_balance(events: &[EventRecord]) -> Option<TokenBalanceView> {
    let mut view: Option<TokenBalanceView> = None;
    for record in events {
        let (change, minted) = match &record.payload {
            EventPayload::TokensMinted(e) => (e, true),
            EventPayload::TokensBurned(e) => (e, false),
            _ => continue,
        };
        let balance = view.get_or_insert_with(|| TokenBalanceView {
            account: change.target,
            token: change.token,
            market: None,
            balance: U256::ZERO,
            last_block: record.block_number,
        });
        balance.balance = if minted {
            balance.balance.saturating_add(change.amount)
        } else {
            balance.balance.saturating_sub(change.amount)
        };
        if !change.market.is_zero() {
            balance.market = Some(change.market);
        }
        balance.last_block = record.block_number;
    }
    view
}
