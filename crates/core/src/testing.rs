//! In-memory chain and log builders for tests.
#![allow(clippy::missing_panics_doc)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, B256, I256, LogData, U256, keccak256};
use alloy::sol_types::SolEvent;
use alloy_rpc_types_eth::Log;
use async_trait::async_trait;

use crate::contracts::augur as abi;
use crate::decoder::ContractEventDecoder;
use crate::events::EventRecord;
use crate::filter::LogFilter;
use crate::registry::{ContractName, ContractRegistry};
use crate::source::{BlockHeader, BlockTag, LogSource, SourceError};

pub const AUGUR: Address = Address::new([0xa1; 20]);
pub const AUGUR_TRADING: Address = Address::new([0xa2; 20]);
pub const SHARE_TOKEN: Address = Address::new([0x5e; 20]);
pub const UNIVERSE: Address = Address::new([0x0u8; 20]);

const GENESIS_TIMESTAMP: u64 = 1_600_000_000;

#[must_use]
pub fn test_registry() -> ContractRegistry {
    ContractRegistry::new([
        (ContractName::Augur, AUGUR),
        (ContractName::AugurTrading, AUGUR_TRADING),
        (ContractName::ShareToken, SHARE_TOKEN),
    ])
}

#[must_use]
pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

/// Deterministic chain of headers and logs. A reorg bumps the fork counter so the
/// replacement blocks get different hashes.
#[derive(Debug, Clone)]
pub struct TestChain {
    headers: Vec<BlockHeader>,
    logs: Vec<Log>,
    fork: u64,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChain {
    #[must_use]
    pub fn new() -> Self {
        let mut chain = Self {
            headers: Vec::new(),
            logs: Vec::new(),
            fork: 0,
        };
        chain.push_header();
        chain
    }

    #[must_use]
    pub fn tip(&self) -> u64 {
        self.headers.last().map_or(0, |h| h.number)
    }

    #[must_use]
    pub fn header(&self, number: u64) -> Option<BlockHeader> {
        self.headers.get(usize::try_from(number).ok()?).copied()
    }

    #[must_use]
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn mine_to(&mut self, number: u64) {
        while self.tip() < number {
            self.push_header();
        }
    }

    /// Appends a log to `block`, mining up to it first. Log indexes are assigned in
    /// emission order within the block; every log gets its own transaction.
    pub fn emit(&mut self, block: u64, address: Address, data: LogData) -> Log {
        self.mine_to(block);
        let header = self.header(block).expect("block was mined");
        let log_index = self
            .logs
            .iter()
            .filter(|log| log.block_number == Some(block))
            .count() as u64;
        let log = Log {
            inner: alloy::primitives::Log { address, data },
            block_hash: Some(header.hash),
            block_number: Some(block),
            block_timestamp: Some(header.timestamp),
            transaction_hash: Some(tx_hash(self.fork, block, log_index)),
            transaction_index: Some(log_index),
            log_index: Some(log_index),
            removed: false,
        };
        self.logs.push(log.clone());
        log
    }

    /// Drops every block above `number` together with its logs.
    pub fn reorg_to(&mut self, number: u64) {
        self.fork += 1;
        self.headers.retain(|h| h.number <= number);
        self.logs
            .retain(|log| log.block_number.is_some_and(|b| b <= number));
    }

    fn push_header(&mut self) {
        let number = self.headers.len() as u64;
        let parent_hash = self.headers.last().map_or(B256::ZERO, |h| h.hash);
        self.headers.push(BlockHeader {
            number,
            hash: keccak256(format!("block:{}:{number}", self.fork)),
            timestamp: GENESIS_TIMESTAMP + number * 12,
            parent_hash,
        });
    }
}

fn tx_hash(fork: u64, block: u64, log_index: u64) -> B256 {
    keccak256(format!("tx:{fork}:{block}:{log_index}"))
}

/// [`LogSource`] over a [`TestChain`] with one-shot failure injection.
#[derive(Debug, Default)]
pub struct MemoryLogSource {
    chain: Mutex<TestChain>,
    failures: Mutex<BTreeSet<u64>>,
    log_calls: AtomicUsize,
}

impl MemoryLogSource {
    #[must_use]
    pub fn new(chain: TestChain) -> Arc<Self> {
        Arc::new(Self {
            chain: Mutex::new(chain),
            failures: Mutex::new(BTreeSet::new()),
            log_calls: AtomicUsize::new(0),
        })
    }

    pub fn with_chain<R>(&self, f: impl FnOnce(&mut TestChain) -> R) -> R {
        let mut chain = self.chain.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut chain)
    }

    /// The next `get_logs` call whose range covers `block` fails.
    pub fn fail_once_at(&self, block: u64) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block);
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, SourceError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let hit = failures
                .range(filter.from_block..=filter.to_block)
                .next()
                .copied();
            if let Some(block) = hit {
                failures.remove(&block);
                return Err(SourceError::Unavailable(format!(
                    "injected failure at block {block}"
                )));
            }
        }
        Ok(self.with_chain(|chain| {
            chain
                .logs()
                .iter()
                .filter(|log| {
                    filter.matches(
                        &log.inner.address,
                        log.topics().first(),
                        log.block_number.unwrap_or_default(),
                    )
                })
                .cloned()
                .collect::<Vec<_>>()
        }))
    }

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, SourceError> {
        self.with_chain(|chain| match tag {
            BlockTag::Number(n) => chain.header(n),
            BlockTag::Latest => chain.header(chain.tip()),
        })
        .ok_or(SourceError::BlockNotFound(tag))
    }

    async fn get_block_number(&self) -> Result<u64, SourceError> {
        Ok(self.with_chain(|chain| chain.tip()))
    }
}

/// Decodes a single fixture log into a record using [`test_registry`].
#[must_use]
pub fn decode(log: &Log) -> EventRecord {
    ContractEventDecoder::new(Arc::new(test_registry()))
        .parse_log(log)
        .expect("fixture log decodes")
}

/// Builds a decoded record sitting at `(block, log_index)` without a chain.
#[must_use]
pub fn record(block: u64, log_index: u64, address: Address, data: LogData) -> EventRecord {
    let log = Log {
        inner: alloy::primitives::Log { address, data },
        block_hash: Some(keccak256(format!("block:0:{block}"))),
        block_number: Some(block),
        block_timestamp: Some(GENESIS_TIMESTAMP + block * 12),
        transaction_hash: Some(tx_hash(0, block, log_index)),
        transaction_index: Some(log_index),
        log_index: Some(log_index),
        removed: false,
    };
    decode(&log)
}

fn outcome_names(outcomes: &[&str]) -> Vec<B256> {
    outcomes
        .iter()
        .map(|name| B256::right_padding_from(name.as_bytes()))
        .collect()
}

/// `market_type`: 0 yes/no, 1 categorical, 2 scalar.
#[must_use]
pub fn market_created(
    market: Address,
    creator: Address,
    market_type: u8,
    outcomes: &[&str],
    extra_info: &str,
) -> LogData {
    abi::MarketCreated {
        universe: UNIVERSE,
        endTime: U256::from(GENESIS_TIMESTAMP + 86_400),
        extraInfo: extra_info.to_string(),
        market,
        marketCreator: creator,
        designatedReporter: creator,
        feePerCashInAttoCash: U256::from(10_000_000_000_000_000u64),
        prices: vec![U256::ZERO, U256::from(1_000_000_000_000_000_000u64)],
        marketType: market_type,
        numTicks: U256::from(100),
        outcomes: outcome_names(outcomes),
        noShowBond: U256::from(1_000),
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
pub fn initial_report_submitted(market: Address, reporter: Address) -> LogData {
    abi::InitialReportSubmitted {
        universe: UNIVERSE,
        reporter,
        market,
        initialReporter: reporter,
        amountStaked: U256::from(1_000),
        isDesignatedReporter: true,
        payoutNumerators: vec![U256::ZERO, U256::ZERO, U256::from(100)],
        description: String::new(),
        nextWindowStartTime: U256::from(GENESIS_TIMESTAMP + 3_600),
        nextWindowEndTime: U256::from(GENESIS_TIMESTAMP + 7_200),
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
pub fn order_created(
    market: Address,
    order_id: B256,
    creator: Address,
    outcome: u8,
    order_type: u8,
    price: u64,
    amount: u64,
) -> LogData {
    abi::OrderCreated {
        universe: UNIVERSE,
        market,
        orderId: order_id,
        creator,
        outcome,
        orderType: order_type,
        price: U256::from(price),
        amount: U256::from(amount),
        tradeGroupId: B256::ZERO,
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn order_filled(
    market: Address,
    order_id: B256,
    creator: Address,
    filler: Address,
    outcome: u8,
    order_type: u8,
    price: u64,
    amount_filled: u64,
) -> LogData {
    abi::OrderFilled {
        universe: UNIVERSE,
        market,
        orderId: order_id,
        creator,
        filler,
        outcome,
        orderType: order_type,
        price: U256::from(price),
        amountFilled: U256::from(amount_filled),
        tradeGroupId: B256::ZERO,
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
pub fn order_canceled(
    market: Address,
    order_id: B256,
    creator: Address,
    outcome: u8,
    order_type: u8,
) -> LogData {
    abi::OrderCanceled {
        universe: UNIVERSE,
        market,
        orderId: order_id,
        creator,
        outcome,
        orderType: order_type,
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
pub fn profit_loss_changed(
    market: Address,
    account: Address,
    outcome: u8,
    net_position: i64,
    avg_price: u64,
) -> LogData {
    abi::ProfitLossChanged {
        universe: UNIVERSE,
        market,
        account,
        outcome,
        netPosition: I256::try_from(net_position).expect("fits"),
        avgPrice: U256::from(avg_price),
        realizedProfit: I256::ZERO,
        frozenFunds: I256::ZERO,
        realizedCost: I256::ZERO,
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
pub fn market_volume_changed(market: Address, volume: u64, outcome_volumes: &[u64]) -> LogData {
    abi::MarketVolumeChanged {
        universe: UNIVERSE,
        market,
        volume: U256::from(volume),
        outcomeVolumes: outcome_volumes.iter().map(|v| U256::from(*v)).collect(),
        timestamp: U256::from(GENESIS_TIMESTAMP),
    }
    .encode_log_data()
}

#[must_use]
pub fn transfer_single(from: Address, to: Address, id: u64, value: u64) -> LogData {
    abi::TransferSingle {
        operator: from,
        from,
        to,
        id: U256::from(id),
        value: U256::from(value),
    }
    .encode_log_data()
}

#[must_use]
pub fn tokens_minted(token: Address, target: Address, amount: u64, market: Address) -> LogData {
    abi::TokensMinted {
        universe: UNIVERSE,
        token,
        target,
        amount: U256::from(amount),
        tokenType: 0,
        market,
        totalSupply: U256::from(amount),
    }
    .encode_log_data()
}

#[must_use]
pub fn tokens_burned(token: Address, target: Address, amount: u64, market: Address) -> LogData {
    abi::TokensBurned {
        universe: UNIVERSE,
        token,
        target,
        amount: U256::from(amount),
        tokenType: 0,
        market,
        totalSupply: U256::ZERO,
    }
    .encode_log_data()
}
