use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use alloy_rpc_types_eth::Log;
use std::sync::Arc;

use crate::contracts::augur as abi;
use crate::events::{self, EventName, EventPayload, EventRecord};
use crate::registry::{ContractName, ContractRegistry};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("log emitted by unknown contract {0}")]
    UnknownContract(Address),
    #[error("unknown event topic {topic} on contract {contract}")]
    UnknownEvent { contract: ContractName, topic: B256 },
    #[error("log has no topics")]
    MissingTopic,
    #[error("log is missing {0}")]
    MissingField(&'static str),
    #[error("failed to decode {event}: {source}")]
    Abi {
        event: EventName,
        #[source]
        source: alloy::sol_types::Error,
    },
}

/// Turns raw logs into typed records.
pub trait LogDecoder: Send + Sync {
    fn parse_logs(&self, logs: &[Log]) -> Result<Vec<EventRecord>, DecodeError>;
}

#[must_use]
pub fn signature_hash(event: EventName) -> B256 {
    match event {
        EventName::MarketCreated => abi::MarketCreated::SIGNATURE_HASH,
        EventName::InitialReportSubmitted => abi::InitialReportSubmitted::SIGNATURE_HASH,
        EventName::TokensMinted => abi::TokensMinted::SIGNATURE_HASH,
        EventName::TokensBurned => abi::TokensBurned::SIGNATURE_HASH,
        EventName::OrderCreated => abi::OrderCreated::SIGNATURE_HASH,
        EventName::OrderFilled => abi::OrderFilled::SIGNATURE_HASH,
        EventName::OrderCanceled => abi::OrderCanceled::SIGNATURE_HASH,
        EventName::ProfitLossChanged => abi::ProfitLossChanged::SIGNATURE_HASH,
        EventName::MarketVolumeChanged => abi::MarketVolumeChanged::SIGNATURE_HASH,
        EventName::TransferSingle => abi::TransferSingle::SIGNATURE_HASH,
    }
}

/// Decoder backed by the ABI bindings and a contract registry.
#[derive(Debug, Clone)]
pub struct ContractEventDecoder {
    registry: Arc<ContractRegistry>,
}

impl ContractEventDecoder {
    pub fn new(registry: Arc<ContractRegistry>) -> Self {
        Self { registry }
    }

    pub fn parse_log(&self, log: &Log) -> Result<EventRecord, DecodeError> {
        let address = log.inner.address;
        let contract = self
            .registry
            .contract_at(&address)
            .ok_or(DecodeError::UnknownContract(address))?;
        let topic0 = log.topics().first().ok_or(DecodeError::MissingTopic)?;
        let event = self
            .registry
            .event_for_topic(contract, topic0)
            .ok_or(DecodeError::UnknownEvent {
                contract,
                topic: *topic0,
            })?;

        let payload = decode_payload(event, log)
            .map_err(|source| DecodeError::Abi { event, source })?;

        Ok(EventRecord {
            address,
            block_number: log
                .block_number
                .ok_or(DecodeError::MissingField("block_number"))?,
            block_hash: log
                .block_hash
                .ok_or(DecodeError::MissingField("block_hash"))?,
            transaction_hash: log
                .transaction_hash
                .ok_or(DecodeError::MissingField("transaction_hash"))?,
            transaction_index: log.transaction_index.unwrap_or_default(),
            log_index: log.log_index.ok_or(DecodeError::MissingField("log_index"))?,
            removed: log.removed,
            payload,
        })
    }
}

impl LogDecoder for ContractEventDecoder {
    fn parse_logs(&self, logs: &[Log]) -> Result<Vec<EventRecord>, DecodeError> {
        logs.iter().map(|log| self.parse_log(log)).collect()
    }
}

fn decode_payload(event: EventName, log: &Log) -> Result<EventPayload, alloy::sol_types::Error> {
    let data = &log.inner.data;
    let payload = match event {
        EventName::MarketCreated => {
            let e = abi::MarketCreated::decode_log_data(data)?;
            EventPayload::MarketCreated(events::MarketCreated {
                universe: e.universe,
                market: e.market,
                market_creator: e.marketCreator,
                designated_reporter: e.designatedReporter,
                end_time: e.endTime,
                fee_per_cash_in_atto_cash: e.feePerCashInAttoCash,
                prices: e.prices,
                market_type: e.marketType,
                num_ticks: e.numTicks,
                outcomes: e.outcomes,
                no_show_bond: e.noShowBond,
                timestamp: e.timestamp,
                extra_info: e.extraInfo,
            })
        }
        EventName::InitialReportSubmitted => {
            let e = abi::InitialReportSubmitted::decode_log_data(data)?;
            EventPayload::InitialReportSubmitted(events::InitialReportSubmitted {
                universe: e.universe,
                reporter: e.reporter,
                market: e.market,
                initial_reporter: e.initialReporter,
                amount_staked: e.amountStaked,
                is_designated_reporter: e.isDesignatedReporter,
                payout_numerators: e.payoutNumerators,
                description: e.description,
                next_window_start_time: e.nextWindowStartTime,
                next_window_end_time: e.nextWindowEndTime,
                timestamp: e.timestamp,
            })
        }
        EventName::TokensMinted => {
            let e = abi::TokensMinted::decode_log_data(data)?;
            EventPayload::TokensMinted(events::TokenSupplyChanged {
                universe: e.universe,
                token: e.token,
                target: e.target,
                amount: e.amount,
                token_type: e.tokenType,
                market: e.market,
                total_supply: e.totalSupply,
            })
        }
        EventName::TokensBurned => {
            let e = abi::TokensBurned::decode_log_data(data)?;
            EventPayload::TokensBurned(events::TokenSupplyChanged {
                universe: e.universe,
                token: e.token,
                target: e.target,
                amount: e.amount,
                token_type: e.tokenType,
                market: e.market,
                total_supply: e.totalSupply,
            })
        }
        EventName::OrderCreated => {
            let e = abi::OrderCreated::decode_log_data(data)?;
            EventPayload::OrderCreated(events::OrderCreated {
                universe: e.universe,
                market: e.market,
                order_id: e.orderId,
                creator: e.creator,
                outcome: e.outcome,
                order_type: e.orderType,
                price: e.price,
                amount: e.amount,
                trade_group_id: e.tradeGroupId,
                timestamp: e.timestamp,
            })
        }
        EventName::OrderFilled => {
            let e = abi::OrderFilled::decode_log_data(data)?;
            EventPayload::OrderFilled(events::OrderFilled {
                universe: e.universe,
                market: e.market,
                order_id: e.orderId,
                creator: e.creator,
                filler: e.filler,
                outcome: e.outcome,
                order_type: e.orderType,
                price: e.price,
                amount_filled: e.amountFilled,
                trade_group_id: e.tradeGroupId,
                timestamp: e.timestamp,
            })
        }
        EventName::OrderCanceled => {
            let e = abi::OrderCanceled::decode_log_data(data)?;
            EventPayload::OrderCanceled(events::OrderCanceled {
                universe: e.universe,
                market: e.market,
                order_id: e.orderId,
                creator: e.creator,
                outcome: e.outcome,
                order_type: e.orderType,
                timestamp: e.timestamp,
            })
        }
        EventName::ProfitLossChanged => {
            let e = abi::ProfitLossChanged::decode_log_data(data)?;
            EventPayload::ProfitLossChanged(events::ProfitLossChanged {
                universe: e.universe,
                market: e.market,
                account: e.account,
                outcome: e.outcome,
                net_position: e.netPosition,
                avg_price: e.avgPrice,
                realized_profit: e.realizedProfit,
                frozen_funds: e.frozenFunds,
                realized_cost: e.realizedCost,
                timestamp: e.timestamp,
            })
        }
        EventName::MarketVolumeChanged => {
            let e = abi::MarketVolumeChanged::decode_log_data(data)?;
            EventPayload::MarketVolumeChanged(events::MarketVolumeChanged {
                universe: e.universe,
                market: e.market,
                volume: e.volume,
                outcome_volumes: e.outcomeVolumes,
                timestamp: e.timestamp,
            })
        }
        EventName::TransferSingle => {
            let e = abi::TransferSingle::decode_log_data(data)?;
            EventPayload::TransferSingle(events::TransferSingle {
                operator: e.operator,
                from: e.from,
                to: e.to,
                id: e.id,
                value: e.value,
            })
        }
    };
    Ok(payload)
}
