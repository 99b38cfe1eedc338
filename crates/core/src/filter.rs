use std::collections::BTreeSet;

use alloy::primitives::{Address, B256};
use alloy_rpc_types_eth::Filter;
use serde::{Deserialize, Serialize};

use crate::decoder::signature_hash;
use crate::events::EventName;
use crate::registry::{ContractName, ContractRegistry};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("no address configured for contract {contract} emitting {event}")]
    UnknownContractForEvent {
        event: EventName,
        contract: ContractName,
    },
    #[error("address {address} is not the {contract} contract required by {event}")]
    AddressMismatch {
        event: EventName,
        contract: ContractName,
        address: Address,
    },
    #[error("invalid block range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("filter has no events")]
    NoEvents,
}

/// A single log query: union of contract addresses, topic0 alternatives in position 0,
/// inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub addresses: BTreeSet<Address>,
    pub topics: Vec<BTreeSet<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    /// Same filter, narrowed to another block range.
    #[must_use]
    pub fn with_range(&self, from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn matches(&self, address: &Address, topic0: Option<&B256>, block: u64) -> bool {
        if block < self.from_block || block > self.to_block {
            return false;
        }
        if !self.addresses.is_empty() && !self.addresses.contains(address) {
            return false;
        }
        match (self.topics.first(), topic0) {
            (Some(alternatives), Some(topic)) => {
                alternatives.is_empty() || alternatives.contains(topic)
            }
            (Some(alternatives), None) => alternatives.is_empty(),
            (None, _) => true,
        }
    }

    #[must_use]
    pub fn to_rpc(&self) -> Filter {
        let signatures: Vec<B256> = self
            .topics
            .first()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        Filter::new()
            .from_block(self.from_block)
            .to_block(self.to_block)
            .address(self.addresses.iter().copied().collect::<Vec<_>>())
            .event_signature(signatures)
    }
}

/// Builds one filter covering every event of interest.
///
/// Each event is resolved to the address of the contract that declares it. Duplicate
/// events collapse into the same address and topic entries.
pub fn build_filter(
    registry: &ContractRegistry,
    events: &[EventName],
    from_block: u64,
    to_block: u64,
) -> Result<LogFilter, FilterError> {
    let pairs = events
        .iter()
        .map(|event| {
            let contract = event.contract();
            registry
                .address_of(contract)
                .map(|address| (address, *event))
                .ok_or(FilterError::UnknownContractForEvent {
                    event: *event,
                    contract,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    build_filter_for_pairs(registry, &pairs, from_block, to_block)
}

/// Same as [`build_filter`] but with explicit `(address, event)` interests, each of which
/// must name the address the registry holds for the event's contract.
pub fn build_filter_for_pairs(
    registry: &ContractRegistry,
    interests: &[(Address, EventName)],
    from_block: u64,
    to_block: u64,
) -> Result<LogFilter, FilterError> {
    if from_block > to_block {
        return Err(FilterError::InvalidRange {
            from: from_block,
            to: to_block,
        });
    }
    if interests.is_empty() {
        return Err(FilterError::NoEvents);
    }

    let mut addresses = BTreeSet::new();
    let mut signatures = BTreeSet::new();
    for (address, event) in interests {
        let contract = event.contract();
        match registry.contract_at(address) {
            Some(found) if found == contract => {}
            Some(_) => {
                return Err(FilterError::AddressMismatch {
                    event: *event,
                    contract,
                    address: *address,
                });
            }
            None => {
                return Err(FilterError::UnknownContractForEvent {
                    event: *event,
                    contract,
                });
            }
        }
        addresses.insert(*address);
        signatures.insert(signature_hash(*event));
    }

    Ok(LogFilter {
        addresses,
        topics: vec![signatures],
        from_block,
        to_block,
    })
}
