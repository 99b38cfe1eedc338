use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::events::EventName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContractName {
    Augur,
    AugurTrading,
    ShareToken,
}

impl ContractName {
    pub const ALL: [ContractName; 3] = [
        ContractName::Augur,
        ContractName::AugurTrading,
        ContractName::ShareToken,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ContractName::Augur => "Augur",
            ContractName::AugurTrading => "AugurTrading",
            ContractName::ShareToken => "ShareToken",
        }
    }
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContractName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown contract name: {s}"))
    }
}

/// Deployed addresses of the synced contracts and the event-to-contract map.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    by_address: HashMap<Address, ContractName>,
    by_name: BTreeMap<ContractName, Address>,
    topics: HashMap<B256, EventName>,
}

impl ContractRegistry {
    pub fn new(addresses: impl IntoIterator<Item = (ContractName, Address)>) -> Self {
        let by_name: BTreeMap<ContractName, Address> = addresses.into_iter().collect();
        let by_address = by_name.iter().map(|(name, addr)| (*addr, *name)).collect();
        let topics = EventName::ALL
            .into_iter()
            .map(|event| (crate::decoder::signature_hash(event), event))
            .collect();
        Self {
            by_address,
            by_name,
            topics,
        }
    }

    #[must_use]
    pub fn contract_at(&self, address: &Address) -> Option<ContractName> {
        self.by_address.get(address).copied()
    }

    #[must_use]
    pub fn address_of(&self, contract: ContractName) -> Option<Address> {
        self.by_name.get(&contract).copied()
    }

    /// Resolves a topic0 to an event, provided the emitting contract is the one that
    /// declares it.
    #[must_use]
    pub fn event_for_topic(&self, contract: ContractName, topic0: &B256) -> Option<EventName> {
        self.topics
            .get(topic0)
            .copied()
            .filter(|event| event.contract() == contract)
    }

    /// Events whose emitting contract has a configured address.
    pub fn known_events(&self) -> impl Iterator<Item = EventName> + '_ {
        EventName::ALL
            .into_iter()
            .filter(|event| self.by_name.contains_key(&event.contract()))
    }

    /// Events left out of [`Self::known_events`] because their contract has no address.
    pub fn unresolved_events(&self) -> impl Iterator<Item = EventName> + '_ {
        EventName::ALL
            .into_iter()
            .filter(|event| !self.by_name.contains_key(&event.contract()))
    }

    pub fn contracts(&self) -> impl Iterator<Item = (ContractName, Address)> + '_ {
        self.by_name.iter().map(|(name, addr)| (*name, *addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_resolve_only_for_declaring_contract() {
        let registry = ContractRegistry::new([
            (ContractName::Augur, Address::repeat_byte(0xa1)),
            (ContractName::ShareToken, Address::repeat_byte(0x5e)),
        ]);
        let topic = crate::decoder::signature_hash(EventName::TransferSingle);
        assert_eq!(
            registry.event_for_topic(ContractName::ShareToken, &topic),
            Some(EventName::TransferSingle)
        );
        assert_eq!(registry.event_for_topic(ContractName::Augur, &topic), None);
        assert_eq!(
            registry.contract_at(&Address::repeat_byte(0x5e)),
            Some(ContractName::ShareToken)
        );
        assert!(
            registry
                .known_events()
                .all(|event| event.contract() != ContractName::AugurTrading)
        );
    }

    #[test]
    fn unresolved_events_complement_known_events() {
        let registry = ContractRegistry::new([
            (ContractName::Augur, Address::repeat_byte(0xa1)),
            (ContractName::AugurTrading, Address::repeat_byte(0xa2)),
        ]);
        assert_eq!(
            registry.unresolved_events().collect::<Vec<_>>(),
            vec![EventName::TransferSingle]
        );
        assert_eq!(registry.known_events().count() + 1, EventName::ALL.len());
    }
}
