//! Contract interfaces known to the process.
//!
//! Built once at startup from configuration and shared read-only afterwards.
//! Lookup is by `Address`, which compares raw bytes, so addresses written in
//! any letter case resolve to the same contract.

use std::{collections::HashMap, sync::Arc};

use alloy::{
    json_abi::{Event, JsonAbi},
    primitives::{Address, B256},
};
use serde_json::Value;

/// One contract: address plus interface, with its non-anonymous events
/// indexed by topic0.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    pub name: Option<String>,
    pub address: Address,
    pub abi: JsonAbi,
    events: HashMap<B256, Event>,
}

impl ContractDescriptor {
    pub fn new(address: Address, abi: JsonAbi) -> Self {
        let events = abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| (event.selector(), event.clone()))
            .collect();
        Self {
            name: None,
            address,
            abi,
            events,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse either a bare ABI array or a build artifact with an `abi` field.
    pub fn from_artifact_json(address: Address, json: &str) -> serde_json::Result<Self> {
        let mut value: Value = serde_json::from_str(json)?;
        let abi = match value.get_mut("abi") {
            Some(abi) => serde_json::from_value(abi.take())?,
            None => serde_json::from_value(value)?,
        };
        Ok(Self::new(address, abi))
    }

    /// Event whose signature hash is `topic0`.
    pub fn event_by_selector(&self, topic0: &B256) -> Option<&Event> {
        self.events.get(topic0)
    }

    pub fn event(&self, name: &str) -> Option<&Event> {
        self.events.values().find(|event| event.name == name)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Display label: the configured name or the address.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Address → contract interface.
#[derive(Debug, Clone, Default)]
pub struct AbiRegistry {
    contracts: HashMap<Address, Arc<ContractDescriptor>>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(mut self, descriptor: ContractDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// Add a contract, replacing any previous entry for the same address.
    pub fn insert(&mut self, descriptor: ContractDescriptor) -> Option<Arc<ContractDescriptor>> {
        tracing::debug!(
            address = %descriptor.address,
            events = descriptor.event_count(),
            name = descriptor.name.as_deref().unwrap_or(""),
            "registered contract abi"
        );
        self.contracts
            .insert(descriptor.address, Arc::new(descriptor))
    }

    pub fn get(&self, address: &Address) -> Option<&Arc<ContractDescriptor>> {
        self.contracts.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.contracts.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.contracts.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}
