//! Raw log → named event.
//!
//! Decoding is total: every input produces a `DecodedEvent`, and the three
//! possible outcomes are spelled out in `DecodeOutcome` so callers have to
//! handle each of them. Logs that cannot be decoded keep their raw topics and
//! data for display and debugging.

use std::sync::Arc;

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    primitives::{Address, Bytes, B256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    chain::deserialize_opt_quantity,
    ext::{AbiRegistry, ContractDescriptor},
};

/// Reason reported for logs from contracts that are not registered.
pub const NO_ABI_FOR_ADDRESS: &str = "no ABI for address";

// ============================================================================
// Raw log
// ============================================================================

/// A log as delivered by a subscription notification or a receipt.
///
/// Only `address`, `topics` and `data` are needed to decode; the remaining
/// fields are carried through. Quantities may be hex strings or numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default, alias = "transaction_hash")]
    pub transaction_hash: Option<B256>,
    #[serde(default, alias = "block_number", deserialize_with = "deserialize_opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default, alias = "log_index", deserialize_with = "deserialize_opt_quantity")]
    pub log_index: Option<u64>,
    #[serde(
        default,
        alias = "blockTimestamp",
        alias = "block_timestamp",
        deserialize_with = "deserialize_opt_quantity"
    )]
    pub timestamp: Option<u64>,
}

impl From<&Log> for RawLog {
    fn from(log: &Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            transaction_hash: log.transaction_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            timestamp: log.block_timestamp,
        }
    }
}

// ============================================================================
// Decoded event
// ============================================================================

/// One decoded event parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct EventArg {
    pub name: String,
    pub indexed: bool,
    pub value: DynSolValue,
}

/// Event parameters in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs(pub Vec<EventArg>);

impl EventArgs {
    /// Value of the parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.0.iter().find(|arg| arg.name == name).map(|arg| &arg.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventArg> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Decoded {
        event_name: String,
        /// Canonical signature, e.g. `Transfer(address,address,uint256)`
        signature: String,
        args: EventArgs,
    },
    /// No ABI for the address, or no matching event in it. Expected when a
    /// contract gained events after its ABI was captured.
    Unknown { reason: String },
    /// An event matched but its payload did not decode.
    Error { message: String },
}

/// A log together with the result of decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub contract_address: Address,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub timestamp: Option<u64>,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub outcome: DecodeOutcome,
}

impl DecodedEvent {
    fn from_raw(log: &RawLog, outcome: DecodeOutcome) -> Self {
        Self {
            contract_address: log.address,
            transaction_hash: log.transaction_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            timestamp: log.timestamp,
            topics: log.topics.clone(),
            data: log.data.clone(),
            outcome,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self.outcome, DecodeOutcome::Decoded { .. })
    }

    pub fn event_name(&self) -> Option<&str> {
        match &self.outcome {
            DecodeOutcome::Decoded { event_name, .. } => Some(event_name),
            _ => None,
        }
    }

    pub fn args(&self) -> Option<&EventArgs> {
        match &self.outcome {
            DecodeOutcome::Decoded { args, .. } => Some(args),
            _ => None,
        }
    }

    /// Why decoding did not succeed.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            DecodeOutcome::Decoded { .. } => None,
            DecodeOutcome::Unknown { reason } => Some(reason),
            DecodeOutcome::Error { message } => Some(message),
        }
    }

    /// `(transactionHash, logIndex)`, the identity used for deduplication.
    pub fn dedup_key(&self) -> Option<(B256, u64)> {
        Some((self.transaction_hash?, self.log_index?))
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode `log` against the registry. Never fails.
pub fn decode_log(registry: &AbiRegistry, log: &RawLog) -> DecodedEvent {
    let outcome = match registry.get(&log.address) {
        Some(contract) => decode_with(contract, log),
        None => DecodeOutcome::Unknown {
            reason: NO_ABI_FOR_ADDRESS.to_string(),
        },
    };
    if let DecodeOutcome::Error { message } = &outcome {
        tracing::debug!(address = %log.address, error = %message, "failed to decode log");
    }
    DecodedEvent::from_raw(log, outcome)
}

fn decode_with(contract: &ContractDescriptor, log: &RawLog) -> DecodeOutcome {
    let Some(topic0) = log.topics.first() else {
        return DecodeOutcome::Unknown {
            reason: "log has no topics".to_string(),
        };
    };
    let Some(event) = contract.event_by_selector(topic0) else {
        return DecodeOutcome::Unknown {
            reason: format!("unknown event signature {topic0}"),
        };
    };

    match event.decode_log_parts(log.topics.iter().copied(), &log.data) {
        Ok(decoded) => {
            let mut indexed = decoded.indexed.into_iter();
            let mut body = decoded.body.into_iter();
            let args = event
                .inputs
                .iter()
                .enumerate()
                .filter_map(|(i, param)| {
                    let value = if param.indexed {
                        indexed.next()
                    } else {
                        body.next()
                    }?;
                    let name = if param.name.is_empty() {
                        format!("arg{i}")
                    } else {
                        param.name.clone()
                    };
                    Some(EventArg {
                        name,
                        indexed: param.indexed,
                        value,
                    })
                })
                .collect();
            DecodeOutcome::Decoded {
                event_name: event.name.clone(),
                signature: event.signature(),
                args: EventArgs(args),
            }
        }
        Err(e) => DecodeOutcome::Error {
            message: e.to_string(),
        },
    }
}

/// Shared decoder over a fixed registry.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    registry: Arc<AbiRegistry>,
}

impl EventDecoder {
    pub fn new(registry: Arc<AbiRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<AbiRegistry> {
        &self.registry
    }

    pub fn decode(&self, log: &RawLog) -> DecodedEvent {
        decode_log(&self.registry, log)
    }

    /// Decode a log straight from its JSON form. Payloads that are not a
    /// log at all come back as `DecodeOutcome::Error`.
    pub fn decode_json(&self, value: &Value) -> DecodedEvent {
        match RawLog::deserialize(value) {
            Ok(log) => self.decode(&log),
            Err(e) => DecodedEvent::from_raw(
                &RawLog::default(),
                DecodeOutcome::Error {
                    message: format!("malformed log: {e}"),
                },
            ),
        }
    }
}
