//! JSON-RPC frames spoken over the subscription socket.
//!
//! Outbound: `eth_subscribe` / `eth_unsubscribe` requests with numeric ids.
//! Inbound: request acknowledgements, error responses and
//! `eth_subscription` notifications.
//!
//! Two notification shapes exist for the same logs:
//!
//! - `logs`: one notification per log
//! - `miniBlocks`: one notification per mini-block, carrying every receipt
//!   (and its logs) the mini-block contains

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{chain::parse_quantity, ext::RawLog};

pub const SUBSCRIBE_METHOD: &str = "eth_subscribe";
pub const UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";
pub const NOTIFICATION_METHOD: &str = "eth_subscription";

/// Notification format requested from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionFormat {
    /// Per-log notifications filtered by address on the node.
    Logs,
    /// Mini-block batches; filtered by address locally.
    MiniBlocks,
}

impl SubscriptionFormat {
    pub fn params(&self, contract: Address) -> Value {
        match self {
            SubscriptionFormat::Logs => json!([
                "logs",
                {"address": contract, "fromBlock": "pending", "toBlock": "pending"}
            ]),
            SubscriptionFormat::MiniBlocks => json!(["miniBlocks"]),
        }
    }
}

pub fn subscribe_request(id: u64, format: SubscriptionFormat, contract: Address) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": SUBSCRIBE_METHOD,
        "params": format.params(contract),
    })
    .to_string()
}

pub fn unsubscribe_request(id: u64, subscription: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": UNSUBSCRIBE_METHOD,
        "params": [subscription],
    })
    .to_string()
}

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to one of our requests.
    Response { id: u64, result: Value },
    /// Error response. `id` is absent when the node could not attribute it.
    Error {
        id: Option<u64>,
        code: i64,
        message: String,
    },
    Notification { subscription: String, result: Value },
    /// Valid JSON that is none of the above.
    Other,
    Malformed(String),
}

#[derive(Deserialize)]
struct Frame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: Value,
    #[serde(default)]
    result: Value,
}

/// Subscription ids are usually hex strings, but some nodes send numbers.
pub fn subscription_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_inbound(text: &str) -> Inbound {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return Inbound::Malformed(e.to_string()),
    };
    let id = frame.id.as_ref().and_then(parse_quantity);

    if let Some(error) = frame.error {
        return Inbound::Error {
            id,
            code: error.code,
            message: error.message,
        };
    }

    if frame.method.as_deref() == Some(NOTIFICATION_METHOD) {
        if let Some(params) = frame.params {
            if let Some(subscription) = subscription_key(&params.subscription) {
                return Inbound::Notification {
                    subscription,
                    result: params.result,
                };
            }
        }
        return Inbound::Other;
    }

    match (id, frame.result) {
        (Some(id), Some(result)) => Inbound::Response { id, result },
        _ => Inbound::Other,
    }
}

// ============================================================================
// Batch notifications
// ============================================================================

fn field<'a>(object: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

/// Logs from `contract` in a batch (mini-block) result.
///
/// Returns `None` when `result` is not a batch. Missing per-log transaction
/// hash, block number and timestamp are filled in from the enclosing receipt
/// and block. Entries that do not parse as logs are skipped.
pub fn batch_logs(result: &Value, contract: Address) -> Option<Vec<RawLog>> {
    let entries = ["receipts", "transactions"]
        .iter()
        .find_map(|key| result.get(*key)?.as_array())?;

    let block_number = field(result, &["block_number", "blockNumber"]).and_then(parse_quantity);
    let timestamp =
        field(result, &["block_timestamp", "blockTimestamp", "timestamp"]).and_then(parse_quantity);

    let mut logs = Vec::new();
    for entry in entries {
        let Some(entry_logs) = entry.get("logs").and_then(Value::as_array) else {
            continue;
        };
        let tx_hash = field(entry, &["transactionHash", "transaction_hash", "hash"])
            .and_then(|v| B256::deserialize(v).ok());

        for raw in entry_logs {
            let mut log = match RawLog::deserialize(raw) {
                Ok(log) => log,
                Err(e) => {
                    tracing::trace!(error = %e, "skipping malformed log in batch");
                    continue;
                }
            };
            if log.address != contract {
                continue;
            }
            log.transaction_hash = log.transaction_hash.or(tx_hash);
            log.block_number = log.block_number.or(block_number);
            log.timestamp = log.timestamp.or(timestamp);
            logs.push(log);
        }
    }
    Some(logs)
}
