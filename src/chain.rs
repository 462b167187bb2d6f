//! Network reads and synchronous submission.
//!
//! The rest of the crate talks to the chain only through two narrow traits:
//!
//! - `ChainReader`: confirmed transaction count (nonce baseline) and balance
//! - `SyncSubmitter`: submit a signed transaction and get the final receipt
//!   back in the same response
//!
//! `RealtimeProvider` implements both over an alloy HTTP `RootProvider`.
//! There is no "get receipt by hash" step anywhere in this crate: the receipt
//! returned by `send_raw_transaction_sync` is final.

use std::borrow::Cow;

use alloy::{
    network::Ethereum,
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, RootProvider},
    rpc::types::Log,
    transports::TransportResult,
};
use async_trait::async_trait;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default name of the synchronous submission method.
pub const DEFAULT_SYNC_METHOD: &str = "realtime_sendRawTransaction";

// ============================================================================
// Capabilities
// ============================================================================

/// Read access to account state.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Confirmed transaction count, i.e. the next nonce from the chain's view.
    async fn transaction_count(&self, address: Address) -> TransportResult<u64>;

    /// Current balance in wei. Diagnostic use only.
    async fn balance(&self, address: Address) -> TransportResult<U256>;
}

/// Submission of a signed transaction that blocks until the node has a
/// final receipt for it.
#[async_trait]
pub trait SyncSubmitter: Send + Sync {
    async fn send_raw_transaction_sync(&self, raw: Bytes) -> TransportResult<SyncReceipt>;
}

// ============================================================================
// Receipt
// ============================================================================

/// Execution status reported in a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "Value")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

impl TryFrom<Value> for ReceiptStatus {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let success = match &value {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("success") => Some(true),
            Value::String(s)
                if s.eq_ignore_ascii_case("failure") || s.eq_ignore_ascii_case("reverted") =>
            {
                Some(false)
            }
            other => parse_quantity(other).map(|n| n != 0),
        };
        success
            .map(|ok| if ok { ReceiptStatus::Success } else { ReceiptStatus::Failure })
            .ok_or_else(|| format!("invalid receipt status: {value}"))
    }
}

/// Receipt returned by the synchronous submission method.
///
/// Numeric fields are normalized to `u64` whether the node sends hex
/// quantities, decimal strings or JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub block_number: u64,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub gas_used: u64,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl SyncReceipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Parse a JSON quantity: `"0x1a"`, `"26"` or `26`.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    }
}

pub(crate) fn deserialize_quantity<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_quantity(&value).ok_or_else(|| D::Error::custom(format!("invalid quantity: {value}")))
}

pub(crate) fn deserialize_opt_quantity<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_quantity))
}

// ============================================================================
// RealtimeProvider
// ============================================================================

/// HTTP JSON-RPC access to a realtime chain.
#[derive(Debug, Clone)]
pub struct RealtimeProvider {
    provider: RootProvider<Ethereum>,
    sync_method: Cow<'static, str>,
}

impl RealtimeProvider {
    /// Create a provider for `rpc_url` using the default sync method.
    pub fn with_http(rpc_url: &str) -> anyhow::Result<Self> {
        let provider = RootProvider::<Ethereum>::new_http(rpc_url.parse()?);
        Ok(Self {
            provider,
            sync_method: Cow::Borrowed(DEFAULT_SYNC_METHOD),
        })
    }

    /// Override the synchronous submission method name.
    pub fn with_sync_method(mut self, method: impl Into<String>) -> Self {
        self.sync_method = Cow::Owned(method.into());
        self
    }

    pub fn root(&self) -> &RootProvider<Ethereum> {
        &self.provider
    }

    pub async fn chain_id(&self) -> TransportResult<u64> {
        self.provider.get_chain_id().await
    }
}

#[async_trait]
impl ChainReader for RealtimeProvider {
    async fn transaction_count(&self, address: Address) -> TransportResult<u64> {
        self.provider.get_transaction_count(address).await
    }

    async fn balance(&self, address: Address) -> TransportResult<U256> {
        self.provider.get_balance(address).await
    }
}

#[async_trait]
impl SyncSubmitter for RealtimeProvider {
    async fn send_raw_transaction_sync(&self, raw: Bytes) -> TransportResult<SyncReceipt> {
        tracing::debug!(method = %self.sync_method, len = raw.len(), "submitting raw transaction");
        self.provider
            .raw_request::<_, SyncReceipt>(self.sync_method.clone(), (raw,))
            .await
    }
}
