//! Gas defaults for synchronous submission.
//!
//! The target network has flat, low fees, so the gas price is a fixed
//! configured value rather than a fee-market query. The gas limit is either
//! supplied by the caller or picked from a transaction class inferred from
//! the leading bytes of the calldata.

use alloy::hex;
use serde::Deserialize;

/// 0.001 gwei.
pub const DEFAULT_GAS_PRICE_WEI: u64 = 1_000_000;
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;
pub const DEPLOYMENT_GAS_LIMIT: u64 = 10_000_000;

/// Solidity init code begins by setting up the free memory pointer
/// (`PUSH1 0x80 PUSH1 0x40`, or `0x60 0x40` from older compilers).
pub const DEFAULT_DEPLOYMENT_SIGNATURES: &[&str] = &["0x60806040", "0x60606040"];

/// Coarse classification of an outgoing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxClass {
    /// Calldata carries contract creation code.
    Deployment,
    /// Any other non-empty calldata.
    Call,
    /// No calldata.
    Transfer,
}

impl TxClass {
    /// Classify calldata against a set of deployment prefixes.
    pub fn classify(data: &[u8], deployment_signatures: &[Vec<u8>]) -> Self {
        if data.is_empty() {
            return TxClass::Transfer;
        }
        if deployment_signatures
            .iter()
            .any(|sig| !sig.is_empty() && data.starts_with(sig))
        {
            return TxClass::Deployment;
        }
        TxClass::Call
    }
}

/// Gas pricing and limit defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Fixed gas price in wei
    pub gas_price_wei: u64,
    /// Limit for calls and transfers when the caller gives none
    pub default_gas_limit: u64,
    /// Limit for deployments when the caller gives none
    pub deployment_gas_limit: u64,
    /// Hex calldata prefixes that mark a deployment
    pub deployment_signatures: Vec<String>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            gas_price_wei: DEFAULT_GAS_PRICE_WEI,
            default_gas_limit: DEFAULT_GAS_LIMIT,
            deployment_gas_limit: DEPLOYMENT_GAS_LIMIT,
            deployment_signatures: DEFAULT_DEPLOYMENT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl GasConfig {
    pub fn with_gas_price(mut self, wei: u64) -> Self {
        self.gas_price_wei = wei;
        self
    }

    pub fn with_default_gas_limit(mut self, limit: u64) -> Self {
        self.default_gas_limit = limit;
        self
    }

    pub fn with_deployment_gas_limit(mut self, limit: u64) -> Self {
        self.deployment_gas_limit = limit;
        self
    }

    pub fn gas_price(&self) -> u128 {
        u128::from(self.gas_price_wei)
    }

    /// Decoded deployment prefixes. Entries that are not valid hex are skipped.
    pub fn signature_prefixes(&self) -> Vec<Vec<u8>> {
        self.deployment_signatures
            .iter()
            .filter_map(|sig| match hex::decode(sig) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(signature = %sig, error = %e, "ignoring invalid deployment signature");
                    None
                }
            })
            .collect()
    }

    pub fn classify(&self, data: &[u8]) -> TxClass {
        TxClass::classify(data, &self.signature_prefixes())
    }

    /// Effective gas limit for `data`. An explicit limit always wins.
    pub fn gas_limit_for(&self, data: &[u8], explicit: Option<u64>) -> (u64, TxClass) {
        let class = self.classify(data);
        let limit = match (explicit, class) {
            (Some(limit), _) => limit,
            (None, TxClass::Deployment) => self.deployment_gas_limit,
            (None, _) => self.default_gas_limit,
        };
        (limit, class)
    }
}
