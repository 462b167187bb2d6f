//! # alloy-realtime
//!
//! Realtime client plumbing for low-latency EVM chains, built on Alloy.
//!
//! ## Core Features
//!
//! - **Synchronous Submission**: `SyncTransactionClient` signs, submits and
//!   returns the final receipt in one call, with no receipt polling
//! - **Optimistic Nonces**: in-memory nonce issuance with resync on failure
//!   and optional background resync while idle
//! - **Realtime Subscriptions**: one WebSocket, per-log and mini-block
//!   notification formats, reconnect with exponential backoff
//! - **Event Decoding**: total decoding of raw logs against a registry of
//!   contract ABIs
//! - **Error Classification**: RPC failures mapped to a small taxonomy with
//!   user-displayable titles, plus revert-reason decoding
//!
//! ## Usage
//!
//! ```ignore
//! use alloy_realtime::ext::*;
//!
//! let config = RealtimeConfig::load("realtime.toml")?;
//! let registry = Arc::new(config.abi_registry()?);
//!
//! let subscriptions =
//!     SubscriptionManager::with_tungstenite(&config.ws_url, config.subscription.clone(), registry);
//! subscriptions.subscribe(token, dedup_callback(10_000, |event| println!("{event:?}")));
//! subscriptions.connect();
//!
//! let client = SyncTransactionClient::from_config(&config, wallet)?;
//! let outcome = client.send_transaction(TxRequest::new(to).with_data(calldata)).await?;
//! ```

// ============================================================================
// Internal Module Declarations
// ============================================================================

/// Contract ABI registry keyed by address
mod abi;

/// Network read and synchronous submission capabilities
mod chain;

/// Synchronous transaction client
mod client;

/// Revert data decoding and the contract error registry
mod contract_error;

/// Raw log decoding into named events
mod decoder;

/// Consumer-side event deduplication
mod dedup;

/// RPC error classification and the transaction error taxonomy
mod error;

/// Gas price and gas limit defaults
mod gas;

/// Optimistic per-account nonce manager
mod nonce;

/// File and environment configuration
mod settings;

/// Transaction signing capability
mod signer;

/// User-facing status notices
mod status;

/// WebSocket subscription manager
mod subscription;

/// Test harness module (compiled only in test mode)
#[cfg(test)]
pub mod test_harness;

// ============================================================================
// Public Exports
// ============================================================================

/// Re-export all public APIs from the alloy crate.
pub use alloy::*;

/// Internal module for macro usage.
#[doc(hidden)]
pub mod __private {
    /// inventory crate - link-time registration of revert decoders
    pub use inventory;
    /// paste crate - identifier concatenation in macros
    pub use paste;
}

/// Extension module containing everything this crate adds:
///
/// - `SyncTransactionClient` - synchronous, nonce-managed submission
/// - `NonceManager` / `NonceManagers` - optimistic nonce issuance
/// - `SubscriptionManager` - realtime log subscriptions
/// - `AbiRegistry` / `EventDecoder` - raw log decoding
/// - `TxError` / `RpcErrorKind` - error taxonomy and classification
/// - `RealtimeConfig` - configuration loading
pub mod ext {
    pub use super::abi::*;
    pub use super::chain::*;
    pub use super::client::*;
    pub use super::contract_error::*;
    pub use super::decoder::*;
    pub use super::dedup::*;
    pub use super::error::*;
    pub use super::gas::*;
    pub use super::nonce::*;
    pub use super::settings::*;
    pub use super::signer::*;
    pub use super::status::*;
    pub use super::subscription::*;
}
