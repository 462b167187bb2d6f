//! RPC error classification and the transaction error taxonomy.
//!
//! Submission failures come back from the node as free-form messages. This
//! module maps them onto a small set of kinds (`RpcErrorKind`) and, from
//! there, onto the caller-facing `TxError`, which carries a short title and
//! an optional longer description suitable for surfacing to a user.

use std::time::Duration;

use alloy::{
    primitives::{B256, U256},
    transports::RpcError,
};
use thiserror::Error;

use crate::ext::SyncReceipt;

// ============================================================================
// Error Classification Types
// ============================================================================

/// Classified RPC error types.
///
/// Each variant corresponds to a specific error condition that may occur
/// during transaction submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Nonce is lower than expected (already used on chain)
    NonceTooLow,

    /// Nonce creates a gap (higher than expected)
    NonceTooHigh,

    /// Insufficient funds for gas * price + value
    InsufficientFunds,

    /// Gas limit too low for transaction
    IntrinsicGasTooLow,

    /// Simulation or execution reverted
    ExecutionReverted,

    /// Signer declined the request
    UserRejected,

    /// Transaction already known (duplicate)
    AlreadyKnown,

    /// Network/connection error
    NetworkError,

    /// Unknown or unclassified error
    Unknown,
}

// ============================================================================
// Error Classification Functions
// ============================================================================

/// Classify an error message into a known kind by pattern matching.
///
/// Different node implementations word the same condition differently, so
/// several patterns are checked for each kind. Order matters: nonce and
/// funds messages frequently also contain "gas" or "transaction".
pub fn classify_message(message: &str) -> RpcErrorKind {
    let error_str = message.to_lowercase();

    if error_str.contains("user rejected")
        || error_str.contains("user denied")
        || error_str.contains("rejected by user")
        || error_str.contains("request rejected")
    {
        return RpcErrorKind::UserRejected;
    }

    if error_str.contains("nonce too low")
        || error_str.contains("nonce is too low")
        || error_str.contains("transaction nonce is too low")
        || error_str.contains("invalid nonce")
            && (error_str.contains("too low") || error_str.contains("expected"))
    {
        return RpcErrorKind::NonceTooLow;
    }

    if error_str.contains("nonce too high")
        || error_str.contains("nonce is too high")
        || error_str.contains("nonce gap")
    {
        return RpcErrorKind::NonceTooHigh;
    }

    if error_str.contains("insufficient funds")
        || error_str.contains("insufficient balance")
        || error_str.contains("not enough funds")
        || error_str.contains("exceeds balance")
    {
        return RpcErrorKind::InsufficientFunds;
    }

    if error_str.contains("intrinsic gas too low")
        || error_str.contains("gas limit too low")
        || error_str.contains("out of gas")
        || error_str.contains("gas required exceeds")
    {
        return RpcErrorKind::IntrinsicGasTooLow;
    }

    if error_str.contains("execution reverted")
        || error_str.contains("revert")
        || error_str.contains("would fail")
    {
        return RpcErrorKind::ExecutionReverted;
    }

    if error_str.contains("already known")
        || error_str.contains("already imported")
        || error_str.contains("transaction already exists")
        || error_str.contains("known transaction")
    {
        return RpcErrorKind::AlreadyKnown;
    }

    if error_str.contains("connection")
        || error_str.contains("timeout")
        || error_str.contains("timed out")
        || error_str.contains("network")
        || error_str.contains("transport")
        || error_str.contains("eof")
        || error_str.contains("broken pipe")
    {
        return RpcErrorKind::NetworkError;
    }

    RpcErrorKind::Unknown
}

/// Classify an RPC error.
///
/// Transport-level failures (the request never got a JSON-RPC answer) are
/// network errors regardless of their message; error responses are
/// classified by message.
pub fn classify_rpc_error<E: std::fmt::Display>(error: &RpcError<E>) -> RpcErrorKind {
    match error {
        RpcError::Transport(_) => RpcErrorKind::NetworkError,
        RpcError::ErrorResp(payload) => classify_message(&payload.message),
        other => classify_message(&other.to_string()),
    }
}

// ============================================================================
// Transaction Errors
// ============================================================================

/// Classified failure of a synchronous transaction submission.
///
/// Every failure of `SyncTransactionClient::send_transaction` surfaces as one
/// of these; there is no partial or ambiguous result.
#[derive(Debug, Error)]
pub enum TxError {
    /// Local nonce diverged from the network. The counter has been resynced;
    /// the transaction itself was not retried.
    #[error("nonce conflict: {message}")]
    NonceConflict { message: String },

    /// Rejected for lack of balance. `balance` is looked up after the fact for
    /// context and is `None` if that lookup also failed.
    #[error("insufficient funds: {message}")]
    InsufficientFunds {
        message: String,
        balance: Option<U256>,
    },

    /// The node already holds this exact signed transaction, so it has been
    /// broadcast. Resubmitting it is never safe.
    #[error("transaction already known: {message}")]
    AlreadyKnown { message: String },

    /// An account read needed before signing failed. Nothing was sent.
    #[error("account read failed: {message}")]
    ReadFailed { message: String },

    #[error("gas too low: {message}")]
    GasTooLow { message: String },

    /// Execution reverted, either during submission or on chain. When the
    /// node returned a receipt with a failed status it is attached.
    #[error("execution reverted: {message}")]
    ExecutionReverted {
        message: String,
        receipt: Option<Box<SyncReceipt>>,
    },

    /// The signing capability declined to sign.
    #[error("user rejected the request: {message}")]
    UserRejected { message: String },

    /// The request did not complete. The transaction may or may not have been
    /// broadcast; it is never resubmitted automatically.
    #[error("network error: {message}")]
    Network { message: String },

    #[error("signing failed: {message}")]
    Signing { message: String },

    /// A response that did not match any known failure pattern.
    #[error("rpc error: {message}")]
    Rpc { message: String },
}

impl TxError {
    /// Build the error for a classified RPC failure.
    pub fn from_kind(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            RpcErrorKind::NonceTooLow | RpcErrorKind::NonceTooHigh => {
                TxError::NonceConflict { message }
            }
            RpcErrorKind::AlreadyKnown => TxError::AlreadyKnown { message },
            RpcErrorKind::InsufficientFunds => TxError::InsufficientFunds {
                message,
                balance: None,
            },
            RpcErrorKind::IntrinsicGasTooLow => TxError::GasTooLow { message },
            RpcErrorKind::ExecutionReverted => TxError::ExecutionReverted {
                message,
                receipt: None,
            },
            RpcErrorKind::UserRejected => TxError::UserRejected { message },
            RpcErrorKind::NetworkError => TxError::Network { message },
            RpcErrorKind::Unknown => TxError::Rpc { message },
        }
    }

    /// A receipt came back with a failed status.
    pub fn reverted(receipt: SyncReceipt) -> Self {
        TxError::ExecutionReverted {
            message: format!(
                "transaction {} failed in block {}",
                receipt.transaction_hash, receipt.block_number
            ),
            receipt: Some(Box::new(receipt)),
        }
    }

    /// Short classified title for display.
    pub fn title(&self) -> &'static str {
        match self {
            TxError::NonceConflict { .. } => "Nonce conflict",
            TxError::InsufficientFunds { .. } => "Insufficient funds",
            TxError::AlreadyKnown { .. } => "Transaction already submitted",
            TxError::ReadFailed { .. } => "Network error",
            TxError::GasTooLow { .. } => "Gas too low",
            TxError::ExecutionReverted { .. } => "Transaction reverted",
            TxError::UserRejected { .. } => "Request cancelled",
            TxError::Network { .. } => "Network error",
            TxError::Signing { .. } => "Signing failed",
            TxError::Rpc { .. } => "Transaction failed",
        }
    }

    /// Longer, human-readable explanation for display.
    pub fn description(&self) -> Option<String> {
        match self {
            TxError::NonceConflict { message } => Some(format!(
                "{message}. The account nonce was resynchronized with the network; \
                 the transaction was not sent and can be retried."
            )),
            TxError::InsufficientFunds { message, balance } => Some(match balance {
                Some(balance) => format!("{message}. Current balance: {balance} wei."),
                None => message.clone(),
            }),
            TxError::AlreadyKnown { message } => Some(format!(
                "{message}. The node already has this transaction and it was broadcast; \
                 do not resubmit it."
            )),
            TxError::ReadFailed { message } => Some(format!(
                "{message}. Nothing was signed or sent; the request can be retried."
            )),
            TxError::GasTooLow { message } => Some(format!(
                "{message}. The call would fail on-chain with the given gas limit."
            )),
            TxError::ExecutionReverted { message, .. } => Some(format!(
                "{message}. The call would fail on-chain."
            )),
            TxError::UserRejected { .. } => None,
            TxError::Network { message } => Some(format!(
                "{message}. The transaction may still have been broadcast; check the \
                 account before resubmitting."
            )),
            TxError::Signing { message } | TxError::Rpc { message } => Some(message.clone()),
        }
    }

    /// Whether the caller may simply resubmit.
    ///
    /// User rejections are a cancellation, and network errors or already
    /// known transactions risk double submission, so none is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxError::NonceConflict { .. } | TxError::ReadFailed { .. })
    }

    /// Hash of the failed transaction, when the node reported one.
    pub fn transaction_hash(&self) -> Option<B256> {
        match self {
            TxError::ExecutionReverted {
                receipt: Some(receipt),
                ..
            } => Some(receipt.transaction_hash),
            _ => None,
        }
    }
}

// ============================================================================
// Retry Utilities
// ============================================================================

/// Calculate the exponential backoff delay for a retry.
///
/// Uses `base * 2^attempt`, saturating at `Duration::MAX`. There is no upper
/// bound on the delay; bound the number of attempts instead.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use alloy_realtime::ext::backoff_duration;
///
/// let base = Duration::from_millis(100);
/// assert_eq!(backoff_duration(0, base), Duration::from_millis(100));
/// assert_eq!(backoff_duration(1, base), Duration::from_millis(200));
/// assert_eq!(backoff_duration(2, base), Duration::from_millis(400));
/// assert_eq!(backoff_duration(40, base), Duration::MAX);
/// ```
pub fn backoff_duration(attempt: u32, base: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}
