//! Readable causes for reverted transactions.
//!
//! When the synchronous submission call fails with a revert, the node usually
//! attaches the raw revert data to the JSON-RPC error. This module turns that
//! data into something a user can read:
//!
//! 1. the standard `Error(string)` and `Panic(uint256)` encodings
//! 2. any custom error set registered with `register_contract_errors!`
//!
//! Custom decoders are collected at link time by `inventory`, so contract
//! bindings can register themselves from wherever they are defined:
//!
//! ```text
//! register_contract_errors!(Vault)
//!     │
//!     ▼
//! inventory::submit!(RevertDecoder { ... })
//!     │
//!     ▼ (runtime)
//! decode_revert_data(&data) → "Vault::Unauthorized(...)"
//! ```

use alloy::{
    primitives::Bytes,
    sol_types::{Panic, Revert, SolError},
    transports::{RpcError, TransportError},
};

/// Custom error decoder for one contract.
pub struct RevertDecoder {
    /// Contract name, used in log output
    pub name: &'static str,
    pub decode: fn(&[u8]) -> Option<String>,
}

inventory::collect!(RevertDecoder);

/// Decode revert data into a readable cause.
///
/// Standard encodings are tried first, then every registered decoder.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    if let Ok(revert) = Revert::abi_decode(data) {
        return Some(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        return Some(format!("panic code {}", panic.code));
    }
    inventory::iter::<RevertDecoder>
        .into_iter()
        .find_map(|decoder| {
            let cause = (decoder.decode)(data)?;
            tracing::trace!(contract = decoder.name, %cause, "decoded custom revert");
            Some(cause)
        })
}

/// Revert cause carried by an RPC error response, if any.
pub fn revert_reason(err: &TransportError) -> Option<String> {
    let RpcError::ErrorResp(payload) = err else {
        return None;
    };
    let data = payload.data.as_ref()?;
    let data = serde_json::from_str::<Bytes>(data.get()).ok()?;
    decode_revert_data(&data)
}

/// The error's message with its decoded revert cause appended.
pub fn describe_rpc_error(err: &TransportError) -> String {
    let message = match err {
        RpcError::ErrorResp(payload) => payload.message.to_string(),
        other => other.to_string(),
    };
    match revert_reason(err) {
        Some(cause) => format!("{message}, caused by: {cause}"),
        None => message,
    }
}

/// Register revert decoders for contracts defined with `alloy::sol!`.
///
/// # Example
///
/// ```ignore
/// alloy::sol! {
///     #[sol(all_derives)]
///     Vault,
///     "abi/Vault.json"
/// }
///
/// register_contract_errors!(Vault);
/// ```
#[macro_export]
macro_rules! register_contract_errors {
    ($($contract:ident),* $(,)?) => {
        $(
            $crate::__private::paste::paste! {
                $crate::__private::inventory::submit! {
                    $crate::ext::RevertDecoder {
                        name: stringify!($contract),
                        decode: |data| {
                            use $crate::sol_types::SolInterface;
                            $contract::[<$contract Errors>]::abi_decode(data)
                                .ok()
                                .map(|e| format!("{}::{:?}", stringify!($contract), e))
                        },
                    }
                }
            }
        )*
    };
}
