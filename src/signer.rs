//! Signing capability.
//!
//! The client only needs to know that something can turn a fully populated
//! transaction into signed bytes. Whether that is a local key or a wallet that
//! asks a human is not its concern; a human saying no is reported as
//! `SignError::Rejected` and surfaces as a cancellation.

use alloy::{
    eips::eip2718::Encodable2718,
    network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder},
    primitives::{Address, Bytes, U256},
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;
use thiserror::Error;

/// A transaction with every field the signer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl UnsignedTx {
    /// Legacy (EIP-155) request carrying exactly these fields.
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_nonce(self.nonce)
            .with_gas_limit(self.gas_limit)
            .with_gas_price(self.gas_price)
            .with_chain_id(self.chain_id)
            .with_to(self.to)
            .with_input(self.data.clone())
            .with_value(self.value)
    }
}

#[derive(Debug, Error)]
pub enum SignError {
    /// The signer declined. Not retryable.
    #[error("signature request rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Failed(String),
}

/// Something that can sign transactions for one account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account the signatures are produced for.
    fn address(&self) -> Address;

    /// Sign and return the EIP-2718 encoded transaction.
    async fn sign_transaction(&self, tx: &UnsignedTx) -> Result<Bytes, SignError>;
}

#[async_trait]
impl TransactionSigner for EthereumWallet {
    fn address(&self) -> Address {
        <EthereumWallet as NetworkWallet<Ethereum>>::default_signer_address(self)
    }

    async fn sign_transaction(&self, tx: &UnsignedTx) -> Result<Bytes, SignError> {
        let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(
            tx.to_request(),
            self,
        )
        .await
        .map_err(|e| SignError::Failed(e.to_string()))?;
        Ok(envelope.encoded_2718().into())
    }
}
