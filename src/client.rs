//! Synchronous, nonce-managed transaction submission.
//!
//! `SyncTransactionClient::send_transaction` resolves only once the node has
//! a final receipt: the submission RPC returns it in the same response, so
//! there is no hash to poll. The flow for one call:
//!
//! ```text
//!   get_nonce ─► pick gas limit ─► sign ─► submit (blocks) ─► receipt
//!                                   │          │                 │
//!                                   └──────────┴─ failure ───────┴─ status failure
//!                                                    │
//!                                   on_transaction_complete(false) → resync
//!                                                    │
//!                                              classified TxError
//! ```
//!
//! Nothing is retried automatically. A nonce conflict resyncs the counter
//! and is reported; whether to send again is the caller's decision.

use std::sync::Arc;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, U256},
    transports::TransportError,
};
use tracing::{debug, info, warn};

use crate::ext::{
    classify_message, classify_rpc_error, describe_rpc_error, revert_reason, ChainReader,
    DecodedEvent, EventDecoder, GasConfig, NonceManager, NonceManagers, RawLog,
    RealtimeConfig, RpcErrorKind, SignError, StatusLevel, StatusNotice, StatusSink,
    SyncReceipt, SyncSubmitter, TracingStatusSink, TransactionSigner, TxClass, TxError,
    UnsignedTx,
};

// ============================================================================
// Request / Outcome
// ============================================================================

/// What the caller wants sent. Everything else is filled in by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Overrides the class-based default when set
    pub gas_limit: Option<u64>,
}

impl TxRequest {
    pub fn new(to: Address) -> Self {
        Self {
            to,
            data: Bytes::new(),
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// A settled, successful transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    pub receipt: SyncReceipt,
    pub success: bool,
    pub nonce: u64,
    pub gas_limit: u64,
    pub class: TxClass,
}

impl TxOutcome {
    pub fn transaction_hash(&self) -> alloy::primitives::B256 {
        self.receipt.transaction_hash
    }

    pub fn block_number(&self) -> u64 {
        self.receipt.block_number
    }

    pub fn gas_used(&self) -> u64 {
        self.receipt.gas_used
    }

    /// Decode the receipt's logs.
    pub fn events(&self, decoder: &EventDecoder) -> Vec<DecodedEvent> {
        self.receipt
            .logs
            .iter()
            .map(|log| decoder.decode(&RawLog::from(log)))
            .collect()
    }
}

// ============================================================================
// SyncTransactionClient
// ============================================================================

pub struct SyncTransactionClient {
    chain_id: u64,
    gas: GasConfig,
    nonces: Arc<NonceManager>,
    reader: Arc<dyn ChainReader>,
    submitter: Arc<dyn SyncSubmitter>,
    signer: Arc<dyn TransactionSigner>,
    status: Arc<dyn StatusSink>,
}

impl std::fmt::Debug for SyncTransactionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTransactionClient")
            .field("chain_id", &self.chain_id)
            .field("address", &self.signer.address())
            .field("gas", &self.gas)
            .finish_non_exhaustive()
    }
}

impl SyncTransactionClient {
    /// Client for the signer's account with default gas settings.
    pub fn new(
        chain_id: u64,
        reader: Arc<dyn ChainReader>,
        submitter: Arc<dyn SyncSubmitter>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Self {
        let nonces = Arc::new(NonceManager::new(signer.address(), Arc::clone(&reader)));
        Self {
            chain_id,
            gas: GasConfig::default(),
            nonces,
            reader,
            submitter,
            signer,
            status: Arc::new(TracingStatusSink),
        }
    }

    /// Build from configuration: HTTP provider, gas settings, and the nonce
    /// resync interval. Call within a tokio runtime for the interval to
    /// take effect.
    pub fn from_config(config: &RealtimeConfig, wallet: EthereumWallet) -> anyhow::Result<Self> {
        let provider = Arc::new(config.provider()?);
        let signer: Arc<dyn TransactionSigner> = Arc::new(wallet);
        let nonces = NonceManagers::new(provider.clone(), config.nonce.clone())
            .for_account(signer.address());
        Ok(Self::new(config.chain_id, provider.clone(), provider, signer)
            .with_gas_config(config.gas.clone())
            .with_nonce_manager(nonces))
    }

    /// Use a shared nonce manager. Its address must be the signer's.
    pub fn with_nonce_manager(mut self, nonces: Arc<NonceManager>) -> Self {
        debug_assert_eq!(nonces.address(), self.signer.address());
        self.nonces = nonces;
        self
    }

    pub fn with_gas_config(mut self, gas: GasConfig) -> Self {
        self.gas = gas;
        self
    }

    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn nonce_manager(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    /// Fetch the nonce baseline. Optional: the first send does it lazily.
    pub async fn initialize(&self) -> Result<u64, TxError> {
        self.nonces
            .initialize()
            .await
            .map_err(|e| read_error("could not fetch account nonce", &e))
    }

    /// Current balance of the signer's account.
    pub async fn balance(&self) -> Result<U256, TxError> {
        self.reader
            .balance(self.address())
            .await
            .map_err(|e| read_error("could not fetch account balance", &e))
    }

    /// Sign and submit, returning once the node has a final receipt.
    pub async fn send_transaction(&self, request: TxRequest) -> Result<TxOutcome, TxError> {
        let nonce = match self.nonces.get_nonce().await {
            Ok(nonce) => nonce,
            Err(e) => {
                let err = read_error("could not fetch account nonce", &e);
                return Err(self.fail(err).await);
            }
        };
        let (gas_limit, class) = self.gas.gas_limit_for(&request.data, request.gas_limit);
        let tx = UnsignedTx {
            from: self.address(),
            nonce,
            gas_limit,
            gas_price: self.gas.gas_price(),
            chain_id: self.chain_id,
            to: request.to,
            data: request.data,
            value: request.value,
        };
        debug!(from = %tx.from, to = %tx.to, nonce, gas_limit, ?class, "sending transaction");

        match self.sign_and_submit(&tx).await {
            Ok(receipt) if receipt.is_success() => {
                self.complete(true).await;
                info!(
                    tx = %receipt.transaction_hash,
                    block = receipt.block_number,
                    gas_used = receipt.gas_used,
                    nonce,
                    "transaction settled"
                );
                self.status.publish(
                    StatusNotice::new(StatusLevel::Success, "Transaction confirmed")
                        .with_description(format!(
                            "{} in block {}",
                            receipt.transaction_hash, receipt.block_number
                        )),
                );
                Ok(TxOutcome {
                    receipt,
                    success: true,
                    nonce,
                    gas_limit,
                    class,
                })
            }
            Ok(receipt) => {
                self.complete(false).await;
                Err(self.fail(TxError::reverted(receipt)).await)
            }
            Err(err) => {
                self.complete(false).await;
                Err(self.fail(err).await)
            }
        }
    }

    /// Stop background nonce work and forget local nonce state.
    pub async fn shutdown(&self) {
        self.nonces.reset().await;
    }

    async fn sign_and_submit(&self, tx: &UnsignedTx) -> Result<SyncReceipt, TxError> {
        let raw = self
            .signer
            .sign_transaction(tx)
            .await
            .map_err(signing_error)?;
        self.submitter
            .send_raw_transaction_sync(raw)
            .await
            .map_err(|e| classify_transport_error(&e))
    }

    async fn complete(&self, success: bool) {
        if let Err(e) = self.nonces.on_transaction_complete(success).await {
            warn!(address = %self.address(), error = %e, "nonce resync failed");
        }
    }

    /// Attach diagnostics, log, and publish a notice for a failed send.
    async fn fail(&self, err: TxError) -> TxError {
        let err = match err {
            TxError::InsufficientFunds {
                message,
                balance: None,
            } => {
                let balance = self.reader.balance(self.address()).await.ok();
                TxError::InsufficientFunds { message, balance }
            }
            other => other,
        };

        let level = match err {
            TxError::UserRejected { .. } => StatusLevel::Info,
            _ => StatusLevel::Error,
        };
        warn!(address = %self.address(), error = %err, title = err.title(), "transaction failed");
        let mut notice = StatusNotice::new(level, err.title());
        if let Some(description) = err.description() {
            notice = notice.with_description(description);
        }
        self.status.publish(notice);
        err
    }
}

fn signing_error(err: SignError) -> TxError {
    match err {
        SignError::Rejected(message) => TxError::UserRejected { message },
        SignError::Failed(message) if classify_message(&message) == RpcErrorKind::UserRejected => {
            TxError::UserRejected { message }
        }
        SignError::Failed(message) => TxError::Signing { message },
    }
}

/// Map a transport failure onto the transaction taxonomy. Revert data in
/// the error payload is decoded and appended to the message.
pub fn classify_transport_error(err: &TransportError) -> TxError {
    let mut kind = classify_rpc_error(err);
    if kind == RpcErrorKind::Unknown && revert_reason(err).is_some() {
        kind = RpcErrorKind::ExecutionReverted;
    }
    TxError::from_kind(kind, describe_rpc_error(err))
}

/// A failed read made before signing. Nothing has left the client.
fn read_error(what: &str, err: &TransportError) -> TxError {
    TxError::ReadFailed {
        message: format!("{what}: {}", describe_rpc_error(err)),
    }
}
