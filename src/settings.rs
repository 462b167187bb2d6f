//! Static application configuration.
//!
//! Loaded from a file (any format the `config` crate understands, chosen by
//! extension) with `REALTIME__`-prefixed environment variables layered on
//! top, e.g. `REALTIME__WS_URL` or `REALTIME__GAS__GAS_PRICE_WEI`.
//!
//! ```toml
//! rpc_url = "https://carrot.megaeth.com/rpc"
//! ws_url = "wss://carrot.megaeth.com/ws"
//! chain_id = 6342
//!
//! [[contracts]]
//! name = "Token"
//! address = "0x..."
//! abi_path = "abi/Token.json"
//! ```

use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::ext::{
    AbiRegistry, ContractDescriptor, GasConfig, NonceConfig, RealtimeProvider,
    SubscriptionConfig, DEFAULT_SYNC_METHOD,
};

pub const DEFAULT_CHAIN_ID: u64 = 6342;
pub const ENV_PREFIX: &str = "REALTIME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid address for contract {name}: {address}")]
    InvalidAddress { name: String, address: String },

    #[error("failed to read ABI {path}: {source}")]
    AbiRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ABI {path}: {source}")]
    AbiParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A contract to register: address plus the ABI file describing it.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    /// Bare ABI array or build artifact. Relative paths resolve against the
    /// configuration file's directory.
    pub abi_path: PathBuf,
}

impl ContractConfig {
    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.clone())
    }
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_sync_method() -> String {
    DEFAULT_SYNC_METHOD.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    pub rpc_url: String,
    pub ws_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// JSON-RPC method for synchronous submission
    #[serde(default = "default_sync_method")]
    pub sync_method: String,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl RealtimeConfig {
    /// Load `path`, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(env_source())
            .build()?;
        let mut settings: RealtimeConfig = config.try_deserialize()?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        settings.validate()?;
        tracing::info!(
            path = %path.display(),
            chain_id = settings.chain_id,
            contracts = settings.contracts.len(),
            "loaded configuration"
        );
        Ok(settings)
    }

    /// Parse TOML text, with environment overrides. Relative ABI paths
    /// resolve against the working directory.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(env_source())
            .build()?;
        let settings: RealtimeConfig = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid("rpc_url is empty".into()));
        }
        if self.ws_url.trim().is_empty() {
            return Err(ConfigError::Invalid("ws_url is empty".into()));
        }
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid("chain_id must be non-zero".into()));
        }
        if self.subscription.formats.is_empty() {
            return Err(ConfigError::Invalid(
                "subscription.formats must name at least one format".into(),
            ));
        }
        for contract in &self.contracts {
            contract_address(contract)?;
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Read every configured ABI into a registry.
    pub fn abi_registry(&self) -> Result<AbiRegistry, ConfigError> {
        let mut registry = AbiRegistry::new();
        for contract in &self.contracts {
            let address = contract_address(contract)?;
            let path = self.resolve(&contract.abi_path);
            let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::AbiRead {
                path: path.clone(),
                source,
            })?;
            let mut descriptor = ContractDescriptor::from_artifact_json(address, &json)
                .map_err(|source| ConfigError::AbiParse { path, source })?;
            if let Some(name) = &contract.name {
                descriptor = descriptor.with_name(name);
            }
            registry.insert(descriptor);
        }
        Ok(registry)
    }

    /// HTTP provider for reads and synchronous submission.
    pub fn provider(&self) -> anyhow::Result<RealtimeProvider> {
        Ok(RealtimeProvider::with_http(&self.rpc_url)?.with_sync_method(self.sync_method.clone()))
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn contract_address(contract: &ContractConfig) -> Result<Address, ConfigError> {
    contract
        .address
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress {
            name: contract.label(),
            address: contract.address.clone(),
        })
}
