//! Error taxonomy of the deployer.
//!
//! Configuration and encoding errors are raised before any transaction is sent. Chain errors
//! distinguish transport failures, mined-but-reverted transactions and transactions whose outcome
//! is unknown because finality was not observed in time.

use std::path::PathBuf;

use alloy::primitives::{Address, Bytes, TxHash, B256};
use thiserror::Error;

use crate::Contract;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field}: {value:?} is not a 20-byte hex address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("invalid network name {0:?}")]
    InvalidNetwork(String),
    #[error("invalid role {0:?}, expected an accessor name or a 32-byte hex value")]
    InvalidRole(String),
    #[error("invalid contract artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("decoding error: {0}")]
    Decoding(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain could not be reached or answered with a transport-level error.
    ///
    /// Reads may be retried. A send that failed this way was not broadcast.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The transaction (or the call simulating it) reverted.
    #[error("{}", describe_revert(.tx_hash, .reason))]
    Reverted {
        tx_hash: Option<TxHash>,
        reason: Option<String>,
        data: Option<Bytes>,
    },
    /// Finality was not observed in time; the transaction may still be mined later.
    #[error("transaction {0} unconfirmed, re-check chain state before retrying")]
    Unconfirmed(TxHash),
}

fn describe_revert(tx_hash: &Option<TxHash>, reason: &Option<String>) -> String {
    let reason = reason.as_deref().unwrap_or("no reason given");
    match tx_hash {
        Some(tx_hash) => format!("transaction {tx_hash} reverted: {reason}"),
        None => format!("transaction reverted: {reason}"),
    }
}

impl ChainError {
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            ChainError::Reverted { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest {0} already exists")]
    WriteConflict(PathBuf),
    #[error("corrupt manifest {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("no manifest found for network {network}")]
    NotFound { network: String },
    #[error("manifest i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("{caller:#x} is not the owner of proxy {proxy:#x} (owner: {owner:#x})")]
    NotOwner {
        proxy: Address,
        caller: Address,
        owner: Address,
    },
    #[error("{account:#x} lacks admin role {admin_role} required to grant role {role} on {contract:#x}")]
    MissingPrivilege {
        contract: Address,
        account: Address,
        role: B256,
        admin_role: B256,
    },
    #[error("{account:#x} does not hold role {role} on {contract:#x}")]
    MissingRole {
        contract: Address,
        role: B256,
        account: Address,
    },
    #[error("{account:#x} does not hold role {role} on {contract:#x} after the grant")]
    RoleNotGranted {
        contract: Address,
        role: B256,
        account: Address,
    },
    #[error("{0} creation receipt carries no contract address")]
    ContractNotDeployed(Contract),
    #[error("post-deployment check failed for {contract}: {detail}")]
    PostDeployCheck { contract: Contract, detail: String },
}
