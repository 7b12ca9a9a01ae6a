//! Contract creation code, read from Hardhat compilation artifacts.

use std::path::{Path, PathBuf};

use alloy::{
    hex::FromHex,
    primitives::{Address, Bytes},
    sol_types::SolConstructor,
};
use serde::Deserialize;
use vault_contract_adapter::sol_types::EIP173Proxy;

use crate::{error::ConfigError, Vault};

pub const MARKET_MAKER_VAULT_ARTIFACT: &str =
    "contracts/VanillaMarketMakerVaultV2.sol/VanillaMarketMakerVaultV2.json";
pub const MONEY_VAULT_ARTIFACT: &str = "contracts/VanillaMoneyVaultV2.sol/VanillaMoneyVaultV2.json";
pub const PROXY_ARTIFACT: &str =
    "contracts/EIP173Proxy/solc_0.8/proxy/EIP173Proxy.sol/EIP173Proxy.json";

/// Solidity source paths as accepted by `forge verify-contract`.
pub const MARKET_MAKER_VAULT_SOURCE: &str =
    "contracts/VanillaMarketMakerVaultV2.sol:VanillaMarketMakerVaultV2";
pub const MONEY_VAULT_SOURCE: &str = "contracts/VanillaMoneyVaultV2.sol:VanillaMoneyVaultV2";
pub const PROXY_SOURCE: &str = "contracts/EIP173Proxy/solc_0.8/proxy/EIP173Proxy.sol:EIP173Proxy";

// solc leaves `__$<hash>$__` in place of library addresses it was not told to link
const UNLINKED_LIBRARY_MARKER: &str = "__$";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    bytecode: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Creation code without constructor arguments.
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn new(contract_name: impl Into<String>, bytecode: Bytes) -> Self {
        Self {
            contract_name: contract_name.into(),
            bytecode,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidArtifact {
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
        let artifact: HardhatArtifact =
            serde_json::from_str(&raw).map_err(|err| invalid(err.to_string()))?;
        if artifact.bytecode.contains(UNLINKED_LIBRARY_MARKER) {
            return Err(invalid("bytecode has unlinked library references".into()));
        }
        let bytecode = Bytes::from_hex(&artifact.bytecode).map_err(|err| invalid(err.to_string()))?;
        if bytecode.is_empty() {
            return Err(invalid(format!(
                "{} has no creation code (abstract contract or interface)",
                artifact.contract_name
            )));
        }
        Ok(Self::new(artifact.contract_name, bytecode))
    }

    /// Creation code with ABI-encoded constructor arguments appended.
    pub fn creation_code(&self, constructor_args: &[u8]) -> Bytes {
        [self.bytecode.as_ref(), constructor_args].concat().into()
    }
}

/// Constructor arguments of `EIP173Proxy(implementation, owner, data)`.
pub fn proxy_constructor_args(implementation: Address, owner: Address, init_data: Bytes) -> Bytes {
    EIP173Proxy::constructorCall {
        implementationAddress: implementation,
        ownerAddress: owner,
        data: init_data,
    }
    .abi_encode()
    .into()
}

/// Creation code of every contract the orchestrator deploys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultArtifacts {
    pub market_maker_vault: ContractArtifact,
    pub money_vault: ContractArtifact,
    pub proxy: ContractArtifact,
}

impl VaultArtifacts {
    /// Load from a Hardhat `artifacts` directory.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = |rel: &str| -> PathBuf { dir.join(rel) };
        let artifacts = Self {
            market_maker_vault: ContractArtifact::load(&path(MARKET_MAKER_VAULT_ARTIFACT))?,
            money_vault: ContractArtifact::load(&path(MONEY_VAULT_ARTIFACT))?,
            proxy: ContractArtifact::load(&path(PROXY_ARTIFACT))?,
        };
        tracing::info!(dir = %dir.display(), "loaded contract artifacts");
        Ok(artifacts)
    }

    pub fn implementation(&self, vault: Vault) -> &ContractArtifact {
        match vault {
            Vault::MarketMaker => &self.market_maker_vault,
            Vault::Money => &self.money_vault,
        }
    }
}
