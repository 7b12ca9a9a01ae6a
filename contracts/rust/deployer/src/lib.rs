use std::{collections::HashMap, io::Write, time::Duration};

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, Bytes, TxHash},
    providers::{
        fillers::{FillProvider, JoinFill, WalletFiller},
        utils::JoinedRecommendedFillers,
        ProviderBuilder, RootProvider,
    },
    rpc::client::RpcClient,
    signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner},
    transports::http::reqwest::Url,
};
use clap::{builder::OsStr, Parser};
use derive_more::{derive::Deref, Display};

use crate::{
    chain::{send_and_confirm, ChainClient, FinalityPolicy, TxRequest},
    error::{ConfigError, DeployError},
};

pub mod abi;
pub mod address;
pub mod artifacts;
pub mod chain;
pub mod config;
pub mod error;
pub mod manifest;
pub mod network_config;
pub mod orchestrator;
pub mod planner;
pub mod proxy;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod verifier;

/// Type alias that connects to providers with recommended fillers and wallet
/// use `<HttpProviderWithWallet as WalletProvider>::wallet()` to access internal wallet
/// use `<HttpProviderWithWallet as WalletProvider>::default_signer_address(&provider)` to get wallet address
pub type HttpProviderWithWallet = FillProvider<
    JoinFill<JoinedRecommendedFillers, WalletFiller<EthereumWallet>>,
    RootProvider,
    Ethereum,
>;

/// a handy thin wrapper around wallet builder and provider builder that directly
/// returns an instantiated `Provider` with default fillers with wallet, ready to send tx
pub fn build_provider(
    signer: PrivateKeySigner,
    url: Url,
    poll_interval: Option<Duration>,
) -> HttpProviderWithWallet {
    let wallet = EthereumWallet::from(signer);

    // alloy guesses the polling interval from the RPC url, which is wrong for a local node
    // behind docker. Allow overriding it.
    if let Some(interval) = poll_interval {
        tracing::info!("Using custom poll interval: {interval:?}");
        let client = RpcClient::new_http(url).with_poll_interval(interval);
        ProviderBuilder::new().wallet(wallet).on_client(client)
    } else {
        tracing::info!("Using default poll interval");
        ProviderBuilder::new().wallet(wallet).on_http(url)
    }
}

pub fn build_signer(mnemonic: &str, account_index: u32) -> Result<PrivateKeySigner, ConfigError> {
    MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .index(account_index)
        .and_then(|builder| builder.build())
        .map_err(|err| ConfigError::InvalidKey(err.to_string()))
}

pub fn signer_from_private_key(key: &str) -> Result<PrivateKeySigner, ConfigError> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|err| ConfigError::InvalidKey(err.to_string()))
}

/// Set of predeployed contracts.
///
/// Supplying an implementation reuses it without a new deployment, supplying a proxy switches
/// that vault to upgrade mode.
#[derive(Clone, Debug, Default, Parser)]
pub struct DeployedContracts {
    /// Use an already-deployed VanillaMarketMakerVault implementation.
    #[clap(long, env = Contract::MarketMakerVault)]
    market_maker_vault: Option<Address>,
    /// Existing VanillaMarketMakerVault proxy, upgraded instead of deployed.
    #[clap(long, env = Contract::MarketMakerVaultProxy)]
    market_maker_vault_proxy: Option<Address>,

    /// Use an already-deployed VanillaMoneyVault implementation.
    #[clap(long, env = Contract::MoneyVault)]
    money_vault: Option<Address>,
    /// Existing VanillaMoneyVault proxy, upgraded instead of deployed.
    #[clap(long, env = Contract::MoneyVaultProxy)]
    money_vault_proxy: Option<Address>,
}

/// An identifier for a particular contract.
///
/// Displays as the environment variable holding its predeployed address.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Contract {
    #[display("MARKET_MAKER_VAULT_IMPL_ADDRESS")]
    MarketMakerVault,
    #[display("MARKET_MAKER_VAULT_PROXY_ADDRESS")]
    MarketMakerVaultProxy,
    #[display("MONEY_VAULT_IMPL_ADDRESS")]
    MoneyVault,
    #[display("MONEY_VAULT_PROXY_ADDRESS")]
    MoneyVaultProxy,
}

impl From<Contract> for OsStr {
    fn from(c: Contract) -> OsStr {
        c.to_string().into()
    }
}

/// The two upgradeable vaults, each a logical contract fronted by its own proxy.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Vault {
    #[display("VanillaMarketMakerVault")]
    MarketMaker,
    #[display("VanillaMoneyVault")]
    Money,
}

impl Vault {
    pub fn implementation(self) -> Contract {
        match self {
            Vault::MarketMaker => Contract::MarketMakerVault,
            Vault::Money => Contract::MoneyVault,
        }
    }

    pub fn proxy(self) -> Contract {
        match self {
            Vault::MarketMaker => Contract::MarketMakerVaultProxy,
            Vault::Money => Contract::MoneyVaultProxy,
        }
    }
}

/// Outcome of a contract creation, `tx_hash` is `None` for a reused predeployed contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub tx_hash: Option<TxHash>,
}

/// Cache of contracts predeployed or deployed during this current run.
#[derive(Deref, Debug, Clone, Default, PartialEq, Eq)]
pub struct Contracts {
    #[deref]
    addresses: HashMap<Contract, Address>,
    tx_hashes: HashMap<Contract, TxHash>,
}

impl From<DeployedContracts> for Contracts {
    fn from(deployed: DeployedContracts) -> Self {
        let mut contracts = Contracts::new();
        for (contract, addr) in [
            (Contract::MarketMakerVault, deployed.market_maker_vault),
            (Contract::MarketMakerVaultProxy, deployed.market_maker_vault_proxy),
            (Contract::MoneyVault, deployed.money_vault),
            (Contract::MoneyVaultProxy, deployed.money_vault_proxy),
        ] {
            if let Some(addr) = addr {
                contracts.insert(contract, addr);
            }
        }
        contracts
    }
}

impl Contracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(&self, contract: Contract) -> Option<Address> {
        self.addresses.get(&contract).copied()
    }

    pub fn tx_hash(&self, contract: Contract) -> Option<TxHash> {
        self.tx_hashes.get(&contract).copied()
    }

    /// Record a contract that exists on chain without having been deployed by this run.
    pub fn insert(&mut self, contract: Contract, addr: Address) {
        self.addresses.insert(contract, addr);
    }

    /// Deploy a contract (with logging and cached deployments)
    ///
    /// The creation transaction is sent only if `name` is not already deployed; otherwise the
    /// predeployed address is returned without a transaction.
    pub async fn deploy<C>(
        &mut self,
        client: &C,
        name: Contract,
        creation_code: Bytes,
        finality: FinalityPolicy,
    ) -> Result<Deployment, DeployError>
    where
        C: ChainClient + ?Sized,
    {
        if let Some(addr) = self.address(name) {
            tracing::info!("skipping deployment of {name}, already deployed at {addr:#x}");
            return Ok(Deployment {
                address: addr,
                tx_hash: self.tx_hash(name),
            });
        }
        tracing::info!("deploying {name}");
        let receipt = send_and_confirm(client, TxRequest::create(creation_code), finality).await?;
        let addr = receipt
            .contract_address
            .ok_or(DeployError::ContractNotDeployed(name))?;

        tracing::info!("deployed {name} at {addr:#x}");

        self.addresses.insert(name, addr);
        self.tx_hashes.insert(name, receipt.tx_hash);
        Ok(Deployment {
            address: addr,
            tx_hash: Some(receipt.tx_hash),
        })
    }

    /// Write a .env file.
    pub fn write(&self, mut w: impl Write) -> std::io::Result<()> {
        let mut entries: Vec<_> = self.addresses.iter().collect();
        entries.sort();
        for (contract, address) in entries {
            writeln!(w, "{contract}={address:#x}")?;
        }
        Ok(())
    }
}

/// Install a `tracing` subscriber for tests, once per process.
#[cfg(any(test, feature = "testing"))]
pub fn setup_test() {
    use std::sync::Once;

    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ChainError,
        testing::{SimulatedChain, DEV_MNEMONIC},
    };

    #[test]
    fn test_contract_display_is_env_var() {
        assert_eq!(
            Contract::MarketMakerVaultProxy.to_string(),
            "MARKET_MAKER_VAULT_PROXY_ADDRESS"
        );
        assert_eq!(Contract::MoneyVault.to_string(), "MONEY_VAULT_IMPL_ADDRESS");
        assert_eq!(Vault::Money.proxy(), Contract::MoneyVaultProxy);
        assert_eq!(Vault::MarketMaker.to_string(), "VanillaMarketMakerVault");
    }

    #[test]
    fn test_build_signer() {
        let signer = build_signer(DEV_MNEMONIC, 0).unwrap();
        assert_eq!(
            signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        assert!(matches!(
            build_signer("not a mnemonic", 0),
            Err(ConfigError::InvalidKey(_))
        ));
        assert!(matches!(
            signer_from_private_key("0x1234"),
            Err(ConfigError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_deployed_contracts_from_args() {
        let proxy = Address::repeat_byte(0x42);
        let deployed = DeployedContracts::parse_from([
            "test",
            "--money-vault-proxy",
            &proxy.to_string(),
        ]);
        let contracts = Contracts::from(deployed);
        assert_eq!(contracts.address(Contract::MoneyVaultProxy), Some(proxy));
        assert_eq!(contracts.address(Contract::MoneyVault), None);
        assert_eq!(contracts.len(), 1);
    }

    #[tokio::test]
    async fn test_deploy_skips_predeployed() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let mut contracts = Contracts::new();
        let existing = Address::repeat_byte(0x11);
        contracts.insert(Contract::MarketMakerVault, existing);

        let deployment = contracts
            .deploy(
                &chain,
                Contract::MarketMakerVault,
                Bytes::from_static(b"unused"),
                FinalityPolicy::default(),
            )
            .await?;
        assert_eq!(deployment.address, existing);
        assert_eq!(deployment.tx_hash, None);
        assert_eq!(chain.sent_transactions(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_deploy_records_address_and_tx() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let mut contracts = Contracts::new();
        let deployment = contracts
            .deploy(
                &chain,
                Contract::MoneyVault,
                chain.artifacts().money_vault.bytecode.clone(),
                FinalityPolicy::default(),
            )
            .await?;
        assert_eq!(contracts.address(Contract::MoneyVault), Some(deployment.address));
        assert_eq!(contracts.tx_hash(Contract::MoneyVault), deployment.tx_hash);
        assert!(!chain.code(deployment.address).is_empty());

        let mut env = Vec::new();
        contracts.write(&mut env)?;
        assert_eq!(
            String::from_utf8(env)?,
            format!("MONEY_VAULT_IMPL_ADDRESS={:#x}\n", deployment.address)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_deploy_rejected_creation_leaves_cache_untouched() {
        setup_test();
        let chain = SimulatedChain::new();
        chain.reject_nth_send(0);
        let mut contracts = Contracts::new();
        let err = contracts
            .deploy(
                &chain,
                Contract::MarketMakerVault,
                chain.artifacts().market_maker_vault.bytecode.clone(),
                FinalityPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::Chain(ChainError::Reverted { .. })
        ));
        assert!(contracts.is_empty());
    }
}
