//! Sequences a deployment or upgrade of the vault pair.
//!
//! Fresh deployment:
//! `Start -> ImplementationsDeployed -> ProxiesEstablished -> RolesWired -> ManifestPersisted`.
//! Upgrade of existing proxies:
//! `Start -> ImplementationsDeployed -> ProxiesRepointed -> RolesWired -> ManifestPersisted`,
//! where role wiring only reads unless the grant is missing.
//!
//! Each vault is deployed fresh unless its proxy address is supplied, in which case the proxy is
//! repointed. A money-vault proxy is only repointed together with the market-maker proxy it is
//! bound to. Every transaction is awaited to finality before the next one is built. Nothing is
//! retried or rolled back: on failure the error carries every contract already on chain so the run
//! can be resumed by feeding them back in.

use std::path::PathBuf;

use alloy::primitives::{Address, TxHash};
use derive_builder::Builder;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_contract_adapter::sol_types::{VanillaMarketMakerVault, VanillaMoneyVault};

use crate::{
    artifacts::VaultArtifacts,
    chain::{call_view, ChainClient, FinalityPolicy},
    config::DeploymentConfig,
    error::{ConfigError, DeployError},
    manifest::{DeploymentManifest, ManifestStore},
    network_config::Network,
    planner::{
        fetch_role, grant_role, has_role, plan_market_maker_init, plan_money_vault_init,
        BOT_ROLE, MONEY_VAULT_ROLE,
    },
    proxy::{deploy_proxy, is_contract, upgrade_proxy, ProxyBinding},
    Contract, Contracts, Deployment, Vault,
};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[display("deploy")]
    Deploy,
    #[display("upgrade")]
    Upgrade,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Stage {
    Start,
    ImplementationsDeployed,
    ProxiesEstablished,
    ProxiesRepointed,
    RolesWired,
    ManifestPersisted,
}

/// A run that stopped before completion.
///
/// `stage` is the stage being worked towards when the failure happened, `artifacts` every contract
/// known to be on chain at that point.
#[derive(Debug, Error)]
#[error("deployment failed before reaching {stage}: {source}")]
pub struct OrchestrationError {
    pub stage: Stage,
    pub artifacts: Box<Contracts>,
    #[source]
    pub source: DeployError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentOutcome {
    pub mode: DeploymentMode,
    pub market_maker_vault: ProxyBinding,
    pub money_vault: ProxyBinding,
    /// `grantRole(MONEY_VAULT_ROLE, moneyVaultProxy)`, if one was sent.
    pub role_grant_tx: Option<TxHash>,
    pub manifest: DeploymentManifest,
    pub manifest_path: PathBuf,
}

/// Deploys or upgrades both vaults against one chain and records the result.
#[derive(Builder)]
pub struct Orchestrator<'a, C: ChainClient> {
    client: &'a C,
    artifacts: &'a VaultArtifacts,
    store: &'a ManifestStore,
    network: Network,
    #[builder(default)]
    finality: FinalityPolicy,
}

/// How one vault is handled in a run.
enum ProxyPlan {
    Deploy,
    Repoint(ProxyBinding),
}

impl ProxyPlan {
    fn is_fresh(&self) -> bool {
        matches!(self, ProxyPlan::Deploy)
    }
}

impl<'a, C: ChainClient> Orchestrator<'a, C> {
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Run the deployment. Contracts present in `contracts` are reused; everything deployed is
    /// recorded into it as it happens.
    pub async fn run(
        &self,
        config: &DeploymentConfig,
        contracts: &mut Contracts,
    ) -> Result<DeploymentOutcome, OrchestrationError> {
        let mut stage = Stage::Start;
        match self.execute(config, contracts, &mut stage).await {
            Ok(outcome) => Ok(outcome),
            Err(source) => {
                tracing::error!(%stage, "deployment failed: {source}");
                Err(OrchestrationError {
                    stage,
                    artifacts: Box::new(contracts.clone()),
                    source,
                })
            },
        }
    }

    async fn execute(
        &self,
        config: &DeploymentConfig,
        contracts: &mut Contracts,
        stage: &mut Stage,
    ) -> Result<DeploymentOutcome, DeployError> {
        let client = self.client;
        tracing::info!(
            network = %self.network,
            signer = %client.signer_address(),
            asset = %config.asset,
            owner = %config.owner,
            platform_fee_account = %config.platform_fee_account,
            profit_sharing_account = %config.profit_sharing_account,
            bots = ?config.bots,
            "starting deployment"
        );
        let market_maker_plan = self.plan(Vault::MarketMaker, contracts).await?;
        let money_plan = self.plan(Vault::Money, contracts).await?;
        match (&market_maker_plan, &money_plan) {
            // a repointed money vault stays bound to the market-maker proxy it was initialized with
            (ProxyPlan::Deploy, ProxyPlan::Repoint(_)) => {
                return Err(ConfigError::Missing {
                    field: "MARKET_MAKER_VAULT_PROXY_ADDRESS",
                }
                .into());
            },
            (ProxyPlan::Repoint(market_maker), ProxyPlan::Repoint(money)) => {
                check_peer(client, money.proxy_address, market_maker.proxy_address).await?;
            },
            _ => {},
        }
        let mode = if market_maker_plan.is_fresh() || money_plan.is_fresh() {
            DeploymentMode::Deploy
        } else {
            DeploymentMode::Upgrade
        };
        let market_maker_init = plan_market_maker_init(config);

        *stage = Stage::ImplementationsDeployed;
        let market_maker_impl = self.deploy_implementation(Vault::MarketMaker, contracts).await?;
        let money_impl = self.deploy_implementation(Vault::Money, contracts).await?;

        *stage = match mode {
            DeploymentMode::Deploy => Stage::ProxiesEstablished,
            DeploymentMode::Upgrade => Stage::ProxiesRepointed,
        };
        // the money vault is initialized with the market-maker proxy address
        let market_maker_vault = match market_maker_plan {
            ProxyPlan::Deploy => {
                let binding = deploy_proxy(
                    client,
                    contracts,
                    &self.artifacts.proxy,
                    Vault::MarketMaker,
                    market_maker_impl.address,
                    config.owner,
                    market_maker_init,
                    self.finality,
                )
                .await?;
                check_market_maker_vault(client, binding.proxy_address, config).await?;
                binding
            },
            ProxyPlan::Repoint(mut binding) => {
                upgrade_proxy(client, &mut binding, market_maker_impl.address, None, self.finality)
                    .await?;
                binding
            },
        };
        let money_vault = match money_plan {
            ProxyPlan::Deploy => {
                let init = plan_money_vault_init(config, market_maker_vault.proxy_address)?;
                let binding = deploy_proxy(
                    client,
                    contracts,
                    &self.artifacts.proxy,
                    Vault::Money,
                    money_impl.address,
                    config.owner,
                    init,
                    self.finality,
                )
                .await?;
                check_money_vault(
                    client,
                    binding.proxy_address,
                    config,
                    market_maker_vault.proxy_address,
                )
                .await?;
                binding
            },
            ProxyPlan::Repoint(mut binding) => {
                upgrade_proxy(client, &mut binding, money_impl.address, None, self.finality)
                    .await?;
                binding
            },
        };

        // also on upgrades: a resumed run may reach this point with the grant still missing
        *stage = Stage::RolesWired;
        let role = fetch_role(client, market_maker_vault.proxy_address, MONEY_VAULT_ROLE).await?;
        tracing::info!("wiring {MONEY_VAULT_ROLE} ({role}) to the money vault");
        let role_grant_tx = grant_role(
            client,
            market_maker_vault.proxy_address,
            role,
            money_vault.proxy_address,
            self.finality,
        )
        .await?;

        *stage = Stage::ManifestPersisted;
        let manifest = DeploymentManifest {
            network: self.network.name().to_string(),
            market_maker_vault_impl: market_maker_impl.address,
            market_maker_vault_proxy: market_maker_vault.proxy_address,
            money_vault_impl: money_impl.address,
            money_vault_proxy: money_vault.proxy_address,
            asset_id: config.asset,
            owner: config.owner,
            platform_fee_account: config.platform_fee_account,
            profit_sharing_account: config.profit_sharing_account,
            bots: config.bot_list(),
            deployment_time: DeploymentManifest::now(),
            market_maker_vault_impl_tx: market_maker_impl.tx_hash,
            money_vault_impl_tx: money_impl.tx_hash,
            mode: Some(mode),
        };
        let manifest_path = self.store.save(&manifest)?;

        for binding in [&market_maker_vault, &money_vault] {
            tracing::info!(
                vault = %binding.logical_name,
                proxy = %binding.proxy_address,
                implementation = %binding.current_implementation,
                "{mode} complete"
            );
        }
        Ok(DeploymentOutcome {
            mode,
            market_maker_vault,
            money_vault,
            role_grant_tx,
            manifest,
            manifest_path,
        })
    }

    async fn plan(&self, vault: Vault, contracts: &Contracts) -> Result<ProxyPlan, DeployError> {
        match contracts.address(vault.proxy()) {
            None => Ok(ProxyPlan::Deploy),
            Some(proxy) => {
                let binding = ProxyBinding::load(self.client, vault, proxy).await?;
                tracing::info!(
                    %vault,
                    "existing proxy {proxy:#x} at implementation {:#x}, upgrading",
                    binding.current_implementation
                );
                Ok(ProxyPlan::Repoint(binding))
            },
        }
    }

    async fn deploy_implementation(
        &self,
        vault: Vault,
        contracts: &mut Contracts,
    ) -> Result<Deployment, DeployError> {
        let contract = vault.implementation();
        let deployment = contracts
            .deploy(
                self.client,
                contract,
                self.artifacts.implementation(vault).bytecode.clone(),
                self.finality,
            )
            .await?;
        if !is_contract(self.client, deployment.address).await? {
            return Err(DeployError::PostDeployCheck {
                contract,
                detail: format!("no code at {:#x}", deployment.address),
            });
        }
        Ok(deployment)
    }
}

/// Put the proxies of an earlier manifest in `contracts`, so a run upgrades them.
pub fn upgrade_targets(manifest: &DeploymentManifest, contracts: &mut Contracts) {
    contracts.insert(Contract::MarketMakerVaultProxy, manifest.market_maker_vault_proxy);
    contracts.insert(Contract::MoneyVaultProxy, manifest.money_vault_proxy);
}

fn mismatch(contract: Contract, field: &str, expected: Address, actual: Address) -> DeployError {
    DeployError::PostDeployCheck {
        contract,
        detail: format!("{field} is {actual:#x}, expected {expected:#x}"),
    }
}

/// Confirm a repointed money vault was initialized with `market_maker_vault` as its peer.
async fn check_peer<C: ChainClient + ?Sized>(
    client: &C,
    money_vault: Address,
    market_maker_vault: Address,
) -> Result<(), DeployError> {
    let peer = call_view(client, money_vault, VanillaMoneyVault::marketMakerVaultCall {})
        .await?
        ._0;
    if peer != market_maker_vault {
        return Err(mismatch(
            Contract::MoneyVaultProxy,
            "marketMakerVault",
            market_maker_vault,
            peer,
        ));
    }
    Ok(())
}

async fn check_market_maker_vault<C: ChainClient + ?Sized>(
    client: &C,
    proxy: Address,
    config: &DeploymentConfig,
) -> Result<(), DeployError> {
    let contract = Contract::MarketMakerVaultProxy;
    let asset = call_view(client, proxy, VanillaMarketMakerVault::assetIdCall {}).await?._0;
    if asset != config.asset {
        return Err(mismatch(contract, "assetId", config.asset, asset));
    }
    let owner = call_view(client, proxy, VanillaMarketMakerVault::ownerCall {}).await?._0;
    if owner != config.owner {
        return Err(mismatch(contract, "owner", config.owner, owner));
    }
    Ok(())
}

async fn check_money_vault<C: ChainClient + ?Sized>(
    client: &C,
    proxy: Address,
    config: &DeploymentConfig,
    market_maker_vault: Address,
) -> Result<(), DeployError> {
    let contract = Contract::MoneyVaultProxy;
    let expected = [
        ("assetId", config.asset),
        ("owner", config.owner),
        ("marketMakerVault", market_maker_vault),
        ("platformFeeAccount", config.platform_fee_account),
        ("profitSharingAccount", config.profit_sharing_account),
    ];
    for (field, expected) in expected {
        let actual = match field {
            "assetId" => call_view(client, proxy, VanillaMoneyVault::assetIdCall {}).await?._0,
            "owner" => call_view(client, proxy, VanillaMoneyVault::ownerCall {}).await?._0,
            "marketMakerVault" => {
                call_view(client, proxy, VanillaMoneyVault::marketMakerVaultCall {})
                    .await?
                    ._0
            },
            "platformFeeAccount" => {
                call_view(client, proxy, VanillaMoneyVault::platformFeeAccountCall {})
                    .await?
                    ._0
            },
            _ => {
                call_view(client, proxy, VanillaMoneyVault::profitSharingAccountCall {})
                    .await?
                    ._0
            },
        };
        if actual != expected {
            return Err(mismatch(contract, field, expected, actual));
        }
    }

    let bot_role = fetch_role(client, proxy, BOT_ROLE).await?;
    for bot in &config.bots {
        if !has_role(client, proxy, bot_role, *bot).await? {
            return Err(DeployError::PostDeployCheck {
                contract,
                detail: format!("bot {bot:#x} does not hold {BOT_ROLE}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{keccak256, U256};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        error::ChainError,
        planner::Role,
        proxy::implementation_of,
        setup_test,
        testing::{SimulatedChain, VaultVersion},
    };

    fn orchestrator<'a>(
        chain: &'a SimulatedChain,
        artifacts: &'a VaultArtifacts,
        store: &'a ManifestStore,
    ) -> Orchestrator<'a, SimulatedChain> {
        OrchestratorBuilder::default()
            .client(chain)
            .artifacts(artifacts)
            .store(store)
            .network("localhost".parse().unwrap())
            .build()
            .unwrap()
    }

    fn config(chain: &SimulatedChain) -> DeploymentConfig {
        DeploymentConfig::new(Address::repeat_byte(0xaa), chain.signer_address())
            .with_fee_accounts(Address::repeat_byte(0x01), Address::repeat_byte(0x02))
            .with_bots([Address::repeat_byte(0xcc)])
    }

    #[tokio::test]
    async fn test_fresh_deployment() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        let config = config(&chain);
        let mut contracts = Contracts::new();

        let outcome = orchestrator(&chain, &artifacts, &store)
            .run(&config, &mut contracts)
            .await?;

        assert_eq!(outcome.mode, DeploymentMode::Deploy);
        assert!(outcome.role_grant_tx.is_some());
        let mm = outcome.market_maker_vault.proxy_address;
        let mv = outcome.money_vault.proxy_address;
        assert_eq!(contracts.address(Contract::MarketMakerVaultProxy), Some(mm));
        assert_eq!(contracts.address(Contract::MoneyVaultProxy), Some(mv));
        assert!(has_role(&chain, mm, Role(keccak256(MONEY_VAULT_ROLE)), mv).await?);

        // creation order: MM impl, MV impl, MM proxy, MV proxy, then the grant
        assert_eq!(chain.sent_transactions(), 5);
        let (path, manifest) = store.find_latest("localhost")?;
        assert_eq!(path, outcome.manifest_path);
        assert_eq!(manifest, outcome.manifest);
        assert_eq!(manifest.market_maker_vault_proxy, mm);
        assert_eq!(manifest.money_vault_proxy, mv);
        assert_eq!(manifest.config(), config);
        assert_eq!(manifest.mode, Some(DeploymentMode::Deploy));
        assert!(manifest.market_maker_vault_impl_tx.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_upgrade_run_repoints_both_proxies() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        let config = config(&chain);
        let first = orchestrator(&chain, &artifacts, &store)
            .run(&config, &mut Contracts::new())
            .await?;
        let mm = first.market_maker_vault.proxy_address;
        chain.seed_balance(mm, Address::repeat_byte(0x55), U256::from(7));
        // manifests are named by millisecond
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let v3 = chain.artifacts_for(VaultVersion::V3);
        let mut contracts = Contracts::new();
        upgrade_targets(&first.manifest, &mut contracts);
        let sent = chain.sent_transactions();
        let second = orchestrator(&chain, &v3, &store)
            .run(&first.manifest.config(), &mut contracts)
            .await?;

        assert_eq!(second.mode, DeploymentMode::Upgrade);
        assert_eq!(second.role_grant_tx, None);
        // two implementations, two upgrades, no proxy creation or grant
        assert_eq!(chain.sent_transactions() - sent, 4);
        assert_eq!(second.market_maker_vault.proxy_address, mm);
        assert_eq!(implementation_of(&chain, mm).await?, second.manifest.market_maker_vault_impl);
        assert_eq!(chain.version_of(mm).await?, VaultVersion::V3);
        assert_eq!(chain.balance(mm, Address::repeat_byte(0x55)), U256::from(7));
        assert_eq!(second.manifest.mode, Some(DeploymentMode::Upgrade));
        assert_ne!(second.manifest_path, first.manifest_path);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_reports_stage_and_artifacts() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        // MM impl, MV impl and MM proxy succeed, MV proxy creation reverts
        chain.reject_nth_send(3);
        let mut contracts = Contracts::new();
        let err = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut contracts)
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::ProxiesEstablished);
        assert!(matches!(
            err.source,
            DeployError::Chain(ChainError::Reverted { .. })
        ));
        assert!(err.artifacts.address(Contract::MarketMakerVault).is_some());
        assert!(err.artifacts.address(Contract::MoneyVault).is_some());
        assert!(err.artifacts.address(Contract::MarketMakerVaultProxy).is_some());
        assert!(err.artifacts.address(Contract::MoneyVaultProxy).is_none());
        assert!(matches!(
            store.find_latest("localhost"),
            Err(crate::error::ManifestError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfirmed_transaction_stops_the_run() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        chain.stall_receipts(true);
        let orchestrator = OrchestratorBuilder::default()
            .client(&chain)
            .artifacts(&artifacts)
            .store(&store)
            .network("localhost".parse()?)
            .finality(FinalityPolicy {
                confirmations: 1,
                timeout: std::time::Duration::from_millis(20),
            })
            .build()?;
        let err = orchestrator
            .run(&config(&chain), &mut Contracts::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::ImplementationsDeployed);
        assert!(matches!(
            err.source,
            DeployError::Chain(ChainError::Unconfirmed(_))
        ));
        assert_eq!(chain.sent_transactions(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_without_admin_role_fails_after_proxies() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        // proxies owned by someone else: the signer cannot wire the role
        let config = DeploymentConfig::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb));
        let err = orchestrator(&chain, &artifacts, &store)
            .run(&config, &mut Contracts::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::RolesWired);
        assert!(matches!(err.source, DeployError::MissingPrivilege { .. }));
        assert_eq!(err.artifacts.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_proxy_address_is_rejected_before_any_transaction() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        let mut contracts = Contracts::new();
        contracts.insert(Contract::MoneyVaultProxy, Address::repeat_byte(0x42));
        let err = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut contracts)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Start);
        assert_eq!(chain.sent_transactions(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_after_failed_role_grant_wires_the_role() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        let config = config(&chain);
        // both implementations and proxies succeed, the grant reverts
        chain.reject_nth_send(4);
        let err = orchestrator(&chain, &artifacts, &store)
            .run(&config, &mut Contracts::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::RolesWired);
        assert_eq!(err.artifacts.len(), 4);

        let mut contracts = *err.artifacts;
        let sent = chain.sent_transactions();
        let outcome = orchestrator(&chain, &artifacts, &store)
            .run(&config, &mut contracts)
            .await?;
        assert_eq!(outcome.mode, DeploymentMode::Upgrade);
        assert!(outcome.role_grant_tx.is_some());
        // only the grant, both proxies already point at their implementations
        assert_eq!(chain.sent_transactions() - sent, 1);
        assert!(
            has_role(
                &chain,
                outcome.market_maker_vault.proxy_address,
                Role(keccak256(MONEY_VAULT_ROLE)),
                outcome.money_vault.proxy_address
            )
            .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_money_vault_proxy_requires_market_maker_proxy() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        let first = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut Contracts::new())
            .await?;

        let mut contracts = Contracts::new();
        contracts.insert(Contract::MoneyVaultProxy, first.money_vault.proxy_address);
        let sent = chain.sent_transactions();
        let err = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut contracts)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Start);
        assert!(matches!(
            err.source,
            DeployError::Config(ConfigError::Missing {
                field: "MARKET_MAKER_VAULT_PROXY_ADDRESS"
            })
        ));
        assert_eq!(chain.sent_transactions(), sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_repointing_an_unrelated_pair_is_rejected() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let dir = tempdir()?;
        let store = ManifestStore::new(dir.path());
        let artifacts = chain.artifacts();
        let first = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut Contracts::new())
            .await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut Contracts::new())
            .await?;

        let mut contracts = Contracts::new();
        contracts.insert(
            Contract::MarketMakerVaultProxy,
            second.market_maker_vault.proxy_address,
        );
        contracts.insert(Contract::MoneyVaultProxy, first.money_vault.proxy_address);
        let sent = chain.sent_transactions();
        let err = orchestrator(&chain, &artifacts, &store)
            .run(&config(&chain), &mut contracts)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Start);
        assert!(matches!(
            err.source,
            DeployError::PostDeployCheck {
                contract: Contract::MoneyVaultProxy,
                ..
            }
        ));
        assert_eq!(chain.sent_transactions(), sent);
        Ok(())
    }
}
