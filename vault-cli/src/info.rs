use std::io::Write;

use alloy::primitives::Address;
use anyhow::Result;
use vault_contract_adapter::sol_types::VanillaMarketMakerVault;
use vault_deployer::{
    chain::{call_view, ChainClient},
    error::DeployError,
    manifest::DeploymentManifest,
    network_config::Network,
    planner::{fetch_role, has_role, MONEY_VAULT_ROLE},
    proxy::{implementation_of, proxy_owner},
    Vault,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyInfo {
    pub vault: Vault,
    pub proxy: Address,
    /// Live value of the implementation slot.
    pub implementation: Address,
    /// Implementation recorded in the manifest.
    pub recorded_implementation: Address,
    pub owner: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultInfo {
    pub market_maker_vault: ProxyInfo,
    pub money_vault: ProxyInfo,
    pub money_vault_role_granted: bool,
    pub asset: Address,
}

async fn proxy_info<C: ChainClient>(
    client: &C,
    vault: Vault,
    proxy: Address,
    recorded_implementation: Address,
) -> Result<ProxyInfo, DeployError> {
    Ok(ProxyInfo {
        vault,
        proxy,
        implementation: implementation_of(client, proxy).await?,
        recorded_implementation,
        owner: proxy_owner(client, proxy).await?,
    })
}

/// Read the live state of the vaults recorded in `manifest`.
pub async fn vault_info<C: ChainClient>(
    client: &C,
    manifest: &DeploymentManifest,
) -> Result<VaultInfo, DeployError> {
    let mm = manifest.market_maker_vault_proxy;
    let mv = manifest.money_vault_proxy;
    let role = fetch_role(client, mm, MONEY_VAULT_ROLE).await?;
    Ok(VaultInfo {
        market_maker_vault: proxy_info(client, Vault::MarketMaker, mm, manifest.market_maker_vault_impl)
            .await?,
        money_vault: proxy_info(client, Vault::Money, mv, manifest.money_vault_impl).await?,
        money_vault_role_granted: has_role(client, mm, role, mv).await?,
        asset: call_view(client, mm, VanillaMarketMakerVault::assetIdCall {})
            .await?
            ._0,
    })
}

pub fn display_vault_info(info: &VaultInfo, network: &Network, mut out: impl Write) -> Result<()> {
    writeln!(out, "network {network}, asset {}", info.asset.to_checksum(None))?;
    for proxy in [&info.market_maker_vault, &info.money_vault] {
        writeln!(
            out,
            "{}: proxy {} implementation {} owner {}",
            proxy.vault,
            proxy.proxy.to_checksum(None),
            proxy.implementation.to_checksum(None),
            proxy.owner.to_checksum(None),
        )?;
        if proxy.implementation != proxy.recorded_implementation {
            writeln!(
                out,
                " - implementation differs from manifest ({})",
                proxy.recorded_implementation.to_checksum(None)
            )?;
            tracing::warn!(vault = %proxy.vault, "live implementation differs from the manifest");
        }
        if let Some(url) = network.explorer_code_url(proxy.proxy) {
            writeln!(out, " - {url}")?;
        }
    }
    writeln!(
        out,
        "money vault holds {MONEY_VAULT_ROLE}: {}",
        info.money_vault_role_granted
    )?;
    Ok(())
}
