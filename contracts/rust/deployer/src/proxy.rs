//! Deploy and repoint the `EIP173Proxy` fronting each vault.

use alloy::{
    primitives::{b256, Address, TxHash, B256},
    sol_types::SolCall,
};
use vault_contract_adapter::{evm::is_proxy_not_authorized, sol_types::EIP173Proxy};

use crate::{
    artifacts::{proxy_constructor_args, ContractArtifact},
    chain::{send_and_confirm, ChainClient, FinalityPolicy, TxRequest},
    error::{ChainError, DeployError},
    planner::InitializationCall,
    Contracts, Vault,
};

/// `keccak256("eip1967.proxy.implementation") - 1`
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");
/// `keccak256("eip1967.proxy.admin") - 1`, where `EIP173Proxy` keeps its owner.
pub const ADMIN_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// Which proxy fronts a vault, and the implementation it currently delegates to.
///
/// The proxy address never changes for a vault; only `current_implementation` is updated, once per
/// upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyBinding {
    pub logical_name: Vault,
    pub proxy_address: Address,
    pub current_implementation: Address,
}

impl ProxyBinding {
    /// Read the binding of an existing proxy from chain.
    pub async fn load<C>(client: &C, vault: Vault, proxy: Address) -> Result<Self, DeployError>
    where
        C: ChainClient + ?Sized,
    {
        if !is_proxy_contract(client, proxy).await? {
            return Err(DeployError::PostDeployCheck {
                contract: vault.proxy(),
                detail: format!("{proxy:#x} is not an EIP-1967 proxy"),
            });
        }
        Ok(Self {
            logical_name: vault,
            proxy_address: proxy,
            current_implementation: implementation_of(client, proxy).await?,
        })
    }
}

fn slot_address(word: B256) -> Address {
    Address::from_word(word)
}

pub async fn implementation_of<C>(client: &C, proxy: Address) -> Result<Address, ChainError>
where
    C: ChainClient + ?Sized,
{
    Ok(slot_address(client.storage_at(proxy, IMPLEMENTATION_SLOT).await?))
}

pub async fn proxy_owner<C>(client: &C, proxy: Address) -> Result<Address, ChainError>
where
    C: ChainClient + ?Sized,
{
    Ok(slot_address(client.storage_at(proxy, ADMIN_SLOT).await?))
}

pub async fn is_contract<C>(client: &C, address: Address) -> Result<bool, ChainError>
where
    C: ChainClient + ?Sized,
{
    if address == Address::ZERO {
        return Ok(false);
    }
    Ok(!client.code_at(address).await?.is_empty())
}

/// A proxy is detected by a non-zero EIP-1967 implementation slot.
pub async fn is_proxy_contract<C>(client: &C, address: Address) -> Result<bool, ChainError>
where
    C: ChainClient + ?Sized,
{
    Ok(implementation_of(client, address).await? != Address::ZERO)
}

/// Deploy a proxy for `vault` whose constructor runs `init` against `implementation`.
///
/// The proxy is initialized in its creation transaction, it is never observable uninitialized.
#[allow(clippy::too_many_arguments)]
pub async fn deploy_proxy<C>(
    client: &C,
    contracts: &mut Contracts,
    proxy_artifact: &ContractArtifact,
    vault: Vault,
    implementation: Address,
    owner: Address,
    init: InitializationCall,
    finality: FinalityPolicy,
) -> Result<ProxyBinding, DeployError>
where
    C: ChainClient + ?Sized,
{
    tracing::info!(
        %vault,
        %implementation,
        %owner,
        init = %init.signature,
        "deploying proxy"
    );
    let args = proxy_constructor_args(implementation, owner, init.into_calldata());
    let deployment = contracts
        .deploy(
            client,
            vault.proxy(),
            proxy_artifact.creation_code(&args),
            finality,
        )
        .await?;
    let binding = ProxyBinding {
        logical_name: vault,
        proxy_address: deployment.address,
        current_implementation: implementation,
    };

    // sanity check
    if !is_contract(client, binding.proxy_address).await? {
        return Err(DeployError::PostDeployCheck {
            contract: vault.proxy(),
            detail: format!("no code at {:#x}", binding.proxy_address),
        });
    }
    check_implementation(client, &binding).await?;
    Ok(binding)
}

/// Repoint an existing proxy at `new_implementation`, optionally calling into it in the same
/// transaction.
///
/// Ownership is enforced by the proxy itself: a rejected call surfaces as
/// [`DeployError::NotOwner`]. Returns `None` without sending anything if the proxy already points
/// at `new_implementation`.
pub async fn upgrade_proxy<C>(
    client: &C,
    binding: &mut ProxyBinding,
    new_implementation: Address,
    call: Option<InitializationCall>,
    finality: FinalityPolicy,
) -> Result<Option<TxHash>, DeployError>
where
    C: ChainClient + ?Sized,
{
    let proxy = binding.proxy_address;
    if binding.current_implementation == new_implementation && call.is_none() {
        tracing::info!(
            vault = %binding.logical_name,
            "{proxy:#x} already points at {new_implementation:#x}, skipping upgrade"
        );
        return Ok(None);
    }
    if !is_contract(client, new_implementation).await? {
        return Err(DeployError::PostDeployCheck {
            contract: binding.logical_name.implementation(),
            detail: format!("no code at new implementation {new_implementation:#x}"),
        });
    }

    let data = match call {
        Some(call) => EIP173Proxy::upgradeToAndCallCall {
            newImplementation: new_implementation,
            data: call.into_calldata(),
        }
        .abi_encode(),
        None => EIP173Proxy::upgradeToCall {
            newImplementation: new_implementation,
        }
        .abi_encode(),
    };
    tracing::info!(
        vault = %binding.logical_name,
        from = %binding.current_implementation,
        to = %new_implementation,
        "upgrading proxy {proxy:#x}"
    );
    let receipt = match send_and_confirm(client, TxRequest::call(proxy, data), finality).await {
        Ok(receipt) => receipt,
        Err(err) if err.revert_reason().is_some_and(is_proxy_not_authorized) => {
            return Err(DeployError::NotOwner {
                proxy,
                caller: client.signer_address(),
                owner: proxy_owner(client, proxy).await?,
            });
        },
        Err(err) => return Err(err.into()),
    };

    binding.current_implementation = new_implementation;
    check_implementation(client, binding).await?;
    tracing::info!(tx_hash = %receipt.tx_hash, "proxy {proxy:#x} upgraded to {new_implementation:#x}");
    Ok(Some(receipt.tx_hash))
}

/// Confirm the implementation slot holds what `binding` expects.
async fn check_implementation<C>(client: &C, binding: &ProxyBinding) -> Result<(), DeployError>
where
    C: ChainClient + ?Sized,
{
    let actual = implementation_of(client, binding.proxy_address).await?;
    if actual != binding.current_implementation {
        return Err(DeployError::PostDeployCheck {
            contract: binding.logical_name.proxy(),
            detail: format!(
                "implementation slot holds {actual:#x}, expected {:#x}",
                binding.current_implementation
            ),
        });
    }
    Ok(())
}
