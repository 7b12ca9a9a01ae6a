//! Ad-hoc operational calls against deployed vaults.

use alloy::{
    primitives::{Address, TxHash, U256},
    sol_types::SolCall,
};
use vault_contract_adapter::sol_types::VanillaMarketMakerVault;
use vault_deployer::{
    chain::{send_and_confirm, ChainClient, FinalityPolicy, TxRequest},
    error::DeployError,
    planner::{self, fetch_role, has_role, resolve_role, role_admin, RoleSpec, MONEY_VAULT_ROLE},
};

/// Grant the role named by `spec` to `account`. `None` if it was already held.
pub async fn grant_role<C: ChainClient>(
    client: &C,
    contract: Address,
    spec: &RoleSpec,
    account: Address,
    finality: FinalityPolicy,
) -> Result<Option<TxHash>, DeployError> {
    let role = resolve_role(client, contract, spec).await?;
    tracing::info!("resolved {spec} to {role}");
    planner::grant_role(client, contract, role, account, finality).await
}

/// Credit `amount` (base units) to `account` on a market-maker vault.
///
/// The signer must hold `MONEY_VAULT_ROLE`. With `ensure_role` it first grants the role to itself,
/// which needs the role's admin role.
pub async fn settle<C: ChainClient>(
    client: &C,
    vault: Address,
    account: Address,
    amount: U256,
    ensure_role: bool,
    finality: FinalityPolicy,
) -> Result<TxHash, DeployError> {
    let signer = client.signer_address();
    let role = fetch_role(client, vault, MONEY_VAULT_ROLE).await?;
    if !has_role(client, vault, role, signer).await? {
        if !ensure_role {
            return Err(DeployError::MissingRole {
                contract: vault,
                role: role.0,
                account: signer,
            });
        }
        let admin_role = role_admin(client, vault, role).await?;
        tracing::info!(%admin_role, "granting {MONEY_VAULT_ROLE} to signer {signer:#x}");
        planner::grant_role(client, vault, role, signer, finality).await?;
    }

    let call = VanillaMarketMakerVault::settlementCall { account, amount };
    let receipt = send_and_confirm(client, TxRequest::call(vault, call.abi_encode()), finality).await?;
    tracing::info!(tx_hash = %receipt.tx_hash, "settled {amount} to {account:#x} on {vault:#x}");
    Ok(receipt.tx_hash)
}

/// Whitelist `staker` on a market-maker vault.
pub async fn whitelist<C: ChainClient>(
    client: &C,
    vault: Address,
    staker: Address,
    finality: FinalityPolicy,
) -> Result<TxHash, DeployError> {
    let call = VanillaMarketMakerVault::whitelistStakeCall { account: staker };
    let receipt = send_and_confirm(client, TxRequest::call(vault, call.abi_encode()), finality).await?;
    tracing::info!(tx_hash = %receipt.tx_hash, "whitelisted {staker:#x} on {vault:#x}");
    Ok(receipt.tx_hash)
}

#[cfg(test)]
mod tests {
    use alloy::primitives::keccak256;
    use vault_deployer::{
        chain::call_view,
        error::ChainError,
        planner::{Role, ADMIN_ROLE},
        setup_test,
    };

    use super::*;
    use crate::deploy::TestSystem;

    #[tokio::test]
    async fn test_settle_requires_role() -> anyhow::Result<()> {
        setup_test();
        let system = TestSystem::deploy().await?;
        let account = Address::repeat_byte(0x31);
        let err = settle(
            &system.chain,
            system.market_maker_vault,
            account,
            U256::from(5),
            false,
            FinalityPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeployError::MissingRole { account, .. } if account == system.deployer_address));
        Ok(())
    }

    #[tokio::test]
    async fn test_settle_with_ensure_role() -> anyhow::Result<()> {
        setup_test();
        let system = TestSystem::deploy().await?;
        let account = Address::repeat_byte(0x31);
        let amount = U256::from(72_869_900_000_000_000_000u128);
        for _ in 0..2 {
            settle(
                &system.chain,
                system.market_maker_vault,
                account,
                amount,
                true,
                FinalityPolicy::default(),
            )
            .await?;
        }
        let balance = call_view(
            &system.chain,
            system.market_maker_vault,
            VanillaMarketMakerVault::balancesCall { account },
        )
        .await?
        ._0;
        assert_eq!(balance, amount * U256::from(2));
        assert!(
            has_role(
                &system.chain,
                system.market_maker_vault,
                Role(keccak256(MONEY_VAULT_ROLE)),
                system.deployer_address
            )
            .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_role_without_admin_is_missing_privilege() -> anyhow::Result<()> {
        setup_test();
        let system = TestSystem::deploy().await?;
        let outsider = system.chain.with_signer(Address::repeat_byte(0x66));
        let err = settle(
            &outsider,
            system.market_maker_vault,
            Address::repeat_byte(0x31),
            U256::from(1),
            true,
            FinalityPolicy::default(),
        )
        .await
        .unwrap_err();
        match err {
            DeployError::MissingPrivilege { admin_role, .. } => {
                assert_eq!(admin_role, keccak256(ADMIN_ROLE))
            },
            err => panic!("unexpected error {err}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_whitelist() -> anyhow::Result<()> {
        setup_test();
        let system = TestSystem::deploy().await?;
        let staker = Address::repeat_byte(0x64);
        whitelist(&system.chain, system.market_maker_vault, staker, FinalityPolicy::default()).await?;
        assert!(system.chain.is_whitelisted(system.market_maker_vault, staker));

        let outsider = system.chain.with_signer(Address::repeat_byte(0x66));
        let err = whitelist(&outsider, system.market_maker_vault, staker, FinalityPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Chain(ChainError::Reverted { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_role_by_accessor_and_value() -> anyhow::Result<()> {
        setup_test();
        let system = TestSystem::deploy().await?;
        let bot = Address::repeat_byte(0x71);
        let spec: RoleSpec = "BOT_ROLE".parse()?;
        let tx = grant_role(&system.chain, system.money_vault, &spec, bot, FinalityPolicy::default())
            .await?;
        assert!(tx.is_some());

        let value: RoleSpec = format!("{}", keccak256("BOT_ROLE")).parse()?;
        let again = grant_role(&system.chain, system.money_vault, &value, bot, FinalityPolicy::default())
            .await?;
        assert_eq!(again, None);
        Ok(())
    }
}
