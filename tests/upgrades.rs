use std::time::Duration;

use alloy::primitives::{keccak256, Address, U256};
use anyhow::Result;
use pretty_assertions::assert_eq;
use vault_cli::deploy::TestSystem;
use vault_deployer::{
    error::DeployError,
    manifest::ManifestStore,
    orchestrator::DeploymentMode,
    planner::{has_role, Role, MONEY_VAULT_ROLE},
    proxy::IMPLEMENTATION_SLOT,
    setup_test,
    testing::VaultVersion,
};

use crate::common::{run_cli, run_cli_failing};

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_preserves_state() -> Result<()> {
    setup_test();
    let system = TestSystem::deploy().await?;
    let chain = &system.chain;
    let staker = Address::repeat_byte(0x5a);
    let stake = U256::from(1_000_000u64);
    chain.seed_balance(system.market_maker_vault, staker, stake);
    run_cli(chain, system.dir.path(), &[
        "whitelist",
        "--contract",
        &system.market_maker_vault.to_string(),
        "--staker",
        &staker.to_string(),
    ])
    .await?;

    let mut before = chain.storage(system.market_maker_vault);
    let mut money_before = chain.storage(system.money_vault);

    system.rebuild_artifacts(VaultVersion::V3)?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let sent = chain.sent_transactions();
    run_cli(chain, system.dir.path(), &[
        "upgrade",
        "--artifacts-dir",
        &system.artifacts_dir().display().to_string(),
    ])
    .await?;
    // two implementations and two repoints, no role grant
    assert_eq!(chain.sent_transactions() - sent, 4);
    assert_eq!(chain.version_of(system.market_maker_vault).await?, VaultVersion::V3);
    assert_eq!(chain.version_of(system.money_vault).await?, VaultVersion::V3);

    let mut after = chain.storage(system.market_maker_vault);
    let mut money_after = chain.storage(system.money_vault);
    for storage in [&mut before, &mut after, &mut money_before, &mut money_after] {
        storage.remove(&IMPLEMENTATION_SLOT);
    }
    assert_eq!(before, after);
    assert_eq!(money_before, money_after);
    assert_eq!(chain.balance(system.market_maker_vault, staker), stake);
    assert!(chain.is_whitelisted(system.market_maker_vault, staker));
    assert!(
        has_role(
            chain,
            system.market_maker_vault,
            Role(keccak256(MONEY_VAULT_ROLE)),
            system.money_vault
        )
        .await?
    );

    let (path, manifest) = ManifestStore::new(system.deployments_dir()).find_latest("localhost")?;
    assert_ne!(path, system.manifest_path);
    assert_eq!(manifest.mode, Some(DeploymentMode::Upgrade));
    assert_eq!(manifest.market_maker_vault_proxy, system.market_maker_vault);
    assert_eq!(manifest.money_vault_proxy, system.money_vault);
    assert_ne!(manifest.market_maker_vault_impl, system.manifest.market_maker_vault_impl);
    assert_eq!(manifest.config(), system.manifest.config());
    // the first manifest is left untouched
    assert_eq!(ManifestStore::load(&system.manifest_path)?, system.manifest);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_to_current_implementations_sends_nothing() -> Result<()> {
    setup_test();
    let system = TestSystem::deploy().await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let sent = system.chain.sent_transactions();
    run_cli(&system.chain, system.dir.path(), &[
        "upgrade",
        "--artifacts-dir",
        &system.artifacts_dir().display().to_string(),
        "--market-maker-vault",
        &system.manifest.market_maker_vault_impl.to_string(),
        "--money-vault",
        &system.manifest.money_vault_impl.to_string(),
    ])
    .await?;
    assert_eq!(system.chain.sent_transactions(), sent);
    assert_eq!(system.chain.version_of(system.money_vault).await?, VaultVersion::V2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_by_non_owner_fails() -> Result<()> {
    setup_test();
    let system = TestSystem::deploy().await?;
    system.rebuild_artifacts(VaultVersion::V3)?;
    let outsider = system.chain.with_signer(Address::repeat_byte(0x66));
    let (err, out) = run_cli_failing(&outsider, system.dir.path(), &[
        "upgrade",
        "--artifacts-dir",
        &system.artifacts_dir().display().to_string(),
    ])
    .await?;
    match err.downcast_ref::<vault_deployer::orchestrator::OrchestrationError>() {
        Some(err) => assert!(matches!(err.source, DeployError::NotOwner { .. })),
        None => panic!("unexpected error {err:#}"),
    }
    // the new implementations are reported so a re-run reuses them
    assert!(out.contains("MARKET_MAKER_VAULT_IMPL_ADDRESS=0x"));
    assert_eq!(system.chain.version_of(system.market_maker_vault).await?, VaultVersion::V2);
    Ok(())
}
