use std::path::{Path, PathBuf};

use alloy::primitives::{hex, Address};
use anyhow::{Context as _, Result};
use tempfile::TempDir;
use vault_deployer::{
    artifacts::{ContractArtifact, VaultArtifacts, MARKET_MAKER_VAULT_ARTIFACT, MONEY_VAULT_ARTIFACT, PROXY_ARTIFACT},
    chain::ChainClient as _,
    config::DeploymentConfig,
    manifest::{DeploymentManifest, ManifestStore},
    orchestrator::OrchestratorBuilder,
    testing::{SimulatedChain, VaultVersion},
    Contracts,
};

/// A deployed vault pair on a simulated chain, with on-disk artifacts and a manifest directory.
#[derive(Debug)]
pub struct TestSystem {
    pub chain: SimulatedChain,
    pub deployer_address: Address,
    pub config: DeploymentConfig,
    pub market_maker_vault: Address,
    pub money_vault: Address,
    pub manifest: DeploymentManifest,
    pub manifest_path: PathBuf,
    pub dir: TempDir,
}

impl TestSystem {
    pub async fn deploy() -> Result<Self> {
        let chain = SimulatedChain::new();
        let deployer_address = chain.signer_address();
        let config = DeploymentConfig::new(Address::repeat_byte(0xa5), deployer_address)
            .with_fee_accounts(Address::repeat_byte(0xfe), Address::repeat_byte(0xfd))
            .with_bots([Address::repeat_byte(0xb0), Address::repeat_byte(0xb1)]);

        let dir = tempfile::tempdir()?;
        let artifacts = write_artifacts(&chain, &dir.path().join("artifacts"), VaultVersion::V2)?;
        let store = ManifestStore::new(dir.path().join("deployments"));
        let outcome = OrchestratorBuilder::default()
            .client(&chain)
            .artifacts(&artifacts)
            .store(&store)
            .network("localhost".parse()?)
            .build()?
            .run(&config, &mut Contracts::new())
            .await?;

        Ok(Self {
            deployer_address,
            config,
            market_maker_vault: outcome.market_maker_vault.proxy_address,
            money_vault: outcome.money_vault.proxy_address,
            manifest: outcome.manifest,
            manifest_path: outcome.manifest_path,
            chain,
            dir,
        })
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.dir.path().join("deployments")
    }

    /// Replace the on-disk implementation artifacts with those of `version`.
    pub fn rebuild_artifacts(&self, version: VaultVersion) -> Result<VaultArtifacts> {
        write_artifacts(&self.chain, &self.artifacts_dir(), version)
    }
}

/// Write the simulated chain's creation code as Hardhat artifacts under `dir`.
pub fn write_artifacts(
    chain: &SimulatedChain,
    dir: &Path,
    version: VaultVersion,
) -> Result<VaultArtifacts> {
    let artifacts = chain.artifacts_for(version);
    for (rel, artifact) in [
        (MARKET_MAKER_VAULT_ARTIFACT, &artifacts.market_maker_vault),
        (MONEY_VAULT_ARTIFACT, &artifacts.money_vault),
        (PROXY_ARTIFACT, &artifacts.proxy),
    ] {
        write_artifact(&dir.join(rel), artifact)?;
    }
    Ok(artifacts)
}

fn write_artifact(path: &Path, artifact: &ContractArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = format!(
        r#"{{"contractName":"{}","bytecode":"{}","abi":[]}}"#,
        artifact.contract_name,
        hex::encode_prefixed(&artifact.bytecode)
    );
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use vault_deployer::{setup_test, testing::VaultVersion};

    use super::*;

    #[tokio::test]
    async fn test_deploy_test_system() -> Result<()> {
        setup_test();
        let system = TestSystem::deploy().await?;
        assert_eq!(system.manifest.market_maker_vault_proxy, system.market_maker_vault);
        assert_eq!(system.chain.version_of(system.money_vault).await?, VaultVersion::V2);

        let loaded = VaultArtifacts::load(&system.artifacts_dir())?;
        assert_eq!(loaded, system.chain.artifacts());
        let (path, _) = ManifestStore::new(system.deployments_dir()).find_latest("localhost")?;
        assert_eq!(path, system.manifest_path);
        Ok(())
    }
}
