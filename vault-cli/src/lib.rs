//! Command line interface of the vault deployer.

use std::{io::Write, path::PathBuf, time::Duration};

use alloy::{
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
};
use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use url::Url;
use vault_deployer::{
    address::parse_address,
    artifacts::VaultArtifacts,
    build_signer,
    chain::{ChainClient, FinalityPolicy},
    config::{DeploymentConfig, DeploymentConfigArgs},
    error::ConfigError,
    manifest::{DeploymentManifest, ManifestStore},
    network_config::Network,
    orchestrator::{upgrade_targets, OrchestratorBuilder},
    planner::RoleSpec,
    signer_from_private_key,
    verifier::{
        ForgeVerifierBuilder, Verifier, DEFAULT_COMPILER_VERSION, DEFAULT_OPTIMIZER_RUNS,
    },
    Contracts, DeployedContracts,
};

#[cfg(any(test, feature = "testing"))]
pub mod deploy;
pub mod info;
pub mod operations;
pub mod parse;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[clap(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Clone, Debug, Args)]
pub struct Config {
    /// JSON-RPC endpoint of the target chain.
    #[clap(long, env = "RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: Url,

    /// Hex-encoded private key of the signer. Takes precedence over `--mnemonic`.
    #[clap(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    #[clap(long, env = "MNEMONIC", hide_env_values = true)]
    pub mnemonic: Option<String>,

    /// Account index when deriving the signer from `--mnemonic`.
    #[clap(long, env = "ACCOUNT_INDEX", default_value_t = 0)]
    pub account_index: u32,

    /// Network name, used to name manifests and to check the RPC's chain id.
    #[clap(long, env = "NETWORK", default_value = "localhost")]
    pub network: Network,

    #[clap(long, env = "DEPLOYMENTS_DIR", default_value = "deployments")]
    pub deployments_dir: PathBuf,

    /// Confirmations to wait for after each transaction.
    #[clap(long, env = "CONFIRMATIONS", default_value_t = 1)]
    pub confirmations: u64,

    /// Seconds to wait for each transaction before reporting it unconfirmed.
    #[clap(long, env = "TX_TIMEOUT", default_value_t = 120)]
    pub tx_timeout: u64,

    /// Receipt polling interval in milliseconds.
    #[clap(long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,
}

impl Config {
    pub fn finality(&self) -> FinalityPolicy {
        FinalityPolicy {
            confirmations: self.confirmations,
            timeout: Duration::from_secs(self.tx_timeout),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval.map(Duration::from_millis)
    }

    pub fn store(&self) -> ManifestStore {
        ManifestStore::new(&self.deployments_dir)
    }

    pub fn signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        if let Some(key) = &self.private_key {
            return signer_from_private_key(key);
        }
        match &self.mnemonic {
            Some(mnemonic) => build_signer(mnemonic, self.account_index),
            None => Err(ConfigError::Missing {
                field: "privateKey or mnemonic",
            }),
        }
    }

    /// Manifest at `path`, or the latest one of the configured network.
    fn manifest(&self, path: Option<PathBuf>) -> Result<(PathBuf, DeploymentManifest)> {
        Ok(match path {
            Some(path) => {
                let manifest = ManifestStore::load(&path)?;
                (path, manifest)
            },
            None => self.store().find_latest(self.network.name())?,
        })
    }
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Deploy both vaults behind new proxies and wire their roles.
    ///
    /// Predeployed addresses are reused: an implementation is not deployed again and a proxy is
    /// upgraded instead of created.
    Deploy {
        #[clap(flatten)]
        config: DeploymentConfigArgs,

        #[clap(flatten)]
        contracts: DeployedContracts,

        /// Hardhat artifacts directory holding the contracts' creation code.
        #[clap(long, env = "ARTIFACTS_DIR", default_value = "artifacts")]
        artifacts_dir: PathBuf,
    },
    /// Deploy new implementations and repoint the proxies of an earlier deployment.
    Upgrade {
        /// Manifest of the deployment to upgrade. Defaults to the network's latest.
        #[clap(long)]
        manifest: Option<PathBuf>,

        #[clap(flatten)]
        contracts: DeployedContracts,

        #[clap(long, env = "ARTIFACTS_DIR", default_value = "artifacts")]
        artifacts_dir: PathBuf,
    },
    /// Verify the sources of a deployment on the network's block explorer.
    Verify {
        /// Manifest to verify. Defaults to the network's latest.
        #[clap(long)]
        manifest: Option<PathBuf>,

        /// Explorer API key. Falls back to `BSCSCAN_API_KEY`.
        #[clap(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
        etherscan_api_key: Option<String>,

        #[clap(long, env = "VERIFIER_URL")]
        verifier_url: Option<String>,

        #[clap(long, default_value = DEFAULT_COMPILER_VERSION)]
        compiler_version: String,

        #[clap(long, default_value_t = DEFAULT_OPTIMIZER_RUNS)]
        optimizer_runs: u32,

        /// Root of the Solidity project.
        #[clap(long, default_value = ".")]
        project_root: PathBuf,

        #[clap(long, default_value = "forge")]
        forge: String,

        /// Only verify the implementations.
        #[clap(long)]
        skip_proxies: bool,
    },
    /// Grant a role on an access-controlled contract.
    GrantRole {
        #[clap(long, value_parser = parse_address)]
        contract: Address,

        /// Accessor name (`MONEY_VAULT_ROLE`) or 32-byte hex value.
        #[clap(long)]
        role: RoleSpec,

        #[clap(long, value_parser = parse_address)]
        account: Address,
    },
    /// Settle an amount to an account on the market-maker vault.
    Settle {
        #[clap(long, value_parser = parse_address)]
        contract: Address,

        #[clap(long, value_parser = parse_address)]
        account: Address,

        /// Decimal amount with 18 decimals, e.g. `72.8699`.
        #[clap(long, value_parser = parse::parse_amount)]
        amount: U256,

        /// Grant `MONEY_VAULT_ROLE` to the signer first if it is missing.
        #[clap(long)]
        ensure_role: bool,
    },
    /// Whitelist a staker on the market-maker vault.
    Whitelist {
        #[clap(long, value_parser = parse_address)]
        contract: Address,

        #[clap(long, value_parser = parse_address)]
        staker: Address,
    },
    /// Show the live state of the latest deployment.
    Info {
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
}

impl Cli {
    /// Run the command against `client`, writing its results to `out`.
    pub async fn run<C: ChainClient + Clone>(self, client: &C, mut out: impl Write) -> Result<()> {
        let Cli { config, command } = self;
        check_chain_id(client, &config.network).await?;
        let finality = config.finality();

        match command {
            Commands::Deploy {
                config: args,
                contracts,
                artifacts_dir,
            } => {
                let deployment = args.validate(client.signer_address())?;
                let artifacts = VaultArtifacts::load(&artifacts_dir)?;
                let mut contracts = Contracts::from(contracts);
                orchestrate(client, &config, &artifacts, &deployment, &mut contracts, out).await
            },
            Commands::Upgrade {
                manifest,
                contracts,
                artifacts_dir,
            } => {
                let (path, previous) = config.manifest(manifest)?;
                tracing::info!("upgrading the deployment recorded in {}", path.display());
                let artifacts = VaultArtifacts::load(&artifacts_dir)?;
                let mut contracts = Contracts::from(contracts);
                upgrade_targets(&previous, &mut contracts);
                orchestrate(client, &config, &artifacts, &previous.config(), &mut contracts, out)
                    .await
            },
            Commands::Verify {
                manifest,
                etherscan_api_key,
                verifier_url,
                compiler_version,
                optimizer_runs,
                project_root,
                forge,
                skip_proxies,
            } => {
                let (path, manifest) = config.manifest(manifest)?;
                tracing::info!("verifying the deployment recorded in {}", path.display());
                let chain_id = match config.network.chain_id() {
                    Some(chain_id) => chain_id,
                    None => client.chain_id().await?,
                };
                let mut builder = ForgeVerifierBuilder::default();
                builder
                    .chain_id(chain_id)
                    .compiler_version(compiler_version)
                    .optimizer_runs(optimizer_runs)
                    .project_root(project_root)
                    .forge(forge);
                match etherscan_api_key.or_else(|| std::env::var("BSCSCAN_API_KEY").ok()) {
                    Some(key) => {
                        builder.api_key(key);
                    },
                    None => tracing::warn!("no explorer API key set"),
                }
                if let Some(url) = verifier_url {
                    builder.verifier_url(url);
                }
                let service = builder.build()?;
                let report = Verifier::new(&service, &config.network)
                    .include_proxies(!skip_proxies)
                    .verify_manifest(&manifest)
                    .await;
                write!(out, "{report}")?;
                if !report.implementations_verified() {
                    bail!("implementation verification failed, re-run verify to retry");
                }
                Ok(())
            },
            Commands::GrantRole {
                contract,
                role,
                account,
            } => {
                match operations::grant_role(client, contract, &role, account, finality).await? {
                    Some(tx_hash) => writeln!(out, "granted {role} to {account:#x}: {tx_hash}")?,
                    None => writeln!(out, "{account:#x} already holds {role}")?,
                }
                Ok(())
            },
            Commands::Settle {
                contract,
                account,
                amount,
                ensure_role,
            } => {
                let tx_hash =
                    operations::settle(client, contract, account, amount, ensure_role, finality)
                        .await?;
                writeln!(
                    out,
                    "settled {} to {account:#x}: {tx_hash}",
                    parse::format_amount(amount)
                )?;
                Ok(())
            },
            Commands::Whitelist { contract, staker } => {
                let tx_hash = operations::whitelist(client, contract, staker, finality).await?;
                writeln!(out, "whitelisted {staker:#x}: {tx_hash}")?;
                Ok(())
            },
            Commands::Info { manifest } => {
                let (path, manifest) = config.manifest(manifest)?;
                writeln!(out, "manifest {}", path.display())?;
                let info = info::vault_info(client, &manifest).await?;
                info::display_vault_info(&info, &config.network, out)
            },
        }
    }
}

async fn check_chain_id<C: ChainClient>(client: &C, network: &Network) -> Result<()> {
    let Some(expected) = network.chain_id() else {
        return Ok(());
    };
    let actual = client
        .chain_id()
        .await
        .context("failed to fetch the chain id")?;
    if actual != expected {
        bail!("network {network} has chain id {expected}, but the RPC reports {actual}");
    }
    Ok(())
}

async fn orchestrate<C: ChainClient + Clone>(
    client: &C,
    config: &Config,
    artifacts: &VaultArtifacts,
    deployment: &DeploymentConfig,
    contracts: &mut Contracts,
    mut out: impl Write,
) -> Result<()> {
    let store = config.store();
    let orchestrator = OrchestratorBuilder::default()
        .client(client)
        .artifacts(artifacts)
        .store(&store)
        .network(config.network.clone())
        .finality(config.finality())
        .build()?;
    match orchestrator.run(deployment, contracts).await {
        Ok(outcome) => {
            writeln!(out, "# {} recorded in {}", outcome.mode, outcome.manifest_path.display())?;
            contracts.write(&mut out)?;
            for binding in [&outcome.market_maker_vault, &outcome.money_vault] {
                if let Some(url) = config.network.explorer_code_url(binding.proxy_address) {
                    tracing::info!(vault = %binding.logical_name, "explorer: {url}");
                }
            }
            Ok(())
        },
        Err(err) => {
            writeln!(
                out,
                "# stopped before {}, re-run with these to resume",
                err.stage
            )?;
            err.artifacts.write(&mut out)?;
            Err(err.into())
        },
    }
}
