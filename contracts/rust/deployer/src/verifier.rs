//! Source verification of the contracts recorded in a manifest.
//!
//! Verification never touches chain state. Each contract is submitted independently and a failure
//! only affects its own entry in the [`VerificationReport`], so a partial run can be repeated
//! against the same manifest.

use std::{fmt, path::PathBuf, process::Stdio};

use alloy::primitives::{hex, Address, Bytes};
use async_trait::async_trait;
use derive_builder::Builder;
use tokio::process::Command;

use crate::{
    artifacts::{
        proxy_constructor_args, MARKET_MAKER_VAULT_SOURCE, MONEY_VAULT_SOURCE, PROXY_SOURCE,
    },
    manifest::DeploymentManifest,
    network_config::Network,
    planner::{plan_market_maker_init, plan_money_vault_init},
    Contract,
};

pub const DEFAULT_COMPILER_VERSION: &str = "v0.8.28";
pub const DEFAULT_OPTIMIZER_RUNS: u32 = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRequest {
    pub contract: Contract,
    pub address: Address,
    /// `path:Name` of the Solidity source.
    pub source: &'static str,
    pub constructor_args: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    Failed(String),
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, VerificationOutcome::Failed(_))
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Verified => f.write_str("verified"),
            VerificationOutcome::AlreadyVerified => f.write_str("already verified"),
            VerificationOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// An explorer-style source verification backend.
#[async_trait]
pub trait VerificationService: Send + Sync {
    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome;
}

/// Verifies through `forge verify-contract`.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct ForgeVerifier {
    chain_id: u64,
    #[builder(default, setter(strip_option))]
    api_key: Option<String>,
    #[builder(default, setter(strip_option))]
    verifier_url: Option<String>,
    #[builder(default = "DEFAULT_COMPILER_VERSION.to_string()")]
    compiler_version: String,
    #[builder(default = "DEFAULT_OPTIMIZER_RUNS")]
    optimizer_runs: u32,
    /// Directory of the Solidity project the sources are resolved against.
    #[builder(default = "PathBuf::from(\".\")")]
    project_root: PathBuf,
    #[builder(default = "\"forge\".to_string()")]
    forge: String,
}

impl ForgeVerifier {
    pub fn command_args(&self, request: &VerificationRequest) -> Vec<String> {
        let mut args = vec![
            "verify-contract".to_string(),
            request.address.to_checksum(None),
            request.source.to_string(),
            "--chain-id".to_string(),
            self.chain_id.to_string(),
            "--compiler-version".to_string(),
            self.compiler_version.clone(),
            "--num-of-optimizations".to_string(),
            self.optimizer_runs.to_string(),
            "--watch".to_string(),
        ];
        if let Some(key) = &self.api_key {
            args.extend(["--etherscan-api-key".to_string(), key.clone()]);
        }
        if let Some(url) = &self.verifier_url {
            args.extend(["--verifier-url".to_string(), url.clone()]);
        }
        if !request.constructor_args.is_empty() {
            args.extend([
                "--constructor-args".to_string(),
                hex::encode_prefixed(&request.constructor_args),
            ]);
        }
        args
    }
}

/// Interpret the exit status and output of a verification attempt.
fn classify_output(success: bool, stdout: &str, stderr: &str) -> VerificationOutcome {
    let already = |s: &str| s.to_ascii_lowercase().contains("already verified");
    if already(stdout) || already(stderr) {
        return VerificationOutcome::AlreadyVerified;
    }
    if success {
        return VerificationOutcome::Verified;
    }
    let reason = match stderr.trim() {
        "" => stdout.trim(),
        stderr => stderr,
    };
    VerificationOutcome::Failed(reason.to_string())
}

#[async_trait]
impl VerificationService for ForgeVerifier {
    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        let output = Command::new(&self.forge)
            .args(self.command_args(request))
            .current_dir(&self.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(output) => classify_output(
                output.status.success(),
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Err(err) => VerificationOutcome::Failed(format!("failed to run {}: {err}", self.forge)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationEntry {
    pub contract: Contract,
    pub address: Address,
    pub outcome: VerificationOutcome,
    pub explorer_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub entries: Vec<VerificationEntry>,
}

impl VerificationReport {
    pub fn outcome(&self, contract: Contract) -> Option<&VerificationOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.contract == contract)
            .map(|entry| &entry.outcome)
    }

    /// Whether both implementations are verified. Proxy outcomes do not count.
    pub fn implementations_verified(&self) -> bool {
        [Contract::MarketMakerVault, Contract::MoneyVault]
            .into_iter()
            .all(|contract| self.outcome(contract).is_some_and(VerificationOutcome::is_success))
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{} {:#x}: {}", entry.contract, entry.address, entry.outcome)?;
            if let Some(url) = &entry.explorer_url {
                write!(f, " ({url})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct Verifier<'a, S: VerificationService + ?Sized> {
    service: &'a S,
    network: &'a Network,
    include_proxies: bool,
}

impl<'a, S: VerificationService + ?Sized> Verifier<'a, S> {
    pub fn new(service: &'a S, network: &'a Network) -> Self {
        Self {
            service,
            network,
            include_proxies: true,
        }
    }

    pub fn include_proxies(mut self, include: bool) -> Self {
        self.include_proxies = include;
        self
    }

    /// Verify everything `manifest` records: implementations first, then (optionally) proxies.
    pub async fn verify_manifest(&self, manifest: &DeploymentManifest) -> VerificationReport {
        let mut report = VerificationReport::default();
        for request in implementation_requests(manifest) {
            let entry = self.submit(request).await;
            if let VerificationOutcome::Failed(reason) = &entry.outcome {
                tracing::error!(contract = %entry.contract, "verification failed: {reason}");
            }
            report.entries.push(entry);
        }
        if self.include_proxies {
            for request in proxy_requests(manifest) {
                let entry = match request {
                    Ok(request) => self.submit(request).await,
                    Err((contract, address, reason)) => VerificationEntry {
                        contract,
                        address,
                        outcome: VerificationOutcome::Failed(reason),
                        explorer_url: self.network.explorer_code_url(address),
                    },
                };
                if let VerificationOutcome::Failed(reason) = &entry.outcome {
                    tracing::warn!(contract = %entry.contract, "proxy verification failed (non-fatal): {reason}");
                }
                report.entries.push(entry);
            }
        }
        report
    }

    async fn submit(&self, request: VerificationRequest) -> VerificationEntry {
        tracing::info!(
            contract = %request.contract,
            address = %request.address,
            source = request.source,
            "verifying"
        );
        let outcome = self.service.verify(&request).await;
        match &outcome {
            VerificationOutcome::Verified => tracing::info!(contract = %request.contract, "verified"),
            VerificationOutcome::AlreadyVerified => {
                tracing::info!(contract = %request.contract, "already verified")
            },
            VerificationOutcome::Failed(_) => {},
        }
        let explorer_url = self.network.explorer_code_url(request.address);
        if let Some(url) = &explorer_url {
            tracing::info!("explorer: {url}");
        }
        VerificationEntry {
            contract: request.contract,
            address: request.address,
            outcome,
            explorer_url,
        }
    }
}

fn implementation_requests(manifest: &DeploymentManifest) -> [VerificationRequest; 2] {
    [
        VerificationRequest {
            contract: Contract::MarketMakerVault,
            address: manifest.market_maker_vault_impl,
            source: MARKET_MAKER_VAULT_SOURCE,
            constructor_args: Bytes::new(),
        },
        VerificationRequest {
            contract: Contract::MoneyVault,
            address: manifest.money_vault_impl,
            source: MONEY_VAULT_SOURCE,
            constructor_args: Bytes::new(),
        },
    ]
}

type ProxyRequest = Result<VerificationRequest, (Contract, Address, String)>;

/// Proxy constructor arguments rebuilt from the manifest's configuration.
///
/// These match the creation transaction only while the proxy still points at the implementation it
/// was deployed with.
fn proxy_requests(manifest: &DeploymentManifest) -> [ProxyRequest; 2] {
    let config = manifest.config();
    let market_maker = VerificationRequest {
        contract: Contract::MarketMakerVaultProxy,
        address: manifest.market_maker_vault_proxy,
        source: PROXY_SOURCE,
        constructor_args: proxy_constructor_args(
            manifest.market_maker_vault_impl,
            manifest.owner,
            plan_market_maker_init(&config).into_calldata(),
        ),
    };
    let money = plan_money_vault_init(&config, manifest.market_maker_vault_proxy)
        .map(|init| VerificationRequest {
            contract: Contract::MoneyVaultProxy,
            address: manifest.money_vault_proxy,
            source: PROXY_SOURCE,
            constructor_args: proxy_constructor_args(
                manifest.money_vault_impl,
                manifest.owner,
                init.into_calldata(),
            ),
        })
        .map_err(|err| {
            (
                Contract::MoneyVaultProxy,
                manifest.money_vault_proxy,
                err.to_string(),
            )
        });
    [Ok(market_maker), money]
}
