use std::path::Path;

use anyhow::Result;
use clap::Parser;
use vault_cli::Cli;
use vault_deployer::testing::{SimulatedChain, DEV_MNEMONIC};

/// Run the CLI against `chain` with manifests under `dir/deployments`, returning its output.
pub async fn run_cli(chain: &SimulatedChain, dir: &Path, args: &[&str]) -> Result<String> {
    let mut out = Vec::new();
    let result = cli(dir, args).run(chain, &mut out).await;
    let out = String::from_utf8(out)?;
    println!("{out}");
    result.map(|()| out)
}

/// Like [`run_cli`], but the run is expected to fail. Returns the error and the output.
pub async fn run_cli_failing(
    chain: &SimulatedChain,
    dir: &Path,
    args: &[&str],
) -> Result<(anyhow::Error, String)> {
    let mut out = Vec::new();
    let err = match cli(dir, args).run(chain, &mut out).await {
        Ok(()) => anyhow::bail!("expected {args:?} to fail"),
        Err(err) => err,
    };
    Ok((err, String::from_utf8(out)?))
}

fn cli(dir: &Path, args: &[&str]) -> Cli {
    let mut argv = vec![
        "vault-cli".to_string(),
        "--mnemonic".to_string(),
        DEV_MNEMONIC.to_string(),
        "--deployments-dir".to_string(),
        dir.join("deployments").display().to_string(),
    ];
    argv.extend(args.iter().map(|arg| arg.to_string()));
    Cli::parse_from(argv)
}

/// Parse the `NAME=0x..` lines the deploy command prints into the matching flags.
pub fn resume_flags(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| line.split_once('='))
        .filter_map(|(name, address)| {
            let flag = match name {
                "MARKET_MAKER_VAULT_IMPL_ADDRESS" => "--market-maker-vault",
                "MARKET_MAKER_VAULT_PROXY_ADDRESS" => "--market-maker-vault-proxy",
                "MONEY_VAULT_IMPL_ADDRESS" => "--money-vault",
                "MONEY_VAULT_PROXY_ADDRESS" => "--money-vault-proxy",
                _ => return None,
            };
            Some([flag.to_string(), address.to_string()])
        })
        .flatten()
        .collect()
}
