use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vault_cli::Cli;
use vault_deployer::{build_provider, chain::AlloyChainClient};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine, configuration may come from the environment or flags.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let signer = cli.config.signer()?;
    tracing::info!("signing with {:#x}", signer.address());
    let provider = build_provider(signer, cli.config.rpc_url.clone(), cli.config.poll_interval());
    let client = AlloyChainClient::new(provider);

    cli.run(&client, std::io::stdout()).await
}
