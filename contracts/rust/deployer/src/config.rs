//! Deployment configuration.
//!
//! [`DeploymentConfigArgs`] is what the operator supplies (flags or environment); it is validated
//! once into [`DeploymentConfig`], whose address fields are all present and well-formed.

use alloy::primitives::Address;
use clap::Parser;
use indexmap::IndexSet;

use crate::{
    address::{parse_address_field, parse_address_list},
    error::ConfigError,
};

#[derive(Clone, Debug, Default, Parser)]
pub struct DeploymentConfigArgs {
    /// Asset managed by both vaults (required).
    #[clap(long, env = "ASSET_ID")]
    pub asset_id: Option<String>,

    /// Owner of both proxies and admin of both vaults. Defaults to the signer.
    #[clap(long, env = "OWNER_ADDRESS")]
    pub owner: Option<String>,

    /// Account receiving platform fees. Defaults to the signer.
    #[clap(long, env = "PLATFORM_FEE_ACCOUNT")]
    pub platform_fee_account: Option<String>,

    /// Account receiving profit shares. Defaults to the signer.
    #[clap(long, env = "PROFIT_SHARING_ACCOUNT")]
    pub profit_sharing_account: Option<String>,

    /// Comma-separated bot addresses granted `BOT_ROLE` on the money vault.
    #[clap(long = "bots", env = "BOT_ADDRESSES", default_value = "")]
    pub bots: String,
}

/// Validated intent of one deployment run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentConfig {
    pub asset: Address,
    pub owner: Address,
    pub platform_fee_account: Address,
    pub profit_sharing_account: Address,
    /// Insertion-ordered, without duplicates.
    pub bots: IndexSet<Address>,
}

impl DeploymentConfig {
    /// Config with every defaultable account set to `owner` and no bots.
    pub fn new(asset: Address, owner: Address) -> Self {
        Self {
            asset,
            owner,
            platform_fee_account: owner,
            profit_sharing_account: owner,
            bots: IndexSet::new(),
        }
    }

    pub fn with_fee_accounts(mut self, platform_fee_account: Address, profit_sharing: Address) -> Self {
        self.platform_fee_account = platform_fee_account;
        self.profit_sharing_account = profit_sharing;
        self
    }

    pub fn with_bots(mut self, bots: impl IntoIterator<Item = Address>) -> Self {
        self.bots.extend(bots);
        self
    }

    pub fn bot_list(&self) -> Vec<Address> {
        self.bots.iter().copied().collect()
    }
}

impl DeploymentConfigArgs {
    /// Validate the raw input. Blank values count as absent; absent defaultable accounts fall
    /// back to `signer`.
    pub fn validate(&self, signer: Address) -> Result<DeploymentConfig, ConfigError> {
        let asset = match present(&self.asset_id) {
            Some(value) => parse_address_field("assetId", value)?,
            None => return Err(ConfigError::Missing { field: "assetId" }),
        };
        if asset == Address::ZERO {
            return Err(ConfigError::InvalidAddress {
                field: "assetId",
                value: format!("{asset:#x}"),
            });
        }
        let or_signer = |field: &'static str, value: &Option<String>| match present(value) {
            Some(value) => parse_address_field(field, value),
            None => {
                tracing::info!("{field} not set, using signer {signer:#x}");
                Ok(signer)
            },
        };
        let owner = or_signer("owner", &self.owner)?;
        let platform_fee_account = or_signer("platformFeeAccount", &self.platform_fee_account)?;
        let profit_sharing_account = or_signer("profitSharingAccount", &self.profit_sharing_account)?;
        let bots = parse_address_list("bots", &self.bots)?.into_iter().collect();

        Ok(DeploymentConfig {
            asset,
            owner,
            platform_fee_account,
            profit_sharing_account,
            bots,
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
