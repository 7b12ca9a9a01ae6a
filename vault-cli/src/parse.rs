use alloy::primitives::{
    utils::{format_ether, parse_ether},
    U256,
};
use anyhow::{bail, Result};

/// Parse a decimal token amount with 18 decimals into base units.
pub fn parse_amount(s: &str) -> Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        bail!("amount is empty");
    }
    if s.starts_with('-') {
        bail!("amount {s:?} is negative");
    }
    Ok(parse_ether(s)?)
}

pub fn format_amount(amount: U256) -> String {
    format_ether(amount)
}
