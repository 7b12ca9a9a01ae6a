//! Address parsing and normalization.
//!
//! Operator-supplied addresses are accepted case-insensitively, with or without the `0x` prefix,
//! and are rendered in EIP-55 checksummed form.

use std::str::FromStr;

use alloy::primitives::Address;

use crate::error::ConfigError;

const ADDRESS_HEX_LEN: usize = 40;

/// Parse a 20-byte hex address supplied for configuration field `field`.
pub fn parse_address_field(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let invalid = || ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    };
    if digits.len() != ADDRESS_HEX_LEN || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    Address::from_str(digits).map_err(|_| invalid())
}

/// Canonical textual form: `0x`-prefixed, EIP-55 checksummed.
pub fn normalize_address(value: &str) -> Result<String, ConfigError> {
    parse_address_field("address", value).map(|addr| addr.to_checksum(None))
}

/// `clap` value parser for address flags.
pub fn parse_address(value: &str) -> Result<Address, ConfigError> {
    parse_address_field("address", value)
}

/// Parse a comma-separated address list, discarding blank entries.
pub fn parse_address_list(field: &'static str, value: &str) -> Result<Vec<Address>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_address_field(field, entry))
        .collect()
}
