//! Networks the vaults are deployed to.

use std::{fmt, str::FromStr};

use alloy::primitives::Address;

use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: u64,
    /// Block explorer front end, with trailing slash.
    pub explorer: Option<&'static str>,
    /// Etherscan-compatible verification API.
    pub explorer_api: Option<&'static str>,
}

pub const KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "hardhat",
        chain_id: 31337,
        explorer: None,
        explorer_api: None,
    },
    NetworkInfo {
        name: "localhost",
        chain_id: 31337,
        explorer: None,
        explorer_api: None,
    },
    NetworkInfo {
        name: "ethereum",
        chain_id: 1,
        explorer: Some("https://etherscan.io/"),
        explorer_api: Some("https://api.etherscan.io/api"),
    },
    NetworkInfo {
        name: "polygon",
        chain_id: 137,
        explorer: Some("https://polygonscan.com/"),
        explorer_api: Some("https://api.polygonscan.com/api"),
    },
    NetworkInfo {
        name: "opBnb",
        chain_id: 204,
        explorer: Some("https://opbnb.bscscan.com/"),
        explorer_api: Some("https://api-opbnb.bscscan.com/api"),
    },
    NetworkInfo {
        name: "sepolia",
        chain_id: 11155111,
        explorer: Some("https://sepolia.etherscan.io/"),
        explorer_api: Some("https://api-sepolia.etherscan.io/api"),
    },
    NetworkInfo {
        name: "mumbai",
        chain_id: 80001,
        explorer: Some("https://mumbai.polygonscan.com/"),
        explorer_api: Some("https://api-testnet.polygonscan.com/api"),
    },
    NetworkInfo {
        name: "opBnbTestnet",
        chain_id: 5611,
        explorer: Some("https://testnet.opbnbscan.com/"),
        explorer_api: None,
    },
];

/// A validated network name, used in manifest file names.
///
/// Names outside [`KNOWN_NETWORKS`] are accepted as long as they are filesystem-safe.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Network {
    name: String,
    info: Option<&'static NetworkInfo>,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> Option<&'static NetworkInfo> {
        self.info
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.info.map(|info| info.chain_id)
    }

    pub fn is_local(&self) -> bool {
        self.chain_id() == Some(31337)
    }

    /// `<explorer>/address/<addr>#code`, if the network has an explorer.
    pub fn explorer_code_url(&self, address: Address) -> Option<String> {
        self.info
            .and_then(|info| info.explorer)
            .map(|explorer| format!("{explorer}address/{}#code", address.to_checksum(None)))
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ConfigError::InvalidNetwork(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            info: KNOWN_NETWORKS.iter().find(|info| info.name == name),
        })
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("opBnb", Some(204))]
    #[case("localhost", Some(31337))]
    #[case("sepolia", Some(11155111))]
    #[case("my-devnet_2", None)]
    fn test_parse_network(#[case] name: &str, #[case] chain_id: Option<u64>) {
        let network: Network = name.parse().unwrap();
        assert_eq!(network.name(), name);
        assert_eq!(network.chain_id(), chain_id);
    }

    #[rstest]
    #[case("")]
    #[case("../etc")]
    #[case("op bnb")]
    #[case("a/b")]
    fn test_reject_unsafe_names(#[case] name: &str) {
        assert_eq!(
            name.parse::<Network>(),
            Err(ConfigError::InvalidNetwork(name.to_string()))
        );
    }

    #[test]
    fn test_explorer_link() {
        let addr: Address = "0x55d398326f99059ff775485246999027b3197955".parse().unwrap();
        let network: Network = "opBnb".parse().unwrap();
        assert_eq!(
            network.explorer_code_url(addr).unwrap(),
            "https://opbnb.bscscan.com/address/0x55d398326f99059fF775485246999027B3197955#code"
        );
        assert_eq!("localhost".parse::<Network>().unwrap().explorer_code_url(addr), None);
    }
}
