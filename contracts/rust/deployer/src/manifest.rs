//! Deployment manifests: one JSON file per run, never rewritten.
//!
//! Files live at `<dir>/<network>-<timestamp>.json` where the timestamp is the run's ISO-8601
//! UTC instant with `:` replaced by `-`. The most recent manifest of a network is the active one.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::DeploymentConfig, error::ManifestError, orchestrator::DeploymentMode};

const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    pub network: String,
    #[serde(with = "checksummed")]
    pub market_maker_vault_impl: Address,
    #[serde(with = "checksummed")]
    pub market_maker_vault_proxy: Address,
    #[serde(with = "checksummed")]
    pub money_vault_impl: Address,
    #[serde(with = "checksummed")]
    pub money_vault_proxy: Address,
    #[serde(with = "checksummed")]
    pub asset_id: Address,
    #[serde(with = "checksummed")]
    pub owner: Address,
    #[serde(with = "checksummed")]
    pub platform_fee_account: Address,
    #[serde(with = "checksummed")]
    pub profit_sharing_account: Address,
    #[serde(with = "checksummed_list")]
    pub bots: Vec<Address>,
    #[serde(with = "timestamp")]
    pub deployment_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_maker_vault_impl_tx: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub money_vault_impl_tx: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DeploymentMode>,
}

impl DeploymentManifest {
    /// The current instant at the precision manifests are stored with.
    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }

    pub fn config(&self) -> DeploymentConfig {
        DeploymentConfig::new(self.asset_id, self.owner)
            .with_fee_accounts(self.platform_fee_account, self.profit_sharing_account)
            .with_bots(self.bots.iter().copied())
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.network,
            self.deployment_time
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .replace(':', "-")
        )
    }
}

mod checksummed {
    use alloy::primitives::Address;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::address::parse_address_field;

    pub fn serialize<S: Serializer>(addr: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&addr.to_checksum(None))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_address_field("address", &s).map_err(D::Error::custom)
    }
}

mod checksummed_list {
    use alloy::primitives::Address;
    use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    use crate::address::parse_address_field;

    pub fn serialize<S: Serializer>(addrs: &[Address], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(addrs.len()))?;
        for addr in addrs {
            seq.serialize_element(&addr.to_checksum(None))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Address>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| parse_address_field("bots", s).map_err(D::Error::custom))
            .collect()
    }
}

mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|time| time.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

/// Directory of manifests.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `manifest` to a new file. An existing file is never overwritten.
    pub fn save(&self, manifest: &DeploymentManifest) -> Result<PathBuf, ManifestError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| ManifestError::Io { path, source }
        };
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.dir.join(manifest.file_name());
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ManifestError::WriteConflict(path));
            },
            Err(err) => return Err(io_err(&path)(err)),
        };
        let json = serde_json::to_string_pretty(manifest).map_err(|err| ManifestError::Corrupt {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(io_err(&path))?;
        tracing::info!(path = %path.display(), "deployment manifest saved");
        Ok(path)
    }

    /// Read a manifest from an explicit path.
    pub fn load(path: &Path) -> Result<DeploymentManifest, ManifestError> {
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|err| ManifestError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Most recent manifest of `network`, with the path it was read from.
    pub fn find_latest(&self, network: &str) -> Result<(PathBuf, DeploymentManifest), ManifestError> {
        let not_found = || ManifestError::NotFound {
            network: network.to_string(),
        };
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(source) => {
                return Err(ManifestError::Io {
                    path: self.dir.clone(),
                    source,
                })
            },
        };

        let prefix = format!("{network}-");
        let mut latest: Option<(DateTime<Utc>, PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|source| ManifestError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(time) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(parse_file_timestamp)
            else {
                continue;
            };
            if latest.as_ref().map_or(true, |(best, _)| time > *best) {
                latest = Some((time, entry.path()));
            }
        }

        let (_, path) = latest.ok_or_else(not_found)?;
        let manifest = Self::load(&path)?;
        if manifest.network != network {
            return Err(ManifestError::Corrupt {
                path,
                reason: format!(
                    "file belongs to network {network} but records {}",
                    manifest.network
                ),
            });
        }
        tracing::info!(path = %path.display(), "found latest manifest for {network}");
        Ok((path, manifest))
    }
}

fn parse_file_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, FILE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
