//! Ambient configuration layer: a typed [`SptSettings`] loaded from an
//! optional `Spt.toml`, environment variables (`SPT__...`), and a `.env`
//! file picked up by `dotenvy` before the environment layer is read.
//!
//! This is purely an alternate way to populate an [`Spt`](crate::core::Spt)
//! instance — the library itself has no dependency on it and keeps no
//! persisted state; only [`dc09-spt-cli`](../../dc09_spt_cli/index.html)
//! uses it.

use crate::core::Spt;
use crate::error::{Error, Result};
use crate::path::{Branch, Slot};
use crate::transport::TransportKind;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

/// One configured path slot, as read from settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub account: Option<String>,
    /// Hex-encoded AES key: 32 hex chars for AES-128, 64 for AES-256.
    pub key_hex: Option<String>,
    pub receiver: Option<u32>,
    pub line: Option<u32>,
}

impl PathSettings {
    fn transport_kind(&self) -> Result<TransportKind> {
        match self.transport.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            other => Err(Error::Configuration(format!("unknown transport {other:?}"))),
        }
    }

    fn key_bytes(&self) -> Result<Option<Vec<u8>>> {
        match &self.key_hex {
            None => Ok(None),
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)
                    .map_err(|e| Error::Configuration(format!("key_hex is not valid hex: {e}")))?;
                Ok(Some(bytes))
            }
        }
    }
}

/// Poll scheduler settings: interval, per branch, plus the shared retry delay.
#[derive(Debug, Clone, Deserialize)]
pub struct PollSettings {
    pub main_interval_secs: Option<u64>,
    pub backup_interval_secs: Option<u64>,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            main_interval_secs: None,
            backup_interval_secs: None,
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Typed settings for standing up an [`Spt`]. Loaded via [`SptSettings::load`]:
/// defaults, then an optional `Spt.toml` in the working directory, then
/// `SPT__`-prefixed environment variables (double underscore as the nested
/// separator, e.g. `SPT__MAIN_PRIMARY__HOST`).
#[derive(Debug, Clone, Deserialize)]
pub struct SptSettings {
    pub account: String,
    pub receiver: Option<u32>,
    pub line: Option<u32>,
    #[serde(default)]
    pub main_primary: Option<PathSettings>,
    #[serde(default)]
    pub main_secondary: Option<PathSettings>,
    #[serde(default)]
    pub backup_primary: Option<PathSettings>,
    #[serde(default)]
    pub backup_secondary: Option<PathSettings>,
    #[serde(default)]
    pub poll: PollSettings,
}

impl SptSettings {
    /// Loads settings from `Spt.toml` (optional, working directory) layered
    /// under `SPT__`-prefixed environment variables. Reads a `.env` file
    /// first, if present, so its values land in the environment layer.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = Config::builder()
            .add_source(File::with_name("Spt").required(false))
            .add_source(Environment::with_prefix("SPT").separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    /// Configures every non-empty path slot on `spt` from these settings.
    pub fn apply(&self, spt: &Spt) -> Result<()> {
        let slots: [(Branch, Slot, &Option<PathSettings>); 4] = [
            (Branch::Main, Slot::Primary, &self.main_primary),
            (Branch::Main, Slot::Secondary, &self.main_secondary),
            (Branch::BackUp, Slot::Primary, &self.backup_primary),
            (Branch::BackUp, Slot::Secondary, &self.backup_secondary),
        ];
        for (branch, slot, path) in slots {
            let Some(path) = path else { continue };
            spt.set_path(
                branch,
                slot,
                path.host.clone(),
                path.port,
                path.account.clone(),
                path.key_bytes()?,
                path.receiver,
                path.line,
                path.transport_kind()?,
                Duration::from_secs(path.timeout_secs),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_settings_reject_odd_length_hex() {
        let p = PathSettings {
            host: "h".into(),
            port: 1,
            transport: "tcp".into(),
            timeout_secs: 5,
            account: None,
            key_hex: Some("abc".into()),
            receiver: None,
            line: None,
        };
        assert!(p.key_bytes().is_err());
    }

    #[test]
    fn path_settings_decode_key_hex() {
        let p = PathSettings {
            host: "h".into(),
            port: 1,
            transport: "udp".into(),
            timeout_secs: 5,
            account: None,
            key_hex: Some("00".repeat(16)),
            receiver: None,
            line: None,
        };
        let key = p.key_bytes().unwrap().unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(p.transport_kind().unwrap(), TransportKind::Udp);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let p = PathSettings {
            host: "h".into(),
            port: 1,
            transport: "sctp".into(),
            timeout_secs: 5,
            account: None,
            key_hex: None,
            receiver: None,
            line: None,
        };
        assert!(p.transport_kind().is_err());
    }
}
