//! Gateway configuration: TOML device inventory + global settings.
//!
//! The document has a top-level `devices` map keyed by device name and a
//! `settings` table:
//!
//! ```toml
//! [devices.srl1]
//! hostname = "172.20.20.2"
//! ssh_port = 22
//! gnmi_port = 57400
//! description = "SR Linux lab node"
//!
//! [settings]
//! domain_suffix = "lab.example.net"
//! default_timeout = 30
//! log_level = "info"
//! ```
//!
//! A port left out (or written as `0`) means "use the protocol default";
//! the defaults are applied when the [`crate::registry::DeviceRegistry`]
//! is built, never here.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{GatewayError, GatewayResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
    #[serde(default)]
    pub settings: Settings,
}

/// A single device as written in the config document. Ports are raw:
/// zero means the field was omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub hostname: String,
    #[serde(default)]
    pub ssh_port: u16,
    #[serde(default)]
    pub telnet_port: u16,
    #[serde(default)]
    pub netconf_port: u16,
    #[serde(default)]
    pub gnmi_port: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    /// Accepted SSH host key fingerprints (`SHA256:...`). Empty means
    /// any host key is accepted for this device.
    #[serde(default)]
    pub pinned_sha256: Vec<String>,
}

/// `[settings]` table of the config document.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
    /// Per-operation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    /// Advisory ceiling on concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Secret used when a telemetry target string omits one.
    #[serde(default)]
    pub gnmi_default_secret: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            domain_suffix: default_domain_suffix(),
            default_timeout: default_timeout(),
            max_sessions: default_max_sessions(),
            log_level: default_log_level(),
            gnmi_default_secret: String::new(),
        }
    }
}

fn default_domain_suffix() -> String {
    "example.net".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ConfigFile {
    /// Load and parse the config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Internal(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let cfg: ConfigFile = toml::from_str(&content)
            .map_err(|e| GatewayError::Internal(format!("failed to parse config file: {e}")))?;
        info!(
            path = %path.display(),
            devices = cfg.devices.len(),
            "loaded device configuration"
        );
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_document() {
        let doc = r#"
            [devices.srl1]
            hostname = "10.0.0.1"
            ssh_port = 22
            telnet_port = 23
            netconf_port = 830
            gnmi_port = 57400
            description = "SR Linux"

            [devices.ceos1]
            hostname = "10.0.0.2"

            [settings]
            domain_suffix = "lab.net"
            default_timeout = 60
            max_sessions = 10
            log_level = "debug"
        "#;
        let cfg: ConfigFile = toml::from_str(doc).unwrap();
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.devices["srl1"].hostname, "10.0.0.1");
        assert_eq!(cfg.devices["srl1"].gnmi_port, 57400);
        assert_eq!(cfg.devices["ceos1"].ssh_port, 0);
        assert_eq!(cfg.settings.domain_suffix, "lab.net");
        assert_eq!(cfg.settings.default_timeout, 60);
        assert_eq!(cfg.settings.log_level, "debug");
    }

    #[test]
    fn settings_default_when_absent() {
        let doc = r#"
            [devices.r1]
            hostname = "r1.internal"
        "#;
        let cfg: ConfigFile = toml::from_str(doc).unwrap();
        assert_eq!(cfg.settings.default_timeout, 30);
        assert_eq!(cfg.settings.max_sessions, 100);
        assert_eq!(cfg.settings.log_level, "info");
        assert!(cfg.settings.gnmi_default_secret.is_empty());
    }

    #[test]
    fn empty_document_is_valid() {
        let cfg: ConfigFile = toml::from_str("").unwrap();
        assert!(cfg.devices.is_empty());
    }
}
