//! Read-only device registry.
//!
//! Built once at startup from the config document and shared behind an
//! `Arc`; nothing mutates an entry after that. If dynamic reloading is
//! ever needed, swap the whole registry handle rather than editing
//! entries in place.

use std::collections::HashMap;

use crate::config::ConfigFile;
use crate::error::{GatewayError, GatewayResult};

/// Default backend ports, applied when a config entry omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_TELNET_PORT: u16 = 23;
pub const DEFAULT_NETCONF_PORT: u16 = 830;
pub const DEFAULT_GNMI_PORT: u16 = 57400;

/// A device with all ports resolved. A zero port never leaves the
/// registry: defaulting happens in [`DeviceRegistry::from_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub hostname: String,
    pub ssh_port: u16,
    pub telnet_port: u16,
    pub netconf_port: u16,
    pub gnmi_port: u16,
    pub description: String,
    pub location: String,
    /// Accepted host key fingerprints; empty accepts any.
    pub pinned_sha256: Vec<String>,
}

/// In-memory mapping from device name to backend endpoint.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceEntry>,
}

fn port_or(raw: u16, default: u16) -> u16 {
    if raw == 0 {
        default
    } else {
        raw
    }
}

impl DeviceRegistry {
    /// Build the registry from a parsed config document, resolving
    /// omitted ports to their protocol defaults.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let devices = cfg
            .devices
            .iter()
            .map(|(name, dev)| {
                let entry = DeviceEntry {
                    hostname: dev.hostname.clone(),
                    ssh_port: port_or(dev.ssh_port, DEFAULT_SSH_PORT),
                    telnet_port: port_or(dev.telnet_port, DEFAULT_TELNET_PORT),
                    netconf_port: port_or(dev.netconf_port, DEFAULT_NETCONF_PORT),
                    gnmi_port: port_or(dev.gnmi_port, DEFAULT_GNMI_PORT),
                    description: dev.description.clone(),
                    location: dev.location.clone(),
                    pinned_sha256: dev.pinned_sha256.clone(),
                };
                (name.clone(), entry)
            })
            .collect();
        Self { devices }
    }

    /// Resolve an FQDN to its device entry.
    ///
    /// The device name is the literal first dot-separated label; the
    /// rest of the FQDN is ignored.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty input, `NotFound` when the first
    /// label is not a registered device.
    pub fn resolve(&self, fqdn: &str) -> GatewayResult<(&DeviceEntry, &str)> {
        if fqdn.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "invalid FQDN format: empty".to_string(),
            ));
        }
        let name = fqdn.split('.').next().unwrap_or(fqdn);
        match self.devices.get_key_value(name) {
            Some((key, entry)) => Ok((entry, key.as_str())),
            None => Err(GatewayError::NotFound(name.to_string())),
        }
    }

    /// Device names in sorted order, for banners and listings.
    pub fn device_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.get(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn registry_with(name: &str, dev: DeviceConfig) -> DeviceRegistry {
        let mut cfg = ConfigFile::default();
        cfg.devices.insert(name.to_string(), dev);
        DeviceRegistry::from_config(&cfg)
    }

    fn device(hostname: &str) -> DeviceConfig {
        DeviceConfig {
            hostname: hostname.to_string(),
            ssh_port: 0,
            telnet_port: 0,
            netconf_port: 0,
            gnmi_port: 0,
            description: String::new(),
            location: String::new(),
            pinned_sha256: Vec::new(),
        }
    }

    #[test]
    fn resolve_uses_first_label() {
        let reg = registry_with("srl1", device("10.0.0.1"));
        let (entry, name) = reg.resolve("srl1.customer.example.net").unwrap();
        assert_eq!(name, "srl1");
        assert_eq!(entry.hostname, "10.0.0.1");
    }

    #[test]
    fn resolve_bare_name() {
        let reg = registry_with("srl1", device("10.0.0.1"));
        assert!(reg.resolve("srl1").is_ok());
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let reg = registry_with("srl1", device("10.0.0.1"));
        match reg.resolve("nope.example.net") {
            Err(GatewayError::NotFound(name)) => assert_eq!(name, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn resolve_empty_is_invalid() {
        let reg = registry_with("srl1", device("10.0.0.1"));
        assert!(matches!(
            reg.resolve(""),
            Err(GatewayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn omitted_ports_get_defaults() {
        let reg = registry_with("srl1", device("10.0.0.1"));
        let (entry, _) = reg.resolve("srl1").unwrap();
        assert_eq!(entry.ssh_port, 22);
        assert_eq!(entry.telnet_port, 23);
        assert_eq!(entry.netconf_port, 830);
        assert_eq!(entry.gnmi_port, 57400);
    }

    #[test]
    fn explicit_ports_are_kept() {
        let mut dev = device("10.0.0.1");
        dev.ssh_port = 2022;
        dev.gnmi_port = 6030;
        let reg = registry_with("srl1", dev);
        let (entry, _) = reg.resolve("srl1").unwrap();
        assert_eq!(entry.ssh_port, 2022);
        assert_eq!(entry.gnmi_port, 6030);
        assert_eq!(entry.telnet_port, 23);
    }

    #[test]
    fn zero_port_is_treated_as_omitted() {
        let mut dev = device("10.0.0.1");
        dev.netconf_port = 0;
        let reg = registry_with("srl1", dev);
        let (entry, _) = reg.resolve("srl1").unwrap();
        assert_eq!(entry.netconf_port, 830);
    }

    #[test]
    fn device_names_are_sorted() {
        let mut cfg = ConfigFile::default();
        cfg.devices.insert("zeta".into(), device("h1"));
        cfg.devices.insert("alpha".into(), device("h2"));
        let reg = DeviceRegistry::from_config(&cfg);
        assert_eq!(reg.device_names(), vec!["alpha", "zeta"]);
    }
}
