//! Configuration management for the node tool.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kvmnet_hypervisor::{
    DriverConfig, NetworkTemplate, RetryPolicy, DEFAULT_CONNECTION_URI, DEFAULT_LEASE_DIR,
    DEFAULT_NETWORK_NAME, DEFAULT_PRIVATE_NETWORK_NAME,
};

use crate::cli::Args;

/// Location checked when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kvmnet/node.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hypervisor backend configuration
    pub hypervisor: HypervisorConfig,
    /// The managed machine and its networks
    pub machine: MachineConfig,
    /// Addressing of the private network
    pub template: NetworkTemplate,
    /// dnsmasq lease files
    pub leases: LeasesConfig,
    /// Polling of hypervisor state transitions
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref uri) = args.libvirt_uri {
            self.hypervisor.uri = uri.clone();
        }

        if let Some(ref name) = args.machine_name {
            self.machine.name = name.clone();
        }

        if let Some(ref mac) = args.mac {
            self.machine.mac = mac.clone();
        }

        if let Some(ref network) = args.network {
            self.machine.network = network.clone();
        }

        if let Some(ref network) = args.private_network {
            self.machine.private_network = network.clone();
        }

        if args.dev {
            self.hypervisor.backend = HypervisorBackend::Mock;
        }

        self
    }

    /// Build the driver configuration for the managed machine.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig::new(self.machine.name.clone())
            .with_connection_uri(self.hypervisor.uri.clone())
            .with_network(self.machine.network.clone())
            .with_private_network(self.machine.private_network.clone())
            .with_private_mac(self.machine.mac.clone())
            .with_template(self.template.clone())
            .with_lease_dir(self.leases.dir.clone())
            .with_retry(self.retry.policy())
    }
}

/// Hypervisor backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Backend type
    pub backend: HypervisorBackend,
    /// Libvirt connection URI
    pub uri: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            backend: HypervisorBackend::Libvirt,
            uri: DEFAULT_CONNECTION_URI.to_string(),
        }
    }
}

/// Hypervisor backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorBackend {
    /// In-memory mock for development
    Mock,
    /// Libvirt/QEMU backend
    #[default]
    Libvirt,
}

/// The managed machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Domain name of the VM
    pub name: String,
    /// MAC address on the private network
    pub mac: String,
    /// Host-managed network
    pub network: String,
    /// Private network owned by kvmnet
    pub private_network: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: "kvmnet".to_string(),
            mac: String::new(),
            network: DEFAULT_NETWORK_NAME.to_string(),
            private_network: DEFAULT_PRIVATE_NETWORK_NAME.to_string(),
        }
    }
}

/// dnsmasq lease file location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeasesConfig {
    /// Directory holding `<network>.leases` and `<bridge>.status`
    pub dir: PathBuf,
}

impl Default for LeasesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LEASE_DIR),
        }
    }
}

/// Retry timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Deadline for each retried hypervisor transition, in seconds
    pub timeout_secs: u64,
    /// Pause between attempts, in milliseconds
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            timeout_secs: policy.timeout.as_secs(),
            interval_ms: policy.interval.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_millis(self.interval_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let driver = Config::default().driver_config();
        assert_eq!(driver.connection_uri, "qemu:///system");
        assert_eq!(driver.network, "default");
        assert_eq!(driver.private_network, "kvmnet-private");
        assert_eq!(driver.template, NetworkTemplate::default());
        assert_eq!(driver.retry, RetryPolicy::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(&path, r#"
hypervisor:
  uri: qemu+ssh://admin@host/system
machine:
  name: node-1
  mac: "52:54:00:12:34:56"
template:
  gateway: 10.20.0.1
  dhcp_start: 10.20.0.2
  dhcp_end: 10.20.0.254
retry:
  timeout_secs: 30
"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.hypervisor.backend, HypervisorBackend::Libvirt);

        let driver = config.driver_config();
        assert_eq!(driver.connection_uri, "qemu+ssh://admin@host/system");
        assert_eq!(driver.machine_name, "node-1");
        assert_eq!(driver.private_mac, "52:54:00:12:34:56");
        assert_eq!(driver.template.gateway, "10.20.0.1");
        assert_eq!(driver.template.netmask, "255.255.255.0");
        assert_eq!(driver.retry.timeout, Duration::from_secs(30));
        assert_eq!(driver.retry.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load("/nonexistent/kvmnet/node.yaml").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "kvmnet-node",
            "--dev",
            "--machine-name", "node-2",
            "--private-network", "lab-net",
            "status",
        ]);
        let config = Config::default().with_cli_overrides(&args);
        assert_eq!(config.hypervisor.backend, HypervisorBackend::Mock);
        assert_eq!(config.machine.name, "node-2");
        assert_eq!(config.machine.private_network, "lab-net");
        assert_eq!(config.machine.network, "default");
    }
}
