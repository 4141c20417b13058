//! Type definitions for driver configuration and network state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::retry::RetryPolicy;
use crate::xml::NetworkTemplate;

/// Default libvirt connection URI.
pub const DEFAULT_CONNECTION_URI: &str = "qemu:///system";

/// Name of the host-managed network every installation ships with.
pub const DEFAULT_NETWORK_NAME: &str = "default";

/// Name of the private network owned by kvmnet.
pub const DEFAULT_PRIVATE_NETWORK_NAME: &str = "kvmnet-private";

/// Directory where libvirt's dnsmasq keeps lease and status files.
pub const DEFAULT_LEASE_DIR: &str = "/var/lib/libvirt/dnsmasq";

// =============================================================================
// DRIVER CONFIGURATION
// =============================================================================

/// Configuration for one managed machine and its networks.
///
/// Owned by the caller; the driver only reads it.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Hypervisor connection URI
    pub connection_uri: String,
    /// Host-managed network the VM is also attached to
    pub network: String,
    /// Private network owned by this driver
    pub private_network: String,
    /// Domain name of the managed VM (excluded from usage scans)
    pub machine_name: String,
    /// MAC address of the VM's interface on the private network
    pub private_mac: String,
    /// Definition template for the private network
    pub template: NetworkTemplate,
    /// Directory holding dnsmasq lease/status files
    pub lease_dir: PathBuf,
    /// Timing for bounded polls against the hypervisor
    pub retry: RetryPolicy,
}

impl DriverConfig {
    /// Create a configuration for the given machine with default values.
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            connection_uri: DEFAULT_CONNECTION_URI.to_string(),
            network: DEFAULT_NETWORK_NAME.to_string(),
            private_network: DEFAULT_PRIVATE_NETWORK_NAME.to_string(),
            machine_name: machine_name.into(),
            private_mac: String::new(),
            template: NetworkTemplate::default(),
            lease_dir: PathBuf::from(DEFAULT_LEASE_DIR),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the connection URI.
    pub fn with_connection_uri(mut self, uri: impl Into<String>) -> Self {
        self.connection_uri = uri.into();
        self
    }

    /// Set the host-managed network name.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Set the private network name.
    pub fn with_private_network(mut self, network: impl Into<String>) -> Self {
        self.private_network = network.into();
        self
    }

    /// Set the VM's MAC address on the private network.
    pub fn with_private_mac(mut self, mac: impl Into<String>) -> Self {
        self.private_mac = mac.into();
        self
    }

    /// Set the private network template.
    pub fn with_template(mut self, template: NetworkTemplate) -> Self {
        self.template = template;
        self
    }

    /// Set the lease directory.
    pub fn with_lease_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lease_dir = dir.into();
        self
    }

    /// Set the retry timing.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// NETWORK STATE
// =============================================================================

/// Observed state of a network, as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Network name
    pub name: String,
    /// Whether a definition exists
    pub defined: bool,
    /// Whether the network is running
    pub active: bool,
    /// Whether the network starts with the hypervisor
    pub autostart: bool,
    /// Backing bridge, if the hypervisor reported one
    pub bridge: Option<String>,
}

impl NetworkState {
    /// State of a network that is not defined at all.
    pub fn undefined(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defined: false,
            active: false,
            autostart: false,
            bridge: None,
        }
    }

    /// Whether the network is defined, running and set to autostart.
    pub fn is_ready(&self) -> bool {
        self.defined && self.active && self.autostart
    }
}

// =============================================================================
// LIBRARY VERSION
// =============================================================================

/// Hypervisor library version, decoded from libvirt's packed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LibVersion(pub u32);

impl LibVersion {
    /// First libvirt release (1.2.6) that writes per-bridge status files.
    pub const STATUS_FILE: LibVersion = LibVersion(1_002_006);

    pub fn major(&self) -> u32 {
        self.0 / 1_000_000
    }

    pub fn minor(&self) -> u32 {
        (self.0 / 1_000) % 1_000
    }

    pub fn micro(&self) -> u32 {
        self.0 % 1_000
    }

    /// Whether leases are published as a JSON status snapshot.
    pub fn has_status_file(&self) -> bool {
        *self >= Self::STATUS_FILE
    }
}

impl fmt::Display for LibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.micro())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lib_version_decoding() {
        let version = LibVersion(8_000_000);
        assert_eq!(version.to_string(), "8.0.0");
        assert!(version.has_status_file());

        let legacy = LibVersion(1_002_005);
        assert_eq!(legacy.to_string(), "1.2.5");
        assert!(!legacy.has_status_file());

        assert!(LibVersion::STATUS_FILE.has_status_file());
    }

    #[test]
    fn test_driver_config_defaults() {
        let config = DriverConfig::new("kvmnet")
            .with_private_mac("52:54:00:aa:bb:cc");
        assert_eq!(config.network, "default");
        assert_eq!(config.private_network, "kvmnet-private");
        assert_eq!(config.machine_name, "kvmnet");
        assert_eq!(config.lease_dir, PathBuf::from("/var/lib/libvirt/dnsmasq"));
    }
}
