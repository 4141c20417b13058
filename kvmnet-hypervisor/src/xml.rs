//! XML utilities for libvirt network and domain definitions.
//!
//! Network definitions are generated from a fixed template. Domain
//! definitions are only partially deserialized: the usage scan needs the
//! domain name and the network each interface is attached to, and every other
//! element is ignored.

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

/// Addressing for the private network definition.
///
/// The defaults reproduce the definition of previously deployed networks
/// byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkTemplate {
    /// Host-side gateway address
    pub gateway: String,
    /// Netmask for the gateway address
    pub netmask: String,
    /// First address handed out by DHCP
    pub dhcp_start: String,
    /// Last address handed out by DHCP
    pub dhcp_end: String,
}

impl Default for NetworkTemplate {
    fn default() -> Self {
        Self {
            gateway: "192.168.39.1".to_string(),
            netmask: "255.255.255.0".to_string(),
            dhcp_start: "192.168.39.2".to_string(),
            dhcp_end: "192.168.39.254".to_string(),
        }
    }
}

impl NetworkTemplate {
    /// Render the network definition for `name`.
    pub fn render(&self, name: &str) -> String {
        format!(
            r#"
<network>
  <name>{}</name>
  <dns enable='no'/>
  <ip address='{}' netmask='{}'>
    <dhcp>
      <range start='{}' end='{}'/>
    </dhcp>
  </ip>
</network>
"#,
            escape(name),
            escape(self.gateway.as_str()),
            escape(self.netmask.as_str()),
            escape(self.dhcp_start.as_str()),
            escape(self.dhcp_end.as_str()),
        )
    }
}

// =============================================================================
// DOMAIN DEFINITIONS
// =============================================================================

/// The subset of a domain definition the usage scan cares about.
#[derive(Debug, Default, Deserialize)]
pub struct DomainDefinition {
    /// Domain name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    devices: Devices,
}

#[derive(Debug, Default, Deserialize)]
struct Devices {
    #[serde(rename = "interface", default)]
    interfaces: Vec<Interface>,
}

#[derive(Debug, Deserialize)]
struct Interface {
    #[serde(default)]
    source: Option<InterfaceSource>,
}

#[derive(Debug, Deserialize)]
struct InterfaceSource {
    #[serde(rename = "@network", default)]
    network: Option<String>,
}

impl DomainDefinition {
    /// Parse a libvirt domain XML document.
    pub fn parse(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }

    /// Names of the networks the domain's interfaces are attached to.
    ///
    /// Interfaces of other types (bridge, user, direct) are skipped.
    pub fn networks(&self) -> impl Iterator<Item = &str> {
        self.devices
            .interfaces
            .iter()
            .filter_map(|iface| iface.source.as_ref())
            .filter_map(|source| source.network.as_deref())
    }

    /// Whether any interface is attached to `network`.
    pub fn uses_network(&self, network: &str) -> bool {
        self.networks().any(|n| n == network)
    }
}
