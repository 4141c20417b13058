//! Libvirt backend implementation.

use tracing::{debug, info};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::{Error as VirtError, ErrorNumber};
use virt::network::Network;
use virt::sys;

use crate::error::{NetworkError, Result};
use crate::traits::{Connection, Connector, DomainHandle, NetworkHandle};

/// Opens libvirt connections.
///
/// Common URIs:
/// - `qemu:///system` - System-wide QEMU/KVM
/// - `qemu:///session` - User session QEMU
/// - `qemu+ssh://user@host/system` - Remote via SSH
#[derive(Debug, Default, Clone, Copy)]
pub struct LibvirtConnector;

impl LibvirtConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for LibvirtConnector {
    type Connection = LibvirtConnection;

    fn connect(&self, uri: &str) -> Result<LibvirtConnection> {
        debug!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri)).map_err(|e| NetworkError::ConnectionFailed {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        info!(uri = %uri, "Connected to libvirt");
        Ok(LibvirtConnection { connection })
    }
}

/// An open libvirt connection. The underlying handle is closed on drop.
pub struct LibvirtConnection {
    connection: Connect,
}

impl Connection for LibvirtConnection {
    type Network = LibvirtNetwork;
    type Domain = LibvirtDomain;

    fn lib_version(&self) -> Result<u32> {
        self.connection
            .get_lib_version()
            .map_err(|e| NetworkError::hypervisor("getting library version", e))
    }

    fn lookup_network(&self, name: &str) -> Result<LibvirtNetwork> {
        match Network::lookup_by_name(&self.connection, name) {
            Ok(network) => Ok(LibvirtNetwork { name: name.to_string(), network }),
            Err(e) if is_no_network(&e) => Err(NetworkError::NetworkNotFound(name.to_string())),
            Err(e) => Err(NetworkError::hypervisor(format!("looking up network {}", name), e)),
        }
    }

    fn define_network(&self, xml: &str) -> Result<LibvirtNetwork> {
        let network = Network::define_xml(&self.connection, xml)
            .map_err(|e| NetworkError::hypervisor("defining network", e))?;
        let name = network
            .get_name()
            .map_err(|e| NetworkError::hypervisor("getting name of defined network", e))?;
        Ok(LibvirtNetwork { name, network })
    }

    fn list_all_domains(&self) -> Result<Vec<LibvirtDomain>> {
        // Inactive domains still reserve the networks they are attached to.
        let flags = sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE | sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE;

        let domains = self
            .connection
            .list_all_domains(flags)
            .map_err(|e| NetworkError::hypervisor("listing domains", e))?;

        Ok(domains.into_iter().map(|domain| LibvirtDomain { domain }).collect())
    }
}

fn is_no_network(err: &VirtError) -> bool {
    matches!(err.code(), ErrorNumber::NoNetwork)
}

/// Handle onto a libvirt network, freed on drop.
pub struct LibvirtNetwork {
    name: String,
    network: Network,
}

impl LibvirtNetwork {
    fn op(&self, what: &str) -> String {
        format!("{} network {}", what, self.name)
    }
}

impl NetworkHandle for LibvirtNetwork {
    fn is_active(&self) -> Result<bool> {
        self.network
            .is_active()
            .map_err(|e| NetworkError::hypervisor(self.op("checking status of"), e))
    }

    fn create(&self) -> Result<()> {
        self.network
            .create()
            .map(|_| ())
            .map_err(|e| NetworkError::hypervisor(self.op("starting"), e))
    }

    fn destroy(&self) -> Result<()> {
        self.network
            .destroy()
            .map_err(|e| NetworkError::hypervisor(self.op("destroying"), e))
    }

    fn undefine(&self) -> Result<()> {
        self.network
            .undefine()
            .map_err(|e| NetworkError::hypervisor(self.op("undefining"), e))
    }

    fn autostart(&self) -> Result<bool> {
        self.network
            .get_autostart()
            .map_err(|e| NetworkError::hypervisor(self.op("checking autostart of"), e))
    }

    fn set_autostart(&self, autostart: bool) -> Result<()> {
        self.network
            .set_autostart(autostart)
            .map(|_| ())
            .map_err(|e| NetworkError::hypervisor(self.op("setting autostart for"), e))
    }

    fn bridge_name(&self) -> Result<String> {
        self.network
            .get_bridge_name()
            .map_err(|e| NetworkError::hypervisor(self.op("getting bridge of"), e))
    }
}

/// Handle onto a libvirt domain, freed on drop.
pub struct LibvirtDomain {
    domain: Domain,
}

impl DomainHandle for LibvirtDomain {
    fn name(&self) -> Result<String> {
        self.domain
            .get_name()
            .map_err(|e| NetworkError::hypervisor("getting domain name", e))
    }

    fn xml_desc(&self) -> Result<String> {
        self.domain
            .get_xml_desc(sys::VIR_DOMAIN_XML_INACTIVE)
            .map_err(|e| NetworkError::hypervisor("getting domain XML", e))
    }
}
