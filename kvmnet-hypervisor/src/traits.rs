//! Capability interface onto the hypervisor control plane.
//!
//! The network lifecycle code only talks to the hypervisor through these
//! traits, so the libvirt provider can be swapped for the in-memory mock.
//! Handles release their underlying hypervisor object when dropped.

use crate::error::Result;

/// Opens connections to a hypervisor.
pub trait Connector: Send + Sync {
    /// Connection type produced by this connector.
    type Connection: Connection;

    /// Open a connection to the given URI (e.g. `qemu:///system`).
    fn connect(&self, uri: &str) -> Result<Self::Connection>;
}

/// An open hypervisor connection, closed when dropped.
pub trait Connection {
    /// Network handle type.
    type Network: NetworkHandle;
    /// Domain handle type.
    type Domain: DomainHandle;

    /// Packed library version (`major * 1_000_000 + minor * 1_000 + micro`).
    fn lib_version(&self) -> Result<u32>;

    /// Look up a network by name.
    ///
    /// Must return [`NetworkError::NetworkNotFound`](crate::NetworkError::NetworkNotFound)
    /// when no such network is defined.
    fn lookup_network(&self, name: &str) -> Result<Self::Network>;

    /// Define (persist, but not start) a network from its XML description.
    fn define_network(&self, xml: &str) -> Result<Self::Network>;

    /// List every domain, including inactive ones.
    fn list_all_domains(&self) -> Result<Vec<Self::Domain>>;
}

/// A handle onto a defined network.
pub trait NetworkHandle {
    /// Whether the network is currently running.
    fn is_active(&self) -> Result<bool>;

    /// Start the network.
    fn create(&self) -> Result<()>;

    /// Stop the network.
    fn destroy(&self) -> Result<()>;

    /// Remove the persisted definition.
    fn undefine(&self) -> Result<()>;

    /// Whether the network starts with the hypervisor.
    fn autostart(&self) -> Result<bool>;

    /// Enable or disable autostart.
    fn set_autostart(&self, autostart: bool) -> Result<()>;

    /// Host-side bridge interface backing the network.
    fn bridge_name(&self) -> Result<String>;
}

/// A handle onto a defined domain.
pub trait DomainHandle {
    /// Domain name.
    fn name(&self) -> Result<String>;

    /// The persisted (inactive) XML definition.
    fn xml_desc(&self) -> Result<String>;
}
