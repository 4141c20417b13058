//! # kvmnet Hypervisor
//!
//! Lifecycle of the private libvirt network a local Kubernetes node VM
//! depends on, and discovery of the address the VM leased on it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             NetworkDriver               │
//! │ (create, ensure, delete, lookup_ip)     │
//! └─────────────────────┬───────────────────┘
//!                       │ Connector / Connection traits
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │ LibvirtConnector  │     │   MockConnector   │
//! │   (via libvirt)   │     │    (in memory)    │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kvmnet_hypervisor::{DriverConfig, MockConnector, NetworkDriver};
//!
//! let hypervisor = MockConnector::new();
//! hypervisor.add_network("default", true, true);
//!
//! let config = DriverConfig::new("kvmnet").with_private_mac("52:54:00:12:34:56");
//! let driver = NetworkDriver::new(hypervisor, config);
//!
//! driver.create_network().unwrap();
//! driver.ensure_network().unwrap();
//! driver.delete_network().unwrap();
//! ```

pub mod error;
pub mod lease;
pub mod libvirt;
pub mod mock;
pub mod network;
pub mod retry;
pub mod traits;
pub mod types;
pub mod xml;

pub use error::{NetworkError, Result, ResultExt};
pub use lease::{LeaseRecord, LegacyLease};
pub use mock::{MockCall, MockConnector, MockFault};
pub use network::{check_domains, setup_network, NetworkDriver};
pub use retry::{Attempt, RetryPolicy};
pub use traits::{Connection, Connector, DomainHandle, NetworkHandle};
pub use types::*;
pub use xml::{DomainDefinition, NetworkTemplate};

// Re-export libvirt backend when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtConnector;
