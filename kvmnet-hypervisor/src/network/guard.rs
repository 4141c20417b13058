//! Domain usage guard.
//!
//! Before the private network is torn down, every domain the hypervisor
//! knows about (running or not) is checked for an interface attached to it.
//! A stopped VM's definition still reserves the network, so the scan reads
//! persisted definitions rather than runtime state.

use tracing::{debug, warn};

use crate::error::{NetworkError, Result, ResultExt};
use crate::traits::{Connection, DomainHandle};
use crate::xml::DomainDefinition;

/// Fail if any domain other than `machine_name` is attached to `network`.
///
/// The first offending domain is reported in [`NetworkError::NetworkInUse`].
pub fn check_domains<C: Connection>(conn: &C, network: &str, machine_name: &str) -> Result<()> {
    debug!("Trying to list all domains...");
    let domains = conn.list_all_domains().with_context(|| "list all domains")?;
    debug!(count = domains.len(), "Listed all domains");

    if domains.is_empty() {
        warn!("List of domains is 0 length");
    }

    for domain in &domains {
        let name = domain
            .name()
            .with_context(|| "failed to get name of a domain")?;

        if name == machine_name {
            debug!(domain = %name, "Skipping domain as it is us...");
            continue;
        }

        // Interface sources are only available from the full definition.
        let xml = domain
            .xml_desc()
            .with_context(|| format!("failed to get XML of domain '{}'", name))?;

        let definition = DomainDefinition::parse(&xml).map_err(|e| NetworkError::Xml {
            domain: name.clone(),
            reason: e.to_string(),
        })?;

        if definition.uses_network(network) {
            debug!(domain = %name, network = %network, "Domain DOES use network, aborting...");
            return Err(NetworkError::NetworkInUse {
                network: network.to_string(),
                domain: name,
            });
        }
        debug!(domain = %name, network = %network, "Domain does not use network");
    }

    Ok(())
}
