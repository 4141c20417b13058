//! Lifecycle of the private network backing the managed VM.
//!
//! - [`NetworkDriver::create_network`] runs once, when the VM is created
//! - [`NetworkDriver::ensure_network`] runs on every VM start
//! - [`NetworkDriver::delete_network`] runs once, when the VM is deleted
//!
//! None of the hypervisor calls involved are transactional. Each step checks
//! the live state before changing it, and transitions that may complete
//! asynchronously are polled through [`RetryPolicy`](crate::RetryPolicy).

use tracing::{debug, info, instrument, warn};

use crate::error::{NetworkError, Result, ResultExt};
use crate::network::guard::check_domains;
use crate::retry::Attempt;
use crate::traits::{Connection, Connector, NetworkHandle};
use crate::types::{DriverConfig, NetworkState};

/// Make sure the network called `name` is active and starts with the host.
///
/// The network must already be defined. Autostart is only written when it is
/// unset, and activation is a single attempt; escalation is up to the caller.
pub fn setup_network<C: Connection>(conn: &C, name: &str) -> Result<()> {
    let net = conn
        .lookup_network(name)
        .with_context(|| format!("checking network {}", name))?;

    let autostart = net
        .autostart()
        .with_context(|| format!("checking network {} autostart", name))?;
    if !autostart {
        net.set_autostart(true)
            .with_context(|| format!("setting autostart for network {}", name))?;
    }

    let active = net
        .is_active()
        .with_context(|| format!("checking network status for {}", name))?;
    if !active {
        net.create()
            .with_context(|| format!("starting network {}", name))?;
    }

    Ok(())
}

/// Network lifecycle driver for one machine.
#[derive(Debug)]
pub struct NetworkDriver<C: Connector> {
    connector: C,
    config: DriverConfig,
}

impl<C: Connector> NetworkDriver<C> {
    /// Create a driver for the machine described by `config`.
    pub fn new(connector: C, config: DriverConfig) -> Self {
        Self { connector, config }
    }

    /// The configuration this driver was created with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Open a connection scoped to one top-level operation.
    pub(crate) fn connect(&self) -> Result<C::Connection> {
        self.connector
            .connect(&self.config.connection_uri)
            .with_context(|| "getting libvirt connection")
    }

    /// Ensure both networks are active and set to autostart.
    ///
    /// The host-managed network is only reconciled. If the private network
    /// cannot be brought up it is assumed to be left broken by an earlier
    /// run: it is deleted (unless another domain uses it), recreated and
    /// reconciled once more.
    #[instrument(skip(self), fields(network = %self.config.network, private_network = %self.config.private_network))]
    pub fn ensure_network(&self) -> Result<()> {
        let conn = self.connect()?;
        let private = &self.config.private_network;

        // The host installation is expected to have created this one.
        info!(network = %self.config.network, "Ensuring network is active");
        setup_network(&conn, &self.config.network)?;

        info!(network = %private, "Ensuring network is active");
        if let Err(e) = setup_network(&conn, private) {
            debug!(network = %private, error = %e, "Network is inoperable, will try to recreate it");

            self.delete_network()
                .with_context(|| format!("deleting inoperable network {}", private))?;
            debug!(network = %private, "Successfully deleted network");

            self.create_network()
                .with_context(|| format!("recreating inoperable network {}", private))?;
            debug!(network = %private, "Successfully recreated network");

            setup_network(&conn, private)?;
            debug!(network = %private, "Successfully activated network");
        }

        Ok(())
    }

    /// Define and start the private network unless it already exists.
    ///
    /// Called when the VM is created, never on start.
    #[instrument(skip(self), fields(private_network = %self.config.private_network))]
    pub fn create_network(&self) -> Result<()> {
        let network = &self.config.network;
        let private = &self.config.private_network;

        if private == network {
            return Err(NetworkError::NameCollision(private.clone()));
        }

        let conn = self.connect()?;

        // Owned by the host; looked up, never created here.
        conn.lookup_network(network)
            .with_context(|| format!("network {} doesn't exist", network))?;

        match conn.lookup_network(private) {
            Ok(_) => {
                debug!(network = %private, "Network already exists, nothing to create");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.context(format!("checking network {}", private))),
        }

        let xml = self.config.template.render(private);
        debug!(xml = %xml, "Generated network XML");

        let net = conn
            .define_network(&xml)
            .with_context(|| format!("defining network from xml: {}", xml))?;

        debug!(network = %private, "Trying to create network...");
        let operation = format!("creating network {}", private);
        self.config
            .retry
            .run(&operation, || {
                if let Ok(true) = net.is_active() {
                    return Ok(Attempt::Ready(()));
                }
                if let Err(e) = net.create() {
                    return Ok(Attempt::Retry(e));
                }
                match net.is_active() {
                    Ok(true) => Ok(Attempt::Ready(())),
                    Ok(false) => Ok(Attempt::Retry(NetworkError::hypervisor(
                        format!("checking network status for {}", private),
                        "network is not active yet",
                    ))),
                    Err(e) => Ok(Attempt::Retry(e)),
                }
            })
            .with_context(|| format!("{} from definition {}", operation, xml.trim()))?;

        info!(network = %private, "Network created");
        Ok(())
    }

    /// Stop and undefine the private network.
    ///
    /// Succeeds when the network does not exist. Refuses to touch it while
    /// any other domain is attached to it.
    #[instrument(skip(self), fields(private_network = %self.config.private_network))]
    pub fn delete_network(&self) -> Result<()> {
        let private = &self.config.private_network;
        let conn = self.connect()?;

        // The host-managed network is never deleted.
        debug!(network = %private, "Checking if network exists...");
        let net = match conn.lookup_network(private) {
            Ok(net) => net,
            Err(e) if e.is_not_found() => {
                warn!(network = %private, "Network does not exist. Skipping deletion");
                return Ok(());
            }
            Err(e) => {
                return Err(e.context(format!("failed looking for network {}", private)));
            }
        };
        debug!(network = %private, "Network exists");

        check_domains(&conn, private, &self.config.machine_name)?;

        // Some hypervisors cannot destroy an inactive network.
        debug!(network = %private, "Trying to reactivate network first (if needed)...");
        let reactivated = self.config.retry.run("reactivating network", || {
            match net.is_active() {
                Ok(true) => return Ok(Attempt::Ready(())),
                Ok(false) => {}
                Err(e) => return Ok(Attempt::Retry(e)),
            }
            if let Err(e) = net.create() {
                return Ok(Attempt::Retry(e));
            }
            // confirmed on the next poll
            Ok(Attempt::Retry(NetworkError::hypervisor(
                format!("reactivating network {}", private),
                "needs confirmation",
            )))
        });
        if let Err(e) = reactivated {
            debug!(network = %private, error = %e, "Reactivating network failed, will continue anyway...");
        }

        debug!(network = %private, "Trying to destroy network...");
        self.config
            .retry
            .run("destroying network", || {
                if let Err(e) = net.destroy() {
                    return Ok(Attempt::Retry(e));
                }
                match net.is_active() {
                    Ok(false) => Ok(Attempt::Ready(())),
                    Ok(true) => Ok(Attempt::Retry(NetworkError::hypervisor(
                        format!("destroying network {}", private),
                        "network is still active",
                    ))),
                    Err(e) => Ok(Attempt::Retry(e)),
                }
            })
            .with_context(|| format!("destroying network {}", private))?;

        debug!(network = %private, "Trying to undefine network...");
        self.config
            .retry
            .run("undefining network", || {
                if let Err(e) = net.undefine() {
                    return Ok(Attempt::Retry(e));
                }
                match conn.lookup_network(private) {
                    Err(e) if e.is_not_found() => Ok(Attempt::Ready(())),
                    Err(e) => Ok(Attempt::Retry(e)),
                    Ok(_) => Ok(Attempt::Retry(NetworkError::hypervisor(
                        format!("undefining network {}", private),
                        "network is still defined",
                    ))),
                }
            })
            .with_context(|| format!("undefining network {}", private))?;

        info!(network = %private, "Network deleted");
        Ok(())
    }

    /// Report the state of `name` without changing anything.
    #[instrument(skip(self))]
    pub fn network_status(&self, name: &str) -> Result<NetworkState> {
        let conn = self.connect()?;

        let net = match conn.lookup_network(name) {
            Ok(net) => net,
            Err(e) if e.is_not_found() => return Ok(NetworkState::undefined(name)),
            Err(e) => return Err(e.context(format!("checking network {}", name))),
        };

        let active = net
            .is_active()
            .with_context(|| format!("checking network status for {}", name))?;
        let autostart = net
            .autostart()
            .with_context(|| format!("checking network {} autostart", name))?;
        let bridge = match net.bridge_name() {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                debug!(network = %name, error = %e, "No bridge reported");
                None
            }
        };

        Ok(NetworkState {
            name: name.to_string(),
            defined: true,
            active,
            autostart,
            bridge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockConnector, MockFault};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    const MACHINE: &str = "kvmnet";
    const PRIVATE: &str = "kvmnet-private";

    fn driver(mock: &MockConnector) -> NetworkDriver<MockConnector> {
        let config = DriverConfig::new(MACHINE)
            .with_connection_uri("test:///default")
            .with_retry(RetryPolicy::new(Duration::from_millis(50), Duration::from_millis(5)));
        NetworkDriver::new(mock.clone(), config)
    }

    fn host() -> MockConnector {
        let mock = MockConnector::new();
        mock.add_network("default", true, true);
        mock
    }

    fn mutations_of(mock: &MockConnector, network: &str) -> Vec<MockCall> {
        mock.calls().into_iter().filter(|c| c.network() == network).collect()
    }

    // =========================================================================
    // setup_network
    // =========================================================================

    #[test]
    fn test_setup_network_reconciles_both_facets() {
        let mock = MockConnector::new();
        mock.add_network("lab", false, false);
        let conn = mock.connect("test:///default").unwrap();

        setup_network(&conn, "lab").unwrap();
        assert!(mock.network_state("lab").is_ready());
        assert_eq!(
            mock.calls(),
            vec![
                MockCall::SetAutostart("lab".to_string(), true),
                MockCall::Create("lab".to_string()),
            ]
        );
    }

    #[test]
    fn test_setup_network_missing_is_fatal() {
        let mock = MockConnector::new();
        let conn = mock.connect("test:///default").unwrap();
        let err = setup_network(&conn, "lab").unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("checking network lab"));
    }

    #[test]
    fn test_setup_network_activation_not_retried() {
        let mock = MockConnector::new();
        mock.add_network("lab", false, true);
        mock.inject_fault("lab", MockFault::CreateFails);
        let conn = mock.connect("test:///default").unwrap();

        let err = setup_network(&conn, "lab").unwrap_err();
        assert!(err.to_string().starts_with("starting network lab"));
        assert_eq!(mock.calls(), vec![MockCall::Create("lab".to_string())]);
    }

    // =========================================================================
    // create_network
    // =========================================================================

    #[test]
    fn test_create_network() {
        let mock = host();
        driver(&mock).create_network().unwrap();

        let state = mock.network_state(PRIVATE);
        assert!(state.defined);
        assert!(state.active);
        let xml = mock.network_xml(PRIVATE).unwrap();
        assert!(xml.contains("<name>kvmnet-private</name>"));
        assert!(xml.contains("<range start='192.168.39.2' end='192.168.39.254'/>"));
        assert_eq!(mock.open_connections(), 0);
    }

    #[test]
    fn test_create_network_is_idempotent() {
        let mock = host();
        let driver = driver(&mock);
        driver.create_network().unwrap();
        mock.clear_calls();

        driver.create_network().unwrap();
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_create_network_rejects_name_collision() {
        let mock = host();
        mock.set_unreachable(true);
        let mut config = driver(&mock).config().clone();
        config.private_network = "default".to_string();
        let driver = NetworkDriver::new(mock.clone(), config);

        // Fails before connecting, so the unreachable hypervisor never matters.
        let err = driver.create_network().unwrap_err();
        assert!(matches!(err, NetworkError::NameCollision(ref name) if name == "default"));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_create_network_requires_default_network() {
        let mock = MockConnector::new();
        let err = driver(&mock).create_network().unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("network default doesn't exist"));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_create_network_activation_times_out() {
        let mock = host();
        mock.inject_fault(PRIVATE, MockFault::NeverActivates);

        let err = driver(&mock).create_network().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("creating network kvmnet-private"));
        assert!(message.contains("<dns enable='no'/>"));
        match err {
            NetworkError::Context { source, .. } => {
                assert!(matches!(*source, NetworkError::RetryExhausted { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // =========================================================================
    // delete_network
    // =========================================================================

    #[test]
    fn test_delete_missing_network_succeeds() {
        let mock = host();
        driver(&mock).delete_network().unwrap();
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_delete_network() {
        let mock = host();
        mock.add_network(PRIVATE, true, true);
        mock.add_domain(MACHINE, MockConnector::domain_xml(MACHINE, &["default", PRIVATE]));

        driver(&mock).delete_network().unwrap();
        assert!(!mock.network_state(PRIVATE).defined);
        assert_eq!(
            mutations_of(&mock, PRIVATE),
            vec![
                MockCall::Destroy(PRIVATE.to_string()),
                MockCall::Undefine(PRIVATE.to_string()),
            ]
        );
        assert!(mock.network_state("default").is_ready());
    }

    #[test]
    fn test_delete_inactive_network_reactivates_first() {
        let mock = host();
        mock.add_network(PRIVATE, false, false);

        driver(&mock).delete_network().unwrap();
        assert_eq!(
            mutations_of(&mock, PRIVATE),
            vec![
                MockCall::Create(PRIVATE.to_string()),
                MockCall::Destroy(PRIVATE.to_string()),
                MockCall::Undefine(PRIVATE.to_string()),
            ]
        );
    }

    #[test]
    fn test_delete_blocked_by_other_domain() {
        let mock = host();
        mock.add_network(PRIVATE, true, true);
        mock.add_domain("other", MockConnector::domain_xml("other", &[PRIVATE]));

        let err = driver(&mock).delete_network().unwrap_err();
        assert!(matches!(err, NetworkError::NetworkInUse { ref domain, .. } if domain == "other"));
        assert!(mock.calls().is_empty());
        assert!(mock.network_state(PRIVATE).is_ready());
    }

    #[test]
    fn test_delete_failed_reactivation_fails_destroy() {
        let mock = host();
        mock.add_network(PRIVATE, false, true);
        mock.inject_fault(PRIVATE, MockFault::CreateFails);

        let err = driver(&mock).delete_network().unwrap_err();
        assert!(err.to_string().starts_with("destroying network kvmnet-private"));
        assert!(!mock.calls().contains(&MockCall::Undefine(PRIVATE.to_string())));
        assert!(mock.network_state(PRIVATE).defined);
    }

    #[test]
    fn test_delete_network_that_never_stops() {
        let mock = host();
        mock.add_network(PRIVATE, true, true);
        mock.inject_fault(PRIVATE, MockFault::DestroyIgnored);

        let err = driver(&mock).delete_network().unwrap_err();
        assert!(err.to_string().starts_with("destroying network"));
        assert!(mock.network_state(PRIVATE).defined);
    }

    #[test]
    fn test_delete_network_that_never_undefines() {
        let mock = host();
        mock.add_network(PRIVATE, true, true);
        mock.inject_fault(PRIVATE, MockFault::UndefineIgnored);

        let err = driver(&mock).delete_network().unwrap_err();
        assert!(err.to_string().starts_with("undefining network"));
        assert_eq!(mock.open_connections(), 0);
    }

    // =========================================================================
    // ensure_network
    // =========================================================================

    #[test]
    fn test_ensure_network_is_idempotent() {
        let mock = host();
        let driver = driver(&mock);
        driver.create_network().unwrap();

        driver.ensure_network().unwrap();
        mock.clear_calls();

        driver.ensure_network().unwrap();
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_ensure_network_starts_stopped_networks() {
        let mock = MockConnector::new();
        mock.add_network("default", false, false);
        mock.add_network(PRIVATE, false, true);

        driver(&mock).ensure_network().unwrap();
        assert!(mock.network_state("default").is_ready());
        assert!(mock.network_state(PRIVATE).is_ready());
    }

    #[test]
    fn test_ensure_network_recreates_broken_private_network() {
        let mock = host();
        mock.add_network(PRIVATE, true, false);
        mock.inject_fault(PRIVATE, MockFault::AutostartFails);

        driver(&mock).ensure_network().unwrap();
        assert!(mock.network_state(PRIVATE).is_ready());
        assert_eq!(
            mutations_of(&mock, PRIVATE),
            vec![
                MockCall::SetAutostart(PRIVATE.to_string(), true),
                MockCall::Destroy(PRIVATE.to_string()),
                MockCall::Undefine(PRIVATE.to_string()),
                MockCall::Define(PRIVATE.to_string()),
                MockCall::Create(PRIVATE.to_string()),
                MockCall::SetAutostart(PRIVATE.to_string(), true),
            ]
        );
        assert_eq!(mock.open_connections(), 0);
    }

    #[test]
    fn test_ensure_network_gives_up_when_broken_network_cannot_be_deleted() {
        let mock = host();
        mock.add_network(PRIVATE, false, true);
        mock.inject_fault(PRIVATE, MockFault::CreateFails);

        let err = driver(&mock).ensure_network().unwrap_err();
        assert!(err.to_string().starts_with("deleting inoperable network kvmnet-private"));
        assert!(mock.network_state(PRIVATE).defined);
    }

    #[test]
    fn test_ensure_network_missing_private_network_is_recreated() {
        let mock = host();
        driver(&mock).ensure_network().unwrap();

        assert!(mock.network_state(PRIVATE).is_ready());
        assert_eq!(
            mutations_of(&mock, PRIVATE),
            vec![
                MockCall::Define(PRIVATE.to_string()),
                MockCall::Create(PRIVATE.to_string()),
                MockCall::SetAutostart(PRIVATE.to_string(), true),
            ]
        );
    }

    #[test]
    fn test_ensure_network_refuses_to_recreate_shared_network() {
        let mock = host();
        mock.add_network(PRIVATE, false, true);
        mock.inject_fault(PRIVATE, MockFault::CreateFails);
        mock.add_domain("other", MockConnector::domain_xml("other", &[PRIVATE]));

        let err = driver(&mock).ensure_network().unwrap_err();
        assert!(err.to_string().contains("still in use"));
        assert!(mock.network_state(PRIVATE).defined);
    }

    #[test]
    fn test_ensure_network_missing_default_is_fatal() {
        let mock = MockConnector::new();
        let err = driver(&mock).ensure_network().unwrap_err();
        assert!(err.to_string().starts_with("checking network default"));
    }

    #[test]
    fn test_unreachable_hypervisor() {
        let mock = host();
        mock.set_unreachable(true);
        let err = driver(&mock).ensure_network().unwrap_err();
        assert!(err.to_string().starts_with("getting libvirt connection"));
    }

    // =========================================================================
    // network_status
    // =========================================================================

    #[test]
    fn test_network_status() {
        let mock = host();
        let driver = driver(&mock);
        assert_eq!(driver.network_status(PRIVATE).unwrap(), NetworkState::undefined(PRIVATE));

        let state = driver.network_status("default").unwrap();
        assert!(state.is_ready());
        assert_eq!(state.bridge.as_deref(), Some("virbr1"));
        assert!(mock.calls().is_empty());
    }
}
