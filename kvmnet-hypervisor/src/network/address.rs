//! Address discovery for the managed VM.
//!
//! libvirt 1.2.6 and later publish leases as a JSON status file named after
//! the network's bridge; older releases only leave dnsmasq's lease log,
//! named after the network itself.

use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{NetworkError, Result, ResultExt};
use crate::lease::{leases_file, lookup_in_leases_file, lookup_in_status_file, status_file};
use crate::network::driver::NetworkDriver;
use crate::retry::Attempt;
use crate::traits::{Connection, Connector, NetworkHandle};
use crate::types::LibVersion;

impl<C: Connector> NetworkDriver<C> {
    /// Current address of the VM on the private network.
    ///
    /// Returns `Ok(None)` while the VM has not leased an address yet.
    #[instrument(skip(self), fields(private_network = %self.config().private_network, mac = %self.config().private_mac))]
    pub fn lookup_ip(&self) -> Result<Option<String>> {
        let config = self.config();
        let conn = self.connect()?;

        let version = LibVersion(conn.lib_version().with_context(|| "getting libversion")?);
        debug!(version = %version, "Hypervisor library version");

        if !version.has_status_file() {
            let path = leases_file(&config.lease_dir, &config.private_network);
            debug!(path = %path.display(), "Reading legacy leases file");
            return lookup_in_leases_file(&path, &config.private_mac)
                .with_context(|| "reading leases file");
        }

        let net = conn
            .lookup_network(&config.private_network)
            .with_context(|| "looking up network by name")?;
        let bridge = net.bridge_name().map_err(|e| {
            warn!(error = %e, "Failed to get network bridge");
            e.context(format!("getting bridge of network {}", config.private_network))
        })?;

        let path = status_file(&config.lease_dir, &bridge);
        debug!(path = %path.display(), "Reading status file");
        lookup_in_status_file(&path, &config.private_mac).with_context(|| "reading status file")
    }

    /// Poll [`lookup_ip`](Self::lookup_ip) until an address shows up.
    ///
    /// A lease or status file that does not exist yet is treated like an
    /// empty one; every other failure stops the wait immediately.
    #[instrument(skip(self))]
    pub fn wait_for_ip(&self, timeout: Duration) -> Result<String> {
        let policy = self.config().retry.with_timeout(timeout);
        policy.run("waiting for IP address", || match self.lookup_ip() {
            Ok(Some(ip)) => Ok(Attempt::Ready(ip)),
            Ok(None) => Ok(Attempt::Retry(NetworkError::hypervisor(
                format!("looking up IP of {}", self.config().machine_name),
                "no lease yet",
            ))),
            Err(e) if is_missing_file(&e) => Ok(Attempt::Retry(e)),
            Err(e) => Err(e),
        })
    }
}

fn is_missing_file(err: &NetworkError) -> bool {
    match err {
        NetworkError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
        NetworkError::Context { source, .. } => is_missing_file(source),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use crate::retry::RetryPolicy;
    use crate::types::DriverConfig;
    use std::fs;
    use std::path::Path;

    const MAC: &str = "52:54:00:aa:bb:cc";
    const PRIVATE: &str = "kvmnet-private";

    fn driver(mock: &MockConnector, lease_dir: &Path) -> NetworkDriver<MockConnector> {
        let config = DriverConfig::new("kvmnet")
            .with_connection_uri("test:///default")
            .with_private_mac(MAC)
            .with_lease_dir(lease_dir)
            .with_retry(RetryPolicy::new(Duration::from_millis(50), Duration::from_millis(5)));
        NetworkDriver::new(mock.clone(), config)
    }

    #[test]
    fn test_lookup_ip_from_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new();
        mock.add_network(PRIVATE, true, true);
        let bridge = mock.network_state(PRIVATE).bridge.unwrap();

        let driver = driver(&mock, dir.path());
        let path = dir.path().join(format!("{}.status", bridge));

        fs::write(&path, "").unwrap();
        assert_eq!(driver.lookup_ip().unwrap(), None);

        fs::write(&path, format!(r#"[{{"ip-address":"192.168.39.17","mac-address":"{}"}}]"#, MAC)).unwrap();
        assert_eq!(driver.lookup_ip().unwrap(), Some("192.168.39.17".to_string()));
        assert_eq!(mock.open_connections(), 0);
    }

    #[test]
    fn test_lookup_ip_from_legacy_leases() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new().with_lib_version(1_002_005);
        let driver = driver(&mock, dir.path());

        fs::write(
            dir.path().join("kvmnet-private.leases"),
            format!("1700000000 {} 192.168.39.20 kvmnet *\n", MAC),
        )
        .unwrap();
        assert_eq!(driver.lookup_ip().unwrap(), Some("192.168.39.20".to_string()));
    }

    #[test]
    fn test_lookup_ip_malformed_leases() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new().with_lib_version(1_002_005);
        fs::write(dir.path().join("kvmnet-private.leases"), "1700000000 truncated\n").unwrap();

        let err = driver(&mock, dir.path()).lookup_ip().unwrap_err();
        assert!(err.to_string().contains("Malformed leases entry"));
    }

    #[test]
    fn test_lookup_ip_missing_network() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new();
        let err = driver(&mock, dir.path()).lookup_ip().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_wait_for_ip_times_out_without_lease() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new();
        mock.add_network(PRIVATE, true, true);

        let err = driver(&mock, dir.path())
            .wait_for_ip(Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, NetworkError::RetryExhausted { .. }));
    }

    #[test]
    fn test_wait_for_ip_returns_address() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new();
        mock.add_network(PRIVATE, true, true);
        let bridge = mock.network_state(PRIVATE).bridge.unwrap();
        fs::write(
            dir.path().join(format!("{}.status", bridge)),
            format!(r#"[{{"ip-address":"192.168.39.30","mac-address":"{}"}}]"#, MAC),
        )
        .unwrap();

        let ip = driver(&mock, dir.path()).wait_for_ip(Duration::from_secs(1)).unwrap();
        assert_eq!(ip, "192.168.39.30");
    }

    #[test]
    fn test_wait_for_ip_stops_on_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockConnector::new();
        let err = driver(&mock, dir.path())
            .wait_for_ip(Duration::from_secs(5))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
