//! Mock hypervisor backend for testing and development.

use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{NetworkError, Result};
use crate::traits::{Connection, Connector, DomainHandle, NetworkHandle};
use crate::types::NetworkState;

/// Library version reported by default (libvirt 8.0.0).
pub const MOCK_LIB_VERSION: u32 = 8_000_000;

/// A mutating call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Define(String),
    Create(String),
    Destroy(String),
    Undefine(String),
    SetAutostart(String, bool),
}

impl MockCall {
    /// Network the call targeted.
    pub fn network(&self) -> &str {
        match self {
            Self::Define(name)
            | Self::Create(name)
            | Self::Destroy(name)
            | Self::Undefine(name)
            | Self::SetAutostart(name, _) => name,
        }
    }
}

/// Misbehaviour injected for a single network.
///
/// A fault sticks to the network's current definition and is cleared when
/// the network is successfully undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// `create` always fails.
    CreateFails,
    /// `create` succeeds but the network never reports active.
    NeverActivates,
    /// `destroy` succeeds but the network stays active.
    DestroyIgnored,
    /// `undefine` succeeds but the definition stays.
    UndefineIgnored,
    /// `set_autostart` always fails.
    AutostartFails,
}

#[derive(Debug)]
struct MockNetwork {
    xml: String,
    bridge: String,
    active: bool,
    autostart: bool,
}

#[derive(Debug, Default)]
struct MockState {
    lib_version: u32,
    unreachable: bool,
    networks: BTreeMap<String, MockNetwork>,
    domains: Vec<(String, String)>,
    faults: HashMap<String, MockFault>,
    calls: Vec<MockCall>,
    open_connections: usize,
    next_bridge: u32,
}

impl MockState {
    fn fault(&self, network: &str) -> Option<MockFault> {
        self.faults.get(network).copied()
    }

    fn network_mut(&mut self, name: &str) -> Result<&mut MockNetwork> {
        self.networks
            .get_mut(name)
            .ok_or_else(|| NetworkError::NetworkNotFound(name.to_string()))
    }

    fn allocate_bridge(&mut self) -> String {
        self.next_bridge += 1;
        format!("virbr{}", self.next_bridge)
    }
}

type SharedState = Arc<RwLock<MockState>>;

fn read(state: &SharedState) -> Result<RwLockReadGuard<'_, MockState>> {
    state.read().map_err(|_| NetworkError::Internal("Lock poisoned".to_string()))
}

fn write(state: &SharedState) -> Result<RwLockWriteGuard<'_, MockState>> {
    state.write().map_err(|_| NetworkError::Internal("Lock poisoned".to_string()))
}

/// Mock hypervisor for testing.
///
/// Networks and domains live in memory and are shared by every connection
/// opened from the same connector, so tests can inspect the outcome of an
/// operation after its connection has been dropped. Useful for:
/// - Unit testing the network lifecycle without libvirt
/// - Development mode of `kvmnet-node`
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: SharedState,
}

impl MockConnector {
    /// Create an empty mock hypervisor.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            state: Arc::new(RwLock::new(MockState {
                lib_version: MOCK_LIB_VERSION,
                ..MockState::default()
            })),
        }
    }

    fn inspect(&self) -> RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn modify(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report a different library version.
    pub fn with_lib_version(self, version: u32) -> Self {
        self.modify().lib_version = version;
        self
    }

    /// Make every subsequent `connect` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.modify().unreachable = unreachable;
    }

    /// Define a network directly, bypassing call recording.
    pub fn add_network(&self, name: &str, active: bool, autostart: bool) {
        let mut state = self.modify();
        let bridge = state.allocate_bridge();
        state.networks.insert(name.to_string(), MockNetwork {
            xml: format!("<network><name>{}</name></network>", name),
            bridge,
            active,
            autostart,
        });
    }

    /// Define a domain with the given XML description.
    pub fn add_domain(&self, name: &str, xml: impl Into<String>) {
        self.modify().domains.push((name.to_string(), xml.into()));
    }

    /// Build a minimal domain definition attached to `networks`.
    pub fn domain_xml(name: &str, networks: &[&str]) -> String {
        let interfaces: String = networks
            .iter()
            .map(|network| format!(
                "    <interface type='network'>\n      <source network='{}'/>\n    </interface>\n",
                network
            ))
            .collect();
        format!(
            "<domain type='kvm'>\n  <name>{}</name>\n  <devices>\n{}  </devices>\n</domain>\n",
            name, interfaces
        )
    }

    /// Inject a fault for one network.
    pub fn inject_fault(&self, network: &str, fault: MockFault) {
        self.modify().faults.insert(network.to_string(), fault);
    }

    /// Current state of a network.
    pub fn network_state(&self, name: &str) -> NetworkState {
        match self.inspect().networks.get(name) {
            Some(net) => NetworkState {
                name: name.to_string(),
                defined: true,
                active: net.active,
                autostart: net.autostart,
                bridge: Some(net.bridge.clone()),
            },
            None => NetworkState::undefined(name),
        }
    }

    /// XML a network was defined with.
    pub fn network_xml(&self, name: &str) -> Option<String> {
        self.inspect().networks.get(name).map(|net| net.xml.clone())
    }

    /// Mutating calls observed so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.inspect().calls.clone()
    }

    /// Forget observed calls.
    pub fn clear_calls(&self) {
        self.modify().calls.clear();
    }

    /// Connections opened and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.inspect().open_connections
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, uri: &str) -> Result<MockConnection> {
        let mut state = write(&self.state)?;
        if state.unreachable {
            return Err(NetworkError::ConnectionFailed {
                uri: uri.to_string(),
                reason: "mock hypervisor unreachable".to_string(),
            });
        }
        state.open_connections += 1;
        debug!(uri = %uri, "Opened mock connection");
        Ok(MockConnection { state: Arc::clone(&self.state) })
    }
}

/// Connection to the mock hypervisor.
#[derive(Debug)]
pub struct MockConnection {
    state: SharedState,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.write() {
            state.open_connections = state.open_connections.saturating_sub(1);
        }
    }
}

#[derive(Deserialize)]
struct NetworkName {
    name: String,
}

impl Connection for MockConnection {
    type Network = MockNetworkHandle;
    type Domain = MockDomainHandle;

    fn lib_version(&self) -> Result<u32> {
        Ok(read(&self.state)?.lib_version)
    }

    fn lookup_network(&self, name: &str) -> Result<MockNetworkHandle> {
        if !read(&self.state)?.networks.contains_key(name) {
            return Err(NetworkError::NetworkNotFound(name.to_string()));
        }
        Ok(MockNetworkHandle {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }

    fn define_network(&self, xml: &str) -> Result<MockNetworkHandle> {
        let parsed: NetworkName = from_str(xml)
            .map_err(|e| NetworkError::hypervisor("defining network", e))?;
        let name = parsed.name;

        let mut state = write(&self.state)?;
        state.calls.push(MockCall::Define(name.clone()));
        if state.networks.contains_key(&name) {
            return Err(NetworkError::hypervisor(
                format!("defining network {}", name),
                "network already exists",
            ));
        }
        let bridge = state.allocate_bridge();
        state.networks.insert(name.clone(), MockNetwork {
            xml: xml.to_string(),
            bridge,
            active: false,
            autostart: false,
        });

        Ok(MockNetworkHandle { name, state: Arc::clone(&self.state) })
    }

    fn list_all_domains(&self) -> Result<Vec<MockDomainHandle>> {
        Ok(read(&self.state)?
            .domains
            .iter()
            .map(|(name, xml)| MockDomainHandle { name: name.clone(), xml: xml.clone() })
            .collect())
    }
}

/// Handle onto a mock network.
#[derive(Debug)]
pub struct MockNetworkHandle {
    name: String,
    state: SharedState,
}

impl NetworkHandle for MockNetworkHandle {
    fn is_active(&self) -> Result<bool> {
        let mut state = write(&self.state)?;
        Ok(state.network_mut(&self.name)?.active)
    }

    fn create(&self) -> Result<()> {
        let mut state = write(&self.state)?;
        state.calls.push(MockCall::Create(self.name.clone()));
        let fault = state.fault(&self.name);
        let net = state.network_mut(&self.name)?;
        if net.active {
            return Err(NetworkError::hypervisor(
                format!("starting network {}", self.name),
                "network is already active",
            ));
        }
        match fault {
            Some(MockFault::CreateFails) => Err(NetworkError::hypervisor(
                format!("starting network {}", self.name),
                "failed to create bridge",
            )),
            Some(MockFault::NeverActivates) => Ok(()),
            _ => {
                net.active = true;
                Ok(())
            }
        }
    }

    fn destroy(&self) -> Result<()> {
        let mut state = write(&self.state)?;
        state.calls.push(MockCall::Destroy(self.name.clone()));
        let fault = state.fault(&self.name);
        let net = state.network_mut(&self.name)?;
        if !net.active {
            return Err(NetworkError::hypervisor(
                format!("destroying network {}", self.name),
                "network is not active",
            ));
        }
        if fault != Some(MockFault::DestroyIgnored) {
            net.active = false;
        }
        Ok(())
    }

    fn undefine(&self) -> Result<()> {
        let mut state = write(&self.state)?;
        state.calls.push(MockCall::Undefine(self.name.clone()));
        if !state.networks.contains_key(&self.name) {
            return Err(NetworkError::NetworkNotFound(self.name.clone()));
        }
        if state.fault(&self.name) != Some(MockFault::UndefineIgnored) {
            state.networks.remove(&self.name);
            state.faults.remove(&self.name);
        }
        Ok(())
    }

    fn autostart(&self) -> Result<bool> {
        let mut state = write(&self.state)?;
        Ok(state.network_mut(&self.name)?.autostart)
    }

    fn set_autostart(&self, autostart: bool) -> Result<()> {
        let mut state = write(&self.state)?;
        state.calls.push(MockCall::SetAutostart(self.name.clone(), autostart));
        if state.fault(&self.name) == Some(MockFault::AutostartFails) {
            return Err(NetworkError::hypervisor(
                format!("setting autostart for network {}", self.name),
                "cannot write autostart link",
            ));
        }
        state.network_mut(&self.name)?.autostart = autostart;
        Ok(())
    }

    fn bridge_name(&self) -> Result<String> {
        let mut state = write(&self.state)?;
        Ok(state.network_mut(&self.name)?.bridge.clone())
    }
}

/// Handle onto a mock domain.
#[derive(Debug)]
pub struct MockDomainHandle {
    name: String,
    xml: String,
}

impl DomainHandle for MockDomainHandle {
    fn name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn xml_desc(&self) -> Result<String> {
        Ok(self.xml.clone())
    }
}
