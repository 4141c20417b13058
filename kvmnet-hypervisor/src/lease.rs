//! DHCP lease parsing for libvirt's dnsmasq.
//!
//! libvirt publishes leases in two formats depending on its version:
//! - `<bridge>.status`: a JSON array of lease objects (libvirt >= 1.2.6)
//! - `<network>.leases`: dnsmasq's append-only lease log (older releases)
//!
//! In both formats the newest record for a MAC address is authoritative.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{NetworkError, Result};

/// A MAC to IP association handed out by DHCP.
///
/// DHCPv6 entries carry no MAC, so both fields may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseRecord {
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    #[serde(rename = "mac-address")]
    pub mac_address: String,
}

/// One line of the legacy dnsmasq lease log:
/// `<expiry> <mac> <ip> <hostname> <client-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLease {
    pub expiry: String,
    pub mac_address: String,
    pub ip_address: String,
    pub hostname: String,
    pub client_id: String,
}

impl FromStr for LegacyLease {
    type Err = NetworkError;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(' ').collect();
        match fields.as_slice() {
            [expiry, mac, ip, hostname, client_id] => Ok(Self {
                expiry: expiry.to_string(),
                mac_address: mac.to_string(),
                ip_address: ip.to_string(),
                hostname: hostname.to_string(),
                client_id: client_id.to_string(),
            }),
            _ => Err(NetworkError::MalformedLease(line.to_string())),
        }
    }
}

impl From<LegacyLease> for LeaseRecord {
    fn from(lease: LegacyLease) -> Self {
        Self {
            ip_address: lease.ip_address,
            mac_address: lease.mac_address,
        }
    }
}

/// Path of the JSON status snapshot for a bridge.
pub fn status_file(lease_dir: &Path, bridge: &str) -> PathBuf {
    lease_dir.join(format!("{}.status", bridge))
}

/// Path of the legacy lease log for a network.
pub fn leases_file(lease_dir: &Path, network: &str) -> PathBuf {
    lease_dir.join(format!("{}.leases", network))
}

/// Find the address leased to `mac` in a status snapshot.
///
/// An empty snapshot means no leases have been handed out yet.
pub fn parse_status(mac: &str, status: &[u8], path: &Path) -> Result<Option<String>> {
    if status.is_empty() {
        return Ok(None);
    }

    let records: Vec<LeaseRecord> = serde_json::from_slice(status)
        .map_err(|source| NetworkError::StatusParse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(records
        .into_iter()
        .rev()
        .find(|record| !record.mac_address.is_empty() && record.mac_address == mac)
        .map(|record| record.ip_address))
}

/// Find the address leased to `mac` in a legacy lease log.
///
/// Every non-empty line must have exactly five fields; a truncated or
/// corrupted line fails the whole lookup.
pub fn parse_leases(mac: &str, leases: &str) -> Result<Option<String>> {
    let mut address = None;
    for line in leases.split('\n').filter(|line| !line.is_empty()) {
        let lease: LegacyLease = line.parse()?;
        if lease.mac_address == mac {
            address = Some(lease.ip_address);
        }
    }
    Ok(address)
}

/// Read `path` and resolve `mac` from it as a status snapshot.
pub fn lookup_in_status_file(path: &Path, mac: &str) -> Result<Option<String>> {
    let status = std::fs::read(path).map_err(|source| NetworkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_status(mac, &status, path)
}

/// Read `path` and resolve `mac` from it as a legacy lease log.
pub fn lookup_in_leases_file(path: &Path, mac: &str) -> Result<Option<String>> {
    let leases = std::fs::read_to_string(path).map_err(|source| NetworkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_leases(mac, &leases)
}
