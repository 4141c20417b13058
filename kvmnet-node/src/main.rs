//! # kvmnet Node
//!
//! Drives the private network of a local Kubernetes node VM through its
//! lifecycle: created with the VM, reconciled on every start, removed with
//! the VM, and queried for the address the VM leased.
//!
//! ## Usage
//! ```bash
//! kvmnet-node --config /etc/kvmnet/node.yaml create
//! kvmnet-node start
//! kvmnet-node ip --wait 60
//! kvmnet-node delete
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use kvmnet_hypervisor::{Connector, MockConnector, NetworkDriver};

mod cli;
mod config;

use cli::{Args, Command};
use config::{Config, HypervisorBackend, DEFAULT_CONFIG_PATH};

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    if args.log_json {
        kvmnet_common::init_logging_json(&args.log_level)?;
    } else {
        kvmnet_common::init_logging(&args.log_level)?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting kvmnet node");

    let config = load_config(&args)?;

    info!(
        backend = ?config.hypervisor.backend,
        uri = %config.hypervisor.uri,
        machine = %config.machine.name,
        private_network = %config.machine.private_network,
        "Node configured"
    );

    let result = match config.hypervisor.backend {
        HypervisorBackend::Mock => {
            warn!("Development mode: using in-memory mock hypervisor");
            let mock = MockConnector::new();
            // The host-managed network always exists on a real installation.
            mock.add_network(&config.machine.network, true, true);
            run(&NetworkDriver::new(mock, config.driver_config()), &args.command)
        }
        HypervisorBackend::Libvirt => run_libvirt(&config, &args.command),
    };

    if let Err(ref e) = result {
        error!(error = %format!("{:#}", e), "Command failed");
    }
    result
}

/// Load the explicit config file, or the default one if present.
fn load_config(args: &Args) -> Result<Config> {
    resolve_config(args, Path::new(DEFAULT_CONFIG_PATH))
}

/// A missing default file falls back to defaults; an unreadable or
/// malformed one is an error.
fn resolve_config(args: &Args, default_path: &Path) -> Result<Config> {
    match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!(config_path = %path, "Configuration loaded");
            Ok(config.with_cli_overrides(args))
        }
        None if default_path.exists() => {
            let config = Config::load(default_path)?;
            info!(config_path = %default_path.display(), "Configuration loaded from default location");
            Ok(config.with_cli_overrides(args))
        }
        None => {
            info!("No config file found, using CLI arguments and defaults");
            Ok(Config::default().with_cli_overrides(args))
        }
    }
}

#[cfg(feature = "libvirt")]
fn run_libvirt(config: &Config, command: &Command) -> Result<()> {
    use kvmnet_hypervisor::LibvirtConnector;

    run(&NetworkDriver::new(LibvirtConnector::new(), config.driver_config()), command)
}

#[cfg(not(feature = "libvirt"))]
fn run_libvirt(_config: &Config, _command: &Command) -> Result<()> {
    bail!("libvirt support is not compiled in; rebuild with the `libvirt` feature or pass --dev")
}

/// Execute one lifecycle command.
fn run<C: Connector>(driver: &NetworkDriver<C>, command: &Command) -> Result<()> {
    let config = driver.config();

    match command {
        Command::Create => {
            driver.create_network().context("creating private network")?;
            info!(network = %config.private_network, "Private network ready");
        }
        Command::Start => {
            driver.ensure_network().context("ensuring networks are active")?;
            info!("Networks active");
        }
        Command::Delete => {
            driver.delete_network().context("deleting private network")?;
            info!(network = %config.private_network, "Private network removed");
        }
        Command::Ip { wait } => {
            if config.private_mac.is_empty() {
                bail!("the VM's MAC address is required (--mac or machine.mac)");
            }
            let ip = match wait {
                Some(secs) => Some(
                    driver
                        .wait_for_ip(Duration::from_secs(*secs))
                        .context("waiting for IP address")?,
                ),
                None => driver.lookup_ip().context("looking up IP address")?,
            };
            match ip {
                Some(ip) => println!("{}", ip),
                None => bail!("{} has no IP address yet", config.machine_name),
            }
        }
        Command::Status => {
            let states = [
                driver.network_status(&config.network)?,
                driver.network_status(&config.private_network)?,
            ];
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
    }

    Ok(())
}
