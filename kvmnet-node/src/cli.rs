//! Command-line argument parsing.

use clap::{Parser, Subcommand};

/// kvmnet Node - private network management for a local KVM Kubernetes node
#[derive(Parser, Debug)]
#[command(name = "kvmnet-node")]
#[command(about = "Manage the private libvirt network of a local Kubernetes node VM")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, env = "KVMNET_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Libvirt connection URI (e.g., qemu:///system)
    #[arg(long, env = "KVMNET_LIBVIRT_URI")]
    pub libvirt_uri: Option<String>,

    /// Domain name of the managed VM
    #[arg(long, env = "KVMNET_MACHINE_NAME")]
    pub machine_name: Option<String>,

    /// MAC address of the VM on the private network
    #[arg(long, env = "KVMNET_PRIVATE_MAC")]
    pub mac: Option<String>,

    /// Host-managed network the VM is attached to
    #[arg(long)]
    pub network: Option<String>,

    /// Private network owned by kvmnet
    #[arg(long)]
    pub private_network: Option<String>,

    /// Enable development mode (mock hypervisor)
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Lifecycle operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Define and start the private network (VM creation)
    Create,
    /// Make sure both networks are active and autostarted (VM start)
    Start,
    /// Stop and undefine the private network unless another VM uses it (VM deletion)
    Delete,
    /// Print the VM's address on the private network
    Ip {
        /// Keep polling for up to this many seconds until a lease shows up
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Print the state of both networks as JSON
    Status,
}
