//! Private network lifecycle and address discovery.
//!
//! This module provides:
//! - Reconciling, creating and deleting the private network
//! - The domain usage guard that protects shared networks from deletion
//! - VM address lookup from dnsmasq lease data

mod address;
mod driver;
mod guard;

pub use driver::{setup_network, NetworkDriver};
pub use guard::check_domains;
