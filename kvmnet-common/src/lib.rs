//! # kvmnet Common
//!
//! Shared utilities for the kvmnet components.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use kvmnet_common::init_logging;
//!
//! // Initialize with level (RUST_LOG takes precedence when set)
//! init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
