//! Split-package bootstrap for shopfloor service deployments.
//!
//! A split deployment separates shared/common code from service-specific
//! code into distinct archives. This crate assembles the child-first loader
//! chain over those archives, loads the service's entry unit through the
//! final loader, invokes it, and propagates its exit code. Exit codes
//! 120..=124 are reserved for startup failures so operators can distinguish
//! packaging problems from application bugs.

pub mod bootstrap;
pub mod classpath;
pub mod error;

pub use bootstrap::{BootState, Bootstrap, ENTRY_SYMBOL};
pub use error::{process_exit_code, StartupError};
