//! Domain layer - Core provisioning types and port definitions
//!
//! This module defines the request/result types and the traits (ports) that
//! adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
