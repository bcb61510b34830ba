//! Provisioning Module
//!
//! Turns a volume request into an exported directory: resolves the server
//! address, allocates the directory, assigns a supplemental group and hands
//! the directory to the configured export backend.

pub mod allocator;
pub mod gid;
pub mod orchestrator;
pub mod server;

pub use allocator::*;
pub use gid::*;
pub use orchestrator::*;
pub use server::*;
