//! Cluster Metadata Adapters
//!
//! Read-only access to the cluster objects the provisioner consults:
//! services, endpoints, namespaces and security policies, plus the pod's own
//! annotations projected through the downward API.

pub mod annotations;
pub mod kubernetes;
pub mod standalone;

pub use annotations::*;
pub use kubernetes::*;
pub use standalone::*;
