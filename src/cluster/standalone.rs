//! Standalone Cluster Lookup
//!
//! Used when the provisioner runs outside a cluster. Every lookup reports
//! the object as missing, so group ranges fall back to the default and the
//! server address to the host address.

use crate::domain::ports::{ClusterLookup, PolicyKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Namespace};

/// [`ClusterLookup`] with no cluster behind it
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneLookup;

fn unavailable(kind: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: format!("{} (standalone mode)", name),
    }
}

#[async_trait]
impl ClusterLookup for StandaloneLookup {
    async fn service_cluster_ip(&self, _namespace: &str, name: &str) -> Result<Option<String>> {
        Err(unavailable("Service", name))
    }

    async fn endpoints(&self, _namespace: &str, name: &str) -> Result<Endpoints> {
        Err(unavailable("Endpoints", name))
    }

    async fn namespace(&self, name: &str) -> Result<Namespace> {
        Err(unavailable("Namespace", name))
    }

    async fn policy(&self, kind: PolicyKind, name: &str) -> Result<serde_json::Value> {
        Err(unavailable(&kind.to_string(), name))
    }
}
