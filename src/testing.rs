//! In-memory fakes shared by unit tests

use crate::domain::ports::{ClusterLookup, PolicyKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Namespace,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};

/// [`ClusterLookup`] answering from fixed data; anything unset is not found
#[derive(Default)]
pub(crate) struct FakeLookup {
    pub cluster_ip: Option<String>,
    pub endpoints: Option<Endpoints>,
    pub namespaces: HashMap<String, Namespace>,
    pub policies: HashMap<(PolicyKind, String), serde_json::Value>,
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.into(),
        name: name.into(),
    }
}

#[async_trait]
impl ClusterLookup for FakeLookup {
    async fn service_cluster_ip(&self, _namespace: &str, name: &str) -> Result<Option<String>> {
        match &self.cluster_ip {
            Some(ip) => Ok(Some(ip.clone())),
            None => Err(not_found("Service", name)),
        }
    }

    async fn endpoints(&self, _namespace: &str, name: &str) -> Result<Endpoints> {
        self.endpoints
            .clone()
            .ok_or_else(|| not_found("Endpoints", name))
    }

    async fn namespace(&self, name: &str) -> Result<Namespace> {
        self.namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("Namespace", name))
    }

    async fn policy(&self, kind: PolicyKind, name: &str) -> Result<serde_json::Value> {
        self.policies
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(&kind.to_string(), name))
    }
}

/// Namespace carrying the given annotations
pub(crate) fn namespace(name: &str, annotations: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// One endpoint subset with the given addresses and `(port, protocol)` pairs
pub(crate) fn subset(addresses: &[&str], ports: &[(i32, &str)]) -> EndpointSubset {
    EndpointSubset {
        addresses: Some(
            addresses
                .iter()
                .map(|ip| EndpointAddress {
                    ip: ip.to_string(),
                    ..Default::default()
                })
                .collect(),
        ),
        ports: Some(
            ports
                .iter()
                .map(|(port, protocol)| EndpointPort {
                    port: *port,
                    protocol: Some(protocol.to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    }
}

/// The four ports an NFS server service must expose
pub(crate) const NFS_PORTS: &[(i32, &str)] =
    &[(2049, "TCP"), (20048, "TCP"), (111, "TCP"), (111, "UDP")];

pub(crate) fn endpoints(subsets: Vec<EndpointSubset>) -> Endpoints {
    Endpoints {
        subsets: Some(subsets),
        ..Default::default()
    }
}
