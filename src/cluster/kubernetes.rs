//! Kubernetes Cluster Lookup
//!
//! Implements the `ClusterLookup` port against the Kubernetes API.
//! Security policies are fetched as dynamic objects since neither
//! PodSecurityPolicy nor OpenShift's SecurityContextConstraints are part of
//! the typed API for current cluster versions.

use crate::domain::ports::{ClusterLookup, PolicyKind};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use tracing::{debug, instrument};

/// Kubernetes-backed [`ClusterLookup`]
#[derive(Clone)]
pub struct KubeClusterLookup {
    client: Client,
}

impl KubeClusterLookup {
    /// Create a new lookup from a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a lookup from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn policy_resource(kind: PolicyKind) -> ApiResource {
        match kind {
            PolicyKind::PodSecurityPolicy => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk("policy", "v1beta1", "PodSecurityPolicy"),
                "podsecuritypolicies",
            ),
            PolicyKind::SecurityContextConstraints => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk("security.openshift.io", "v1", "SecurityContextConstraints"),
                "securitycontextconstraints",
            ),
        }
    }
}

impl std::fmt::Debug for KubeClusterLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterLookup").finish()
    }
}

#[async_trait]
impl ClusterLookup for KubeClusterLookup {
    #[instrument(skip(self))]
    async fn service_cluster_ip(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api.get(name).await?;
        Ok(service.spec.and_then(|spec| spec.cluster_ip))
    }

    #[instrument(skip(self))]
    async fn endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    #[instrument(skip(self))]
    async fn namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    #[instrument(skip(self))]
    async fn policy(&self, kind: PolicyKind, name: &str) -> Result<serde_json::Value> {
        let resource = Self::policy_resource(kind);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let object = api.get(name).await?;

        debug!("Fetched {} {}", kind, name);
        Ok(serde_json::to_value(object)?)
    }
}
