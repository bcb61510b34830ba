//! NFS Server Address Resolution
//!
//! Decides which address provisioned volumes advertise as their NFS server.
//! The pod's own address is the fallback. When a service name is configured
//! the service's cluster IP is used instead, but only after checking that the
//! service fronts exactly this pod on exactly the NFS ports; a misconfigured
//! service is an error rather than a silent fallback, since volumes pointing
//! at a pod address do not survive the pod.

use crate::command::{self, argv};
use crate::domain::ports::ClusterLookupRef;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Endpoints;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Ports an NFS service must expose, as `(port, protocol)`
pub const NFS_SERVICE_PORTS: [(i32, &str); 4] =
    [(2049, "TCP"), (20048, "TCP"), (111, "TCP"), (111, "UDP")];

/// Cluster IP value of a headless service
const CLUSTER_IP_NONE: &str = "None";

// =============================================================================
// Configuration
// =============================================================================

/// Environment variables consulted for the server address
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Variable holding the pod IP
    pub pod_ip_env: String,
    /// Variable holding the service name; resolution via service is skipped if unset
    pub service_env: String,
    /// Variable holding the pod namespace
    pub namespace_env: String,
    /// Command printing the host address when the pod IP is unknown
    pub host_address_command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pod_ip_env: "MY_POD_IP".to_string(),
            service_env: "MY_SERVICE_NAME".to_string(),
            namespace_env: "MY_POD_NAMESPACE".to_string(),
            host_address_command: argv(&["hostname", "-i"]),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// =============================================================================
// Server Resolver
// =============================================================================

/// Resolves the address to put in provisioned volumes
pub struct ServerResolver {
    config: ServerConfig,
    lookup: ClusterLookupRef,
}

impl ServerResolver {
    pub fn new(config: ServerConfig, lookup: ClusterLookupRef) -> Self {
        Self { config, lookup }
    }

    /// Resolve the server address
    pub async fn resolve(&self) -> Result<String> {
        let fallback = self.fallback_address().await?;

        let Some(service) = env_value(&self.config.service_env) else {
            info!(
                "Service env {} isn't set, using pod address {} as server",
                self.config.service_env, fallback
            );
            return Ok(fallback);
        };

        let namespace = env_value(&self.config.namespace_env).ok_or_else(|| {
            Error::ServerResolution(format!(
                "service env {} is set but namespace env {} isn't; no way to get the service cluster IP",
                self.config.service_env, self.config.namespace_env
            ))
        })?;

        let cluster_ip = self
            .lookup
            .service_cluster_ip(&namespace, &service)
            .await
            .map_err(|e| {
                Error::ServerResolution(format!(
                    "error getting service {}/{}: {}",
                    namespace, service, e
                ))
            })?;

        let endpoints = self
            .lookup
            .endpoints(&namespace, &service)
            .await
            .map_err(|e| {
                Error::ServerResolution(format!(
                    "error getting endpoints {}/{}: {}",
                    namespace, service, e
                ))
            })?;

        if !endpoints_match(&endpoints, &fallback) {
            return Err(Error::ServerResolution(format!(
                "service {}/{} is not valid; check that it has for ports {:?} one endpoint, this pod's IP {}",
                namespace, service, NFS_SERVICE_PORTS, fallback
            )));
        }

        match cluster_ip {
            Some(ip) if !ip.is_empty() && ip != CLUSTER_IP_NONE => {
                debug!("Using cluster IP {} of service {}/{}", ip, namespace, service);
                Ok(ip)
            }
            _ => Err(Error::ServerResolution(format!(
                "service {}/{} is valid but it doesn't have a cluster IP",
                namespace, service
            ))),
        }
    }

    /// Pod IP from the environment, else the first host address
    async fn fallback_address(&self) -> Result<String> {
        if let Some(ip) = env_value(&self.config.pod_ip_env) {
            return Ok(ip);
        }

        info!(
            "Pod IP env {} isn't set or provisioner isn't running as a pod",
            self.config.pod_ip_env
        );
        let output = command::run(&self.config.host_address_command)
            .await
            .map_err(|e| Error::ServerResolution(e.to_string()))?;

        output
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::ServerResolution(format!(
                    "{} printed no address",
                    self.config.host_address_command.join(" ")
                ))
            })
    }
}

/// A single subset holding exactly `address` and exactly the NFS ports
pub fn endpoints_match(endpoints: &Endpoints, address: &str) -> bool {
    let subsets = endpoints.subsets.as_deref().unwrap_or_default();
    let [subset] = subsets else {
        return false;
    };

    let addresses = subset.addresses.as_deref().unwrap_or_default();
    if !matches!(addresses, [only] if only.ip == address) {
        return false;
    }

    let expected: BTreeSet<(i32, String)> = NFS_SERVICE_PORTS
        .iter()
        .map(|(port, protocol)| (*port, protocol.to_string()))
        .collect();
    let actual: BTreeSet<(i32, String)> = subset
        .ports
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|p| (p.port, p.protocol.clone().unwrap_or_else(|| "TCP".to_string())))
        .collect();

    expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{endpoints, subset, FakeLookup, NFS_PORTS};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const POD_IP: &str = "10.128.0.12";

    /// Config reading uniquely named variables so tests can run in parallel
    fn config(test: &str, service: Option<&str>, namespace: Option<&str>) -> ServerConfig {
        let prefix = format!("NFS_PROVISIONER_TEST_{}", test.to_uppercase());
        let config = ServerConfig {
            pod_ip_env: format!("{}_POD_IP", prefix),
            service_env: format!("{}_SERVICE", prefix),
            namespace_env: format!("{}_NAMESPACE", prefix),
            host_address_command: argv(&["false"]),
        };
        std::env::set_var(&config.pod_ip_env, POD_IP);
        if let Some(service) = service {
            std::env::set_var(&config.service_env, service);
        }
        if let Some(namespace) = namespace {
            std::env::set_var(&config.namespace_env, namespace);
        }
        config
    }

    fn valid_lookup() -> FakeLookup {
        FakeLookup {
            cluster_ip: Some("172.30.0.50".into()),
            endpoints: Some(endpoints(vec![subset(&[POD_IP], NFS_PORTS)])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pod_ip_without_service() {
        let resolver = ServerResolver::new(config("no_service", None, None), Arc::new(valid_lookup()));
        assert_eq!(resolver.resolve().await.unwrap(), POD_IP);
    }

    #[tokio::test]
    async fn test_host_address_fallback() {
        let config = ServerConfig {
            pod_ip_env: "NFS_PROVISIONER_TEST_UNSET_POD_IP".into(),
            service_env: "NFS_PROVISIONER_TEST_UNSET_SERVICE".into(),
            host_address_command: argv(&["echo", "10.0.0.7 fe80::1"]),
            ..Default::default()
        };
        let resolver = ServerResolver::new(config.clone(), Arc::new(FakeLookup::default()));
        assert_eq!(resolver.resolve().await.unwrap(), "10.0.0.7");

        let failing = ServerConfig {
            host_address_command: argv(&["false"]),
            ..config
        };
        let resolver = ServerResolver::new(failing, Arc::new(FakeLookup::default()));
        assert_matches!(resolver.resolve().await, Err(Error::ServerResolution(_)));
    }

    #[tokio::test]
    async fn test_service_cluster_ip() {
        let resolver = ServerResolver::new(
            config("valid_service", Some("nfs-provisioner"), Some("storage")),
            Arc::new(valid_lookup()),
        );
        assert_eq!(resolver.resolve().await.unwrap(), "172.30.0.50");
    }

    #[tokio::test]
    async fn test_service_requires_namespace() {
        let resolver = ServerResolver::new(
            config("no_namespace", Some("nfs-provisioner"), None),
            Arc::new(valid_lookup()),
        );
        assert_matches!(resolver.resolve().await, Err(Error::ServerResolution(_)));
    }

    #[tokio::test]
    async fn test_headless_service_rejected() {
        let lookup = FakeLookup {
            cluster_ip: Some("None".into()),
            ..valid_lookup()
        };
        let resolver = ServerResolver::new(
            config("headless", Some("nfs-provisioner"), Some("storage")),
            Arc::new(lookup),
        );
        assert_matches!(resolver.resolve().await, Err(Error::ServerResolution(_)));
    }

    #[tokio::test]
    async fn test_two_subsets_rejected() {
        let lookup = FakeLookup {
            endpoints: Some(endpoints(vec![
                subset(&[POD_IP], NFS_PORTS),
                subset(&["10.128.0.13"], NFS_PORTS),
            ])),
            ..valid_lookup()
        };
        let resolver = ServerResolver::new(
            config("two_subsets", Some("nfs-provisioner"), Some("storage")),
            Arc::new(lookup),
        );
        assert_matches!(resolver.resolve().await, Err(Error::ServerResolution(_)));
    }

    #[test]
    fn test_endpoints_match() {
        assert!(endpoints_match(&endpoints(vec![subset(&[POD_IP], NFS_PORTS)]), POD_IP));

        // Missing UDP/111
        let tcp_only = &NFS_PORTS[..3];
        assert!(!endpoints_match(&endpoints(vec![subset(&[POD_IP], tcp_only)]), POD_IP));

        // Extra port
        let mut extra = NFS_PORTS.to_vec();
        extra.push((875, "TCP"));
        assert!(!endpoints_match(&endpoints(vec![subset(&[POD_IP], &extra)]), POD_IP));

        // Another pod's address
        assert!(!endpoints_match(
            &endpoints(vec![subset(&["10.128.0.99"], NFS_PORTS)]),
            POD_IP
        ));

        // Two addresses in the subset
        assert!(!endpoints_match(
            &endpoints(vec![subset(&[POD_IP, "10.128.0.99"], NFS_PORTS)]),
            POD_IP
        ));

        assert!(!endpoints_match(&Endpoints::default(), POD_IP));
    }
}
