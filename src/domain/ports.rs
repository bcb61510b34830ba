//! Domain Ports - Core trait definitions for the NFS provisioner
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems (the cluster API, the export servers and the local
//! filesystem). Adapters implement these traits to provide concrete
//! functionality; tests substitute in-memory fakes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Endpoints, NFSVolumeSource, Namespace, PersistentVolume, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Annotations
// =============================================================================

/// Annotation recording who created the volume
pub const ANN_CREATED_BY: &str = "kubernetes.io/createdby";

/// Value of [`ANN_CREATED_BY`]
pub const CREATED_BY: &str = "nfs-dynamic-provisioner";

/// Annotation carrying the supplemental group assigned to the volume
pub const ANN_VOLUME_GID: &str = "pv.beta.kubernetes.io/gid";

/// Annotation carrying the full Ganesha EXPORT block
pub const ANN_EXPORT_BLOCK: &str = "EXPORT_block";

/// Annotation carrying the Ganesha Export_Id
pub const ANN_EXPORT_ID: &str = "Export_Id";

/// Annotation carrying the line added to the kernel exports file
pub const ANN_EXPORTS_LINE: &str = "etcexports_line";

// =============================================================================
// Backend Kind
// =============================================================================

/// Export mechanism used for a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Kernel NFS server: exports file + `exportfs -r`
    Kernel,
    /// NFS Ganesha: config block + D-Bus AddExport
    Ganesha,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Kernel => write!(f, "kernel"),
            BackendKind::Ganesha => write!(f, "ganesha"),
        }
    }
}

// =============================================================================
// Volume Request
// =============================================================================

/// Request to provision a volume, as handed over by the reconcile loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    /// Name of the persistent volume to create
    pub name: String,
    /// Requested capacity in bytes
    pub capacity_bytes: u64,
    /// Requested access modes (e.g. `ReadWriteMany`)
    pub access_modes: Vec<String>,
    /// Reclaim policy (e.g. `Delete`)
    pub reclaim_policy: String,
    /// Storage class parameters; none are supported
    pub parameters: Option<BTreeMap<String, String>>,
    /// Claim selector; not supported
    pub selector: Option<LabelSelector>,
}

impl VolumeRequest {
    /// Create a request with default access mode and reclaim policy
    pub fn new(name: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            name: name.into(),
            capacity_bytes,
            access_modes: vec!["ReadWriteMany".to_string()],
            reclaim_policy: "Delete".to_string(),
            parameters: None,
            selector: None,
        }
    }

    /// Reject requests using features the provisioner does not implement
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(Error::Validation(format!(
                "invalid volume name {:?}",
                self.name
            )));
        }

        if self.parameters.as_ref().is_some_and(|p| !p.is_empty()) {
            return Err(Error::Validation(
                "invalid parameter: no StorageClass parameters are supported".into(),
            ));
        }

        let selector_set = self.selector.as_ref().is_some_and(|s| {
            s.match_labels.as_ref().is_some_and(|l| !l.is_empty())
                || s.match_expressions.as_ref().is_some_and(|e| !e.is_empty())
        });
        if selector_set {
            return Err(Error::Validation(
                "claim.Spec.Selector is not supported".into(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Supplemental Group Ranges
// =============================================================================

/// Inclusive range of supplemental group ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GidRange {
    pub min: i64,
    pub max: i64,
}

impl GidRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Non-empty and representable as a unix gid
    pub fn is_valid(&self) -> bool {
        self.min >= 0 && self.min <= self.max && self.max <= i64::from(u32::MAX)
    }

    pub fn contains(&self, gid: i64) -> bool {
        gid >= self.min && gid <= self.max
    }
}

impl std::fmt::Display for GidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Range used when no policy source yields one
pub const DEFAULT_GID_RANGE: GidRange = GidRange { min: 0, max: 65533 };

// =============================================================================
// Export Record
// =============================================================================

/// The entry an export backend added on behalf of one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Backend that produced the entry
    pub backend: BackendKind,
    /// Ganesha Export_Id; always 0 for the kernel backend
    pub export_id: u32,
    /// Literal text appended to the backend's configuration file
    pub content: String,
}

impl ExportRecord {
    /// Annotations a deletion flow needs to reverse this export
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        match self.backend {
            BackendKind::Ganesha => {
                annotations.insert(ANN_EXPORT_BLOCK.to_string(), self.content.clone());
                annotations.insert(ANN_EXPORT_ID.to_string(), self.export_id.to_string());
            }
            BackendKind::Kernel => {
                annotations.insert(ANN_EXPORTS_LINE.to_string(), self.content.clone());
            }
        }
        annotations
    }

    /// Rebuild a record from persistent volume annotations
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(block) = annotations.get(ANN_EXPORT_BLOCK) {
            let raw_id = annotations.get(ANN_EXPORT_ID).ok_or_else(|| {
                Error::Validation(format!("annotation {} is missing", ANN_EXPORT_ID))
            })?;
            let export_id = raw_id.parse::<u32>().map_err(|e| {
                Error::Validation(format!("annotation {}={}: {}", ANN_EXPORT_ID, raw_id, e))
            })?;
            return Ok(Self {
                backend: BackendKind::Ganesha,
                export_id,
                content: block.clone(),
            });
        }

        if let Some(line) = annotations.get(ANN_EXPORTS_LINE) {
            return Ok(Self {
                backend: BackendKind::Kernel,
                export_id: 0,
                content: line.clone(),
            });
        }

        Err(Error::Validation(format!(
            "neither {} nor {} annotation present",
            ANN_EXPORT_BLOCK, ANN_EXPORTS_LINE
        )))
    }
}

// =============================================================================
// Provisioned Volume
// =============================================================================

/// Result of a successful provision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedVolume {
    /// Address clients mount from
    pub server: String,
    /// Exported directory
    pub path: PathBuf,
    /// Supplemental group owning the directory
    pub gid: u32,
    /// Backend-specific export metadata
    pub export: ExportRecord,
    /// When provisioning completed
    pub provisioned_at: chrono::DateTime<chrono::Utc>,
}

impl ProvisionedVolume {
    /// All annotations to persist on the resulting volume object
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = self.export.to_annotations();
        annotations.insert(ANN_CREATED_BY.to_string(), CREATED_BY.to_string());
        annotations.insert(ANN_VOLUME_GID.to_string(), self.gid.to_string());
        annotations
    }

    /// Assemble the PersistentVolume object for the request this volume satisfies
    pub fn to_persistent_volume(&self, request: &VolumeRequest) -> PersistentVolume {
        let mut capacity = BTreeMap::new();
        capacity.insert(
            "storage".to_string(),
            Quantity(request.capacity_bytes.to_string()),
        );

        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(request.name.clone()),
                labels: Some(BTreeMap::new()),
                annotations: Some(self.annotations()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                persistent_volume_reclaim_policy: Some(request.reclaim_policy.clone()),
                access_modes: Some(request.access_modes.clone()),
                capacity: Some(capacity),
                nfs: Some(NFSVolumeSource {
                    server: self.server.clone(),
                    path: self.path.display().to_string(),
                    read_only: Some(false),
                }),
                ..Default::default()
            }),
            status: None,
        }
    }
}

// =============================================================================
// Cluster Lookup Port
// =============================================================================

/// Pod security policy objects that can constrain supplemental groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// `policy/v1beta1` PodSecurityPolicy
    PodSecurityPolicy,
    /// OpenShift `security.openshift.io/v1` SecurityContextConstraints
    SecurityContextConstraints,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::PodSecurityPolicy => write!(f, "PodSecurityPolicy"),
            PolicyKind::SecurityContextConstraints => write!(f, "SecurityContextConstraints"),
        }
    }
}

/// Port for the read-only cluster metadata the provisioner consults
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Cluster IP of a service (`"None"` for headless services)
    async fn service_cluster_ip(&self, namespace: &str, name: &str) -> Result<Option<String>>;

    /// Endpoints backing a service
    async fn endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints>;

    /// Namespace object
    async fn namespace(&self, name: &str) -> Result<Namespace>;

    /// Raw JSON of a cluster-scoped security policy object
    async fn policy(&self, kind: PolicyKind, name: &str) -> Result<serde_json::Value>;
}

// =============================================================================
// Export Ports
// =============================================================================

/// Port for activating an export in a userspace NFS server
#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Ask the server to load the export matching `expression` from `config_path`
    async fn add_export(&self, config_path: &Path, expression: &str) -> Result<()>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Port for exporting a directory over NFS
#[async_trait]
pub trait ExportBackend: Send + Sync {
    /// Export `path`, returning what was added so it can be reversed later.
    /// On error nothing remains in the backend's configuration.
    async fn export(&self, path: &Path) -> Result<ExportRecord>;

    /// Backend kind
    fn kind(&self) -> BackendKind;
}

// =============================================================================
// Volume Store Port
// =============================================================================

/// Port for the on-disk directories backing volumes
pub trait VolumeStore: Send + Sync {
    /// Create the directory for `name` after checking free space
    fn create(&self, name: &str, capacity_bytes: u64) -> Result<PathBuf>;

    /// Change the directory's group owner
    fn assign_group(&self, path: &Path, gid: u32) -> Result<()>;

    /// Remove the directory and its contents
    fn remove(&self, path: &Path) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterLookupRef = Arc<dyn ClusterLookup>;
pub type ExportTransportRef = Arc<dyn ExportTransport>;
pub type ExportBackendRef = Arc<dyn ExportBackend>;
pub type VolumeStoreRef = Arc<dyn VolumeStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(format!("{}", BackendKind::Kernel), "kernel");
        assert_eq!(format!("{}", BackendKind::Ganesha), "ganesha");
    }

    #[test]
    fn test_request_validation() {
        let request = VolumeRequest::new("pvc-1", 1024);
        assert!(request.validate().is_ok());

        let mut empty_params = VolumeRequest::new("pvc-1", 1024);
        empty_params.parameters = Some(BTreeMap::new());
        empty_params.selector = Some(LabelSelector::default());
        assert!(empty_params.validate().is_ok());

        let mut with_params = VolumeRequest::new("pvc-1", 1024);
        with_params.parameters = Some(BTreeMap::from([("a".to_string(), "b".to_string())]));
        assert_matches!(with_params.validate(), Err(Error::Validation(_)));

        let mut with_selector = VolumeRequest::new("pvc-1", 1024);
        with_selector.selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("tier".to_string(), "gold".to_string())])),
            ..Default::default()
        });
        assert_matches!(with_selector.validate(), Err(Error::Validation(_)));

        assert_matches!(
            VolumeRequest::new("../etc", 1024).validate(),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn test_gid_range() {
        assert!(DEFAULT_GID_RANGE.is_valid());
        assert!(DEFAULT_GID_RANGE.contains(65533));
        assert!(!DEFAULT_GID_RANGE.contains(65534));
        assert!(!GidRange::new(10, 5).is_valid());
        assert!(!GidRange::new(-1, 5).is_valid());
    }

    #[test]
    fn test_export_record_annotations() {
        let ganesha = ExportRecord {
            backend: BackendKind::Ganesha,
            export_id: 7,
            content: "\nEXPORT\n{\n}\n".into(),
        };
        let annotations = ganesha.to_annotations();
        assert_eq!(annotations.get(ANN_EXPORT_ID).unwrap(), "7");
        assert_eq!(ExportRecord::from_annotations(&annotations).unwrap(), ganesha);

        let kernel = ExportRecord {
            backend: BackendKind::Kernel,
            export_id: 0,
            content: "\n/export/pvc-1 *(rw,insecure,root_squash)\n".into(),
        };
        let annotations = kernel.to_annotations();
        assert!(!annotations.contains_key(ANN_EXPORT_ID));
        assert_eq!(ExportRecord::from_annotations(&annotations).unwrap(), kernel);

        assert_matches!(
            ExportRecord::from_annotations(&BTreeMap::new()),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn test_persistent_volume_assembly() {
        let request = VolumeRequest::new("pvc-1", 5 * 1024 * 1024);
        let volume = ProvisionedVolume {
            server: "10.0.0.5".into(),
            path: PathBuf::from("/export/pvc-1"),
            gid: 2001,
            export: ExportRecord {
                backend: BackendKind::Kernel,
                export_id: 0,
                content: "\n/export/pvc-1 *(rw,insecure,root_squash)\n".into(),
            },
            provisioned_at: chrono::Utc::now(),
        };

        let pv = volume.to_persistent_volume(&request);
        assert_eq!(pv.metadata.name.as_deref(), Some("pvc-1"));

        let annotations = pv.metadata.annotations.unwrap();
        assert_eq!(annotations.get(ANN_VOLUME_GID).unwrap(), "2001");
        assert_eq!(annotations.get(ANN_CREATED_BY).unwrap(), CREATED_BY);

        let spec = pv.spec.unwrap();
        let nfs = spec.nfs.unwrap();
        assert_eq!(nfs.server, "10.0.0.5");
        assert_eq!(nfs.path, "/export/pvc-1");
        assert_eq!(nfs.read_only, Some(false));
        assert_eq!(
            spec.capacity.unwrap().get("storage").unwrap().0,
            (5 * 1024 * 1024).to_string()
        );
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Delete"));
    }
}
