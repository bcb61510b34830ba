//! Provisioner - end-to-end volume creation
//!
//! Coordinates server resolution, directory allocation, group assignment and
//! export. Every failure after the directory exists removes it again before
//! the error is returned; the export backends undo their own configuration
//! changes. A failed provision therefore leaves nothing behind and can simply
//! be retried.

use crate::cluster::annotations::DEFAULT_ANNOTATIONS_FILE;
use crate::domain::ports::{
    BackendKind, ClusterLookupRef, ExportBackendRef, ProvisionedVolume, VolumeRequest,
    VolumeStoreRef,
};
use crate::error::{Error, Result};
use crate::export::{BackendFactory, ExportConfig, ExportLedger};
use crate::provisioner::allocator::LocalVolumeAllocator;
use crate::provisioner::gid::{GidAllocator, GroupRangeResolver};
use crate::provisioner::server::{ServerConfig, ServerResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Provisioner Configuration
// =============================================================================

/// Configuration for the provisioner
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Directory volume directories are created in
    pub export_dir: PathBuf,
    /// Export mechanism
    pub backend: BackendKind,
    /// Downward API annotations file of the provisioner pod
    pub annotations_file: PathBuf,
    /// Server address resolution
    pub server: ServerConfig,
    /// Export backend settings
    pub export: ExportConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("/export/"),
            backend: BackendKind::Kernel,
            annotations_file: PathBuf::from(DEFAULT_ANNOTATIONS_FILE),
            server: ServerConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

// =============================================================================
// Provisioner
// =============================================================================

/// Creates and exports NFS-backed volumes
pub struct Provisioner {
    server: ServerResolver,
    store: VolumeStoreRef,
    gids: GidAllocator,
    backend: ExportBackendRef,
}

impl Provisioner {
    /// Assemble a provisioner from its parts
    pub fn new(
        server: ServerResolver,
        store: VolumeStoreRef,
        gids: GidAllocator,
        backend: ExportBackendRef,
    ) -> Self {
        Self {
            server,
            store,
            gids,
            backend,
        }
    }

    /// Build a provisioner from configuration. Supplemental group ranges are
    /// resolved here, once, for the lifetime of the provisioner.
    pub async fn from_config(
        config: ProvisionerConfig,
        lookup: ClusterLookupRef,
    ) -> Self {
        let namespace = std::env::var(&config.server.namespace_env).unwrap_or_default();
        if namespace.is_empty() {
            warn!(
                "Namespace env {} isn't set; namespace supplemental groups unavailable",
                config.server.namespace_env
            );
        }

        let ranges = GroupRangeResolver::new(lookup.clone(), &config.annotations_file)
            .resolve(&namespace)
            .await;

        let backend = BackendFactory::create(config.backend, &config.export, ExportLedger::new());

        info!(
            "Provisioner ready: export dir {}, backend {}, gid ranges {:?}",
            config.export_dir.display(),
            config.backend,
            ranges
        );

        Self::new(
            ServerResolver::new(config.server, lookup),
            Arc::new(LocalVolumeAllocator::new(config.export_dir)),
            GidAllocator::new(ranges),
            backend,
        )
    }

    /// Backend volumes are exported through
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Provision a volume for `request`
    #[instrument(skip(self, request), fields(volume = %request.name))]
    pub async fn provision(&self, request: &VolumeRequest) -> Result<ProvisionedVolume> {
        request.validate()?;

        info!(
            "Provisioning volume {} ({} bytes)",
            request.name, request.capacity_bytes
        );

        let server = self.server.resolve().await?;
        let path = self.store.create(&request.name, request.capacity_bytes)?;

        let gid = match self.gids.pick() {
            Ok(gid) => gid,
            Err(e) => return Err(self.rollback(&path, e)),
        };

        if let Err(e) = self.store.assign_group(&path, gid) {
            return Err(self.rollback(&path, e));
        }

        let export = match self.backend.export(&path).await {
            Ok(export) => export,
            Err(e) => return Err(self.rollback(&path, e)),
        };

        info!(
            "Provisioned volume {} at {}:{} (gid {}, {} export)",
            request.name,
            server,
            path.display(),
            gid,
            export.backend
        );

        Ok(ProvisionedVolume {
            server,
            path,
            gid,
            export,
            provisioned_at: chrono::Utc::now(),
        })
    }

    /// Remove the volume directory, returning the error that caused the rollback
    fn rollback(&self, path: &Path, cause: Error) -> Error {
        warn!("Rolling back {} after error: {}", path.display(), cause);
        if let Err(e) = self.store.remove(path) {
            error!("Failed to remove {} during rollback: {}", path.display(), e);
        }
        cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::argv;
    use crate::domain::ports::{ExportRecord, GidRange, VolumeStore};
    use crate::testing::FakeLookup;
    use assert_matches::assert_matches;
    use nix::unistd::getegid;
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    /// Delegates to a real allocator but refuses group changes
    struct NoChownStore(LocalVolumeAllocator);

    impl VolumeStore for NoChownStore {
        fn create(&self, name: &str, capacity_bytes: u64) -> Result<PathBuf> {
            self.0.create(name, capacity_bytes)
        }

        fn assign_group(&self, path: &Path, _gid: u32) -> Result<()> {
            Err(Error::filesystem(path, "chgrp: Operation not permitted"))
        }

        fn remove(&self, path: &Path) -> Result<()> {
            self.0.remove(path)
        }
    }

    struct Fixture {
        tmp: TempDir,
        export_dir: PathBuf,
        exports_file: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let export_dir = tmp.path().join("export");
            fs::create_dir(&export_dir).unwrap();
            let exports_file = tmp.path().join("exports");
            fs::write(&exports_file, "/srv/existing *(ro)\n").unwrap();
            Self {
                tmp,
                export_dir,
                exports_file,
            }
        }

        fn server(&self, host_command: &[&str]) -> ServerResolver {
            let config = ServerConfig {
                pod_ip_env: "NFS_PROVISIONER_TEST_UNSET_POD_IP".into(),
                service_env: "NFS_PROVISIONER_TEST_UNSET_SERVICE".into(),
                namespace_env: "NFS_PROVISIONER_TEST_UNSET_NAMESPACE".into(),
                host_address_command: argv(host_command),
            };
            ServerResolver::new(config, Arc::new(FakeLookup::default()))
        }

        fn kernel_backend(&self, reload: &[&str]) -> ExportBackendRef {
            let config = ExportConfig {
                exports_file: self.exports_file.clone(),
                reload_command: argv(reload),
                ..Default::default()
            };
            BackendFactory::create(BackendKind::Kernel, &config, ExportLedger::new())
        }

        fn own_group() -> GidAllocator {
            let gid = i64::from(getegid().as_raw());
            GidAllocator::new(vec![GidRange::new(gid, gid)])
        }

        fn provisioner(&self, reload: &[&str]) -> Provisioner {
            Provisioner::new(
                self.server(&["echo", "10.0.0.7"]),
                Arc::new(LocalVolumeAllocator::new(&self.export_dir)),
                Self::own_group(),
                self.kernel_backend(reload),
            )
        }

        fn volume_dirs(&self) -> usize {
            fs::read_dir(&self.export_dir).unwrap().count()
        }
    }

    #[tokio::test]
    async fn test_provision_kernel_volume() {
        let fixture = Fixture::new();
        let provisioner = fixture.provisioner(&["true"]);
        let request = VolumeRequest::new("pvc-1", 1024);

        let volume = provisioner.provision(&request).await.unwrap();

        assert_eq!(volume.server, "10.0.0.7");
        assert_eq!(volume.path, fixture.export_dir.join("pvc-1"));
        assert_eq!(volume.gid, getegid().as_raw());
        assert_eq!(fs::metadata(&volume.path).unwrap().gid(), volume.gid);
        assert_eq!(
            volume.export,
            ExportRecord {
                backend: BackendKind::Kernel,
                export_id: 0,
                content: format!("\n{} *(rw,insecure,root_squash)\n", volume.path.display()),
            }
        );
        assert!(fs::read_to_string(&fixture.exports_file)
            .unwrap()
            .ends_with(&volume.export.content));
        assert_eq!(provisioner.backend_kind(), BackendKind::Kernel);
    }

    #[tokio::test]
    async fn test_invalid_request_creates_nothing() {
        let fixture = Fixture::new();
        let provisioner = fixture.provisioner(&["true"]);
        let mut request = VolumeRequest::new("pvc-1", 1024);
        request.parameters = Some(BTreeMap::from([("gid".to_string(), "none".to_string())]));

        assert_matches!(provisioner.provision(&request).await, Err(Error::Validation(_)));
        assert_eq!(fixture.volume_dirs(), 0);
    }

    #[tokio::test]
    async fn test_server_failure_creates_nothing() {
        let fixture = Fixture::new();
        let provisioner = Provisioner::new(
            fixture.server(&["false"]),
            Arc::new(LocalVolumeAllocator::new(&fixture.export_dir)),
            Fixture::own_group(),
            fixture.kernel_backend(&["true"]),
        );

        assert_matches!(
            provisioner.provision(&VolumeRequest::new("pvc-1", 1024)).await,
            Err(Error::ServerResolution(_))
        );
        assert_eq!(fixture.volume_dirs(), 0);
    }

    #[tokio::test]
    async fn test_chown_failure_removes_directory() {
        let fixture = Fixture::new();
        let provisioner = Provisioner::new(
            fixture.server(&["echo", "10.0.0.7"]),
            Arc::new(NoChownStore(LocalVolumeAllocator::new(&fixture.export_dir))),
            Fixture::own_group(),
            fixture.kernel_backend(&["true"]),
        );

        assert_matches!(
            provisioner.provision(&VolumeRequest::new("pvc-1", 1024)).await,
            Err(Error::Filesystem { .. })
        );
        assert!(!fixture.export_dir.join("pvc-1").exists());
    }

    #[tokio::test]
    async fn test_export_failure_rolls_back_everything() {
        let fixture = Fixture::new();
        let before = fs::read(&fixture.exports_file).unwrap();
        let provisioner = fixture.provisioner(&["false"]);

        assert_matches!(
            provisioner.provision(&VolumeRequest::new("pvc-1", 1024)).await,
            Err(Error::ExportBackend { .. })
        );
        assert_eq!(fixture.volume_dirs(), 0);
        assert_eq!(fs::read(&fixture.exports_file).unwrap(), before);
    }

    #[tokio::test]
    async fn test_empty_ranges_remove_directory() {
        let fixture = Fixture::new();
        let provisioner = Provisioner::new(
            fixture.server(&["echo", "10.0.0.7"]),
            Arc::new(LocalVolumeAllocator::new(&fixture.export_dir)),
            GidAllocator::new(vec![]),
            fixture.kernel_backend(&["true"]),
        );

        assert_matches!(
            provisioner.provision(&VolumeRequest::new("pvc-1", 1024)).await,
            Err(Error::GidRange(_))
        );
        assert_eq!(fixture.volume_dirs(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_capacity() {
        let fixture = Fixture::new();
        let provisioner = fixture.provisioner(&["true"]);

        assert_matches!(
            provisioner
                .provision(&VolumeRequest::new("pvc-huge", u64::MAX))
                .await,
            Err(Error::InsufficientCapacity { .. })
        );
        assert_eq!(fixture.volume_dirs(), 0);
    }

    #[tokio::test]
    async fn test_from_config_uses_default_range() {
        let fixture = Fixture::new();
        let config = ProvisionerConfig {
            export_dir: fixture.export_dir.clone(),
            backend: BackendKind::Ganesha,
            annotations_file: fixture.tmp.path().join("annotations"),
            server: ServerConfig {
                namespace_env: "NFS_PROVISIONER_TEST_UNSET_NAMESPACE".into(),
                ..Default::default()
            },
            export: ExportConfig::default(),
        };

        let provisioner = Provisioner::from_config(config, Arc::new(FakeLookup::default())).await;

        assert_eq!(provisioner.backend_kind(), BackendKind::Ganesha);
        assert_eq!(
            provisioner.gids.ranges(),
            &[crate::domain::ports::DEFAULT_GID_RANGE]
        );
    }
}
