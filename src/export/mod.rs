//! Export Backends
//!
//! Provides the two ways a volume directory is exported over NFS:
//! - Kernel: a line in the exports file activated by `exportfs -r`
//! - Ganesha: an EXPORT block in the Ganesha config activated over D-Bus
//!
//! Both mutate their configuration file only through the shared
//! [`ExportLedger`].

pub mod ganesha;
pub mod kernel;
pub mod ledger;
pub mod transport;

pub use ganesha::*;
pub use kernel::*;
pub use ledger::*;
pub use transport::*;

use crate::command::argv;
use crate::domain::ports::{BackendKind, ExportBackendRef, ExportTransportRef};
use std::path::PathBuf;
use std::sync::Arc;

/// Combined export configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Kernel NFS exports table
    pub exports_file: PathBuf,
    /// Command re-reading the exports table
    pub reload_command: Vec<String>,
    /// Ganesha configuration file export blocks are appended to
    pub ganesha_config: PathBuf,
    /// D-Bus addressing of the Ganesha export manager
    pub dbus: DbusConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            exports_file: PathBuf::from("/etc/exports"),
            reload_command: argv(&["exportfs", "-r"]),
            ganesha_config: PathBuf::from("/export/vfs.conf"),
            dbus: DbusConfig::default(),
        }
    }
}

/// Factory for creating export backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create the backend of `kind`, talking D-Bus through `dbus-send` for Ganesha
    pub fn create(
        kind: BackendKind,
        config: &ExportConfig,
        ledger: Arc<ExportLedger>,
    ) -> ExportBackendRef {
        let transport = Arc::new(DbusSendTransport::new(config.dbus.clone()));
        Self::with_transport(kind, config, ledger, transport)
    }

    /// Create the backend of `kind` with an explicit Ganesha transport
    pub fn with_transport(
        kind: BackendKind,
        config: &ExportConfig,
        ledger: Arc<ExportLedger>,
        transport: ExportTransportRef,
    ) -> ExportBackendRef {
        match kind {
            BackendKind::Kernel => Arc::new(KernelBackend::new(
                config.exports_file.clone(),
                config.reload_command.clone(),
                ledger,
            )),
            BackendKind::Ganesha => Arc::new(GaneshaBackend::new(
                config.ganesha_config.clone(),
                ledger,
                transport,
            )),
        }
    }
}
