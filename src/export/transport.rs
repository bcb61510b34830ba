//! Ganesha D-Bus Transport
//!
//! Calls the Ganesha export manager's `AddExport` method on the system bus
//! by running `dbus-send`.

use crate::command;
use crate::domain::ports::ExportTransport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Addressing of the Ganesha export manager on D-Bus
#[derive(Debug, Clone)]
pub struct DbusConfig {
    /// dbus-send binary
    pub program: String,
    /// Bus selection flag
    pub bus: String,
    /// Well-known bus name of the server
    pub destination: String,
    /// Object path of the export manager
    pub object_path: String,
    /// Fully qualified AddExport method
    pub add_export_method: String,
}

impl Default for DbusConfig {
    fn default() -> Self {
        Self {
            program: "dbus-send".to_string(),
            bus: "--system".to_string(),
            destination: "org.ganesha.nfsd".to_string(),
            object_path: "/org/ganesha/nfsd/ExportMgr".to_string(),
            add_export_method: "org.ganesha.nfsd.exportmgr.AddExport".to_string(),
        }
    }
}

// =============================================================================
// dbus-send Transport
// =============================================================================

/// [`ExportTransport`] backed by the `dbus-send` utility
pub struct DbusSendTransport {
    config: DbusConfig,
}

impl DbusSendTransport {
    pub fn new(config: DbusConfig) -> Self {
        Self { config }
    }

    /// argv for an AddExport call
    pub fn add_export_argv(&self, config_path: &Path, expression: &str) -> Vec<String> {
        vec![
            self.config.program.clone(),
            self.config.bus.clone(),
            "--print-reply".to_string(),
            format!("--dest={}", self.config.destination),
            self.config.object_path.clone(),
            self.config.add_export_method.clone(),
            format!("string:{}", config_path.display()),
            format!("string:{}", expression),
        ]
    }
}

#[async_trait]
impl ExportTransport for DbusSendTransport {
    async fn add_export(&self, config_path: &Path, expression: &str) -> Result<()> {
        let argv = self.add_export_argv(config_path, expression);
        let reply = command::run(&argv).await.map_err(|e| Error::ExportBackend {
            backend: "ganesha".into(),
            operation: "AddExport".into(),
            reason: e.to_string(),
        })?;

        debug!("AddExport reply: {}", reply.trim());
        Ok(())
    }

    fn name(&self) -> &str {
        "dbus-send"
    }
}
