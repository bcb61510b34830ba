//! NFS Ganesha Export Backend
//!
//! Exports a directory by appending an EXPORT block to the Ganesha
//! configuration file and asking the running server to load it through its
//! export manager.

use crate::domain::ports::{BackendKind, ExportBackend, ExportRecord, ExportTransportRef};
use crate::error::{Error, Result};
use crate::export::ledger::ExportLedger;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// EXPORT block for `path` with the given Export_Id
pub fn export_block(export_id: u32, path: &str) -> String {
    format!(
        "\nEXPORT\n{{\n\
         \tExport_Id = {id};\n\
         \tPath = {path};\n\
         \tPseudo = {path};\n\
         \tAccess_Type = RW;\n\
         \tSquash = root_id_squash;\n\
         \tSecType = sys;\n\
         \tFilesystem_id = {id}.{id};\n\
         \tFSAL {{\n\t\tName = VFS;\n\t}}\n\
         }}\n",
        id = export_id,
        path = path,
    )
}

/// Export expression the export manager matches blocks against
pub fn export_expression(path: &str) -> String {
    format!("export(path = {})", path)
}

/// Backend for NFS Ganesha
pub struct GaneshaBackend {
    config_file: PathBuf,
    ledger: Arc<ExportLedger>,
    transport: ExportTransportRef,
}

impl GaneshaBackend {
    /// Create a new Ganesha backend
    pub fn new(
        config_file: PathBuf,
        ledger: Arc<ExportLedger>,
        transport: ExportTransportRef,
    ) -> Self {
        Self {
            config_file,
            ledger,
            transport,
        }
    }
}

#[async_trait]
impl ExportBackend for GaneshaBackend {
    async fn export(&self, path: &Path) -> Result<ExportRecord> {
        let path = path.display().to_string();
        let (export_id, block) = self
            .ledger
            .append_with_export_id(&self.config_file, |id| export_block(id, &path))?;

        let expression = export_expression(&path);
        if let Err(e) = self.transport.add_export(&self.config_file, &expression).await {
            if let Err(re) = self.ledger.remove(&self.config_file, &block) {
                error!(
                    "Failed to remove Export_Id {} from {}: {}",
                    export_id,
                    self.config_file.display(),
                    re
                );
            }
            return Err(match e {
                Error::ExportBackend { .. } => e,
                other => Error::ExportBackend {
                    backend: self.kind().to_string(),
                    operation: "AddExport".into(),
                    reason: other.to_string(),
                },
            });
        }

        info!(
            "Exported {} as Export_Id {} via {}",
            path,
            export_id,
            self.transport.name()
        );

        Ok(ExportRecord {
            backend: BackendKind::Ganesha,
            export_id,
            content: block,
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ganesha
    }
}
