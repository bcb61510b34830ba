//! Kernel NFS Export Backend
//!
//! Exports a directory by appending a line to the kernel exports table and
//! asking the kernel server to re-read it.

use crate::command;
use crate::domain::ports::{BackendKind, ExportBackend, ExportRecord};
use crate::error::{Error, Result};
use crate::export::ledger::ExportLedger;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Export options applied to every kernel export
pub const KERNEL_EXPORT_OPTIONS: &str = "*(rw,insecure,root_squash)";

/// Export line for `path`, surrounded by newlines
pub fn export_line(path: &Path) -> String {
    format!("\n{} {}\n", path.display(), KERNEL_EXPORT_OPTIONS)
}

/// Backend for the in-kernel NFS server
pub struct KernelBackend {
    exports_file: PathBuf,
    reload_command: Vec<String>,
    ledger: Arc<ExportLedger>,
}

impl KernelBackend {
    /// Create a new kernel backend
    pub fn new(exports_file: PathBuf, reload_command: Vec<String>, ledger: Arc<ExportLedger>) -> Self {
        Self {
            exports_file,
            reload_command,
            ledger,
        }
    }
}

#[async_trait]
impl ExportBackend for KernelBackend {
    async fn export(&self, path: &Path) -> Result<ExportRecord> {
        let line = export_line(path);
        self.ledger.append(&self.exports_file, &line)?;

        if let Err(e) = command::run(&self.reload_command).await {
            if let Err(re) = self.ledger.remove(&self.exports_file, &line) {
                error!(
                    "Failed to remove export line for {} from {}: {}",
                    path.display(),
                    self.exports_file.display(),
                    re
                );
            }
            return Err(Error::ExportBackend {
                backend: self.kind().to_string(),
                operation: "reload".into(),
                reason: e.to_string(),
            });
        }

        info!("Exported {} via {}", path.display(), self.exports_file.display());

        Ok(ExportRecord {
            backend: BackendKind::Kernel,
            export_id: 0,
            content: line,
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Kernel
    }
}
