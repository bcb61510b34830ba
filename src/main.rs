//! NFS Provisioner
//!
//! Provisions a single NFS-backed persistent volume and prints the resulting
//! PersistentVolume object. Claim discovery and retry belong to the
//! controller driving this binary.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nfs_provisioner::{
    BackendKind, ClusterLookupRef, ExportConfig, KubeClusterLookup, Provisioner, ProvisionerConfig,
    ServerConfig, StandaloneLookup, VolumeRequest,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NFS Provisioner - create and export an NFS-backed persistent volume
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the persistent volume to provision
    #[arg(long)]
    name: String,

    /// Requested capacity in bytes
    #[arg(long)]
    capacity: u64,

    /// Access modes of the volume
    #[arg(long = "access-mode", default_value = "ReadWriteMany")]
    access_modes: Vec<String>,

    /// Reclaim policy of the volume
    #[arg(long, default_value = "Delete")]
    reclaim_policy: String,

    /// Directory volume directories are created in
    #[arg(long, env = "EXPORT_DIR", default_value = "/export/")]
    export_dir: PathBuf,

    /// Export through NFS Ganesha instead of the kernel NFS server
    #[arg(long, env = "USE_GANESHA")]
    use_ganesha: bool,

    /// Ganesha configuration file
    #[arg(long, env = "GANESHA_CONFIG", default_value = "/export/vfs.conf")]
    ganesha_config: PathBuf,

    /// Kernel NFS exports table
    #[arg(long, env = "EXPORTS_FILE", default_value = "/etc/exports")]
    exports_file: PathBuf,

    /// Downward API annotations file of the provisioner pod
    #[arg(long, env = "ANNOTATIONS_FILE", default_value = "/podinfo/annotations")]
    annotations_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run without a Kubernetes API server
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting NFS Provisioner");
    info!("  Version: {}", nfs_provisioner::VERSION);
    info!("  Export dir: {}", args.export_dir.display());
    info!("  Ganesha: {}", args.use_ganesha);
    info!("  Standalone mode: {}", args.standalone);

    let lookup: ClusterLookupRef = if args.standalone {
        Arc::new(StandaloneLookup)
    } else {
        match KubeClusterLookup::try_default().await {
            Ok(lookup) => Arc::new(lookup),
            Err(e) => {
                warn!("No Kubernetes client available, running standalone: {}", e);
                Arc::new(StandaloneLookup)
            }
        }
    };

    let config = ProvisionerConfig {
        export_dir: args.export_dir.clone(),
        backend: if args.use_ganesha {
            BackendKind::Ganesha
        } else {
            BackendKind::Kernel
        },
        annotations_file: args.annotations_file.clone(),
        server: ServerConfig::default(),
        export: ExportConfig {
            exports_file: args.exports_file.clone(),
            ganesha_config: args.ganesha_config.clone(),
            ..Default::default()
        },
    };

    let provisioner = Provisioner::from_config(config, lookup).await;

    let request = VolumeRequest {
        access_modes: args.access_modes.clone(),
        reclaim_policy: args.reclaim_policy.clone(),
        ..VolumeRequest::new(args.name.clone(), args.capacity)
    };

    let volume = provisioner
        .provision(&request)
        .await
        .with_context(|| format!("provisioning volume {}", request.name))?;

    let pv = volume.to_persistent_volume(&request);
    print!("{}", serde_yaml::to_string(&pv)?);

    info!("Provisioned {} at {}:{}", request.name, volume.server, volume.path.display());
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

    // Logs go to stderr; stdout carries the PersistentVolume
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
