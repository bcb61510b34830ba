//! NFS Provisioner
//!
//! Provisions NFS-backed persistent volumes for a Kubernetes cluster. Each
//! volume is a directory under a local export root, owned by a supplemental
//! group drawn from the ranges the provisioner pod is allowed to use, and
//! exported either by the kernel NFS server or by NFS Ganesha.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Provisioner                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌──────────────────┐  ┌─────────────────────┐  │
//! │  │ ServerResolver │  │ LocalVolume      │  │ GidAllocator        │  │
//! │  │ (pod/service)  │  │ Allocator        │  │ (GroupRange-        │  │
//! │  │                │  │ (mkdir/statfs)   │  │  Resolver, once)    │  │
//! │  └───────┬────────┘  └──────────────────┘  └─────────────────────┘  │
//! │          │                                                           │
//! │  ┌───────┴────────┐  ┌─────────────────────────────────────────────┐│
//! │  │ ClusterLookup  │  │             ExportBackend                   ││
//! │  │ (kube-rs)      │  │  ┌──────────────┐     ┌──────────────────┐  ││
//! │  └────────────────┘  │  │   Kernel     │     │    Ganesha       │  ││
//! │                      │  │ exportfs -r  │     │  D-Bus AddExport │  ││
//! │                      │  └──────┬───────┘     └────────┬─────────┘  ││
//! │                      │         └──── ExportLedger ────┘            ││
//! │                      │          (one lock, Export_Id counter)      ││
//! │                      └─────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`provisioner`]: orchestration, server resolution, directories, gids
//! - [`export`]: export backends and the shared export ledger
//! - [`cluster`]: cluster metadata lookups
//! - [`domain`]: core domain types and traits
//! - [`error`]: error types and handling

pub mod cluster;
mod command;
pub mod domain;
pub mod error;
pub mod export;
pub mod provisioner;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cluster::{KubeClusterLookup, StandaloneLookup};

pub use domain::ports::{
    BackendKind, ClusterLookup, ClusterLookupRef, ExportBackend, ExportBackendRef, ExportRecord,
    ExportTransport, ExportTransportRef, GidRange, ProvisionedVolume, VolumeRequest, VolumeStore,
    VolumeStoreRef, DEFAULT_GID_RANGE,
};

pub use error::{Error, ErrorAction, Result};

pub use export::{
    BackendFactory, DbusConfig, DbusSendTransport, ExportConfig, ExportLedger, GaneshaBackend,
    KernelBackend,
};

pub use provisioner::{
    GidAllocator, GroupRangeResolver, LocalVolumeAllocator, Provisioner, ProvisionerConfig,
    ServerConfig, ServerResolver,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
