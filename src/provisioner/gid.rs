//! Supplemental Group Ranges
//!
//! Resolves the ranges of supplemental group ids this provisioner may hand
//! out and picks a group for each new volume. Sources are consulted in
//! order, first non-empty result wins:
//! 1. the SecurityContextConstraints the pod validated against
//! 2. the PodSecurityPolicy the pod validated against
//! 3. the namespace's preallocated supplemental groups
//! 4. [`DEFAULT_GID_RANGE`]
//!
//! A failed lookup only skips its source.

use crate::cluster::annotations::{
    pod_annotation, VALIDATED_PSP_ANNOTATION, VALIDATED_SCC_ANNOTATION,
};
use crate::domain::ports::{ClusterLookupRef, GidRange, PolicyKind, DEFAULT_GID_RANGE};
use crate::error::{Error, Result};
use rand::Rng;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Namespace annotation holding preallocated supplemental group blocks
pub const NAMESPACE_SUPPLEMENTAL_GROUPS_ANNOTATION: &str =
    "openshift.io/sa.scc.supplemental-groups";

const MUST_RUN_AS: &str = "MustRunAs";

// =============================================================================
// Policy Parsing
// =============================================================================

/// `supplementalGroups` stanza; PSPs name the strategy `rule`, SCCs `type`
#[derive(Debug, Default, Deserialize)]
struct SupplementalGroupsStrategy {
    rule: Option<String>,
    #[serde(rename = "type")]
    strategy_type: Option<String>,
    ranges: Option<Vec<GidRange>>,
}

impl SupplementalGroupsStrategy {
    fn must_run_as_ranges(self) -> Vec<GidRange> {
        let strategy = self.rule.or(self.strategy_type);
        if strategy.as_deref() != Some(MUST_RUN_AS) {
            return Vec::new();
        }
        self.ranges.unwrap_or_default()
    }
}

/// MustRunAs ranges declared by a policy object, empty if it imposes none
pub fn policy_ranges(kind: PolicyKind, policy: &serde_json::Value) -> Result<Vec<GidRange>> {
    let stanza = match kind {
        PolicyKind::PodSecurityPolicy => policy.pointer("/spec/supplementalGroups"),
        PolicyKind::SecurityContextConstraints => policy.get("supplementalGroups"),
    };

    let Some(stanza) = stanza else {
        return Ok(Vec::new());
    };

    let strategy: SupplementalGroupsStrategy = serde_json::from_value(stanza.clone())?;
    Ok(strategy.must_run_as_ranges())
}

/// Parse preallocated group blocks: comma separated `start/size` or `start-end`
pub fn parse_group_blocks(value: &str) -> Result<Vec<GidRange>> {
    let invalid = |block: &str| {
        Error::GidRange(format!("invalid supplemental group block {:?}", block))
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            if let Some((start, size)) = block.split_once('/') {
                let start: i64 = start.trim().parse().map_err(|_| invalid(block))?;
                let size: i64 = size.trim().parse().map_err(|_| invalid(block))?;
                if size <= 0 {
                    return Err(invalid(block));
                }
                let end = start.checked_add(size - 1).ok_or_else(|| invalid(block))?;
                Ok(GidRange::new(start, end))
            } else if let Some((start, end)) = block.split_once('-') {
                let start: i64 = start.trim().parse().map_err(|_| invalid(block))?;
                let end: i64 = end.trim().parse().map_err(|_| invalid(block))?;
                Ok(GidRange::new(start, end))
            } else {
                Err(invalid(block))
            }
        })
        .collect()
}

fn usable(source: &str, ranges: Vec<GidRange>) -> Vec<GidRange> {
    ranges
        .into_iter()
        .filter(|range| {
            let valid = range.is_valid();
            if !valid {
                warn!("Ignoring unusable range {} from {}", range, source);
            }
            valid
        })
        .collect()
}

// =============================================================================
// Group Range Resolver
// =============================================================================

/// Resolves the supplemental group ranges available to the provisioner
pub struct GroupRangeResolver {
    lookup: ClusterLookupRef,
    annotations_file: PathBuf,
}

impl GroupRangeResolver {
    pub fn new(lookup: ClusterLookupRef, annotations_file: impl Into<PathBuf>) -> Self {
        Self {
            lookup,
            annotations_file: annotations_file.into(),
        }
    }

    /// Resolve ranges using the policy names found in the pod's annotations
    pub async fn resolve(&self, namespace: &str) -> Vec<GidRange> {
        let scc = self.annotation(VALIDATED_SCC_ANNOTATION);
        let psp = self.annotation(VALIDATED_PSP_ANNOTATION);
        self.resolve_with(psp.as_deref(), scc.as_deref(), namespace)
            .await
    }

    /// Resolve ranges from explicit policy names
    pub async fn resolve_with(
        &self,
        security_policy: Option<&str>,
        cluster_policy: Option<&str>,
        namespace: &str,
    ) -> Vec<GidRange> {
        let sources = [
            (PolicyKind::SecurityContextConstraints, cluster_policy),
            (PolicyKind::PodSecurityPolicy, security_policy),
        ];

        for (kind, name) in sources {
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                continue;
            };
            let ranges = self
                .lookup
                .policy(kind, name)
                .await
                .and_then(|policy| policy_ranges(kind, &policy));
            match ranges {
                Ok(ranges) => {
                    let ranges = usable(&format!("{} {}", kind, name), ranges);
                    if !ranges.is_empty() {
                        info!("Using supplemental group ranges from {} {}", kind, name);
                        return ranges;
                    }
                    debug!("{} {} imposes no supplemental group ranges", kind, name);
                }
                Err(e) => error!("Error getting provisioner pod's {} {}: {}", kind, name, e),
            }
        }

        match self.namespace_ranges(namespace).await {
            Ok(ranges) => {
                let ranges = usable(&format!("namespace {}", namespace), ranges);
                if !ranges.is_empty() {
                    info!("Using preallocated supplemental groups of namespace {}", namespace);
                    return ranges;
                }
            }
            Err(e) => error!(
                "Error getting preallocated supplemental groups of namespace {}: {}",
                namespace, e
            ),
        }

        info!("Using default supplemental group range {}", DEFAULT_GID_RANGE);
        vec![DEFAULT_GID_RANGE]
    }

    async fn namespace_ranges(&self, namespace: &str) -> Result<Vec<GidRange>> {
        let ns = self.lookup.namespace(namespace).await?;
        let value = ns
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(NAMESPACE_SUPPLEMENTAL_GROUPS_ANNOTATION));

        match value {
            Some(value) => parse_group_blocks(value),
            None => Ok(Vec::new()),
        }
    }

    fn annotation(&self, key: &str) -> Option<String> {
        match pod_annotation(&self.annotations_file, key) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                error!("Error getting pod annotation {}: {}", key, e);
                None
            }
        }
    }
}

// =============================================================================
// Gid Allocator
// =============================================================================

/// Picks supplemental groups from a fixed set of ranges
#[derive(Debug, Clone)]
pub struct GidAllocator {
    ranges: Arc<[GidRange]>,
}

impl GidAllocator {
    pub fn new(ranges: Vec<GidRange>) -> Self {
        Self {
            ranges: ranges.into(),
        }
    }

    pub fn ranges(&self) -> &[GidRange] {
        &self.ranges
    }

    /// Pick a random range, then a random gid within it
    pub fn pick(&self) -> Result<u32> {
        self.pick_with(&mut rand::rng())
    }

    /// [`pick`](Self::pick) with a caller-supplied random source
    pub fn pick_with<R: Rng>(&self, rng: &mut R) -> Result<u32> {
        if self.ranges.is_empty() {
            return Err(Error::GidRange(
                "provisioner has empty ranges, can't generate supplemental group".into(),
            ));
        }

        let range = self.ranges[rng.random_range(0..self.ranges.len())];
        if !range.is_valid() {
            return Err(Error::GidRange(format!("unusable range {}", range)));
        }

        let gid = rng.random_range(range.min..=range.max);
        u32::try_from(gid).map_err(|_| Error::GidRange(format!("gid {} out of range", gid)))
    }
}
