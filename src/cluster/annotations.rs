//! Downward API annotations file
//!
//! The pod's annotations are projected into a file with one
//! `key="value"` entry per line.

use crate::error::{Error, Result};
use regex::Regex;
use std::path::Path;

/// Annotation naming the PodSecurityPolicy the pod validated against
pub const VALIDATED_PSP_ANNOTATION: &str = "kubernetes.io/psp";

/// Annotation naming the SecurityContextConstraints the pod validated against
pub const VALIDATED_SCC_ANNOTATION: &str = "openshift.io/scc";

/// Default location of the projected annotations file
pub const DEFAULT_ANNOTATIONS_FILE: &str = "/podinfo/annotations";

/// Value of `key` in the annotations file, or an empty string if absent
pub fn pod_annotation(file: &Path, key: &str) -> Result<String> {
    let contents = std::fs::read_to_string(file).map_err(|e| {
        Error::Configuration(format!(
            "error reading downward API annotations file {}: {}",
            file.display(),
            e
        ))
    })?;
    annotation_value(&contents, key)
}

/// Value of `key` in annotations file `contents`, or an empty string if absent
pub fn annotation_value(contents: &str, key: &str) -> Result<String> {
    let pattern = Regex::new(&format!(r#"(?m)^{}="(.*)"$"#, regex::escape(key)))
        .map_err(|e| Error::Internal(format!("annotation pattern for {}: {}", key, e)))?;

    Ok(pattern
        .captures(contents)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default())
}
