// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Secure-Processing Limits
//!
//! Per-invocation bounds applied to every inbound document. Exceeding any
//! bound is fatal before any cryptographic work begins; the limits exist to
//! stop denial-of-service documents (reference bombs, transform chains) and
//! the indirection attacks that manifests and external references enable.

use serde::{Deserialize, Serialize};

use crate::XmlSecurityError;

/// Default bound on references per SignedInfo or manifest.
pub const DEFAULT_MAX_REFERENCES: usize = 30;
/// Default bound on transforms per reference.
pub const DEFAULT_MAX_TRANSFORMS: usize = 5;

/// Secure-processing bounds for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    pub max_references_per_manifest: usize,
    pub max_transforms_per_reference: usize,
    pub allow_manifests: bool,
    pub allow_external_references: bool,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_references_per_manifest: DEFAULT_MAX_REFERENCES,
            max_transforms_per_reference: DEFAULT_MAX_TRANSFORMS,
            allow_manifests: false,
            allow_external_references: false,
        }
    }
}

impl SecurityLimits {
    /// Validates that the bounds themselves are usable.
    pub fn validate(&self) -> Result<(), XmlSecurityError> {
        if self.max_references_per_manifest == 0 {
            return Err(XmlSecurityError::invalid_config(
                "max_references_per_manifest must be at least 1",
            ));
        }
        if self.max_transforms_per_reference == 0 {
            return Err(XmlSecurityError::invalid_config(
                "max_transforms_per_reference must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_restrictive() {
        let limits = SecurityLimits::default();
        assert!(!limits.allow_manifests);
        assert!(!limits.allow_external_references);
        assert_eq!(limits.max_references_per_manifest, DEFAULT_MAX_REFERENCES);
        assert_eq!(limits.max_transforms_per_reference, DEFAULT_MAX_TRANSFORMS);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let limits = SecurityLimits {
            max_references_per_manifest: 0,
            ..SecurityLimits::default()
        };
        assert!(limits.validate().is_err());
    }
}
