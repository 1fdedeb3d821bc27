// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signature Reference Records
//!
//! Plain-data records for a parsed `<SignedInfo>`: the canonicalization and
//! signature algorithm URIs and the ordered reference list. These are the
//! structures the secure-processing limits are enforced against, before any
//! digest is computed.
//!
//! ## Invariants
//!
//! - A reference with a null URI is rejected: only same-document fragments
//!   (including the empty fragment) and external URIs are streamable.
//! - A reference whose type is the Manifest URI is rejected unless the
//!   caller explicitly allowed manifests.
//! - The declaration index of a reference equals its reported index; the
//!   ordering of `SignedInfoSpec::references` is significant.

use crate::value_objects::xml_names::TYPE_MANIFEST;
use crate::value_objects::SecurityLimits;
use crate::XmlSecurityError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// NCName per XML Namespaces, restricted to the ASCII range ids use in
// practice.
static NCNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9._\-]*$").expect("NCName pattern"));

/// A declared transform: algorithm URI plus inline parameters.
///
/// The only inline parameter with streaming semantics is the
/// InclusiveNamespaces prefix list handed to exclusive canonicalization;
/// an absent child means the empty list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub algorithm_uri: String,
    pub inclusive_namespace_prefixes: Vec<String>,
}

impl TransformSpec {
    pub fn new(algorithm_uri: impl Into<String>) -> Self {
        Self {
            algorithm_uri: algorithm_uri.into(),
            inclusive_namespace_prefixes: Vec::new(),
        }
    }

    pub fn with_inclusive_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_namespace_prefixes = prefixes;
        self
    }
}

/// A parsed `<Reference>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    /// The reference URI. `None` models an absent URI attribute, which is
    /// rejected during validation; `Some("")` is the whole-document
    /// fragment.
    pub uri: Option<String>,
    pub type_uri: Option<String>,
    pub digest_algorithm_uri: String,
    pub expected_digest: Vec<u8>,
    pub transforms: Vec<TransformSpec>,
}

impl ReferenceSpec {
    /// True when the URI is a same-document fragment (`""` or `#id`).
    pub fn is_same_document(&self) -> bool {
        matches!(self.uri.as_deref(), Some(u) if u.is_empty() || u.starts_with('#'))
    }

    /// The fragment part of a same-document URI, without the leading `#`.
    pub fn fragment(&self) -> Option<&str> {
        match self.uri.as_deref() {
            Some("") => Some(""),
            Some(u) if u.starts_with('#') => Some(&u[1..]),
            _ => None,
        }
    }

    /// Hex rendering of the stored digest, for diagnostics.
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.expected_digest)
    }

    /// Validates this reference against the secure-processing rules.
    ///
    /// Runs before any transform chain is built or digest computed.
    pub fn validate(&self, index: usize, limits: &SecurityLimits) -> Result<(), XmlSecurityError> {
        if self.uri.is_none() {
            return Err(XmlSecurityError::security_violation(format!(
                "Reference {} has no URI attribute; null references are not streamable",
                index
            )));
        }
        if let Some(fragment) = self.fragment() {
            if !fragment.is_empty() && !NCNAME.is_match(fragment) {
                return Err(XmlSecurityError::security_violation(format!(
                    "Reference {} fragment '{}' is not a valid id",
                    index, fragment
                )));
            }
        }
        if self.type_uri.as_deref() == Some(TYPE_MANIFEST) && !limits.allow_manifests {
            return Err(XmlSecurityError::security_violation(format!(
                "Reference {} is a Manifest reference and manifests are disabled",
                index
            )));
        }
        if self.transforms.len() > limits.max_transforms_per_reference {
            return Err(XmlSecurityError::limit_exceeded(format!(
                "Reference {} declares {} transforms, at most {} are allowed",
                index,
                self.transforms.len(),
                limits.max_transforms_per_reference
            )));
        }
        if !self.is_same_document() && !limits.allow_external_references {
            return Err(XmlSecurityError::security_violation(format!(
                "Reference {} points at external resource '{}' and external references are disabled",
                index,
                self.uri.as_deref().unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// A parsed `<SignedInfo>`: ordered references plus the two algorithm URIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInfoSpec {
    pub canonicalization_uri: String,
    pub signature_algorithm_uri: String,
    pub references: Vec<ReferenceSpec>,
}

impl SignedInfoSpec {
    /// Validates the whole structure against the secure-processing limits.
    ///
    /// The reference-count bound is checked first so that a document
    /// declaring too many references fails before any per-reference work.
    pub fn validate(&self, limits: &SecurityLimits) -> Result<(), XmlSecurityError> {
        if self.references.is_empty() {
            return Err(XmlSecurityError::missing_element(
                "SignedInfo declares no References",
            ));
        }
        if self.references.len() > limits.max_references_per_manifest {
            return Err(XmlSecurityError::limit_exceeded(format!(
                "SignedInfo declares {} references, at most {} are allowed",
                self.references.len(),
                limits.max_references_per_manifest
            )));
        }
        for (index, reference) in self.references.iter().enumerate() {
            reference.validate(index, limits)?;
        }
        Ok(())
    }
}

/// Outcome of one reference, reported at its declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceOutcome {
    Verified,
    DigestMismatch,
    Unprocessed,
}

/// Per-reference verification status, ordered by declaration index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceStatus {
    pub index: usize,
    pub uri: String,
    pub outcome: ReferenceOutcome,
}
