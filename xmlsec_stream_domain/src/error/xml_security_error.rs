// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the streaming XML
//! security domain. Failures are categorized so that callers can distinguish
//! configuration mistakes, secure-processing violations, and cryptographic
//! verification failures without parsing message strings.
//!
//! ## Error Categories
//!
//! ### Configuration Errors
//! - **InvalidConfiguration**: malformed or contradictory property sets
//! - **UnsupportedAlgorithm**: an algorithm URI absent from the registry
//!
//! ### Structure Errors
//! - **MissingElement**: a required child element or attribute was absent
//! - **DuplicateReference**: the same reference fired twice for one document
//! - **UnprocessedReference**: a declared reference never matched an element
//!
//! ### Secure-Processing Errors
//! - **LimitExceeded**: reference or transform counts above the configured
//!   bounds; detected before any digest is computed
//! - **SecurityViolation**: manifest or external-reference use that the
//!   configuration forbids
//!
//! ### Verification Errors
//! - **DigestMismatch**: a reference digest did not match its stored value
//! - **SignatureMismatch**: the signature value failed verification
//!
//! ### Key-Resolution Errors
//! - **RecursiveKeyReference**: a token's key fetch re-entered the same token
//! - **KeyResolutionFailed**: no token could be located for a KeyInfo
//!
//! ### Infrastructure Errors
//! - **TransformError**, **IoError**, **SerializationError**,
//!   **InternalError**
//!
//! Secure-processing violations are always raised before cryptographic work
//! begins; the first error raised inside a reference verifier aborts the
//! whole signature.

use thiserror::Error;

/// Domain-specific errors for the streaming XML security engine.
///
/// Each variant carries a descriptive message. Variants map one-to-one onto
/// the error kinds surfaced at the library boundary; no process-level exits
/// occur anywhere in the engine.
#[derive(Error, Debug, Clone)]
pub enum XmlSecurityError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing required element: {0}")]
    MissingElement(String),

    #[error("Secure processing limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Unprocessed reference: {0}")]
    UnprocessedReference(String),

    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Digest mismatch: {0}")]
    DigestMismatch(String),

    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("Recursive key reference: {0}")]
    RecursiveKeyReference(String),

    #[error("Key resolution failed: {0}")]
    KeyResolutionFailed(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Transform failed: {0}")]
    TransformError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl XmlSecurityError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new unsupported-algorithm error
    pub fn unsupported_algorithm(uri: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(uri.into())
    }

    /// Creates a new missing-element error
    pub fn missing_element(msg: impl Into<String>) -> Self {
        Self::MissingElement(msg.into())
    }

    /// Creates a new secure-processing limit error
    pub fn limit_exceeded(msg: impl Into<String>) -> Self {
        Self::LimitExceeded(msg.into())
    }

    /// Creates a new security violation error
    pub fn security_violation(msg: impl Into<String>) -> Self {
        Self::SecurityViolation(msg.into())
    }

    /// Creates a new key-resolution error
    pub fn key_resolution_failed(msg: impl Into<String>) -> Self {
        Self::KeyResolutionFailed(msg.into())
    }

    /// Creates a new transform error
    pub fn transform_error(msg: impl Into<String>) -> Self {
        Self::TransformError(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error is a secure-processing violation.
    ///
    /// These are detected before any cryptographic operation runs.
    pub fn is_secure_processing_violation(&self) -> bool {
        matches!(
            self,
            XmlSecurityError::LimitExceeded(_) | XmlSecurityError::SecurityViolation(_)
        )
    }

    /// Checks if the error is a cryptographic verification failure
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            XmlSecurityError::DigestMismatch(_)
                | XmlSecurityError::SignatureMismatch(_)
                | XmlSecurityError::UnprocessedReference(_)
                | XmlSecurityError::DuplicateReference(_)
        )
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            XmlSecurityError::InvalidConfiguration(_) => "configuration",
            XmlSecurityError::UnsupportedAlgorithm(_) => "algorithm",
            XmlSecurityError::MissingElement(_) => "structure",
            XmlSecurityError::LimitExceeded(_) => "secure-processing",
            XmlSecurityError::UnprocessedReference(_) => "verification",
            XmlSecurityError::DuplicateReference(_) => "verification",
            XmlSecurityError::DigestMismatch(_) => "verification",
            XmlSecurityError::SignatureMismatch(_) => "verification",
            XmlSecurityError::RecursiveKeyReference(_) => "key-resolution",
            XmlSecurityError::KeyResolutionFailed(_) => "key-resolution",
            XmlSecurityError::SecurityViolation(_) => "secure-processing",
            XmlSecurityError::TransformError(_) => "transform",
            XmlSecurityError::IoError(_) => "io",
            XmlSecurityError::SerializationError(_) => "serialization",
            XmlSecurityError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for XmlSecurityError {
    fn from(err: std::io::Error) -> Self {
        XmlSecurityError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for XmlSecurityError {
    fn from(err: serde_json::Error) -> Self {
        XmlSecurityError::SerializationError(err.to_string())
    }
}
