// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Qualified Name Value Object
//!
//! This module provides the `QName` value object representing a
//! namespace-qualified XML name. It is the identity unit for every element
//! and attribute flowing through the engine.
//!
//! ## Equality Semantics
//!
//! Two qualified names are equal iff their namespace URIs and local names
//! are equal. The lexical prefix is carried for canonical serialization but
//! never participates in equality or hashing: `ds:Signature` and
//! `sig:Signature` bound to the same URI are the same name.
//!
//! ## Usage Examples
//!
//! ```
//! use xmlsec_stream_domain::value_objects::QName;
//!
//! let a = QName::with_prefix("http://www.w3.org/2000/09/xmldsig#", "ds", "Signature");
//! let b = QName::with_prefix("http://www.w3.org/2000/09/xmldsig#", "sig", "Signature");
//! assert_eq!(a, b);
//!
//! let unqualified = QName::local("Id");
//! assert_ne!(a, unqualified);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

/// A namespace-qualified XML name.
///
/// Immutable value object. Equality and hashing consider only
/// `(namespace_uri, local_name)`; the prefix is serialization detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QName {
    namespace_uri: Option<String>,
    prefix: Option<String>,
    local_name: String,
}

impl QName {
    /// Creates a qualified name in a namespace, without a preferred prefix.
    pub fn new(namespace_uri: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace_uri: Some(namespace_uri.into()),
            prefix: None,
            local_name: local_name.into(),
        }
    }

    /// Creates a qualified name in a namespace with a preferred prefix.
    pub fn with_prefix(
        namespace_uri: impl Into<String>,
        prefix: impl Into<String>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace_uri: Some(namespace_uri.into()),
            prefix: Some(prefix.into()),
            local_name: local_name.into(),
        }
    }

    /// Creates an unqualified (no-namespace) name.
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace_uri: None,
            prefix: None,
            local_name: local_name.into(),
        }
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        self.namespace_uri.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Returns true when this name lives in the given namespace and has the
    /// given local name.
    pub fn is(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.namespace_uri.as_deref() == Some(namespace_uri) && self.local_name == local_name
    }

    /// The lexical form used by canonical serialization: `prefix:local` when
    /// a non-empty prefix is bound, `local` otherwise.
    pub fn lexical(&self) -> String {
        match self.prefix.as_deref() {
            Some(p) if !p.is_empty() => format!("{}:{}", p, self.local_name),
            _ => self.local_name.clone(),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace_uri == other.namespace_uri && self.local_name == other.local_name
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace_uri.hash(state);
        self.local_name.hash(state);
    }
}

impl Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace_uri.as_deref() {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}
