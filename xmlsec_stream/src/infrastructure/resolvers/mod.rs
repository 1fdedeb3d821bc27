// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resource Resolvers
//!
//! Concrete resolvers behind the domain port: the same-document resolver
//! that matches live start-elements by id attribute, and a file resolver
//! for external references. The registry is ordered and the first matching
//! resolver wins.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;

use xmlsec_stream_domain::services::{ResolverId, ResourceResolver};
use xmlsec_stream_domain::value_objects::StartElementEvent;
use xmlsec_stream_domain::XmlSecurityError;

/// Matches an element whose id attribute equals the reference fragment.
///
/// The empty fragment matches the document element (whole-document
/// reference). Matching is strictly by event; there is no post-parse
/// lookup anywhere in the engine.
pub struct SameDocumentResolver {
    id: ResolverId,
    fragment: String,
}

impl SameDocumentResolver {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            id: ResolverId::next(),
            fragment: fragment.into(),
        }
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Whole-document reference (`URI=""`).
    pub fn is_whole_document(&self) -> bool {
        self.fragment.is_empty()
    }
}

impl ResourceResolver for SameDocumentResolver {
    fn resolver_id(&self) -> ResolverId {
        self.id
    }

    fn matches(&self, uri: &str, _base_uri: Option<&str>) -> bool {
        uri.is_empty() || uri.strip_prefix('#') == Some(self.fragment.as_str())
    }

    fn is_same_document(&self) -> bool {
        true
    }

    fn matches_element(&self, element: &StartElementEvent) -> bool {
        if self.fragment.is_empty() {
            // Whole-document references are matched on the document element
            // by the chain, which knows the depth; id matching does not
            // apply.
            return false;
        }
        element.id_attribute() == Some(self.fragment.as_str())
    }

    fn resolve(&self, uri: &str, _base_uri: Option<&str>) -> Result<Box<dyn Read>, XmlSecurityError> {
        Err(XmlSecurityError::io_error(format!(
            "same-document reference '{}' has no external representation",
            uri
        )))
    }
}

/// Fetches `file:` URIs and relative paths against a filesystem base URI.
pub struct FileResolver {
    id: ResolverId,
}

impl FileResolver {
    pub fn new() -> Self {
        Self {
            id: ResolverId::next(),
        }
    }

    fn to_path(uri: &str, base_uri: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if uri.contains("://") {
            return None;
        }
        if uri.is_empty() || uri.starts_with('#') {
            return None;
        }
        match base_uri {
            Some(base) => {
                let base = base.strip_prefix("file://").unwrap_or(base);
                Some(PathBuf::from(base).join(uri))
            }
            None => Some(PathBuf::from(uri)),
        }
    }
}

impl Default for FileResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceResolver for FileResolver {
    fn resolver_id(&self) -> ResolverId {
        self.id
    }

    fn matches(&self, uri: &str, base_uri: Option<&str>) -> bool {
        Self::to_path(uri, base_uri).is_some()
    }

    fn is_same_document(&self) -> bool {
        false
    }

    fn resolve(&self, uri: &str, base_uri: Option<&str>) -> Result<Box<dyn Read>, XmlSecurityError> {
        let path = Self::to_path(uri, base_uri).ok_or_else(|| {
            XmlSecurityError::io_error(format!("cannot resolve '{}' as a file", uri))
        })?;
        let file = File::open(&path).map_err(|e| {
            XmlSecurityError::io_error(format!("cannot open '{}': {}", path.display(), e))
        })?;
        Ok(Box::new(file))
    }
}

/// Ordered resolver registry; the first resolver whose `matches` returns
/// true wins.
pub struct ResolverRegistry {
    resolvers: Vec<Rc<dyn ResourceResolver>>,
}

impl ResolverRegistry {
    pub fn new(resolvers: Vec<Rc<dyn ResourceResolver>>) -> Self {
        Self { resolvers }
    }

    /// The default external registry: file resolution only.
    pub fn with_defaults(mut extra: Vec<Rc<dyn ResourceResolver>>) -> Self {
        extra.push(Rc::new(FileResolver::new()));
        Self::new(extra)
    }

    pub fn select(
        &self,
        uri: &str,
        base_uri: Option<&str>,
    ) -> Option<Rc<dyn ResourceResolver>> {
        self.resolvers
            .iter()
            .find(|r| r.matches(uri, base_uri))
            .cloned()
    }
}
