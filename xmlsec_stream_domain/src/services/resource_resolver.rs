// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resource Resolution Ports
//!
//! The contract for matching a reference URI against either a live
//! start-element (same-document references) or an external resource.
//! Resolvers are plain values behind a small trait: two methods plus a
//! same-document flag. A resolver is reusable across references within one
//! signature; the binding of reference to resolver is by object identity,
//! carried as a monotonic `ResolverId`.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::value_objects::StartElementEvent;
use crate::XmlSecurityError;

/// Object identity of one resolver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolverId(u64);

impl ResolverId {
    /// Allocates a fresh identity. Monotonic across the process.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ResolverId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Matches reference URIs and fetches external resources.
///
/// Same-document resolvers match by event, never by post-parse lookup:
/// `matches_element` is consulted for every start-element the document
/// delivers. External resolvers return a byte stream; whether external
/// fetching is permitted at all is the caller's configuration decision,
/// enforced before `resolve` is reached.
pub trait ResourceResolver {
    /// This resolver's identity, stable for its lifetime.
    fn resolver_id(&self) -> ResolverId;

    /// True when this resolver is responsible for the URI.
    fn matches(&self, uri: &str, base_uri: Option<&str>) -> bool;

    /// True for same-document (fragment) resolvers.
    fn is_same_document(&self) -> bool;

    /// Tests a live start-element against a same-document reference.
    /// External resolvers always return false.
    fn matches_element(&self, element: &StartElementEvent) -> bool {
        let _ = element;
        false
    }

    /// Opens an external resource. Same-document resolvers must fail.
    fn resolve(&self, uri: &str, base_uri: Option<&str>) -> Result<Box<dyn Read>, XmlSecurityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_ids_are_unique() {
        let a = ResolverId::next();
        let b = ResolverId::next();
        assert_ne!(a, b);
    }
}
