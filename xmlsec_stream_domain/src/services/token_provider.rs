// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Token Providers
//!
//! Lazy token factories and the per-document registry that maps element ids
//! to them. A provider builds its token on first request and memoizes the
//! handle; providers live exactly as long as the document's security
//! context.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::entities::{TokenArena, TokenId};
use crate::XmlSecurityError;

/// Lazy factory producing a security token by id.
pub trait TokenProvider {
    /// Produces (or returns the memoized) token.
    fn get_token(&self, arena: &TokenArena) -> Result<TokenId, XmlSecurityError>;

    /// True once the provider has produced its token.
    fn has_produced(&self) -> bool;
}

/// Provider over a factory closure, memoizing the produced handle.
pub struct LazyTokenProvider<F>
where
    F: Fn(&TokenArena) -> Result<TokenId, XmlSecurityError>,
{
    factory: F,
    produced: Cell<Option<TokenId>>,
}

impl<F> LazyTokenProvider<F>
where
    F: Fn(&TokenArena) -> Result<TokenId, XmlSecurityError>,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            produced: Cell::new(None),
        }
    }
}

impl<F> TokenProvider for LazyTokenProvider<F>
where
    F: Fn(&TokenArena) -> Result<TokenId, XmlSecurityError>,
{
    fn get_token(&self, arena: &TokenArena) -> Result<TokenId, XmlSecurityError> {
        if let Some(id) = self.produced.get() {
            return Ok(id);
        }
        let id = (self.factory)(arena)?;
        self.produced.set(Some(id));
        Ok(id)
    }

    fn has_produced(&self) -> bool {
        self.produced.get().is_some()
    }
}

/// Per-document map from token id to provider.
#[derive(Default)]
pub struct TokenProviderRegistry {
    providers: RefCell<HashMap<String, Rc<dyn TokenProvider>>>,
}

impl TokenProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under an id.
    ///
    /// A duplicate id is rejected only when the already-registered provider
    /// has produced a token; an unused registration may be replaced, which
    /// is what re-declared security headers do.
    pub fn register(
        &self,
        id: impl Into<String>,
        provider: Rc<dyn TokenProvider>,
    ) -> Result<(), XmlSecurityError> {
        let id = id.into();
        let mut providers = self.providers.borrow_mut();
        if let Some(existing) = providers.get(&id) {
            if existing.has_produced() {
                return Err(XmlSecurityError::security_violation(format!(
                    "token provider for id '{}' already registered and in use",
                    id
                )));
            }
        }
        providers.insert(id, provider);
        Ok(())
    }

    pub fn provider_for(&self, id: &str) -> Option<Rc<dyn TokenProvider>> {
        self.providers.borrow().get(id).cloned()
    }

    /// Resolves a token by id through its provider.
    pub fn token_for(&self, id: &str, arena: &TokenArena) -> Result<TokenId, XmlSecurityError> {
        let provider = self.provider_for(id).ok_or_else(|| {
            XmlSecurityError::key_resolution_failed(format!("no token provider for id '{}'", id))
        })?;
        provider.get_token(arena)
    }

    pub fn len(&self) -> usize {
        self.providers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{SecurityToken, TokenKind};
    use crate::events::SecurityEventBus;

    fn arena() -> TokenArena {
        TokenArena::new(Rc::new(SecurityEventBus::new()))
    }

    fn counting_provider(counter: Rc<Cell<u32>>) -> Rc<dyn TokenProvider> {
        Rc::new(LazyTokenProvider::new(move |arena: &TokenArena| {
            counter.set(counter.get() + 1);
            Ok(arena.insert(SecurityToken::new(TokenKind::Symmetric)))
        }))
    }

    /// Tests lazy production and memoization.
    #[test]
    fn test_provider_memoizes() {
        let arena = arena();
        let calls = Rc::new(Cell::new(0));
        let provider = counting_provider(Rc::clone(&calls));
        assert!(!provider.has_produced());

        let first = provider.get_token(&arena).unwrap();
        let second = provider.get_token(&arena).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert!(provider.has_produced());
    }

    /// Duplicate registration is rejected only after the existing provider
    /// produced a token.
    #[test]
    fn test_duplicate_registration_rule() {
        let arena = arena();
        let registry = TokenProviderRegistry::new();
        let calls = Rc::new(Cell::new(0));

        registry.register("ek-1", counting_provider(Rc::clone(&calls))).unwrap();
        // Unused: replacement allowed.
        registry.register("ek-1", counting_provider(Rc::clone(&calls))).unwrap();

        registry.token_for("ek-1", &arena).unwrap();
        // Produced: replacement rejected.
        let err = registry
            .register("ek-1", counting_provider(calls))
            .unwrap_err();
        assert!(matches!(err, XmlSecurityError::SecurityViolation(_)));
    }

    /// Unknown ids surface as key-resolution failures.
    #[test]
    fn test_unknown_id() {
        let arena = arena();
        let registry = TokenProviderRegistry::new();
        let err = registry.token_for("missing", &arena).unwrap_err();
        assert!(matches!(err, XmlSecurityError::KeyResolutionFailed(_)));
    }
}
