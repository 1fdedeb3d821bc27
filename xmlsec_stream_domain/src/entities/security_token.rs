// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Token Model
//!
//! This module provides the uniform token model tying keys, certificates,
//! wrapping relationships and usage tracking together. Tokens are
//! arena-allocated records owned by a per-document `TokenArena`; handles are
//! plain indices, so the wrapping graph needs no reference counting and no
//! lifetimes leak into handler code.
//!
//! ## Token Shape
//!
//! One concrete record covers every token variety. A small tag
//! (`TokenKind`) plus an optional lazy key resolver replace the deep
//! subclass hierarchies such models usually grow: subclass-specific
//! behavior is a dispatch on the tag and a function object for lazy
//! unwrap/lookup.
//!
//! ## Recursion Guard
//!
//! KeyInfo graphs can be made cyclic by an attacker (an EncryptedKey whose
//! wrapping token is resolved through the EncryptedKey itself). Every token
//! carries an `invoked` flag; each key fetch asserts the flag is clear, sets
//! it for the duration of the fetch, and clears it on every exit path,
//! including failures. The flag belongs to the call site: fetching key
//! material from a *different* token inside a resolver is legal, re-entering
//! the same token is a `recursive-key-reference` error.
//!
//! ## Key-Length Reporting
//!
//! Every successful key fetch emits an algorithm-used event carrying the
//! exact key length: RSA modulus bits, DSA prime-P bits, EC curve order
//! bits, or encoded-octet length times eight for symmetric keys.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use zeroize::Zeroizing;

use crate::events::{SecurityEvent, SecurityEventBus, TokenUsage};
use crate::value_objects::ElementPath;
use crate::XmlSecurityError;

/// Handle to a token in its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(pub(crate) usize);

/// Token variety tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Symmetric,
    X509,
    EncryptedKey,
    UserSupplied,
}

/// Named elliptic curve of an EC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
}

impl EcCurve {
    /// Bit length of the curve order, reported as the key length.
    pub fn order_bits(&self) -> u32 {
        match self {
            EcCurve::P256 => 256,
            EcCurve::P384 => 384,
        }
    }
}

/// Concrete key material attached to a token under one algorithm URI.
///
/// Asymmetric material carries its DER encoding plus the pre-computed size
/// needed for key-length reporting, so the domain never parses keys.
#[derive(Clone)]
pub enum KeyMaterial {
    Symmetric(Zeroizing<Vec<u8>>),
    RsaPublic { der: Vec<u8>, modulus_bits: u32 },
    RsaPrivate { der: Vec<u8>, modulus_bits: u32 },
    DsaPublic { der: Vec<u8>, prime_bits: u32 },
    EcPublic { der: Vec<u8>, curve: EcCurve },
    EcPrivate { der: Vec<u8>, curve: EcCurve },
}

impl KeyMaterial {
    pub fn symmetric(bytes: Vec<u8>) -> Self {
        KeyMaterial::Symmetric(Zeroizing::new(bytes))
    }

    /// The reported key length in bits.
    ///
    /// RSA reports the modulus bit length, DSA the bit length of prime P,
    /// EC the bit length of the curve order, symmetric keys the encoded
    /// octet length times eight.
    pub fn key_length_bits(&self) -> u32 {
        match self {
            KeyMaterial::Symmetric(bytes) => (bytes.len() * 8) as u32,
            KeyMaterial::RsaPublic { modulus_bits, .. } => *modulus_bits,
            KeyMaterial::RsaPrivate { modulus_bits, .. } => *modulus_bits,
            KeyMaterial::DsaPublic { prime_bits, .. } => *prime_bits,
            KeyMaterial::EcPublic { curve, .. } => curve.order_bits(),
            KeyMaterial::EcPrivate { curve, .. } => curve.order_bits(),
        }
    }

    /// True for private or public asymmetric material.
    pub fn is_asymmetric(&self) -> bool {
        !matches!(self, KeyMaterial::Symmetric(_))
    }

    /// True for the "secret side": symmetric keys and private keys.
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            KeyMaterial::Symmetric(_) | KeyMaterial::RsaPrivate { .. } | KeyMaterial::EcPrivate { .. }
        )
    }

    /// True for public-key material.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            KeyMaterial::RsaPublic { .. } | KeyMaterial::DsaPublic { .. } | KeyMaterial::EcPublic { .. }
        )
    }

    pub fn symmetric_bytes(&self) -> Option<&[u8]> {
        match self {
            KeyMaterial::Symmetric(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    pub fn der(&self) -> Option<&[u8]> {
        match self {
            KeyMaterial::Symmetric(_) => None,
            KeyMaterial::RsaPublic { der, .. }
            | KeyMaterial::RsaPrivate { der, .. }
            | KeyMaterial::DsaPublic { der, .. }
            | KeyMaterial::EcPublic { der, .. }
            | KeyMaterial::EcPrivate { der, .. } => Some(der.as_slice()),
        }
    }
}

// Key bytes never reach Debug output.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Symmetric(bytes) => {
                write!(f, "Symmetric({} bytes)", bytes.len())
            }
            other => write!(f, "{}({} bits)", other.variant_name(), other.key_length_bits()),
        }
    }
}

impl KeyMaterial {
    fn variant_name(&self) -> &'static str {
        match self {
            KeyMaterial::Symmetric(_) => "Symmetric",
            KeyMaterial::RsaPublic { .. } => "RsaPublic",
            KeyMaterial::RsaPrivate { .. } => "RsaPrivate",
            KeyMaterial::DsaPublic { .. } => "DsaPublic",
            KeyMaterial::EcPublic { .. } => "EcPublic",
            KeyMaterial::EcPrivate { .. } => "EcPrivate",
        }
    }
}

/// Which side of the key material a fetch asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAccess {
    Secret,
    Public,
}

/// Lazy key resolution hook, the dispatch point for token varieties that
/// produce their key on first use (EncryptedKey unwrap, callback lookup).
///
/// A resolver may fetch key material from *other* tokens through the arena;
/// re-entering the token currently being resolved fails with
/// `recursive-key-reference`.
pub trait TokenKeyResolver {
    fn resolve_key(
        &self,
        arena: &TokenArena,
        token: TokenId,
        algorithm_uri: &str,
        usage: TokenUsage,
        correlation_id: Option<&str>,
    ) -> Result<Option<KeyMaterial>, XmlSecurityError>;
}

/// One security token: identity, key material, wrapping relationships,
/// declared usages and provenance.
pub struct SecurityToken {
    token_id: Option<String>,
    kind: TokenKind,
    certificates: Vec<Vec<u8>>,
    keys: HashMap<String, KeyMaterial>,
    wrapping_token: Option<TokenId>,
    wrapped_tokens: Vec<TokenId>,
    usages: Vec<TokenUsage>,
    element_path: ElementPath,
    correlation_id: Option<String>,
    invoked: Cell<bool>,
    resolver: Option<Rc<dyn TokenKeyResolver>>,
}

impl SecurityToken {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            token_id: None,
            kind,
            certificates: Vec::new(),
            keys: HashMap::new(),
            wrapping_token: None,
            wrapped_tokens: Vec::new(),
            usages: Vec::new(),
            element_path: ElementPath::root(),
            correlation_id: None,
            invoked: Cell::new(false),
            resolver: None,
        }
    }

    pub fn with_token_id(mut self, id: impl Into<String>) -> Self {
        self.token_id = Some(id.into());
        self
    }

    /// Attaches key material for an algorithm URI. The empty URI registers
    /// material valid for any algorithm. Removing material is a distinct
    /// operation; absent material cannot be expressed here.
    pub fn with_key(mut self, algorithm_uri: impl Into<String>, material: KeyMaterial) -> Self {
        self.keys.insert(algorithm_uri.into(), material);
        self
    }

    pub fn with_certificates(mut self, certificates: Vec<Vec<u8>>) -> Self {
        self.certificates = certificates;
        self
    }

    pub fn with_resolver(mut self, resolver: Rc<dyn TokenKeyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_provenance(mut self, path: ElementPath, correlation_id: Option<String>) -> Self {
        self.element_path = path;
        self.correlation_id = correlation_id;
        self
    }

    pub fn token_id(&self) -> Option<&str> {
        self.token_id.as_deref()
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    pub fn wrapping_token(&self) -> Option<TokenId> {
        self.wrapping_token
    }

    pub fn wrapped_tokens(&self) -> &[TokenId] {
        &self.wrapped_tokens
    }

    pub fn usages(&self) -> &[TokenUsage] {
        &self.usages
    }

    pub fn element_path(&self) -> &ElementPath {
        &self.element_path
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// A token is asymmetric iff it holds private/public-key material or a
    /// certificate is present.
    pub fn is_asymmetric(&self) -> bool {
        !self.certificates.is_empty() || self.keys.values().any(KeyMaterial::is_asymmetric)
    }

    fn cached_key(&self, algorithm_uri: &str, access: KeyAccess) -> Option<KeyMaterial> {
        let accept = |m: &KeyMaterial| match access {
            KeyAccess::Secret => m.is_secret(),
            KeyAccess::Public => m.is_public(),
        };
        if let Some(m) = self.keys.get(algorithm_uri).filter(|m| accept(m)) {
            return Some(m.clone());
        }
        self.keys.get("").filter(|m| accept(m)).cloned()
    }
}

/// Clears a token's `invoked` flag on every exit path of a key fetch.
struct InvokeGuard<'a> {
    arena: &'a TokenArena,
    id: TokenId,
}

impl Drop for InvokeGuard<'_> {
    fn drop(&mut self) {
        self.arena.tokens.borrow()[self.id.0].invoked.set(false);
    }
}

/// Per-document owner of the token graph.
///
/// All methods take `&self`: tokens may be inserted and resolved while
/// other fetches are in flight on the same single-threaded document, which
/// is exactly what nested EncryptedKey resolution does.
pub struct TokenArena {
    tokens: RefCell<Vec<SecurityToken>>,
    bus: Rc<SecurityEventBus>,
}

impl TokenArena {
    pub fn new(bus: Rc<SecurityEventBus>) -> Self {
        Self {
            tokens: RefCell::new(Vec::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &Rc<SecurityEventBus> {
        &self.bus
    }

    pub fn insert(&self, token: SecurityToken) -> TokenId {
        let mut tokens = self.tokens.borrow_mut();
        tokens.push(token);
        TokenId(tokens.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.tokens.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.borrow().is_empty()
    }

    /// Runs a closure against a token. The arena stays borrowed for the
    /// closure's duration, so the closure must not call back into the
    /// arena.
    pub fn with_token<R>(&self, id: TokenId, f: impl FnOnce(&SecurityToken) -> R) -> R {
        f(&self.tokens.borrow()[id.0])
    }

    /// Links `wrapped` under `wrapping` for key-transport provenance.
    pub fn link_wrapped(&self, wrapping: TokenId, wrapped: TokenId) {
        let mut tokens = self.tokens.borrow_mut();
        tokens[wrapped.0].wrapping_token = Some(wrapping);
        tokens[wrapping.0].wrapped_tokens.push(wrapped);
    }

    /// Attaches key material to an existing token.
    pub fn set_key(&self, id: TokenId, algorithm_uri: impl Into<String>, material: KeyMaterial) {
        self.tokens.borrow_mut()[id.0]
            .keys
            .insert(algorithm_uri.into(), material);
    }

    /// Fetches secret-side key material (symmetric or private).
    ///
    /// Asserts and sets the recursion guard, delegates to the token's
    /// resolver when nothing is cached, emits an algorithm-used event with
    /// the computed key length, and clears the guard on every exit path.
    pub fn secret_key_for(
        &self,
        id: TokenId,
        algorithm_uri: &str,
        usage: TokenUsage,
        correlation_id: Option<&str>,
    ) -> Result<KeyMaterial, XmlSecurityError> {
        self.key_for(id, algorithm_uri, usage, correlation_id, KeyAccess::Secret)
    }

    /// Fetches public key material. Same guard discipline as
    /// [`TokenArena::secret_key_for`].
    pub fn public_key_for(
        &self,
        id: TokenId,
        algorithm_uri: &str,
        usage: TokenUsage,
        correlation_id: Option<&str>,
    ) -> Result<KeyMaterial, XmlSecurityError> {
        self.key_for(id, algorithm_uri, usage, correlation_id, KeyAccess::Public)
    }

    fn key_for(
        &self,
        id: TokenId,
        algorithm_uri: &str,
        usage: TokenUsage,
        correlation_id: Option<&str>,
        access: KeyAccess,
    ) -> Result<KeyMaterial, XmlSecurityError> {
        {
            let tokens = self.tokens.borrow();
            let token = tokens.get(id.0).ok_or_else(|| {
                XmlSecurityError::internal_error(format!("unknown token handle {:?}", id))
            })?;
            if token.invoked.get() {
                return Err(XmlSecurityError::RecursiveKeyReference(format!(
                    "token '{}' re-entered during its own key resolution",
                    token.token_id.as_deref().unwrap_or("<anonymous>")
                )));
            }
            token.invoked.set(true);
        }
        let _guard = InvokeGuard { arena: self, id };

        let (cached, resolver) = {
            let tokens = self.tokens.borrow();
            let token = &tokens[id.0];
            (token.cached_key(algorithm_uri, access), token.resolver.clone())
        };

        let material = match cached {
            Some(material) => material,
            None => {
                let resolved = match resolver {
                    Some(resolver) => {
                        resolver.resolve_key(self, id, algorithm_uri, usage, correlation_id)?
                    }
                    None => None,
                };
                match resolved {
                    Some(material) => {
                        // Memoize: later fetches return the same bytes.
                        self.tokens.borrow_mut()[id.0]
                            .keys
                            .insert(algorithm_uri.to_string(), material.clone());
                        material
                    }
                    None => {
                        return Err(XmlSecurityError::key_resolution_failed(format!(
                            "no {} key material for algorithm '{}'",
                            match access {
                                KeyAccess::Secret => "secret",
                                KeyAccess::Public => "public",
                            },
                            algorithm_uri
                        )));
                    }
                }
            }
        };

        self.bus.dispatch(&SecurityEvent::algorithm_used(
            algorithm_uri,
            usage,
            material.key_length_bits(),
            correlation_id.map(str::to_string),
        ));
        Ok(material)
    }

    /// Declares a usage on a token and, transitively, on its wrapping
    /// tokens. Usages are additive and ordered; the walk runs under the
    /// same guard discipline as key fetches so a cyclic wrapping graph
    /// fails instead of looping.
    pub fn add_usage(&self, id: TokenId, usage: TokenUsage) -> Result<(), XmlSecurityError> {
        let mut guarded: Vec<TokenId> = Vec::new();
        let result = self.add_usage_walk(id, usage, &mut guarded);
        let tokens = self.tokens.borrow();
        for gid in guarded {
            tokens[gid.0].invoked.set(false);
        }
        result
    }

    fn add_usage_walk(
        &self,
        start: TokenId,
        usage: TokenUsage,
        guarded: &mut Vec<TokenId>,
    ) -> Result<(), XmlSecurityError> {
        let mut current = Some(start);
        while let Some(id) = current {
            {
                let tokens = self.tokens.borrow();
                let token = tokens.get(id.0).ok_or_else(|| {
                    XmlSecurityError::internal_error(format!("unknown token handle {:?}", id))
                })?;
                if token.invoked.get() {
                    return Err(XmlSecurityError::RecursiveKeyReference(
                        "cyclic wrapping-token graph during usage propagation".to_string(),
                    ));
                }
                token.invoked.set(true);
            }
            guarded.push(id);

            let mut tokens = self.tokens.borrow_mut();
            let token = &mut tokens[id.0];
            if !token.usages.contains(&usage) {
                token.usages.push(usage);
            }
            current = token.wrapping_token;
        }
        Ok(())
    }
}
