// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # KeyInfo Token Resolution
//!
//! The token factory that walks a KeyInfo locator: registered EncryptedKey
//! providers first, then embedded certificates, then the configured
//! resolver callback, and finally the directly-configured key. The first
//! hit wins; a miss is a `key-resolution-failed` error.
//!
//! The environment is a narrow view over the per-document state, so token
//! resolvers running inside a key fetch (which only see the arena) can
//! carry their own clones of the shared pieces.

use xmlsec_stream_domain::entities::{KeyMaterial, SecurityToken, TokenArena, TokenId, TokenKind};
use xmlsec_stream_domain::events::{SecurityEvent, SecurityEventBus, TokenUsage};
use xmlsec_stream_domain::services::TokenProviderRegistry;
use xmlsec_stream_domain::value_objects::{ElementPath, KeyInfoSpec};
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::inbound_chain::InboundContext;
use crate::config::InboundSecurityProperties;
use crate::infrastructure::adapters::signature_crypto::public_key_from_certificate;

/// What key resolution needs from the document state.
pub struct KeyResolutionEnv<'a> {
    pub arena: &'a TokenArena,
    pub providers: &'a TokenProviderRegistry,
    pub bus: &'a SecurityEventBus,
    pub properties: &'a InboundSecurityProperties,
    pub provenance: ElementPath,
}

impl InboundContext {
    /// The resolution view over this context.
    pub fn key_env(&self) -> KeyResolutionEnv<'_> {
        KeyResolutionEnv {
            arena: &self.arena,
            providers: &self.providers,
            bus: &self.bus,
            properties: &self.properties,
            provenance: self.document.current_path(),
        }
    }
}

/// Resolves the token a KeyInfo locator points at, without usage or event
/// side effects. Used where the usage is only known after inspecting the
/// resolved token (key-wrap usage selection).
pub fn resolve_token_quiet(
    env: &KeyResolutionEnv<'_>,
    key_info: &KeyInfoSpec,
    correlation_id: Option<&str>,
    direct_key: Option<&KeyMaterial>,
) -> Result<TokenId, XmlSecurityError> {
    if let KeyInfoSpec::EncryptedKeyRef(id) = key_info {
        return env.providers.token_for(id, env.arena);
    }

    if let KeyInfoSpec::X509Certificate(der) = key_info {
        let material = public_key_from_certificate(der)?;
        return Ok(env.arena.insert(
            SecurityToken::new(TokenKind::X509)
                .with_certificates(vec![der.clone()])
                .with_key("", material)
                .with_provenance(env.provenance.clone(), correlation_id.map(str::to_string)),
        ));
    }

    if let Some(resolver) = &env.properties.key_resolver {
        if let Some(token) = resolver.resolve_token(key_info, TokenUsage::Decryption, env.arena)? {
            return Ok(token);
        }
    }

    if let Some(material) = direct_key {
        return Ok(env.arena.insert(
            SecurityToken::new(TokenKind::UserSupplied)
                .with_key("", material.clone())
                .with_provenance(env.provenance.clone(), correlation_id.map(str::to_string)),
        ));
    }

    Err(XmlSecurityError::key_resolution_failed(format!(
        "no token for KeyInfo {:?}",
        key_info
    )))
}

/// Resolves a token, declares the usage on it (propagating to wrapping
/// tokens) and emits the token-observed event.
pub fn resolve_token(
    env: &KeyResolutionEnv<'_>,
    key_info: &KeyInfoSpec,
    usage: TokenUsage,
    correlation_id: Option<&str>,
    direct_key: Option<&KeyMaterial>,
) -> Result<TokenId, XmlSecurityError> {
    let token = resolve_token_quiet(env, key_info, correlation_id, direct_key)?;
    observe(env.arena, env.bus, token, usage, correlation_id)?;
    Ok(token)
}

/// Declares a usage and emits the token-observed event for an
/// already-resolved token.
pub fn observe(
    arena: &TokenArena,
    bus: &SecurityEventBus,
    token: TokenId,
    usage: TokenUsage,
    correlation_id: Option<&str>,
) -> Result<(), XmlSecurityError> {
    arena.add_usage(token, usage)?;
    let token_id = arena.with_token(token, |t| t.token_id().map(str::to_string));
    bus.dispatch(&SecurityEvent::token_observed(
        token_id,
        usage,
        correlation_id.map(str::to_string),
    ));
    Ok(())
}
