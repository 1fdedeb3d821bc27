// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signature Output Processing
//!
//! Signs configured parts of an outbound document. Each selected subtree
//! is side-digested through the same transform-chain construction the
//! inbound verifier uses, while the events flow on to the sink unchanged
//! (except that a missing `Id` attribute is generated onto the matched
//! start-element). When the document element closes, the finished
//! `<Signature>` is emitted as its last child: SignedInfo is
//! canonicalized with the configured algorithm and signed with the
//! configured key.
//!
//! A part that is the document element itself becomes an enveloped
//! signature: its reference declares the enveloped-signature transform
//! ahead of the canonicalization transform, so inbound verification drops
//! the signature we are about to append.

use tracing::debug;
use uuid::Uuid;

use xmlsec_stream_domain::events::{SecurityEvent, TokenUsage};
use xmlsec_stream_domain::services::algorithm_registry::ALG_TRANSFORM_ENVELOPED;
use xmlsec_stream_domain::value_objects::xml_names::NS_DSIG;
use xmlsec_stream_domain::value_objects::{
    Attribute, NamespaceDecl, QName, ReferenceSpec, SignedInfoSpec, StartElementEvent,
    TransformSpec, XmlEvent,
};
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::outbound_chain::{OutboundContext, OutputProcessor};
use crate::application::services::structure_writer::{self, KeyInfoContent};
use crate::config::{KeyIdentifierType, SignActionConfig};
use crate::infrastructure::adapters::signature_crypto::{
    self, default_signature_uri_for_key, issuer_serial,
};
use crate::infrastructure::transforms::{canonicalize_to_bytes, AncestorScope, TransformChain};

struct ActiveDigest {
    chain: TransformChain,
    depth: usize,
    reference: ReferenceSpec,
}

/// Outbound handler producing one `<Signature>` over the configured
/// parts.
pub struct SignatureOutputProcessor {
    config: SignActionConfig,
    signature_algorithm_uri: String,
    signature_id: String,
    element_stack: Vec<StartElementEvent>,
    root_start: Option<StartElementEvent>,
    active: Option<ActiveDigest>,
    references: Vec<ReferenceSpec>,
    root_closed: bool,
}

impl SignatureOutputProcessor {
    pub fn new(config: SignActionConfig) -> Result<Self, XmlSecurityError> {
        let signing_key = config.signing_key.as_ref().ok_or_else(|| {
            XmlSecurityError::invalid_config("SIGN action has no signing key")
        })?;
        let signature_algorithm_uri = match &config.signature_algorithm_uri {
            Some(uri) => uri.clone(),
            None => default_signature_uri_for_key(signing_key)?.to_string(),
        };
        Ok(Self {
            config,
            signature_algorithm_uri,
            signature_id: format!("sig-{}", Uuid::new_v4()),
            element_stack: Vec::new(),
            root_start: None,
            active: None,
            references: Vec::new(),
            root_closed: false,
        })
    }

    fn is_signed_part(&self, name: &QName) -> bool {
        self.config.parts.iter().any(|p| &p.name == name)
    }

    /// Begins digesting a matched subtree; returns the (possibly
    /// rewritten) start event carrying an id.
    fn begin_part(
        &mut self,
        element: &StartElementEvent,
        ctx: &mut OutboundContext,
    ) -> Result<StartElementEvent, XmlSecurityError> {
        let mut element = element.clone();
        let id = match element.id_attribute().map(str::to_string) {
            Some(id) => id,
            None => {
                let id = format!("id-{}", Uuid::new_v4());
                element
                    .attributes
                    .push(Attribute::new(QName::local("Id"), id.clone()));
                id
            }
        };

        // The document element gets the enveloped-signature transform: the
        // signature emitted into it must vanish from its own digest.
        let mut transforms = Vec::new();
        if self.element_stack.is_empty() {
            transforms.push(TransformSpec::new(ALG_TRANSFORM_ENVELOPED));
        }
        transforms.push(TransformSpec::new(self.config.canonicalization_uri.clone()));

        let reference = ReferenceSpec {
            uri: Some(format!("#{}", id)),
            type_uri: None,
            digest_algorithm_uri: self.config.digest_algorithm_uri.clone(),
            expected_digest: Vec::new(),
            transforms,
        };
        let ancestors = AncestorScope::from_ancestors(&self.element_stack);
        let chain = TransformChain::for_reference(&reference, None, ancestors)?;

        ctx.bus.dispatch(&SecurityEvent::algorithm_used(
            reference.digest_algorithm_uri.clone(),
            TokenUsage::Digest,
            0,
            Some(id),
        ));
        self.active = Some(ActiveDigest {
            chain,
            depth: 0,
            reference,
        });
        Ok(element)
    }

    fn feed_active(&mut self, event: &XmlEvent) -> Result<(), XmlSecurityError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active.chain.push_event(event, None)?;
        match event {
            XmlEvent::StartElement(_) => active.depth += 1,
            XmlEvent::EndElement { .. } => {
                active.depth -= 1;
                if active.depth == 0 {
                    if let Some(mut active) = self.active.take() {
                        let digest = active.chain.finish()?;
                        active.reference.expected_digest = digest;
                        debug!(reference = ?active.reference.uri, "outbound part digested");
                        self.references.push(active.reference);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Builds and emits the finished signature element.
    fn emit_signature(
        &mut self,
        ctx: &mut OutboundContext,
        out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError> {
        if self.references.is_empty() {
            return Err(XmlSecurityError::missing_element(
                "no configured signed part appeared in the document",
            ));
        }
        let signing_key = self
            .config
            .signing_key
            .as_ref()
            .ok_or_else(|| XmlSecurityError::invalid_config("SIGN action has no signing key"))?;

        let signed_info = SignedInfoSpec {
            canonicalization_uri: self.config.canonicalization_uri.clone(),
            signature_algorithm_uri: self.signature_algorithm_uri.clone(),
            references: std::mem::take(&mut self.references),
        };

        // SignedInfo canonicalizes in the namespace context it will occupy
        // inbound: below the document element and the Signature element's
        // own ds binding.
        let mut scope_elements = Vec::new();
        if let Some(root) = &self.root_start {
            scope_elements.push(root.clone());
        }
        scope_elements.push(
            StartElementEvent::new(QName::with_prefix(NS_DSIG, "ds", "Signature"))
                .with_namespaces(vec![NamespaceDecl::new(Some("ds"), NS_DSIG)]),
        );
        let ancestors = AncestorScope::from_ancestors(&scope_elements);
        let canonical = canonicalize_to_bytes(
            &signed_info.canonicalization_uri,
            Vec::new(),
            ancestors,
            &structure_writer::signed_info_events(&signed_info),
        )?;

        ctx.bus.dispatch(&SecurityEvent::algorithm_used(
            self.signature_algorithm_uri.clone(),
            TokenUsage::Signature,
            signing_key.key_length_bits(),
            Some(self.signature_id.clone()),
        ));
        let signature_value =
            signature_crypto::sign(&self.signature_algorithm_uri, signing_key, &canonical)?;

        let key_info = self.key_info_content()?;
        let events = structure_writer::signature_events(
            &self.signature_id,
            &signed_info,
            &signature_value,
            &key_info,
        )?;
        out.extend(events);
        debug!(signature = %self.signature_id, "signature emitted");
        Ok(())
    }

    fn key_info_content(&self) -> Result<KeyInfoContent, XmlSecurityError> {
        match &self.config.key_identifier {
            KeyIdentifierType::NoKeyInfo => Ok(KeyInfoContent::None),
            KeyIdentifierType::KeyName(name) => Ok(KeyInfoContent::KeyName(name.clone())),
            KeyIdentifierType::X509Certificate => {
                let cert = self.config.certificates.first().ok_or_else(|| {
                    XmlSecurityError::invalid_config(
                        "X509 key identifier requested but no certificate configured",
                    )
                })?;
                Ok(KeyInfoContent::X509Certificate(cert.clone()))
            }
            KeyIdentifierType::X509IssuerSerial => match self.config.certificates.first() {
                Some(cert) => {
                    let (issuer, serial) = issuer_serial(cert)?;
                    Ok(KeyInfoContent::X509IssuerSerial { issuer, serial })
                }
                // Symmetric and raw-key signers have no certificate; the
                // identifier degrades to an absent KeyInfo.
                None => Ok(KeyInfoContent::None),
            },
        }
    }
}

impl OutputProcessor for SignatureOutputProcessor {
    fn process_event(
        &mut self,
        event: XmlEvent,
        ctx: &mut OutboundContext,
        out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError> {
        match event {
            XmlEvent::StartElement(ref element) => {
                let forwarded = if self.active.is_none() && self.is_signed_part(&element.name) {
                    let rewritten = self.begin_part(element, ctx)?;
                    XmlEvent::StartElement(rewritten)
                } else {
                    event.clone()
                };
                self.feed_active(&forwarded)?;
                if self.root_start.is_none() {
                    if let XmlEvent::StartElement(e) = &forwarded {
                        self.root_start = Some(e.clone());
                    }
                }
                if let XmlEvent::StartElement(e) = &forwarded {
                    self.element_stack.push(e.clone());
                }
                out.push(forwarded);
            }
            XmlEvent::EndElement { .. } => {
                self.feed_active(&event)?;
                self.element_stack.pop();
                if self.element_stack.is_empty() && !self.root_closed {
                    self.root_closed = true;
                    // The signature becomes the last child of the document
                    // element.
                    self.emit_signature(ctx, out)?;
                }
                out.push(event);
            }
            other => {
                self.feed_active(&other)?;
                out.push(other);
            }
        }
        Ok(())
    }

    fn finish(
        &mut self,
        _ctx: &mut OutboundContext,
        _out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError> {
        if !self.root_closed {
            return Err(XmlSecurityError::missing_element(
                "document element never closed; no signature emitted",
            ));
        }
        Ok(())
    }
}
