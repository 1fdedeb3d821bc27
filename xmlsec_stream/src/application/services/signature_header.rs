// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signature Header Processing
//!
//! The document-front processor that makes one-pass verification possible
//! for signatures appearing anywhere in the document. It buffers every
//! event from document start (tagged with its capture provenance); when a
//! `<Signature>` element appears it captures the whole structure, enforces
//! the secure-processing limits before any cryptographic work, verifies
//! the `SignatureValue` over the canonicalized `SignedInfo`, and installs a
//! reference-verifier manager that receives the buffered prefix as replay.
//! Same-document references to elements that preceded the signature are
//! therefore matched from the replay, while later elements verify live, in
//! tandem with the parse.

use tracing::debug;

use xmlsec_stream_domain::entities::ProcessorId;
use xmlsec_stream_domain::events::TokenUsage;
use xmlsec_stream_domain::value_objects::xml_names::NS_DSIG;
use xmlsec_stream_domain::value_objects::{
    ReferenceOutcome, ReferenceStatus, StartElementEvent, XmlEvent,
};
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::inbound_chain::{
    ChainActions, InboundContext, InboundProcessor, SignatureResult, TaggedEvent,
};
use crate::application::services::key_resolution::resolve_token;
use crate::application::services::reference_verifier::ReferenceVerifierManager;
use crate::application::services::structure_reader::{parse_signature, ParsedSignature};
use crate::infrastructure::adapters::signature_crypto;
use crate::infrastructure::transforms::{canonicalize_to_bytes, AncestorScope};

struct SignatureCapture {
    index: usize,
    events: Vec<XmlEvent>,
    depth: usize,
}

/// Buffers the document, captures signature structures, and installs
/// reference verifiers.
pub struct SignatureHeaderProcessor {
    id: ProcessorId,
    buffer: Vec<TaggedEvent>,
    element_stack: Vec<StartElementEvent>,
    capture: Option<SignatureCapture>,
    signatures_seen: usize,
}

impl SignatureHeaderProcessor {
    pub fn new(id: ProcessorId) -> Self {
        Self {
            id,
            buffer: Vec::new(),
            element_stack: Vec::new(),
            capture: None,
            signatures_seen: 0,
        }
    }

    fn complete_capture(
        &mut self,
        capture: SignatureCapture,
        ctx: &mut InboundContext,
        actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError> {
        let parsed = parse_signature(&capture.events)?;

        // Fail fast: limits are enforced before any digest or signature
        // work.
        parsed.signed_info.validate(&ctx.properties.limits)?;

        debug!(
            signature = ?parsed.id,
            references = parsed.signed_info.references.len(),
            "signature captured"
        );

        let statuses = parsed
            .signed_info
            .references
            .iter()
            .enumerate()
            .map(|(index, r)| ReferenceStatus {
                index,
                uri: r.uri.clone().unwrap_or_default(),
                outcome: ReferenceOutcome::Unprocessed,
            })
            .collect();
        debug_assert_eq!(ctx.signature_results.len(), capture.index);
        ctx.signature_results.push(SignatureResult {
            signature_id: parsed.id.clone(),
            verified: false,
            reference_statuses: statuses,
        });

        let signature_start = match capture.events.first() {
            Some(XmlEvent::StartElement(e)) => e.clone(),
            _ => {
                return Err(XmlSecurityError::internal_error(
                    "signature capture lost its start element",
                ));
            }
        };
        self.verify_signature_value(&parsed, &signature_start, ctx)?;

        ReferenceVerifierManager::install(
            &parsed.signed_info,
            capture.index,
            parsed.id.clone(),
            ctx,
            actions,
            self.buffer.clone(),
        )
    }

    /// Verifies the SignatureValue over the canonicalized SignedInfo with
    /// the KeyInfo-resolved token.
    fn verify_signature_value(
        &self,
        parsed: &ParsedSignature,
        signature_start: &StartElementEvent,
        ctx: &mut InboundContext,
    ) -> Result<(), XmlSecurityError> {
        // SignedInfo's namespace context includes the Signature element
        // itself (xmlns:ds usually lives there).
        let mut scope_elements = self.element_stack.clone();
        scope_elements.push(signature_start.clone());
        let ancestors = AncestorScope::from_ancestors(&scope_elements);
        let canonical = canonicalize_to_bytes(
            &parsed.signed_info.canonicalization_uri,
            Vec::new(),
            ancestors,
            &parsed.signed_info_events,
        )?;

        let algorithm_uri = &parsed.signed_info.signature_algorithm_uri;
        let verification_key = ctx.properties.verification_key.clone();
        let token = resolve_token(
            &ctx.key_env(),
            &parsed.key_info,
            TokenUsage::Verification,
            parsed.id.as_deref(),
            verification_key.as_ref(),
        )?;

        // HMAC verification needs the secret; public-key algorithms the
        // public half. Both fetches run under the recursion guard and emit
        // the algorithm event with the computed key length.
        let is_mac = algorithm_uri.contains("hmac");
        let key = if is_mac {
            ctx.arena
                .secret_key_for(token, algorithm_uri, TokenUsage::Verification, parsed.id.as_deref())?
        } else {
            ctx.arena
                .public_key_for(token, algorithm_uri, TokenUsage::Verification, parsed.id.as_deref())?
        };
        signature_crypto::verify(algorithm_uri, &key, &canonical, &parsed.signature_value)?;
        debug!(signature = ?parsed.id, algorithm = %algorithm_uri, "signature value verified");
        Ok(())
    }
}

impl InboundProcessor for SignatureHeaderProcessor {
    fn processor_id(&self) -> ProcessorId {
        self.id
    }

    fn process_event(
        &mut self,
        event: &TaggedEvent,
        ctx: &mut InboundContext,
        out: &mut Vec<TaggedEvent>,
        actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError> {
        let mut forwarded = event.clone();

        if let Some(capture) = self.capture.as_mut() {
            forwarded.origin_signature = Some(capture.index);
            capture.events.push(event.event.clone());
            match &event.event {
                XmlEvent::StartElement(_) => capture.depth += 1,
                XmlEvent::EndElement { .. } => {
                    capture.depth -= 1;
                    if capture.depth == 0 {
                        if let Some(capture) = self.capture.take() {
                            // The signature's own events are buffered
                            // (tagged) before the verifiers are installed,
                            // so the replay covers them too.
                            self.buffer.push(forwarded.clone());
                            out.push(forwarded);
                            self.complete_capture(capture, ctx, actions)?;
                        }
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.buffer.push(forwarded.clone());
            out.push(forwarded);
            return Ok(());
        }

        match &event.event {
            XmlEvent::StartElement(element) if element.name.is(NS_DSIG, "Signature") => {
                let index = self.signatures_seen;
                self.signatures_seen += 1;
                self.capture = Some(SignatureCapture {
                    index,
                    events: vec![event.event.clone()],
                    depth: 1,
                });
                forwarded.origin_signature = Some(index);
                self.buffer.push(forwarded.clone());
                out.push(forwarded);
            }
            XmlEvent::StartElement(element) => {
                self.element_stack.push(element.clone());
                self.buffer.push(forwarded.clone());
                out.push(forwarded);
            }
            XmlEvent::EndElement { .. } => {
                self.element_stack.pop();
                self.buffer.push(forwarded.clone());
                out.push(forwarded);
            }
            _ => {
                self.buffer.push(forwarded.clone());
                out.push(forwarded);
            }
        }
        Ok(())
    }
}
