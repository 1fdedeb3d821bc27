// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signature Reference Verification
//!
//! Per-reference live digesting, exactly in tandem with the parse. When a
//! signature is captured, a `ReferenceVerifierManager` joins the chain with
//! a replay of every event delivered so far; from then on it tests each
//! start-element against the signature's same-document resolvers. A match
//! constructs a `ReferenceVerifier` (transform chain ending in a fresh
//! digest sink), which consumes the matched subtree and compares digests
//! in constant time when the subtree closes.
//!
//! Resolvers are shared by references declaring the same URI; binding is by
//! resolver identity. The same element being claimed twice, or one
//! reference firing for two elements, is a fatal duplicate-reference
//! error. External references are fetched and digested when the manager is
//! installed, immediately after the signature's end-element.
//!
//! ## Verifier States
//!
//! idle (created) → active (depth > 0) → done (depth back to zero on the
//! opening qualified name). In done, no further events are delivered.

use std::collections::HashSet;
use std::io::Read;

use ring::constant_time;
use tracing::{debug, trace};

use xmlsec_stream_domain::entities::{ContentFlag, ProcessorId};
use xmlsec_stream_domain::events::{SecurityEvent, TokenUsage};
use xmlsec_stream_domain::services::ResourceResolver;
use xmlsec_stream_domain::value_objects::{
    QName, ReferenceOutcome, ReferenceSpec, SignedInfoSpec, StartElementEvent, XmlEvent,
};
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::inbound_chain::{
    ChainActions, InboundContext, InboundProcessor, TaggedEvent,
};
use crate::config::XmlSecAction;
use crate::infrastructure::resolvers::{ResolverRegistry, SameDocumentResolver};
use crate::infrastructure::transforms::{AncestorScope, TransformChain};

/// One reference being digested live.
struct ReferenceVerifier {
    reference_index: usize,
    uri: String,
    expected_digest: Vec<u8>,
    digest_algorithm_uri: String,
    chain: TransformChain,
    opening_name: QName,
    depth: usize,
    flag_id: ProcessorId,
}

impl ReferenceVerifier {
    /// Feeds one event; returns true when the verifier reached done.
    fn process(
        &mut self,
        tagged: &TaggedEvent,
        ctx: &mut InboundContext,
    ) -> Result<bool, XmlSecurityError> {
        self.chain.push_event(&tagged.event, tagged.origin_signature)?;
        match &tagged.event {
            XmlEvent::StartElement(_) => {
                self.depth += 1;
                Ok(false)
            }
            XmlEvent::EndElement { name } => {
                self.depth -= 1;
                if self.depth > 0 {
                    return Ok(false);
                }
                if name != &self.opening_name {
                    return Err(XmlSecurityError::internal_error(format!(
                        "signed subtree closed with mismatched element {}",
                        name
                    )));
                }
                self.finalize(ctx)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn finalize(&mut self, ctx: &mut InboundContext) -> Result<(), XmlSecurityError> {
        // Algorithm events precede the digest comparison.
        ctx.bus.dispatch(&SecurityEvent::algorithm_used(
            self.digest_algorithm_uri.clone(),
            TokenUsage::Digest,
            0,
            Some(self.uri.clone()),
        ));
        let digest = self.chain.finish()?;
        ctx.document.clear_content_flags(self.flag_id);

        if constant_time::verify_slices_are_equal(&digest, &self.expected_digest).is_err() {
            return Err(XmlSecurityError::DigestMismatch(format!(
                "reference {} ('{}')",
                self.reference_index, self.uri
            )));
        }
        debug!(reference = %self.uri, digest = %hex::encode(&digest), "reference digest verified");
        Ok(())
    }
}

struct SameDocumentGroup {
    resolver: SameDocumentResolver,
    reference_indices: Vec<usize>,
}

/// Chain processor verifying all references of one signature.
pub struct ReferenceVerifierManager {
    id: ProcessorId,
    signature_index: usize,
    signature_id: Option<String>,
    references: Vec<ReferenceSpec>,
    same_document: Vec<SameDocumentGroup>,
    processed: HashSet<usize>,
    active: Vec<ReferenceVerifier>,
    element_stack: Vec<StartElementEvent>,
}

impl ReferenceVerifierManager {
    /// Builds the manager for a validated SignedInfo and immediately
    /// processes its external references (the signature's end-element has
    /// just been consumed). Same-document references verify live.
    pub fn install(
        signed_info: &SignedInfoSpec,
        signature_index: usize,
        signature_id: Option<String>,
        ctx: &mut InboundContext,
        actions: &mut ChainActions,
        replay: Vec<TaggedEvent>,
    ) -> Result<(), XmlSecurityError> {
        let mut manager = ReferenceVerifierManager {
            id: ctx.allocate_processor_id(),
            signature_index,
            signature_id,
            references: signed_info.references.clone(),
            same_document: Vec::new(),
            processed: HashSet::new(),
            active: Vec::new(),
            element_stack: Vec::new(),
        };

        for (index, reference) in signed_info.references.iter().enumerate() {
            if let Some(fragment) = reference.fragment() {
                // One resolver per distinct fragment; references with the
                // same URI share identity.
                match manager
                    .same_document
                    .iter_mut()
                    .find(|g| g.resolver.fragment() == fragment)
                {
                    Some(group) => group.reference_indices.push(index),
                    None => manager.same_document.push(SameDocumentGroup {
                        resolver: SameDocumentResolver::new(fragment),
                        reference_indices: vec![index],
                    }),
                }
            } else {
                manager.process_external_reference(index, reference, ctx)?;
            }
        }

        actions.add_processor(Box::new(manager), replay);
        Ok(())
    }

    fn process_external_reference(
        &mut self,
        index: usize,
        reference: &ReferenceSpec,
        ctx: &mut InboundContext,
    ) -> Result<(), XmlSecurityError> {
        let uri = reference.uri.clone().unwrap_or_default();
        let registry = ResolverRegistry::with_defaults(ctx.properties.external_resolvers.clone());
        let base = ctx.document.base_uri().map(str::to_string);
        let resolver = registry.select(&uri, base.as_deref()).ok_or_else(|| {
            XmlSecurityError::UnprocessedReference(format!(
                "no resolver matches external reference '{}'",
                uri
            ))
        })?;

        let mut chain = TransformChain::for_external_reference(reference)?;
        let mut stream = resolver.resolve(&uri, base.as_deref())?;
        let mut buffer = [0u8; 4096];
        loop {
            let read = stream
                .read(&mut buffer)
                .map_err(|e| XmlSecurityError::io_error(format!("reading '{}': {}", uri, e)))?;
            if read == 0 {
                break;
            }
            chain.push_bytes(&buffer[..read])?;
        }

        ctx.bus.dispatch(&SecurityEvent::algorithm_used(
            reference.digest_algorithm_uri.clone(),
            TokenUsage::Digest,
            0,
            Some(uri.clone()),
        ));
        let digest = chain.finish()?;
        if constant_time::verify_slices_are_equal(&digest, &reference.expected_digest).is_err() {
            return Err(XmlSecurityError::DigestMismatch(format!(
                "external reference {} ('{}')",
                index, uri
            )));
        }
        self.processed.insert(index);
        self.set_outcome(ctx, index, ReferenceOutcome::Verified);
        Ok(())
    }

    fn set_outcome(&self, ctx: &mut InboundContext, index: usize, outcome: ReferenceOutcome) {
        if let Some(result) = ctx.signature_results.get_mut(self.signature_index) {
            if let Some(status) = result.reference_statuses.get_mut(index) {
                status.outcome = outcome;
            }
        }
    }

    /// Tests a start-element against the same-document resolvers and
    /// creates verifiers for matches, enforcing the duplicate rules.
    fn match_element(
        &mut self,
        element: &StartElementEvent,
        ctx: &mut InboundContext,
    ) -> Result<(), XmlSecurityError> {
        let mut matched: Vec<usize> = Vec::new();
        for group in &self.same_document {
            let whole_document =
                group.resolver.is_whole_document() && self.element_stack.is_empty();
            if whole_document || group.resolver.matches_element(element) {
                matched.extend(group.reference_indices.iter().copied());
            }
        }
        if matched.is_empty() {
            return Ok(());
        }

        for (position, reference_index) in matched.iter().enumerate() {
            if self.processed.contains(reference_index) || position > 0 {
                return Err(XmlSecurityError::DuplicateReference(format!(
                    "reference {} ('{}') fired twice",
                    reference_index,
                    self.references[*reference_index]
                        .uri
                        .as_deref()
                        .unwrap_or_default()
                )));
            }
        }

        let reference_index = matched[0];
        let reference = &self.references[reference_index];
        trace!(reference = reference_index, id = ?element.id_attribute(), "signed element matched");

        let ancestors = AncestorScope::from_ancestors(&self.element_stack);
        let chain =
            TransformChain::for_reference(reference, Some(self.signature_index), ancestors)?;
        let flag_id = ctx.allocate_processor_id();
        ctx.document.set_content_flag(flag_id, ContentFlag::SignedContent);

        self.processed.insert(reference_index);
        self.active.push(ReferenceVerifier {
            reference_index,
            uri: reference.uri.clone().unwrap_or_default(),
            expected_digest: reference.expected_digest.clone(),
            digest_algorithm_uri: reference.digest_algorithm_uri.clone(),
            chain,
            opening_name: element.name.clone(),
            depth: 0,
            flag_id,
        });
        Ok(())
    }

    fn feed_verifiers(
        &mut self,
        tagged: &TaggedEvent,
        ctx: &mut InboundContext,
    ) -> Result<(), XmlSecurityError> {
        let mut completed: Vec<usize> = Vec::new();
        for (slot, verifier) in self.active.iter_mut().enumerate() {
            if verifier.process(tagged, ctx)? {
                completed.push(slot);
            }
        }
        for (removed, slot) in completed.into_iter().enumerate() {
            let verifier = self.active.remove(slot - removed);
            self.set_outcome(ctx, verifier.reference_index, ReferenceOutcome::Verified);
        }
        Ok(())
    }
}

impl InboundProcessor for ReferenceVerifierManager {
    fn processor_id(&self) -> ProcessorId {
        self.id
    }

    fn process_event(
        &mut self,
        event: &TaggedEvent,
        ctx: &mut InboundContext,
        out: &mut Vec<TaggedEvent>,
        _actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError> {
        match &event.event {
            XmlEvent::StartElement(element) => {
                let element = element.clone();
                self.match_element(&element, ctx)?;
                self.element_stack.push(element);
                self.feed_verifiers(event, ctx)?;
            }
            XmlEvent::EndElement { .. } => {
                self.feed_verifiers(event, ctx)?;
                self.element_stack.pop();
            }
            _ => {
                self.feed_verifiers(event, ctx)?;
            }
        }
        out.push(event.clone());
        Ok(())
    }

    fn finish(
        &mut self,
        ctx: &mut InboundContext,
        _actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError> {
        if let Some(verifier) = self.active.first() {
            return Err(XmlSecurityError::UnprocessedReference(format!(
                "signed subtree for reference '{}' never closed",
                verifier.uri
            )));
        }
        for (index, reference) in self.references.iter().enumerate() {
            if !self.processed.contains(&index) {
                return Err(XmlSecurityError::UnprocessedReference(format!(
                    "reference {} ('{}') matched no element",
                    index,
                    reference.uri.as_deref().unwrap_or_default()
                )));
            }
        }

        let statuses = ctx
            .signature_results
            .get(self.signature_index)
            .map(|r| r.reference_statuses.clone())
            .unwrap_or_default();
        if let Some(result) = ctx.signature_results.get_mut(self.signature_index) {
            result.verified = true;
        }
        ctx.bus.dispatch(&SecurityEvent::verification_outcome(
            true,
            statuses,
            self.signature_id.clone(),
        ));
        ctx.record_action(XmlSecAction::Signature);
        debug!(signature = ?self.signature_id, "signature references verified");
        Ok(())
    }
}
