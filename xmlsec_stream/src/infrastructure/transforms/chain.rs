// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Transform Chain
//!
//! Builds and drives the composable transform chain of one reference: the
//! declared transforms in declaration order, terminating in a digest sink.
//! The head stage consumes what the reference produces (parse events for
//! same-document references, raw bytes for external ones); every stage
//! output feeds the next stage and the final bytes feed the sink.
//!
//! ## Defaulting Rules
//!
//! - A reference declaring no transforms canonicalizes with Canonical XML
//!   1.0 omitting comments.
//! - A reference whose sole transform is the enveloped-signature transform
//!   gets a Canonical XML 1.0 omit-comments stage appended after it.
//! - InclusiveNamespaces prefix lists are handed to exclusive
//!   canonicalization; an absent list means the empty list.

use xmlsec_stream_domain::services::algorithm_registry::{
    AlgorithmFamily, AlgorithmRegistry, ALG_C14N_OMIT_COMMENTS, ALG_TRANSFORM_ENVELOPED,
};
use xmlsec_stream_domain::services::{
    validate_chain_shapes, TransformBuffer, TransformContext, TransformShape, TransformStage,
};
use xmlsec_stream_domain::value_objects::{ReferenceSpec, TransformSpec, XmlEvent};
use xmlsec_stream_domain::XmlSecurityError;

use crate::infrastructure::adapters::digest::DigestSink;
use crate::infrastructure::transforms::canonicalizer::{AncestorScope, CanonicalXmlStage};
use crate::infrastructure::transforms::enveloped::EnvelopedSignatureStage;

/// A reference's transform chain, terminating in its digest sink.
pub struct TransformChain {
    stages: Vec<Box<dyn TransformStage>>,
    sink: DigestSink,
    base_ctx: TransformContext,
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("stages", &self.stages.len())
            .field("base_ctx", &self.base_ctx)
            .finish_non_exhaustive()
    }
}

impl TransformChain {
    /// Builds the chain for a same-document reference (event producer).
    pub fn for_reference(
        reference: &ReferenceSpec,
        owning_signature: Option<usize>,
        ancestors: AncestorScope,
    ) -> Result<Self, XmlSecurityError> {
        let stages = build_stages(&reference.transforms, &ancestors)?;
        Self::assemble(reference, stages, TransformShape::Events, owning_signature)
    }

    /// Builds the chain for an external reference (byte producer). External
    /// references typically declare no transforms; a declared chain must
    /// start with a byte-consuming stage.
    pub fn for_external_reference(reference: &ReferenceSpec) -> Result<Self, XmlSecurityError> {
        let stages: Vec<Box<dyn TransformStage>> = if reference.transforms.is_empty() {
            Vec::new()
        } else {
            build_declared_stages(&reference.transforms, &AncestorScope::default())?
        };
        Self::assemble(reference, stages, TransformShape::Bytes, None)
    }

    fn assemble(
        reference: &ReferenceSpec,
        stages: Vec<Box<dyn TransformStage>>,
        producer: TransformShape,
        owning_signature: Option<usize>,
    ) -> Result<Self, XmlSecurityError> {
        let refs: Vec<&dyn TransformStage> = stages.iter().map(|s| s.as_ref()).collect();
        validate_chain_shapes(producer, &refs)?;
        let sink = DigestSink::for_uri(&reference.digest_algorithm_uri)?;
        let base_ctx = TransformContext {
            owning_signature,
            origin_signature: None,
        };
        Ok(Self {
            stages,
            sink,
            base_ctx,
        })
    }

    /// Pushes one event through the chain. `origin_signature` tags events
    /// captured from a signature structure, which the enveloped transform
    /// excludes when it matches the chain's owner.
    pub fn push_event(
        &mut self,
        event: &XmlEvent,
        origin_signature: Option<usize>,
    ) -> Result<(), XmlSecurityError> {
        let ctx = self.base_ctx.with_origin(origin_signature);
        self.propagate(0, vec![event.clone()], Vec::new(), &ctx)
    }

    /// Pushes raw bytes through the chain (external references).
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), XmlSecurityError> {
        let ctx = self.base_ctx;
        self.propagate(0, Vec::new(), bytes.to_vec(), &ctx)
    }

    /// Flushes every stage and closes the sink, yielding the digest.
    pub fn finish(&mut self) -> Result<Vec<u8>, XmlSecurityError> {
        let ctx = self.base_ctx;
        for index in 0..self.stages.len() {
            let mut out = TransformBuffer::default();
            self.stages[index].finish(&mut out)?;
            if !out.is_empty() {
                self.propagate(index + 1, out.events, out.bytes, &ctx)?;
            }
        }
        self.sink.close()
    }

    fn propagate(
        &mut self,
        start: usize,
        mut events: Vec<XmlEvent>,
        mut bytes: Vec<u8>,
        ctx: &TransformContext,
    ) -> Result<(), XmlSecurityError> {
        for index in start..self.stages.len() {
            let stage = &mut self.stages[index];
            let mut out = TransformBuffer::default();
            match stage.input_shape() {
                TransformShape::Events => {
                    for event in &events {
                        stage.push_event(event, ctx, &mut out)?;
                    }
                }
                TransformShape::Bytes => {
                    if !bytes.is_empty() {
                        stage.push_bytes(&bytes, &mut out)?;
                    }
                }
            }
            events = out.events;
            bytes = out.bytes;
        }
        if !bytes.is_empty() {
            self.sink.update(&bytes)?;
        }
        Ok(())
    }
}

/// Builds stages for a same-document reference, applying the defaulting
/// rules.
fn build_stages(
    transforms: &[TransformSpec],
    ancestors: &AncestorScope,
) -> Result<Vec<Box<dyn TransformStage>>, XmlSecurityError> {
    if transforms.is_empty() {
        return Ok(vec![Box::new(CanonicalXmlStage::for_uri(
            ALG_C14N_OMIT_COMMENTS,
            Vec::new(),
            ancestors.clone(),
        )?)]);
    }
    let mut stages = build_declared_stages(transforms, ancestors)?;
    if transforms.len() == 1 && transforms[0].algorithm_uri == ALG_TRANSFORM_ENVELOPED {
        stages.push(Box::new(CanonicalXmlStage::for_uri(
            ALG_C14N_OMIT_COMMENTS,
            Vec::new(),
            ancestors.clone(),
        )?));
    }
    Ok(stages)
}

fn build_declared_stages(
    transforms: &[TransformSpec],
    ancestors: &AncestorScope,
) -> Result<Vec<Box<dyn TransformStage>>, XmlSecurityError> {
    let registry = AlgorithmRegistry::global()?;
    let mut stages: Vec<Box<dyn TransformStage>> = Vec::with_capacity(transforms.len() + 1);
    for spec in transforms {
        let entry = registry.lookup(&spec.algorithm_uri)?;
        match entry.family {
            AlgorithmFamily::Transform if spec.algorithm_uri == ALG_TRANSFORM_ENVELOPED => {
                stages.push(Box::new(EnvelopedSignatureStage));
            }
            AlgorithmFamily::Canonicalization => {
                stages.push(Box::new(CanonicalXmlStage::for_uri(
                    &spec.algorithm_uri,
                    spec.inclusive_namespace_prefixes.clone(),
                    ancestors.clone(),
                )?));
            }
            _ => {
                return Err(XmlSecurityError::transform_error(format!(
                    "algorithm '{}' is not a streamable transform",
                    spec.algorithm_uri
                )));
            }
        }
    }
    Ok(stages)
}

/// Canonicalizes a captured event sequence to bytes, outside any digest
/// chain. Used for SignedInfo signing and verification.
pub fn canonicalize_to_bytes(
    algorithm_uri: &str,
    inclusive_prefixes: Vec<String>,
    ancestors: AncestorScope,
    events: &[XmlEvent],
) -> Result<Vec<u8>, XmlSecurityError> {
    let mut stage = CanonicalXmlStage::for_uri(algorithm_uri, inclusive_prefixes, ancestors)?;
    let mut buffer = TransformBuffer::default();
    let ctx = TransformContext::default();
    for event in events {
        stage.push_event(event, &ctx, &mut buffer)?;
    }
    let mut tail = TransformBuffer::default();
    stage.finish(&mut tail)?;
    buffer.bytes.extend_from_slice(&tail.bytes);
    Ok(buffer.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use xmlsec_stream_domain::services::algorithm_registry::{
        ALG_EXCL_C14N_OMIT_COMMENTS, ALG_SHA256,
    };
    use xmlsec_stream_domain::value_objects::{QName, StartElementEvent};

    fn reference(transforms: Vec<TransformSpec>) -> ReferenceSpec {
        ReferenceSpec {
            uri: Some("#x".to_string()),
            type_uri: None,
            digest_algorithm_uri: ALG_SHA256.to_string(),
            expected_digest: Vec::new(),
            transforms,
        }
    }

    fn simple_events() -> Vec<XmlEvent> {
        vec![
            XmlEvent::start(StartElementEvent::new(QName::local("E"))),
            XmlEvent::text("x"),
            XmlEvent::end(QName::local("E")),
        ]
    }

    /// No declared transforms: the default c14n 1.0 omit-comments stage
    /// digests the canonical form.
    #[test]
    fn test_default_canonicalization() {
        let mut chain =
            TransformChain::for_reference(&reference(vec![]), None, AncestorScope::default())
                .unwrap();
        for event in simple_events() {
            chain.push_event(&event, None).unwrap();
        }
        let digest = chain.finish().unwrap();
        assert_eq!(digest, Sha256::digest(b"<E>x</E>").to_vec());
    }

    /// Sole enveloped transform: c14n 1.0 omit-comments is appended, in
    /// that order, and the owner's events vanish from the digest.
    #[test]
    fn test_enveloped_appends_canonicalization() {
        let specs = vec![TransformSpec::new(ALG_TRANSFORM_ENVELOPED)];
        let mut chain =
            TransformChain::for_reference(&reference(specs), Some(0), AncestorScope::default())
                .unwrap();

        chain
            .push_event(
                &XmlEvent::start(StartElementEvent::new(QName::local("E"))),
                None,
            )
            .unwrap();
        // A signature subtree tagged as origin 0 must not reach the digest.
        chain
            .push_event(
                &XmlEvent::start(StartElementEvent::new(QName::local("Sig"))),
                Some(0),
            )
            .unwrap();
        chain
            .push_event(&XmlEvent::end(QName::local("Sig")), Some(0))
            .unwrap();
        chain.push_event(&XmlEvent::end(QName::local("E")), None).unwrap();

        let digest = chain.finish().unwrap();
        assert_eq!(digest, Sha256::digest(b"<E></E>").to_vec());
    }

    /// A byte-consuming head is required for external references.
    #[test]
    fn test_external_chain_shapes() {
        // No transforms: raw bytes digest directly.
        let mut chain = TransformChain::for_external_reference(&reference(vec![])).unwrap();
        chain.push_bytes(b"payload").unwrap();
        assert_eq!(chain.finish().unwrap(), Sha256::digest(b"payload").to_vec());

        // An event-consuming head over a byte producer is invalid.
        let specs = vec![TransformSpec::new(ALG_EXCL_C14N_OMIT_COMMENTS)];
        assert!(TransformChain::for_external_reference(&reference(specs)).is_err());
    }

    /// Unknown transform URIs fail before any digest work.
    #[test]
    fn test_unknown_transform() {
        let specs = vec![TransformSpec::new("urn:unknown-transform")];
        let err = TransformChain::for_reference(&reference(specs), None, AncestorScope::default())
            .unwrap_err();
        assert!(matches!(err, XmlSecurityError::UnsupportedAlgorithm(_)));
    }
}
