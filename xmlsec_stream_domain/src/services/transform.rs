// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Transform Stage Ports
//!
//! Contracts for the composable byte-producing transform chain. Transforms
//! compose in declaration order: the first-declared transform receives the
//! producer's data and each stage feeds the next, with the final stage
//! emitting canonical bytes into a digest sink.
//!
//! Two input shapes exist: *event-consuming* stages take parse events,
//! *byte-consuming* stages take a byte stream. A chain is valid iff the
//! head matches the producer (events for in-document references, bytes for
//! external references) and every subsequent stage's input shape matches
//! the previous stage's output shape.

use crate::value_objects::XmlEvent;
use crate::XmlSecurityError;

/// The data shape a stage consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformShape {
    Events,
    Bytes,
}

/// Per-event context handed to event-consuming stages.
///
/// `origin_signature` tags events that belong to a captured signature
/// structure, identified by capture index; the enveloped-signature
/// transform excludes exactly the events originating from the signature
/// that owns its chain (`owning_signature`), so sibling signatures never
/// cross-exclude.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformContext {
    pub owning_signature: Option<usize>,
    pub origin_signature: Option<usize>,
}

impl TransformContext {
    pub fn for_signature(owning_signature: usize) -> Self {
        Self {
            owning_signature: Some(owning_signature),
            origin_signature: None,
        }
    }

    pub fn with_origin(mut self, origin_signature: Option<usize>) -> Self {
        self.origin_signature = origin_signature;
        self
    }
}

/// Output collector a stage writes into; the chain pumps it onward.
#[derive(Default)]
pub struct TransformBuffer {
    pub events: Vec<XmlEvent>,
    pub bytes: Vec<u8>,
}

impl TransformBuffer {
    pub fn clear(&mut self) {
        self.events.clear();
        self.bytes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.bytes.is_empty()
    }
}

/// One stage of a transform chain.
///
/// A stage implements the push method matching its input shape; pushing
/// the wrong shape is a chain-construction bug surfaced as a transform
/// error.
pub trait TransformStage {
    fn input_shape(&self) -> TransformShape;

    fn output_shape(&self) -> TransformShape;

    fn push_event(
        &mut self,
        event: &XmlEvent,
        ctx: &TransformContext,
        out: &mut TransformBuffer,
    ) -> Result<(), XmlSecurityError> {
        let _ = (event, ctx, out);
        Err(XmlSecurityError::transform_error(
            "stage does not consume events",
        ))
    }

    fn push_bytes(&mut self, bytes: &[u8], out: &mut TransformBuffer) -> Result<(), XmlSecurityError> {
        let _ = (bytes, out);
        Err(XmlSecurityError::transform_error(
            "stage does not consume bytes",
        ))
    }

    /// Flushes any buffered state. Called exactly once, after the last
    /// input.
    fn finish(&mut self, out: &mut TransformBuffer) -> Result<(), XmlSecurityError> {
        let _ = out;
        Ok(())
    }
}

/// Validates shape compatibility of a declared chain.
///
/// `producer` is the shape the reference produces (events for
/// same-document, bytes for external); the chain must end in bytes.
pub fn validate_chain_shapes(
    producer: TransformShape,
    stages: &[&dyn TransformStage],
) -> Result<(), XmlSecurityError> {
    let mut current = producer;
    for stage in stages {
        if stage.input_shape() != current {
            return Err(XmlSecurityError::transform_error(format!(
                "transform chain mismatch: stage expects {:?}, producer yields {:?}",
                stage.input_shape(),
                current
            )));
        }
        current = stage.output_shape();
    }
    if current != TransformShape::Bytes {
        return Err(XmlSecurityError::transform_error(
            "transform chain must terminate in bytes",
        ));
    }
    Ok(())
}
