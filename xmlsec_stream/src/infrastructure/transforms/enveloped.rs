// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Enveloped-Signature Transform
//!
//! Removes the signature being verified from its own digest input. Events
//! are tagged at capture time with the index of the signature structure
//! they belong to; this stage drops exactly the events originating from the
//! signature that owns the chain, so sibling signatures are preserved in
//! each other's digests.

use xmlsec_stream_domain::services::{TransformBuffer, TransformContext, TransformShape, TransformStage};
use xmlsec_stream_domain::value_objects::XmlEvent;
use xmlsec_stream_domain::XmlSecurityError;

/// Event-to-event stage excluding the owning signature's subtree.
#[derive(Debug, Default)]
pub struct EnvelopedSignatureStage;

impl TransformStage for EnvelopedSignatureStage {
    fn input_shape(&self) -> TransformShape {
        TransformShape::Events
    }

    fn output_shape(&self) -> TransformShape {
        TransformShape::Events
    }

    fn push_event(
        &mut self,
        event: &XmlEvent,
        ctx: &TransformContext,
        out: &mut TransformBuffer,
    ) -> Result<(), XmlSecurityError> {
        let excluded = match (ctx.owning_signature, ctx.origin_signature) {
            (Some(owner), Some(origin)) => owner == origin,
            _ => false,
        };
        if !excluded {
            out.events.push(event.clone());
        }
        Ok(())
    }
}
