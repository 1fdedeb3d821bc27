// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Inbound Reader
//!
//! The public pull API. `begin_inbound` wraps an event source with the
//! configured security processors; the application keeps pulling events
//! and all verification and decryption happens as a side effect. After
//! the source is exhausted, the per-document verdict is available from
//! `document_result`, and required inbound actions are enforced.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use xmlsec_stream_domain::value_objects::XmlEvent;
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::encrypted_key::DecryptionProcessor;
use crate::application::services::inbound_chain::{
    EventSource, InboundContext, InboundProcessorChain, SignatureResult,
};
use crate::application::services::signature_header::SignatureHeaderProcessor;
use crate::config::{InboundSecurityProperties, XmlSecAction};

/// The per-document verdict, available after the last event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentVerificationResult {
    /// `None` when the document carried no signature; otherwise whether
    /// every signature verified.
    pub signature_verified: Option<bool>,
    /// Per-signature results with per-reference status arrays, in
    /// declaration order.
    pub signatures: Vec<SignatureResult>,
    pub performed_actions: Vec<XmlSecAction>,
}

impl DocumentVerificationResult {
    /// Serializes the verdict for audit sinks.
    pub fn to_json(&self) -> Result<String, XmlSecurityError> {
        serde_json::to_string(self).map_err(|e| {
            XmlSecurityError::SerializationError(format!("verdict serialization: {}", e))
        })
    }
}

/// Builds an inbound reader over an event source.
pub fn begin_inbound(
    properties: InboundSecurityProperties,
    source: Box<dyn EventSource>,
) -> Result<InboundReader, XmlSecurityError> {
    properties.validate()?;
    let properties = Rc::new(properties);
    let mut ctx = InboundContext::new(Rc::clone(&properties));
    let mut chain = InboundProcessorChain::new();

    if properties.decrypt {
        let id = ctx.allocate_processor_id();
        chain.push_processor(Box::new(DecryptionProcessor::new(id)));
    }
    if properties.verify_signatures {
        let id = ctx.allocate_processor_id();
        chain.push_processor(Box::new(SignatureHeaderProcessor::new(id)));
    }
    debug!(processors = chain.len(), "inbound pipeline ready");

    Ok(InboundReader {
        source,
        chain,
        ctx,
        pending: VecDeque::new(),
        finished: false,
    })
}

/// Streaming reader; all cryptographic work happens inside `next_event`.
pub struct InboundReader {
    source: Box<dyn EventSource>,
    chain: InboundProcessorChain,
    ctx: InboundContext,
    pending: VecDeque<XmlEvent>,
    finished: bool,
}

impl InboundReader {
    /// The next application-visible event, or `None` at document end.
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>, XmlSecurityError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.source.next_event()? {
                None => {
                    self.finished = true;
                    self.chain.finish(&mut self.ctx)?;
                    self.enforce_required_actions()?;
                    return Ok(None);
                }
                Some(event) => {
                    // The ancestor stack reflects the source structure:
                    // popped before an end-element is processed, pushed
                    // after a start-element was processed.
                    if matches!(event, XmlEvent::EndElement { .. }) {
                        self.ctx.document.pop_element();
                    }
                    let start = event.as_start().cloned();
                    let outputs = self.chain.process(event, &mut self.ctx)?;
                    if let Some(start) = start {
                        self.ctx.document.push_element(start);
                    }
                    self.pending.extend(outputs);
                }
            }
        }
    }

    /// Drains the document, discarding events; useful when only the
    /// verdict matters.
    pub fn read_to_end(&mut self) -> Result<Vec<XmlEvent>, XmlSecurityError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    fn enforce_required_actions(&self) -> Result<(), XmlSecurityError> {
        for action in &self.ctx.properties.required_actions {
            if !self.ctx.performed_actions.contains(action) {
                return Err(XmlSecurityError::missing_element(format!(
                    "required action {:?} was not performed by the document",
                    action
                )));
            }
        }
        Ok(())
    }

    /// The verification verdict. Meaningful once `next_event` returned
    /// `None`.
    pub fn document_result(&self) -> DocumentVerificationResult {
        let signature_verified = if self.ctx.signature_results.is_empty() {
            None
        } else {
            Some(self.ctx.signature_results.iter().all(|s| s.verified))
        };
        DocumentVerificationResult {
            signature_verified,
            signatures: self.ctx.signature_results.clone(),
            performed_actions: self.ctx.performed_actions.clone(),
        }
    }
}
