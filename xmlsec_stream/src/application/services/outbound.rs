// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Outbound Writer
//!
//! The public push API. `begin_outbound` stacks one processor per
//! configured action in emission order over the application's event sink;
//! signing and encryption happen as a side effect of writing events.
//! Closing the writer flushes the chain and surfaces any unfinished
//! state; on error, partially written outbound state is discarded with
//! the chain.

use std::rc::Rc;

use tracing::debug;

use xmlsec_stream_domain::events::SecurityEventBus;
use xmlsec_stream_domain::value_objects::XmlEvent;
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::encryption_writer::EncryptionOutputProcessor;
use crate::application::services::outbound_chain::{
    EventSink, OutboundContext, OutboundProcessorChain, OutputProcessor,
};
use crate::application::services::signature_writer::SignatureOutputProcessor;
use crate::config::{OutboundAction, OutboundSecurityProperties};

/// Builds an outbound writer over an event sink.
pub fn begin_outbound<S: EventSink>(
    properties: OutboundSecurityProperties,
    sink: S,
) -> Result<OutboundWriter<S>, XmlSecurityError> {
    properties.validate()?;

    let bus = Rc::new(SecurityEventBus::new());
    for listener in &properties.listeners {
        bus.register(Rc::clone(listener));
    }

    let mut processors: Vec<Box<dyn OutputProcessor>> = Vec::new();
    for action in properties.actions {
        match action {
            OutboundAction::Sign(config) => {
                processors.push(Box::new(SignatureOutputProcessor::new(config)?));
            }
            OutboundAction::Encrypt(config) => {
                processors.push(Box::new(EncryptionOutputProcessor::new(config)?));
            }
        }
    }
    debug!(processors = processors.len(), "outbound pipeline ready");

    Ok(OutboundWriter {
        chain: Some(OutboundProcessorChain::new(processors, sink)),
        ctx: OutboundContext { bus },
    })
}

/// Streaming writer; all cryptographic work happens inside `write_event`
/// and `close`.
pub struct OutboundWriter<S: EventSink> {
    chain: Option<OutboundProcessorChain<S>>,
    ctx: OutboundContext,
}

impl<S: EventSink> OutboundWriter<S> {
    pub fn write_event(&mut self, event: XmlEvent) -> Result<(), XmlSecurityError> {
        let chain = self
            .chain
            .as_mut()
            .ok_or_else(|| XmlSecurityError::io_error("outbound writer already closed"))?;
        chain.write(event, &mut self.ctx)
    }

    /// Flushes the pipeline and returns the sink.
    pub fn close(mut self) -> Result<S, XmlSecurityError> {
        let chain = self
            .chain
            .take()
            .ok_or_else(|| XmlSecurityError::io_error("outbound writer already closed"))?;
        chain.close(&mut self.ctx)
    }
}
