// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Inbound Processor Chain
//!
//! The ordered pipeline of inbound handlers. Each source event flows
//! through the processors in chain order; a processor forwards, rewrites,
//! consumes, or expands the event, and may request chain mutations (adding
//! or removing processors). Mutations requested during a pass are applied
//! between events, so the chain is never mutated while it is being
//! iterated; newly added processors see events from the next pass onward,
//! after optionally receiving a replay of already-delivered events.
//!
//! Events are tagged with the index of the captured signature structure
//! they belong to (if any); the tag drives the enveloped-signature
//! exclusion during reference digesting.

use std::collections::VecDeque;
use std::rc::Rc;

use xmlsec_stream_domain::entities::{DocumentContext, ProcessorId, TokenArena};
use xmlsec_stream_domain::events::SecurityEventBus;
use xmlsec_stream_domain::services::TokenProviderRegistry;
use xmlsec_stream_domain::value_objects::{ReferenceStatus, XmlEvent};
use xmlsec_stream_domain::XmlSecurityError;

use crate::config::{InboundSecurityProperties, XmlSecAction};

/// Pull boundary to the XML parser. The engine assumes a parser exists; it
/// never parses markup itself.
pub trait EventSource {
    /// The next document event, or `None` at end of input.
    fn next_event(&mut self) -> Result<Option<XmlEvent>, XmlSecurityError>;
}

/// An in-memory event source, used by tests and replayed fragments.
pub struct VecEventSource {
    events: VecDeque<XmlEvent>,
}

impl VecEventSource {
    pub fn new(events: Vec<XmlEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

impl EventSource for VecEventSource {
    fn next_event(&mut self) -> Result<Option<XmlEvent>, XmlSecurityError> {
        Ok(self.events.pop_front())
    }
}

/// An event with its capture provenance.
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub event: XmlEvent,
    /// Index of the captured signature structure this event belongs to.
    pub origin_signature: Option<usize>,
}

impl TaggedEvent {
    pub fn plain(event: XmlEvent) -> Self {
        Self {
            event,
            origin_signature: None,
        }
    }
}

/// Terminal verdict bookkeeping for one signature. Serializable for audit
/// sinks.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignatureResult {
    pub signature_id: Option<String>,
    pub verified: bool,
    pub reference_statuses: Vec<ReferenceStatus>,
}

/// Everything the inbound processors share for one document.
pub struct InboundContext {
    pub document: DocumentContext,
    pub arena: TokenArena,
    pub providers: Rc<TokenProviderRegistry>,
    pub bus: Rc<SecurityEventBus>,
    pub properties: Rc<InboundSecurityProperties>,
    pub performed_actions: Vec<XmlSecAction>,
    pub signature_results: Vec<SignatureResult>,
    next_processor_id: u64,
}

impl InboundContext {
    pub fn new(properties: Rc<InboundSecurityProperties>) -> Self {
        let bus = Rc::new(SecurityEventBus::new());
        for listener in &properties.listeners {
            bus.register(Rc::clone(listener));
        }
        let mut document = DocumentContext::new();
        if let Some(base) = &properties.base_uri {
            document = document.with_base_uri(base.clone());
        }
        Self {
            document,
            arena: TokenArena::new(Rc::clone(&bus)),
            providers: Rc::new(TokenProviderRegistry::new()),
            bus,
            properties,
            performed_actions: Vec::new(),
            signature_results: Vec::new(),
            next_processor_id: 1,
        }
    }

    pub fn record_action(&mut self, action: XmlSecAction) {
        if !self.performed_actions.contains(&action) {
            self.performed_actions.push(action);
        }
    }

    /// Allocates a processor identity. One namespace covers chain
    /// processors and reference verifiers, so content-flag keys never
    /// collide.
    pub fn allocate_processor_id(&mut self) -> ProcessorId {
        let id = ProcessorId(self.next_processor_id);
        self.next_processor_id += 1;
        id
    }
}

/// Chain mutations a processor may request during a pass.
#[derive(Default)]
pub struct ChainActions {
    additions: Vec<(Box<dyn InboundProcessor>, Vec<TaggedEvent>)>,
    removals: Vec<ProcessorId>,
}

impl ChainActions {
    /// Appends a processor after the current pass. `replay` events are
    /// delivered to the new processor alone before it sees live events.
    pub fn add_processor(&mut self, processor: Box<dyn InboundProcessor>, replay: Vec<TaggedEvent>) {
        self.additions.push((processor, replay));
    }

    /// Removes a processor after the current pass; its content flags lift
    /// with it.
    pub fn remove_processor(&mut self, id: ProcessorId) {
        self.removals.push(id);
    }
}

/// One inbound handler.
pub trait InboundProcessor {
    fn processor_id(&self) -> ProcessorId;

    /// Handles one event. Forwarding means pushing (a possibly rewritten
    /// copy of) the event into `out`; consuming means pushing nothing;
    /// expanding means pushing several events.
    fn process_event(
        &mut self,
        event: &TaggedEvent,
        ctx: &mut InboundContext,
        out: &mut Vec<TaggedEvent>,
        actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError>;

    /// Called once after the last document event.
    fn finish(
        &mut self,
        ctx: &mut InboundContext,
        actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError> {
        let _ = (ctx, actions);
        Ok(())
    }
}

/// The ordered inbound chain with deferred mutation.
pub struct InboundProcessorChain {
    processors: Vec<Box<dyn InboundProcessor>>,
}

impl Default for InboundProcessorChain {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundProcessorChain {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// Installs a processor at the end of the chain, outside a pass.
    pub fn push_processor(&mut self, processor: Box<dyn InboundProcessor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Threads one source event through the chain and returns the events
    /// that reach the application.
    pub fn process(
        &mut self,
        event: XmlEvent,
        ctx: &mut InboundContext,
    ) -> Result<Vec<XmlEvent>, XmlSecurityError> {
        if let XmlEvent::StartDocument { encoding, .. } = &event {
            ctx.document.set_encoding(encoding.clone());
        }

        let mut actions = ChainActions::default();
        let mut current = vec![TaggedEvent::plain(event)];
        let result = self.run_pass(&mut current, ctx, &mut actions);
        self.apply_actions(actions, ctx)?;
        result?;
        Ok(current.into_iter().map(|t| t.event).collect())
    }

    fn run_pass(
        &mut self,
        current: &mut Vec<TaggedEvent>,
        ctx: &mut InboundContext,
        actions: &mut ChainActions,
    ) -> Result<(), XmlSecurityError> {
        for processor in self.processors.iter_mut() {
            let incoming = std::mem::take(current);
            for tagged in &incoming {
                processor.process_event(tagged, ctx, current, actions)?;
            }
        }
        Ok(())
    }

    fn apply_actions(
        &mut self,
        actions: ChainActions,
        ctx: &mut InboundContext,
    ) -> Result<(), XmlSecurityError> {
        for id in actions.removals {
            self.processors.retain(|p| p.processor_id() != id);
            ctx.document.clear_content_flags(id);
        }
        for (mut processor, replay) in actions.additions {
            let mut nested = ChainActions::default();
            for tagged in &replay {
                let mut discard = Vec::new();
                processor.process_event(tagged, ctx, &mut discard, &mut nested)?;
            }
            self.processors.push(processor);
            // A replay may itself request mutations (a verifier finishing
            // inside the replayed prefix).
            self.apply_actions(nested, ctx)?;
        }
        Ok(())
    }

    /// Finishes all processors after the last event.
    pub fn finish(&mut self, ctx: &mut InboundContext) -> Result<(), XmlSecurityError> {
        let mut actions = ChainActions::default();
        for processor in self.processors.iter_mut() {
            processor.finish(ctx, &mut actions)?;
        }
        self.apply_actions(actions, ctx)?;
        Ok(())
    }
}
