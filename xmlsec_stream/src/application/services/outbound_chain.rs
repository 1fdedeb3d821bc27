// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Outbound Processor Chain
//!
//! The symmetric outbound pipeline: application-written events flow
//! through stacked handlers in emission order; each handler may emit,
//! buffer, or rewrite events before they reach the sink. Closing the
//! chain flushes the handlers front to back, each flush cascading through
//! the remainder of the chain. An error discards partially written
//! outbound state and propagates.

use std::rc::Rc;

use xmlsec_stream_domain::events::SecurityEventBus;
use xmlsec_stream_domain::value_objects::XmlEvent;
use xmlsec_stream_domain::XmlSecurityError;

/// Push boundary to the XML serializer.
pub trait EventSink {
    fn write_event(&mut self, event: &XmlEvent) -> Result<(), XmlSecurityError>;
}

/// An in-memory sink, used by tests and for re-processing pipelines.
#[derive(Default)]
pub struct VecEventSink {
    events: Vec<XmlEvent>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<XmlEvent> {
        self.events
    }
}

impl EventSink for VecEventSink {
    fn write_event(&mut self, event: &XmlEvent) -> Result<(), XmlSecurityError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Shared outbound state: the per-document event bus.
pub struct OutboundContext {
    pub bus: Rc<SecurityEventBus>,
}

/// One outbound handler.
pub trait OutputProcessor {
    /// Handles one event: push into `out` to emit (possibly rewritten),
    /// hold back to buffer, push several to expand.
    fn process_event(
        &mut self,
        event: XmlEvent,
        ctx: &mut OutboundContext,
        out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError>;

    /// Flushes buffered state when the chain closes.
    fn finish(
        &mut self,
        ctx: &mut OutboundContext,
        out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError> {
        let _ = (ctx, out);
        Ok(())
    }
}

/// Emission-ordered outbound chain over a sink.
pub struct OutboundProcessorChain<S: EventSink> {
    processors: Vec<Box<dyn OutputProcessor>>,
    sink: S,
}

impl<S: EventSink> OutboundProcessorChain<S> {
    pub fn new(processors: Vec<Box<dyn OutputProcessor>>, sink: S) -> Self {
        Self { processors, sink }
    }

    /// Threads one event through all processors into the sink.
    pub fn write(
        &mut self,
        event: XmlEvent,
        ctx: &mut OutboundContext,
    ) -> Result<(), XmlSecurityError> {
        let events = self.run_from(0, vec![event], ctx)?;
        for event in &events {
            self.sink.write_event(event)?;
        }
        Ok(())
    }

    fn run_from(
        &mut self,
        start: usize,
        mut current: Vec<XmlEvent>,
        ctx: &mut OutboundContext,
    ) -> Result<Vec<XmlEvent>, XmlSecurityError> {
        for processor in self.processors[start..].iter_mut() {
            let mut next = Vec::new();
            for event in current {
                processor.process_event(event, ctx, &mut next)?;
            }
            current = next;
        }
        Ok(current)
    }

    /// Flushes every processor and returns the sink.
    pub fn close(mut self, ctx: &mut OutboundContext) -> Result<S, XmlSecurityError> {
        for index in 0..self.processors.len() {
            let mut out = Vec::new();
            self.processors[index].finish(ctx, &mut out)?;
            let events = self.run_from(index + 1, out, ctx)?;
            for event in &events {
                self.sink.write_event(event)?;
            }
        }
        Ok(self.sink)
    }
}
