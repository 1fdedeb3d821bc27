// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Document Context
//!
//! Per-document mutable state threaded through the processor chains: base
//! URI, declared encoding, the live element stack (from which ancestor
//! paths and in-scope namespace bindings are derived lazily), and the
//! signed/encrypted content flags.
//!
//! Content flags are keyed by the processor that established them, so a
//! flag lifts exactly when its establishing processor leaves the chain.
//! Nested signatures therefore stack cleanly: each verifier marks its own
//! scope and removing one verifier never disturbs another's flag.

use crate::value_objects::{ElementPath, StartElementEvent};

/// Identity of a processor within one document's chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorId(pub u64);

/// The kind of protected scope a processor established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFlag {
    SignedContent,
    EncryptedContent,
}

/// Per-document mutable state.
#[derive(Default)]
pub struct DocumentContext {
    base_uri: Option<String>,
    encoding: Option<String>,
    element_stack: Vec<StartElementEvent>,
    content_flags: Vec<(ProcessorId, ContentFlag)>,
}

impl DocumentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    pub fn set_encoding(&mut self, encoding: Option<String>) {
        self.encoding = encoding;
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Pushes the element a start event opened. Maintained by the inbound
    /// chain, one push per start-element.
    pub fn push_element(&mut self, element: StartElementEvent) {
        self.element_stack.push(element);
    }

    pub fn pop_element(&mut self) -> Option<StartElementEvent> {
        self.element_stack.pop()
    }

    /// The open elements from the document element downwards.
    pub fn ancestors(&self) -> &[StartElementEvent] {
        &self.element_stack
    }

    /// Derives the current element path from the stack. Paths are built on
    /// demand; events never carry them eagerly.
    pub fn current_path(&self) -> ElementPath {
        ElementPath::new(self.element_stack.iter().map(|e| e.name.clone()).collect())
    }

    pub fn depth(&self) -> usize {
        self.element_stack.len()
    }

    /// Marks the current scope as signed/encrypted on behalf of a
    /// processor.
    pub fn set_content_flag(&mut self, processor: ProcessorId, flag: ContentFlag) {
        self.content_flags.push((processor, flag));
    }

    /// Lifts every flag a processor established. Called when the processor
    /// leaves the chain.
    pub fn clear_content_flags(&mut self, processor: ProcessorId) {
        self.content_flags.retain(|(pid, _)| *pid != processor);
    }

    pub fn in_signed_content(&self) -> bool {
        self.content_flags
            .iter()
            .any(|(_, f)| *f == ContentFlag::SignedContent)
    }

    pub fn in_encrypted_content(&self) -> bool {
        self.content_flags
            .iter()
            .any(|(_, f)| *f == ContentFlag::EncryptedContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::QName;

    /// Tests flag stacking keyed by processor identity.
    #[test]
    fn test_flags_lift_per_processor() {
        let mut ctx = DocumentContext::new();
        let outer = ProcessorId(1);
        let inner = ProcessorId(2);

        ctx.set_content_flag(outer, ContentFlag::SignedContent);
        ctx.set_content_flag(inner, ContentFlag::SignedContent);
        assert!(ctx.in_signed_content());

        // The inner verifier leaves; the outer flag must survive.
        ctx.clear_content_flags(inner);
        assert!(ctx.in_signed_content());

        ctx.clear_content_flags(outer);
        assert!(!ctx.in_signed_content());
    }

    /// Tests lazy path derivation from the element stack.
    #[test]
    fn test_path_from_stack() {
        let mut ctx = DocumentContext::new();
        ctx.push_element(StartElementEvent::new(QName::new("urn:t", "Envelope")));
        ctx.push_element(StartElementEvent::new(QName::new("urn:t", "Body")));
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.current_path().to_string(), "/{urn:t}Envelope/{urn:t}Body");
        ctx.pop_element();
        assert_eq!(ctx.current_path().depth(), 1);
    }
}
