// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # XML Event Model
//!
//! This module provides the parse-event value objects the whole engine is
//! built around. The engine never materializes a document tree: an inbound
//! document is a pull sequence of `XmlEvent`s, an outbound document is a push
//! sequence, and every cryptographic operation happens as a side effect of
//! events flowing through processor chains.
//!
//! ## Event Kinds
//!
//! - `StartDocument` / `EndDocument`: document boundaries, carrying the
//!   declared encoding
//! - `StartElement`: name, attributes, and the namespace declarations that
//!   appear lexically on the tag
//! - `EndElement`: name only
//! - `Text`, `Comment`, `ProcessingInstruction`
//!
//! ## Ancestor Chains
//!
//! Events do not carry their ancestor path eagerly. The inbound chain
//! maintains an element stack and derives `ElementPath` values on demand,
//! which avoids a per-event allocation on the hot path.

use crate::value_objects::QName;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// The XML namespace, bound implicitly to the `xml` prefix.
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

/// An attribute as it appeared on a start tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A namespace declaration appearing lexically on a start tag.
///
/// `prefix: None` is the default namespace declaration (`xmlns="..."`).
/// An empty URI undeclares the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

impl NamespaceDecl {
    pub fn new(prefix: Option<&str>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            uri: uri.into(),
        }
    }
}

/// A start-element event: name, attributes, and lexical namespace
/// declarations, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartElementEvent {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceDecl>,
}

impl StartElementEvent {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_namespaces(mut self, namespaces: Vec<NamespaceDecl>) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Finds an attribute by qualified name.
    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Finds an un-namespaced attribute by local name.
    pub fn attribute_local(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace_uri().is_none() && a.name.local_name() == local_name)
            .map(|a| a.value.as_str())
    }

    /// The id of this element, if it declares one.
    ///
    /// Recognizes `xml:id` plus the schema-conventional un-namespaced
    /// spellings `Id`, `ID` and `id`, in that order. Same-document reference
    /// matching is defined exclusively over this lookup.
    pub fn id_attribute(&self) -> Option<&str> {
        if let Some(v) = self
            .attributes
            .iter()
            .find(|a| a.name.is(NS_XML, "id"))
            .map(|a| a.value.as_str())
        {
            return Some(v);
        }
        for local in ["Id", "ID", "id"] {
            if let Some(v) = self.attribute_local(local) {
                return Some(v);
            }
        }
        None
    }
}

/// One parse event of a streamed XML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XmlEvent {
    StartDocument {
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    EndDocument,
    StartElement(StartElementEvent),
    EndElement {
        name: QName,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: Option<String>,
    },
}

impl XmlEvent {
    /// Convenience constructor for a start element.
    pub fn start(element: StartElementEvent) -> Self {
        XmlEvent::StartElement(element)
    }

    /// Convenience constructor for an end element.
    pub fn end(name: QName) -> Self {
        XmlEvent::EndElement { name }
    }

    /// Convenience constructor for character content.
    pub fn text(content: impl Into<String>) -> Self {
        XmlEvent::Text(content.into())
    }

    pub fn as_start(&self) -> Option<&StartElementEvent> {
        match self {
            XmlEvent::StartElement(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_start_of(&self, namespace_uri: &str, local_name: &str) -> bool {
        matches!(self, XmlEvent::StartElement(e) if e.name.is(namespace_uri, local_name))
    }

    pub fn is_end_of(&self, namespace_uri: &str, local_name: &str) -> bool {
        matches!(self, XmlEvent::EndElement { name } if name.is(namespace_uri, local_name))
    }
}

/// The ordered chain of element names from the document element down to an
/// event's enclosing element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ElementPath(Vec<QName>);

impl ElementPath {
    pub fn new(names: Vec<QName>) -> Self {
        Self(names)
    }

    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: QName) {
        self.0.push(name);
    }

    pub fn pop(&mut self) -> Option<QName> {
        self.0.pop()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> &[QName] {
        &self.0
    }

    pub fn leaf(&self) -> Option<&QName> {
        self.0.last()
    }
}

impl Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.0 {
            write!(f, "/{}", name)?;
        }
        Ok(())
    }
}
