// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! Shared utilities for the integration tests: a minimal fragment parser
//! covering the canonical XML the engine emits (the production boundary is
//! supplied by the integrating application), event builders, and a
//! recording security-event listener.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use xmlsec_stream::config::FragmentParser;
use xmlsec_stream::domain::events::{SecurityEvent, SecurityEventListener};
use xmlsec_stream::domain::value_objects::{
    Attribute, NamespaceDecl, QName, StartElementEvent, XmlEvent, NS_XML,
};
use xmlsec_stream::domain::XmlSecurityError;

/// Routes engine tracing into the test harness output. Every integration
/// test calls this first; initialization happens once per process and
/// later calls are no-ops.
pub fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Parses the canonical-XML subset the engine's serializer produces:
/// elements, attributes, namespace declarations, text, and comments.
pub struct SimpleFragmentParser;

impl FragmentParser for SimpleFragmentParser {
    fn parse_fragment(&self, bytes: &[u8]) -> Result<Vec<XmlEvent>, XmlSecurityError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| XmlSecurityError::SerializationError(format!("not UTF-8: {}", e)))?;
        parse_events(text)
    }
}

struct NsScope {
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NsScope {
    fn lookup(&self, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(NS_XML.to_string());
        }
        for frame in self.frames.iter().rev() {
            if let Some((_, uri)) = frame
                .iter()
                .rev()
                .find(|(p, _)| p.as_deref() == prefix)
            {
                if uri.is_empty() {
                    return None;
                }
                return Some(uri.clone());
            }
        }
        None
    }
}

/// Event-stream parser for canonical fragments.
pub fn parse_events(text: &str) -> Result<Vec<XmlEvent>, XmlSecurityError> {
    let bytes = text.as_bytes();
    let mut events = Vec::new();
    let mut scope = NsScope { frames: Vec::new() };
    let mut open: Vec<QName> = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            if text[i..].starts_with("<!--") {
                let end = text[i + 4..].find("-->").ok_or_else(|| malformed("comment"))?;
                events.push(XmlEvent::Comment(text[i + 4..i + 4 + end].to_string()));
                i += 4 + end + 3;
            } else if bytes.get(i + 1) == Some(&b'/') {
                let end = text[i..].find('>').ok_or_else(|| malformed("end tag"))?;
                let name = open.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                scope.frames.pop();
                events.push(XmlEvent::end(name));
                i += end + 1;
            } else {
                let (tag_end, element) = parse_start_tag(text, i, &mut scope)?;
                open.push(element.name.clone());
                events.push(XmlEvent::StartElement(element));
                i = tag_end;
            }
        } else {
            let end = text[i..].find('<').map(|o| i + o).unwrap_or(bytes.len());
            let raw = &text[i..end];
            if !raw.is_empty() {
                events.push(XmlEvent::text(unescape(raw)?));
            }
            i = end;
        }
    }
    if !open.is_empty() {
        return Err(malformed("unclosed element"));
    }
    Ok(events)
}

fn parse_start_tag(
    text: &str,
    start: usize,
    scope: &mut NsScope,
) -> Result<(usize, StartElementEvent), XmlSecurityError> {
    let bytes = text.as_bytes();
    let mut i = start + 1;

    let name_start = i;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
        i += 1;
    }
    let lexical_name = &text[name_start..i];

    // Raw attributes; '>' inside quoted values is respected.
    let mut raw_attrs: Vec<(String, String)> = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(malformed("start tag"));
        }
        if bytes[i] == b'>' {
            i += 1;
            break;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' {
            i += 1;
        }
        let key = text[key_start..i].to_string();
        i += 1; // '='
        if bytes.get(i) != Some(&b'"') {
            return Err(malformed("attribute value"));
        }
        i += 1;
        let value_start = i;
        while i < bytes.len() && bytes[i] != b'"' {
            i += 1;
        }
        let value = unescape(&text[value_start..i])?;
        i += 1; // closing quote
        raw_attrs.push((key, value));
    }

    // Namespace declarations open this element's scope frame.
    let mut frame: Vec<(Option<String>, String)> = Vec::new();
    for (key, value) in &raw_attrs {
        if key == "xmlns" {
            frame.push((None, value.clone()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            frame.push((Some(prefix.to_string()), value.clone()));
        }
    }
    scope.frames.push(frame.clone());

    let name = resolve_name(lexical_name, scope, true)?;
    let mut attributes = Vec::new();
    for (key, value) in &raw_attrs {
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        attributes.push(Attribute::new(resolve_name(key, scope, false)?, value.clone()));
    }
    let namespaces = frame
        .into_iter()
        .map(|(prefix, uri)| NamespaceDecl {
            prefix,
            uri,
        })
        .collect();

    Ok((
        i,
        StartElementEvent {
            name,
            attributes,
            namespaces,
        },
    ))
}

fn resolve_name(
    lexical: &str,
    scope: &NsScope,
    use_default_ns: bool,
) -> Result<QName, XmlSecurityError> {
    match lexical.split_once(':') {
        Some((prefix, local)) => {
            let uri = scope
                .lookup(Some(prefix))
                .ok_or_else(|| malformed("unbound prefix"))?;
            Ok(QName::with_prefix(uri, prefix, local))
        }
        None => {
            if use_default_ns {
                if let Some(uri) = scope.lookup(None) {
                    return Ok(QName::new(uri, lexical));
                }
            }
            Ok(QName::local(lexical))
        }
    }
}

fn unescape(raw: &str) -> Result<String, XmlSecurityError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let end = tail.find(';').ok_or_else(|| malformed("entity"))?;
        match &tail[..end + 1] {
            "&amp;" => out.push('&'),
            "&lt;" => out.push('<'),
            "&gt;" => out.push('>'),
            "&quot;" => out.push('"'),
            "&apos;" => out.push('\''),
            "&#xD;" => out.push('\r'),
            "&#xA;" => out.push('\n'),
            "&#x9;" => out.push('\t'),
            other => return Err(malformed(&format!("entity {}", other))),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn malformed(what: &str) -> XmlSecurityError {
    XmlSecurityError::SerializationError(format!("malformed fragment: {}", what))
}

// ---------------------------------------------------------------------------
// Event builders and listeners
// ---------------------------------------------------------------------------

/// A start element with local name and attributes.
pub fn start_local(name: &str, attrs: &[(&str, &str)]) -> XmlEvent {
    XmlEvent::StartElement(
        StartElementEvent::new(QName::local(name)).with_attributes(
            attrs
                .iter()
                .map(|(k, v)| Attribute::new(QName::local(*k), *v))
                .collect(),
        ),
    )
}

pub fn end_local(name: &str) -> XmlEvent {
    XmlEvent::end(QName::local(name))
}

/// Records every dispatched security event.
#[derive(Default)]
pub struct RecordingListener {
    pub events: RefCell<Vec<SecurityEvent>>,
}

impl SecurityEventListener for RecordingListener {
    fn on_security_event(&self, event: &SecurityEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

impl RecordingListener {
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The parser round-trips the canonical forms the engine emits.
    #[test]
    fn test_parse_canonical_fragment() {
        let events =
            parse_events("<a:Doc xmlns:a=\"urn:a\" x=\"1&amp;2\">hi<Child></Child></a:Doc>")
                .unwrap();
        assert_eq!(events.len(), 5);
        let start = events[0].as_start().unwrap();
        assert!(start.name.is("urn:a", "Doc"));
        assert_eq!(start.attribute_local("x"), Some("1&2"));
        assert!(matches!(&events[1], XmlEvent::Text(t) if t == "hi"));
        let child = events[2].as_start().unwrap();
        assert_eq!(child.name.local_name(), "Child");
        assert!(child.name.namespace_uri().is_none());

        let err = parse_events("<A>");
        assert!(err.is_err());
    }

    /// Escaped characters round-trip through text content.
    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a&lt;b&amp;c&#xA;").unwrap(), "a<b&c\n");
        assert!(unescape("&bogus;").is_err());
    }
}
