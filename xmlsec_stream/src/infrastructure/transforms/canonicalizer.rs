// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Canonical XML Serialization
//!
//! Event-consuming transform stages producing the byte-exact canonical
//! forms of Canonical XML 1.0/1.1 and Exclusive XML Canonicalization 1.0,
//! with and without comments. One stage implementation covers all six
//! URIs; the mode controls the namespace axis and the treatment of
//! excluded-ancestor `xml:*` attributes, while the character and ordering
//! rules are shared.
//!
//! ## Namespace Rendering
//!
//! The stage maintains the set of namespace declarations already rendered
//! by output ancestors. An element renders a binding when it differs from
//! that set:
//!
//! - **Inclusive** modes render every in-scope binding that differs,
//!   which makes the apex element emit its full inherited context.
//! - **Exclusive** mode renders only bindings whose prefixes are visibly
//!   utilized by the element itself (element prefix plus attribute
//!   prefixes) or listed in the InclusiveNamespaces prefix list.
//!
//! The `xml` prefix bound to its reserved URI is never rendered.
//!
//! ## Excluded-Ancestor `xml:*` Attributes
//!
//! The two inclusive generations treat the apex element's excluded
//! ancestors differently, per their recommendations:
//!
//! - **Canonical XML 1.0** imports every ancestor `xml:*` attribute
//!   verbatim, nearest ancestor winning.
//! - **Canonical XML 1.1** inherits only the simple inheritable
//!   attributes (`xml:lang`, `xml:space`), never inherits `xml:id`, and
//!   fixes up `xml:base`: the excluded ancestors' base values are joined
//!   front to back with the apex's own value using the RFC 3986
//!   reference-resolution algorithm, relaxed so that relative base URIs
//!   survive (leading `..` segments are preserved instead of discarded).
//!
//! Exclusive canonicalization imports nothing.
//!
//! ## Ordering and Escaping
//!
//! Namespace declarations sort by prefix with the default declaration
//! first; attributes sort by (namespace URI, local name) with unqualified
//! attributes first. Text escapes `&`, `<`, `>` and carriage returns;
//! attribute values escape `&`, `<`, `"`, tab, newline and carriage
//! return as character references.

use std::collections::{BTreeSet, HashMap};

use xmlsec_stream_domain::services::algorithm_registry::{
    ALG_C14N11_OMIT_COMMENTS, ALG_C14N11_WITH_COMMENTS, ALG_C14N_OMIT_COMMENTS,
    ALG_C14N_WITH_COMMENTS, ALG_EXCL_C14N_OMIT_COMMENTS, ALG_EXCL_C14N_WITH_COMMENTS,
};
use xmlsec_stream_domain::services::{TransformBuffer, TransformContext, TransformShape, TransformStage};
use xmlsec_stream_domain::value_objects::{
    Attribute, NamespaceDecl, QName, StartElementEvent, XmlEvent, NS_XML,
};
use xmlsec_stream_domain::XmlSecurityError;

/// Namespace-axis treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalMode {
    Inclusive,
    Inclusive11,
    Exclusive,
}

/// In-scope context of the excluded ancestors of a canonicalized subtree:
/// namespace bindings, `xml:*` attributes (nearest ancestor winning, for
/// the 1.0 import), and the ordered `xml:base` chain (outermost first,
/// for the 1.1 fixup).
#[derive(Debug, Clone, Default)]
pub struct AncestorScope {
    pub bindings: Vec<NamespaceDecl>,
    pub xml_attributes: Vec<Attribute>,
    pub xml_base_chain: Vec<String>,
}

impl AncestorScope {
    /// Derives the scope from the open-element stack above the apex,
    /// outermost first.
    pub fn from_ancestors(ancestors: &[StartElementEvent]) -> Self {
        let mut bindings: HashMap<Option<String>, String> = HashMap::new();
        let mut xml_attributes: HashMap<String, Attribute> = HashMap::new();
        let mut xml_base_chain: Vec<String> = Vec::new();
        for element in ancestors {
            for decl in &element.namespaces {
                bindings.insert(decl.prefix.clone(), decl.uri.clone());
            }
            for attr in &element.attributes {
                if attr.name.namespace_uri() == Some(NS_XML) {
                    if attr.name.local_name() == "base" {
                        xml_base_chain.push(attr.value.clone());
                    }
                    xml_attributes.insert(attr.name.local_name().to_string(), attr.clone());
                }
            }
        }
        let mut bindings: Vec<NamespaceDecl> = bindings
            .into_iter()
            .map(|(prefix, uri)| NamespaceDecl { prefix, uri })
            .collect();
        bindings.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        let mut xml_attributes: Vec<Attribute> = xml_attributes.into_values().collect();
        xml_attributes.sort_by(|a, b| a.name.local_name().cmp(b.name.local_name()));
        Self {
            bindings,
            xml_attributes,
            xml_base_chain,
        }
    }
}

/// Canonical XML serializer stage (events in, canonical bytes out).
pub struct CanonicalXmlStage {
    mode: CanonicalMode,
    with_comments: bool,
    inclusive_prefixes: Vec<String>,
    ancestors: AncestorScope,

    depth: usize,
    seen_document_element: bool,
    ns_frames: Vec<Vec<NamespaceDecl>>,
    rendered: HashMap<Option<String>, String>,
    rendered_undo: Vec<Vec<(Option<String>, Option<String>)>>,
}

impl CanonicalXmlStage {
    /// Creates a stage for one of the six canonicalization URIs.
    pub fn for_uri(
        algorithm_uri: &str,
        inclusive_prefixes: Vec<String>,
        ancestors: AncestorScope,
    ) -> Result<Self, XmlSecurityError> {
        let (mode, with_comments) = match algorithm_uri {
            ALG_C14N_OMIT_COMMENTS => (CanonicalMode::Inclusive, false),
            ALG_C14N_WITH_COMMENTS => (CanonicalMode::Inclusive, true),
            ALG_C14N11_OMIT_COMMENTS => (CanonicalMode::Inclusive11, false),
            ALG_C14N11_WITH_COMMENTS => (CanonicalMode::Inclusive11, true),
            ALG_EXCL_C14N_OMIT_COMMENTS => (CanonicalMode::Exclusive, false),
            ALG_EXCL_C14N_WITH_COMMENTS => (CanonicalMode::Exclusive, true),
            other => {
                return Err(XmlSecurityError::unsupported_algorithm(format!(
                    "'{}' is not a canonicalization algorithm",
                    other
                )));
            }
        };
        Ok(Self::new(mode, with_comments, inclusive_prefixes, ancestors))
    }

    pub fn new(
        mode: CanonicalMode,
        with_comments: bool,
        inclusive_prefixes: Vec<String>,
        ancestors: AncestorScope,
    ) -> Self {
        let mut rendered = HashMap::new();
        // The default namespace starts out "rendered as empty": an apex in
        // no default namespace emits nothing, an undeclaration is emitted
        // only below an ancestor that rendered a non-empty default.
        rendered.insert(None, String::new());
        Self {
            mode,
            with_comments,
            inclusive_prefixes,
            ancestors,
            depth: 0,
            seen_document_element: false,
            ns_frames: Vec::new(),
            rendered,
            rendered_undo: Vec::new(),
        }
    }

    fn in_scope_binding(&self, prefix: &Option<String>) -> Option<String> {
        for frame in self.ns_frames.iter().rev() {
            if let Some(decl) = frame.iter().rev().find(|d| &d.prefix == prefix) {
                return Some(decl.uri.clone());
            }
        }
        self.ancestors
            .bindings
            .iter()
            .find(|d| &d.prefix == prefix)
            .map(|d| d.uri.clone())
    }

    fn in_scope_bindings(&self) -> HashMap<Option<String>, String> {
        let mut map: HashMap<Option<String>, String> = HashMap::new();
        for decl in &self.ancestors.bindings {
            map.insert(decl.prefix.clone(), decl.uri.clone());
        }
        for frame in &self.ns_frames {
            for decl in frame {
                map.insert(decl.prefix.clone(), decl.uri.clone());
            }
        }
        map
    }

    fn normalized_prefix(prefix: Option<&str>) -> Option<String> {
        match prefix {
            Some(p) if !p.is_empty() => Some(p.to_string()),
            _ => None,
        }
    }

    /// The namespace declarations this element must render, sorted with the
    /// default declaration first, then by prefix.
    fn namespace_axis(
        &self,
        element: &StartElementEvent,
    ) -> Result<Vec<(Option<String>, String)>, XmlSecurityError> {
        let mut to_render: Vec<(Option<String>, String)> = Vec::new();
        match self.mode {
            // The namespace axis is identical across both inclusive
            // generations.
            CanonicalMode::Inclusive | CanonicalMode::Inclusive11 => {
                let in_scope = self.in_scope_bindings();
                for (prefix, uri) in in_scope {
                    if prefix.as_deref() == Some("xml") && uri == NS_XML {
                        continue;
                    }
                    if prefix.is_none() && uri.is_empty() {
                        // No namespace node exists for an empty default; an
                        // undeclaration renders through the differs rule
                        // below.
                        if self.rendered.get(&None).map(String::as_str).unwrap_or("") != "" {
                            to_render.push((None, String::new()));
                        }
                        continue;
                    }
                    if self.rendered.get(&prefix) != Some(&uri) {
                        to_render.push((prefix, uri));
                    }
                }
            }
            CanonicalMode::Exclusive => {
                let mut utilized: BTreeSet<Option<String>> = BTreeSet::new();
                utilized.insert(Self::normalized_prefix(element.name.prefix()));
                for attr in &element.attributes {
                    if let Some(p) = Self::normalized_prefix(attr.name.prefix()) {
                        utilized.insert(Some(p));
                    }
                }
                for p in &self.inclusive_prefixes {
                    if p == "#default" {
                        utilized.insert(None);
                    } else {
                        utilized.insert(Some(p.clone()));
                    }
                }
                for prefix in utilized {
                    if prefix.as_deref() == Some("xml") {
                        continue;
                    }
                    let uri = match self.in_scope_binding(&prefix) {
                        Some(uri) => uri,
                        None if prefix.is_none() => String::new(),
                        None => {
                            return Err(XmlSecurityError::transform_error(format!(
                                "prefix '{}' visibly utilized but not bound",
                                prefix.as_deref().unwrap_or("")
                            )));
                        }
                    };
                    let previously = self.rendered.get(&prefix).map(String::as_str);
                    if previously != Some(uri.as_str()) && !(previously.is_none() && uri.is_empty()) {
                        to_render.push((prefix, uri));
                    }
                }
            }
        }
        to_render.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(to_render)
    }

    /// The attribute axis, sorted by (namespace URI, local name).
    ///
    /// On the apex element, Canonical XML 1.0 imports every excluded
    /// ancestor `xml:*` attribute verbatim; Canonical XML 1.1 inherits
    /// only `xml:lang` and `xml:space`, never inherits `xml:id`, and
    /// replaces `xml:base` with the join of the excluded ancestors' base
    /// values and the element's own.
    fn attribute_axis(&self, element: &StartElementEvent, apex: bool) -> Vec<Attribute> {
        let mut attributes: Vec<Attribute> = element.attributes.clone();
        if apex {
            match self.mode {
                CanonicalMode::Inclusive => {
                    for inherited in &self.ancestors.xml_attributes {
                        let overridden = element
                            .attributes
                            .iter()
                            .any(|a| a.name == inherited.name);
                        if !overridden {
                            attributes.push(inherited.clone());
                        }
                    }
                }
                CanonicalMode::Inclusive11 => {
                    for inherited in &self.ancestors.xml_attributes {
                        let simple =
                            matches!(inherited.name.local_name(), "lang" | "space");
                        let overridden = element
                            .attributes
                            .iter()
                            .any(|a| a.name == inherited.name);
                        if simple && !overridden {
                            attributes.push(inherited.clone());
                        }
                    }

                    let own_base = element
                        .attributes
                        .iter()
                        .find(|a| a.name.is(NS_XML, "base"))
                        .map(|a| a.value.clone());
                    let mut joined = String::new();
                    for base in &self.ancestors.xml_base_chain {
                        joined = join_uri_references(&joined, base);
                    }
                    if let Some(own) = own_base {
                        joined = join_uri_references(&joined, &own);
                    }
                    attributes.retain(|a| !a.name.is(NS_XML, "base"));
                    if !joined.is_empty() {
                        attributes.push(Attribute::new(
                            QName::with_prefix(NS_XML, "xml", "base"),
                            joined,
                        ));
                    }
                }
                CanonicalMode::Exclusive => {}
            }
        }
        attributes.sort_by(|a, b| {
            let key_a = (a.name.namespace_uri().unwrap_or(""), a.name.local_name());
            let key_b = (b.name.namespace_uri().unwrap_or(""), b.name.local_name());
            key_a.cmp(&key_b)
        });
        attributes
    }

    fn render_start(
        &mut self,
        element: &StartElementEvent,
        out: &mut Vec<u8>,
    ) -> Result<(), XmlSecurityError> {
        let apex = self.depth == 0;
        self.seen_document_element = true;
        self.depth += 1;
        self.ns_frames.push(element.namespaces.clone());

        out.push(b'<');
        out.extend_from_slice(element.name.lexical().as_bytes());

        let ns_axis = self.namespace_axis(element)?;
        let mut undo = Vec::with_capacity(ns_axis.len());
        for (prefix, uri) in &ns_axis {
            match prefix {
                None => out.extend_from_slice(b" xmlns=\""),
                Some(p) => {
                    out.extend_from_slice(b" xmlns:");
                    out.extend_from_slice(p.as_bytes());
                    out.extend_from_slice(b"=\"");
                }
            }
            escape_attribute_value(uri, out);
            out.push(b'"');
            undo.push((prefix.clone(), self.rendered.insert(prefix.clone(), uri.clone())));
        }
        self.rendered_undo.push(undo);

        for attr in self.attribute_axis(element, apex) {
            out.push(b' ');
            out.extend_from_slice(attr.name.lexical().as_bytes());
            out.extend_from_slice(b"=\"");
            escape_attribute_value(&attr.value, out);
            out.push(b'"');
        }
        out.push(b'>');
        Ok(())
    }

    fn render_end(&mut self, name_lexical: &str, out: &mut Vec<u8>) {
        out.extend_from_slice(b"</");
        out.extend_from_slice(name_lexical.as_bytes());
        out.push(b'>');

        self.depth -= 1;
        self.ns_frames.pop();
        if let Some(undo) = self.rendered_undo.pop() {
            for (prefix, previous) in undo.into_iter().rev() {
                match previous {
                    Some(uri) => {
                        self.rendered.insert(prefix, uri);
                    }
                    None => {
                        self.rendered.remove(&prefix);
                    }
                }
            }
        }
    }
}

impl TransformStage for CanonicalXmlStage {
    fn input_shape(&self) -> TransformShape {
        TransformShape::Events
    }

    fn output_shape(&self) -> TransformShape {
        TransformShape::Bytes
    }

    fn push_event(
        &mut self,
        event: &XmlEvent,
        _ctx: &TransformContext,
        out: &mut TransformBuffer,
    ) -> Result<(), XmlSecurityError> {
        let bytes = &mut out.bytes;
        match event {
            XmlEvent::StartDocument { .. } | XmlEvent::EndDocument => {}
            XmlEvent::StartElement(element) => self.render_start(element, bytes)?,
            XmlEvent::EndElement { name } => {
                if self.depth == 0 {
                    return Err(XmlSecurityError::transform_error(
                        "unbalanced end-element in canonicalization input",
                    ));
                }
                self.render_end(&name.lexical(), bytes);
            }
            XmlEvent::Text(text) => {
                if self.depth > 0 {
                    escape_text(text, bytes);
                }
            }
            XmlEvent::Comment(comment) => {
                if self.with_comments {
                    if self.depth == 0 && self.seen_document_element {
                        bytes.push(b'\n');
                    }
                    bytes.extend_from_slice(b"<!--");
                    bytes.extend_from_slice(comment.as_bytes());
                    bytes.extend_from_slice(b"-->");
                    if self.depth == 0 && !self.seen_document_element {
                        bytes.push(b'\n');
                    }
                }
            }
            XmlEvent::ProcessingInstruction { target, data } => {
                if self.depth == 0 && self.seen_document_element {
                    bytes.push(b'\n');
                }
                bytes.extend_from_slice(b"<?");
                bytes.extend_from_slice(target.as_bytes());
                if let Some(data) = data.as_deref() {
                    if !data.is_empty() {
                        bytes.push(b' ');
                        bytes.extend_from_slice(data.as_bytes());
                    }
                }
                bytes.extend_from_slice(b"?>");
                if self.depth == 0 && !self.seen_document_element {
                    bytes.push(b'\n');
                }
            }
        }
        Ok(())
    }
}

fn escape_text(text: &str, out: &mut Vec<u8>) {
    for byte in text.bytes() {
        match byte {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'>' => out.extend_from_slice(b"&gt;"),
            b'\r' => out.extend_from_slice(b"&#xD;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute_value(value: &str, out: &mut Vec<u8>) {
    for byte in value.bytes() {
        match byte {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'"' => out.extend_from_slice(b"&quot;"),
            b'\t' => out.extend_from_slice(b"&#x9;"),
            b'\n' => out.extend_from_slice(b"&#xA;"),
            b'\r' => out.extend_from_slice(b"&#xD;"),
            other => out.push(other),
        }
    }
}

// ---------------------------------------------------------------------------
// xml:base fixup (Canonical XML 1.1)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UriParts {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

fn split_uri(reference: &str) -> UriParts {
    let mut parts = UriParts::default();
    let mut rest = reference;
    if let Some(pos) = rest.find('#') {
        parts.fragment = Some(rest[pos + 1..].to_string());
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.find('?') {
        parts.query = Some(rest[pos + 1..].to_string());
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.find(':') {
        let candidate = &rest[..pos];
        let valid = candidate
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            parts.scheme = Some(candidate.to_string());
            rest = &rest[pos + 1..];
        }
    }
    if let Some(after) = rest.strip_prefix("//") {
        let end = after.find('/').unwrap_or(after.len());
        parts.authority = Some(after[..end].to_string());
        rest = &after[end..];
    }
    parts.path = rest.to_string();
    parts
}

fn recompose_uri(parts: &UriParts) -> String {
    let mut out = String::new();
    if let Some(scheme) = &parts.scheme {
        out.push_str(scheme);
        out.push(':');
    }
    if let Some(authority) = &parts.authority {
        out.push_str("//");
        out.push_str(authority);
    }
    out.push_str(&parts.path);
    if let Some(query) = &parts.query {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = &parts.fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Dot-segment removal per RFC 3986 section 5.2.4, relaxed so that a
/// relative path keeps the leading `..` segments an absolute path would
/// discard. Required because an xml:base chain may be entirely relative.
fn remove_dot_segments(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let absolute = path.starts_with('/');
    let directory_form = path.ends_with('/')
        || path.ends_with("/.")
        || path.ends_with("/..")
        || path == "."
        || path == "..";

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => {
                    if !absolute {
                        segments.push("..");
                    }
                }
            },
            other => segments.push(other),
        }
    }

    let mut result = String::new();
    if absolute {
        result.push('/');
    }
    result.push_str(&segments.join("/"));
    if directory_form && !result.is_empty() && !result.ends_with('/') {
        result.push('/');
    }
    result
}

fn merge_paths(base: &UriParts, reference_path: &str) -> String {
    if base.authority.is_some() && base.path.is_empty() {
        return format!("/{}", reference_path);
    }
    // A base whose last segment is a dot segment acts as a directory.
    let base_path = if base.path == "."
        || base.path == ".."
        || base.path.ends_with("/.")
        || base.path.ends_with("/..")
    {
        format!("{}/", base.path)
    } else {
        base.path.clone()
    };
    match base_path.rfind('/') {
        Some(pos) => format!("{}{}", &base_path[..=pos], reference_path),
        None => reference_path.to_string(),
    }
}

/// Joins two URI references per RFC 3986 section 5.3, tolerating a base
/// that is itself relative (scheme and authority stay absent).
fn join_uri_references(base: &str, reference: &str) -> String {
    if base.is_empty() {
        return reference.to_string();
    }
    let b = split_uri(base);
    let r = split_uri(reference);

    let joined = if r.scheme.is_some() {
        UriParts {
            scheme: r.scheme,
            authority: r.authority,
            path: remove_dot_segments(&r.path),
            query: r.query,
            fragment: r.fragment,
        }
    } else if r.authority.is_some() {
        UriParts {
            scheme: b.scheme,
            authority: r.authority,
            path: remove_dot_segments(&r.path),
            query: r.query,
            fragment: r.fragment,
        }
    } else if r.path.is_empty() {
        UriParts {
            scheme: b.scheme,
            authority: b.authority,
            path: b.path,
            query: r.query.or(b.query),
            fragment: r.fragment,
        }
    } else if r.path.starts_with('/') {
        UriParts {
            scheme: b.scheme,
            authority: b.authority,
            path: remove_dot_segments(&r.path),
            query: r.query,
            fragment: r.fragment,
        }
    } else {
        let merged = merge_paths(&b, &r.path);
        UriParts {
            scheme: b.scheme,
            authority: b.authority,
            path: remove_dot_segments(&merged),
            query: r.query,
            fragment: r.fragment,
        }
    };
    recompose_uri(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmlsec_stream_domain::value_objects::QName;

    fn canonicalize(uri: &str, prefixes: Vec<String>, events: &[XmlEvent]) -> String {
        let mut stage =
            CanonicalXmlStage::for_uri(uri, prefixes, AncestorScope::default()).unwrap();
        let mut buffer = TransformBuffer::default();
        let ctx = TransformContext::default();
        for event in events {
            stage.push_event(event, &ctx, &mut buffer).unwrap();
        }
        String::from_utf8(buffer.bytes).unwrap()
    }

    fn el(name: QName) -> StartElementEvent {
        StartElementEvent::new(name)
    }

    /// Attribute and namespace ordering per the canonical form.
    #[test]
    fn test_attribute_and_namespace_ordering() {
        let start = el(QName::with_prefix("urn:b", "b", "Doc"))
            .with_namespaces(vec![
                NamespaceDecl::new(Some("b"), "urn:b"),
                NamespaceDecl::new(Some("a"), "urn:a"),
            ])
            .with_attributes(vec![
                Attribute::new(QName::with_prefix("urn:a", "a", "attr2"), "v2"),
                Attribute::new(QName::local("zz"), "v0"),
                Attribute::new(QName::with_prefix("urn:a", "a", "attr1"), "v1"),
            ]);
        let events = vec![
            XmlEvent::start(start),
            XmlEvent::end(QName::with_prefix("urn:b", "b", "Doc")),
        ];
        let out = canonicalize(ALG_C14N_OMIT_COMMENTS, vec![], &events);
        assert_eq!(
            out,
            "<b:Doc xmlns:a=\"urn:a\" xmlns:b=\"urn:b\" zz=\"v0\" a:attr1=\"v1\" a:attr2=\"v2\"></b:Doc>"
        );
    }

    /// Text and attribute escaping rules.
    #[test]
    fn test_escaping() {
        let start = el(QName::local("E"))
            .with_attributes(vec![Attribute::new(QName::local("a"), "x\"<&\n")]);
        let events = vec![
            XmlEvent::start(start),
            XmlEvent::text("a<b&c>d\r"),
            XmlEvent::end(QName::local("E")),
        ];
        let out = canonicalize(ALG_C14N_OMIT_COMMENTS, vec![], &events);
        assert_eq!(
            out,
            "<E a=\"x&quot;&lt;&amp;&#xA;\">a&lt;b&amp;c&gt;d&#xD;</E>"
        );
    }

    /// Inclusive c14n re-renders inherited bindings at the apex; a child
    /// redeclaring the same binding renders nothing new.
    #[test]
    fn test_inclusive_superfluous_declaration_suppressed() {
        let ns = vec![NamespaceDecl::new(Some("p"), "urn:p")];
        let events = vec![
            XmlEvent::start(
                el(QName::with_prefix("urn:p", "p", "Outer")).with_namespaces(ns.clone()),
            ),
            XmlEvent::start(
                el(QName::with_prefix("urn:p", "p", "Inner")).with_namespaces(ns.clone()),
            ),
            XmlEvent::end(QName::with_prefix("urn:p", "p", "Inner")),
            XmlEvent::end(QName::with_prefix("urn:p", "p", "Outer")),
        ];
        let out = canonicalize(ALG_C14N_OMIT_COMMENTS, vec![], &events);
        assert_eq!(
            out,
            "<p:Outer xmlns:p=\"urn:p\"><p:Inner></p:Inner></p:Outer>"
        );
    }

    /// Exclusive c14n renders only visibly utilized prefixes; the unused
    /// binding appears only when listed as an inclusive prefix.
    #[test]
    fn test_exclusive_visibly_utilized() {
        let events = vec![
            XmlEvent::start(
                el(QName::with_prefix("urn:p", "p", "Elem")).with_namespaces(vec![
                    NamespaceDecl::new(Some("p"), "urn:p"),
                    NamespaceDecl::new(Some("unused"), "urn:u"),
                ]),
            ),
            XmlEvent::end(QName::with_prefix("urn:p", "p", "Elem")),
        ];
        let out = canonicalize(ALG_EXCL_C14N_OMIT_COMMENTS, vec![], &events);
        assert_eq!(out, "<p:Elem xmlns:p=\"urn:p\"></p:Elem>");

        let out = canonicalize(
            ALG_EXCL_C14N_OMIT_COMMENTS,
            vec!["unused".to_string()],
            &events,
        );
        assert_eq!(
            out,
            "<p:Elem xmlns:p=\"urn:p\" xmlns:unused=\"urn:u\"></p:Elem>"
        );
    }

    /// Comments are omitted or kept per the declared URI.
    #[test]
    fn test_comment_handling() {
        let events = vec![
            XmlEvent::start(el(QName::local("E"))),
            XmlEvent::Comment(" note ".to_string()),
            XmlEvent::end(QName::local("E")),
        ];
        assert_eq!(
            canonicalize(ALG_C14N_OMIT_COMMENTS, vec![], &events),
            "<E></E>"
        );
        assert_eq!(
            canonicalize(ALG_C14N_WITH_COMMENTS, vec![], &events),
            "<E><!-- note --></E>"
        );
    }

    /// Inclusive c14n imports ancestor xml:* attributes onto the apex.
    #[test]
    fn test_inherited_xml_attributes() {
        let ancestors = AncestorScope {
            bindings: vec![],
            xml_attributes: vec![Attribute::new(
                QName::with_prefix(NS_XML, "xml", "lang"),
                "en",
            )],
            xml_base_chain: vec![],
        };
        let mut stage = CanonicalXmlStage::for_uri(ALG_C14N_OMIT_COMMENTS, vec![], ancestors.clone())
            .unwrap();
        let mut buffer = TransformBuffer::default();
        let ctx = TransformContext::default();
        stage
            .push_event(&XmlEvent::start(el(QName::local("E"))), &ctx, &mut buffer)
            .unwrap();
        stage
            .push_event(&XmlEvent::end(QName::local("E")), &ctx, &mut buffer)
            .unwrap();
        assert_eq!(
            String::from_utf8(buffer.bytes).unwrap(),
            "<E xml:lang=\"en\"></E>"
        );

        // Exclusive mode does not import.
        let mut stage =
            CanonicalXmlStage::for_uri(ALG_EXCL_C14N_OMIT_COMMENTS, vec![], ancestors).unwrap();
        let mut buffer = TransformBuffer::default();
        stage
            .push_event(&XmlEvent::start(el(QName::local("E"))), &ctx, &mut buffer)
            .unwrap();
        stage
            .push_event(&XmlEvent::end(QName::local("E")), &ctx, &mut buffer)
            .unwrap();
        assert_eq!(String::from_utf8(buffer.bytes).unwrap(), "<E></E>");
    }

    /// Default-namespace undeclaration renders only below a rendered
    /// non-empty default.
    #[test]
    fn test_default_namespace_undeclaration() {
        let events = vec![
            XmlEvent::start(
                el(QName::new("urn:d", "Outer"))
                    .with_namespaces(vec![NamespaceDecl::new(None, "urn:d")]),
            ),
            XmlEvent::start(
                el(QName::local("Inner")).with_namespaces(vec![NamespaceDecl::new(None, "")]),
            ),
            XmlEvent::end(QName::local("Inner")),
            XmlEvent::end(QName::new("urn:d", "Outer")),
        ];
        let out = canonicalize(ALG_C14N_OMIT_COMMENTS, vec![], &events);
        assert_eq!(
            out,
            "<Outer xmlns=\"urn:d\"><Inner xmlns=\"\"></Inner></Outer>"
        );
    }

    /// RFC 3986 reference-resolution vectors, plus the relative-base
    /// relaxation the 1.1 fixup needs.
    #[test]
    fn test_join_uri_references() {
        let base = "http://a/b/c/d;p?q";
        assert_eq!(join_uri_references(base, "g"), "http://a/b/c/g");
        assert_eq!(join_uri_references(base, "./g"), "http://a/b/c/g");
        assert_eq!(join_uri_references(base, "g/"), "http://a/b/c/g/");
        assert_eq!(join_uri_references(base, "/g"), "http://a/g");
        assert_eq!(join_uri_references(base, "//g"), "http://g");
        assert_eq!(join_uri_references(base, "?y"), "http://a/b/c/d;p?y");
        assert_eq!(join_uri_references(base, "#s"), "http://a/b/c/d;p?q#s");
        assert_eq!(join_uri_references(base, "../g"), "http://a/b/g");
        assert_eq!(join_uri_references(base, "../../g"), "http://a/g");
        assert_eq!(join_uri_references(base, ""), base);
        assert_eq!(
            join_uri_references(base, "https://x/y"),
            "https://x/y"
        );

        // Relative bases survive: leading ".." segments are preserved.
        assert_eq!(join_uri_references("dir/file.xml", "../other.xml"), "other.xml");
        assert_eq!(join_uri_references("../rel/", "x"), "../rel/x");
        assert_eq!(join_uri_references("..", "x"), "../x");
        assert_eq!(join_uri_references("", "one/two/"), "one/two/");
    }

    /// Canonical XML 1.1 fixes up xml:base from the excluded-ancestor
    /// chain and inherits only the simple inheritable attributes.
    #[test]
    fn test_c14n11_xml_base_fixup() {
        let ancestors = AncestorScope {
            bindings: vec![],
            xml_attributes: vec![
                Attribute::new(QName::with_prefix(NS_XML, "xml", "lang"), "en"),
                Attribute::new(QName::with_prefix(NS_XML, "xml", "id"), "outer"),
                Attribute::new(
                    QName::with_prefix(NS_XML, "xml", "base"),
                    "../three/",
                ),
            ],
            xml_base_chain: vec![
                "http://example.org/one/two/".to_string(),
                "../three/".to_string(),
            ],
        };
        let mut stage =
            CanonicalXmlStage::for_uri(ALG_C14N11_OMIT_COMMENTS, vec![], ancestors).unwrap();
        let mut buffer = TransformBuffer::default();
        let ctx = TransformContext::default();
        let apex = el(QName::local("E")).with_attributes(vec![Attribute::new(
            QName::with_prefix(NS_XML, "xml", "base"),
            "doc.xml",
        )]);
        stage
            .push_event(&XmlEvent::start(apex), &ctx, &mut buffer)
            .unwrap();
        stage
            .push_event(&XmlEvent::end(QName::local("E")), &ctx, &mut buffer)
            .unwrap();
        // xml:base is joined across the chain, xml:lang inherits, xml:id
        // does not.
        assert_eq!(
            String::from_utf8(buffer.bytes).unwrap(),
            "<E xml:base=\"http://example.org/one/three/doc.xml\" xml:lang=\"en\"></E>"
        );
    }

    /// The same input under the 1.0 URI imports every ancestor xml:*
    /// attribute verbatim.
    #[test]
    fn test_c14n10_imports_xml_attributes_verbatim() {
        let ancestors = AncestorScope {
            bindings: vec![],
            xml_attributes: vec![
                Attribute::new(QName::with_prefix(NS_XML, "xml", "base"), "../three/"),
                Attribute::new(QName::with_prefix(NS_XML, "xml", "id"), "outer"),
            ],
            xml_base_chain: vec![
                "http://example.org/one/two/".to_string(),
                "../three/".to_string(),
            ],
        };
        let mut stage =
            CanonicalXmlStage::for_uri(ALG_C14N_OMIT_COMMENTS, vec![], ancestors).unwrap();
        let mut buffer = TransformBuffer::default();
        let ctx = TransformContext::default();
        stage
            .push_event(&XmlEvent::start(el(QName::local("E"))), &ctx, &mut buffer)
            .unwrap();
        stage
            .push_event(&XmlEvent::end(QName::local("E")), &ctx, &mut buffer)
            .unwrap();
        assert_eq!(
            String::from_utf8(buffer.bytes).unwrap(),
            "<E xml:base=\"../three/\" xml:id=\"outer\"></E>"
        );
    }
}
