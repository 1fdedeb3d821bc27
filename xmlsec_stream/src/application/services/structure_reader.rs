// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Structure Reader
//!
//! Interprets captured event subtrees as XML Signature and XML Encryption
//! structures: `<Signature>`, `<EncryptedKey>` and `<EncryptedData>`. The
//! reader walks events only; it never sees markup. Unknown children are
//! skipped, missing required children fail with `missing-element`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use xmlsec_stream_domain::value_objects::xml_names::{NS_DSIG, NS_EXC_C14N, NS_XENC, NS_XENC11};
use xmlsec_stream_domain::value_objects::{
    EncryptedDataSpec, EncryptedKeySpec, KeyInfoSpec, OaepParams, ReferenceSpec, SignedInfoSpec,
    StartElementEvent, TransformSpec, XmlEvent,
};
use xmlsec_stream_domain::XmlSecurityError;

/// A parsed `<Signature>` structure.
pub struct ParsedSignature {
    pub id: Option<String>,
    pub signed_info: SignedInfoSpec,
    /// The raw SignedInfo subtree events, for canonicalization.
    pub signed_info_events: Vec<XmlEvent>,
    pub signature_value: Vec<u8>,
    pub key_info: KeyInfoSpec,
}

/// Cursor over a captured event slice.
pub struct EventCursor<'a> {
    events: &'a [XmlEvent],
    pos: usize,
}

impl<'a> EventCursor<'a> {
    pub fn new(events: &'a [XmlEvent]) -> Self {
        Self { events, pos: 0 }
    }

    fn peek(&self) -> Option<&'a XmlEvent> {
        self.events.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a XmlEvent> {
        let event = self.events.get(self.pos);
        if event.is_some() {
            self.pos += 1;
        }
        event
    }

    /// Skips inter-element whitespace, comments and processing
    /// instructions.
    fn skip_insignificant(&mut self) {
        while let Some(event) = self.peek() {
            match event {
                XmlEvent::Text(t) if t.trim().is_empty() => {
                    self.pos += 1;
                }
                XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction { .. } => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
    }

    /// Consumes the next start element, requiring the given name.
    fn expect_start(
        &mut self,
        namespace: &str,
        local: &str,
    ) -> Result<&'a StartElementEvent, XmlSecurityError> {
        self.skip_insignificant();
        match self.bump() {
            Some(XmlEvent::StartElement(e)) if e.name.is(namespace, local) => Ok(e),
            Some(XmlEvent::StartElement(e)) => Err(XmlSecurityError::missing_element(format!(
                "expected <{}> but found <{}>",
                local, e.name
            ))),
            _ => Err(XmlSecurityError::missing_element(format!(
                "expected <{}>",
                local
            ))),
        }
    }

    /// Consumes the next start element if it matches.
    fn try_start(
        &mut self,
        namespace: &str,
        local: &str,
    ) -> Option<&'a StartElementEvent> {
        self.skip_insignificant();
        match self.peek() {
            Some(XmlEvent::StartElement(e)) if e.name.is(namespace, local) => {
                self.pos += 1;
                Some(e)
            }
            _ => None,
        }
    }

    /// Peeks at the next start element without consuming.
    fn peek_start(&mut self) -> Option<&'a StartElementEvent> {
        self.skip_insignificant();
        match self.peek() {
            Some(XmlEvent::StartElement(e)) => Some(e),
            _ => None,
        }
    }

    fn expect_end(&mut self, namespace: &str, local: &str) -> Result<(), XmlSecurityError> {
        self.skip_insignificant();
        match self.bump() {
            Some(XmlEvent::EndElement { name }) if name.is(namespace, local) => Ok(()),
            _ => Err(XmlSecurityError::missing_element(format!(
                "expected </{}>",
                local
            ))),
        }
    }

    /// Collects the text content up to and including the current element's
    /// end tag. The start tag must already be consumed.
    fn text_until_end(&mut self, namespace: &str, local: &str) -> Result<String, XmlSecurityError> {
        let mut content = String::new();
        loop {
            match self.bump() {
                Some(XmlEvent::Text(t)) => content.push_str(t),
                Some(XmlEvent::Comment(_)) => {}
                Some(XmlEvent::EndElement { name }) if name.is(namespace, local) => {
                    return Ok(content);
                }
                Some(other) => {
                    return Err(XmlSecurityError::missing_element(format!(
                        "unexpected {:?} inside <{}>",
                        other, local
                    )));
                }
                None => {
                    return Err(XmlSecurityError::missing_element(format!(
                        "unterminated <{}>",
                        local
                    )));
                }
            }
        }
    }

    /// Skips the rest of an element whose start tag was consumed.
    fn skip_to_end_of(&mut self, namespace: &str, local: &str) -> Result<(), XmlSecurityError> {
        let mut depth = 0usize;
        loop {
            match self.bump() {
                Some(XmlEvent::StartElement(_)) => depth += 1,
                Some(XmlEvent::EndElement { name }) => {
                    if depth == 0 {
                        if name.is(namespace, local) {
                            return Ok(());
                        }
                        return Err(XmlSecurityError::missing_element(format!(
                            "mismatched end tag inside <{}>",
                            local
                        )));
                    }
                    depth -= 1;
                }
                Some(_) => {}
                None => {
                    return Err(XmlSecurityError::missing_element(format!(
                        "unterminated <{}>",
                        local
                    )));
                }
            }
        }
    }

    /// Captures an element's full subtree (start tag already consumed,
    /// `start` being that event), including both tags.
    fn capture_rest_of(
        &mut self,
        start: &StartElementEvent,
    ) -> Result<Vec<XmlEvent>, XmlSecurityError> {
        let mut events = vec![XmlEvent::StartElement(start.clone())];
        let mut depth = 0usize;
        loop {
            match self.bump() {
                Some(event @ XmlEvent::StartElement(_)) => {
                    depth += 1;
                    events.push(event.clone());
                }
                Some(event @ XmlEvent::EndElement { .. }) => {
                    events.push(event.clone());
                    if depth == 0 {
                        return Ok(events);
                    }
                    depth -= 1;
                }
                Some(event) => events.push(event.clone()),
                None => {
                    return Err(XmlSecurityError::missing_element(format!(
                        "unterminated <{}>",
                        start.name
                    )));
                }
            }
        }
    }
}

fn decode_base64(content: &str, what: &str) -> Result<Vec<u8>, XmlSecurityError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(compact.as_bytes()).map_err(|e| {
        XmlSecurityError::SerializationError(format!("invalid base64 in {}: {}", what, e))
    })
}

/// Parses a captured `<Signature>` subtree.
pub fn parse_signature(events: &[XmlEvent]) -> Result<ParsedSignature, XmlSecurityError> {
    let mut cursor = EventCursor::new(events);
    let signature = cursor.expect_start(NS_DSIG, "Signature")?;
    let id = signature.attribute_local("Id").map(str::to_string);

    // SignedInfo, captured raw for canonicalization.
    cursor.skip_insignificant();
    let signed_info_start = cursor.expect_start(NS_DSIG, "SignedInfo")?;
    let signed_info_events = cursor.capture_rest_of(signed_info_start)?;
    let signed_info = parse_signed_info(&signed_info_events)?;

    cursor.expect_start(NS_DSIG, "SignatureValue")?;
    let signature_value = decode_base64(
        &cursor.text_until_end(NS_DSIG, "SignatureValue")?,
        "SignatureValue",
    )?;

    let key_info = match cursor.try_start(NS_DSIG, "KeyInfo") {
        Some(_) => parse_key_info_children(&mut cursor)?,
        None => KeyInfoSpec::None,
    };

    // Trailing Object elements are skipped.
    while cursor.try_start(NS_DSIG, "Object").is_some() {
        cursor.skip_to_end_of(NS_DSIG, "Object")?;
    }
    cursor.expect_end(NS_DSIG, "Signature")?;

    Ok(ParsedSignature {
        id,
        signed_info,
        signed_info_events,
        signature_value,
        key_info,
    })
}

fn parse_signed_info(events: &[XmlEvent]) -> Result<SignedInfoSpec, XmlSecurityError> {
    let mut cursor = EventCursor::new(events);
    cursor.expect_start(NS_DSIG, "SignedInfo")?;

    let c14n = cursor.expect_start(NS_DSIG, "CanonicalizationMethod")?;
    let canonicalization_uri = required_attribute(c14n, "Algorithm")?;
    cursor.skip_to_end_of(NS_DSIG, "CanonicalizationMethod")?;

    let method = cursor.expect_start(NS_DSIG, "SignatureMethod")?;
    let signature_algorithm_uri = required_attribute(method, "Algorithm")?;
    cursor.skip_to_end_of(NS_DSIG, "SignatureMethod")?;

    let mut references = Vec::new();
    while let Some(reference) = cursor.try_start(NS_DSIG, "Reference") {
        references.push(parse_reference(reference, &mut cursor)?);
    }
    cursor.expect_end(NS_DSIG, "SignedInfo")?;

    Ok(SignedInfoSpec {
        canonicalization_uri,
        signature_algorithm_uri,
        references,
    })
}

fn parse_reference(
    start: &StartElementEvent,
    cursor: &mut EventCursor<'_>,
) -> Result<ReferenceSpec, XmlSecurityError> {
    let uri = start.attribute_local("URI").map(str::to_string);
    let type_uri = start.attribute_local("Type").map(str::to_string);

    let mut transforms = Vec::new();
    if cursor.try_start(NS_DSIG, "Transforms").is_some() {
        while let Some(transform) = cursor.try_start(NS_DSIG, "Transform") {
            let algorithm_uri = required_attribute(transform, "Algorithm")?;
            let mut spec = TransformSpec::new(algorithm_uri);
            if let Some(inclusive) = cursor.try_start(NS_EXC_C14N, "InclusiveNamespaces") {
                if let Some(list) = inclusive.attribute_local("PrefixList") {
                    spec.inclusive_namespace_prefixes =
                        list.split_whitespace().map(str::to_string).collect();
                }
                cursor.skip_to_end_of(NS_EXC_C14N, "InclusiveNamespaces")?;
            }
            cursor.expect_end(NS_DSIG, "Transform")?;
            transforms.push(spec);
        }
        cursor.expect_end(NS_DSIG, "Transforms")?;
    }

    let digest_method = cursor.expect_start(NS_DSIG, "DigestMethod")?;
    let digest_algorithm_uri = required_attribute(digest_method, "Algorithm")?;
    cursor.skip_to_end_of(NS_DSIG, "DigestMethod")?;

    cursor.expect_start(NS_DSIG, "DigestValue")?;
    let expected_digest = decode_base64(
        &cursor.text_until_end(NS_DSIG, "DigestValue")?,
        "DigestValue",
    )?;
    cursor.expect_end(NS_DSIG, "Reference")?;

    Ok(ReferenceSpec {
        uri,
        type_uri,
        digest_algorithm_uri,
        expected_digest,
        transforms,
    })
}

/// Parses the children of an already-entered `<KeyInfo>`, consuming its
/// end tag.
fn parse_key_info_children(
    cursor: &mut EventCursor<'_>,
) -> Result<KeyInfoSpec, XmlSecurityError> {
    let mut spec = KeyInfoSpec::None;
    loop {
        cursor.skip_insignificant();
        let Some(start) = cursor.peek_start() else {
            break;
        };
        let name = start.name.clone();
        if name.is(NS_DSIG, "KeyName") {
            cursor.bump();
            spec = KeyInfoSpec::KeyName(cursor.text_until_end(NS_DSIG, "KeyName")?.trim().to_string());
        } else if name.is(NS_DSIG, "X509Data") {
            cursor.bump();
            spec = parse_x509_data(cursor)?;
        } else if name.is(NS_DSIG, "RetrievalMethod") {
            let uri = start.attribute_local("URI").unwrap_or_default().to_string();
            cursor.bump();
            cursor.skip_to_end_of(NS_DSIG, "RetrievalMethod")?;
            if let Some(fragment) = uri.strip_prefix('#') {
                spec = KeyInfoSpec::EncryptedKeyRef(fragment.to_string());
            }
        } else {
            // Unknown key hints are skipped; resolution falls through to
            // the configured callbacks.
            let ns = name.namespace_uri().unwrap_or_default().to_string();
            cursor.bump();
            cursor.skip_to_end_of(&ns, name.local_name())?;
        }
    }
    cursor.expect_end(NS_DSIG, "KeyInfo")?;
    Ok(spec)
}

fn parse_x509_data(cursor: &mut EventCursor<'_>) -> Result<KeyInfoSpec, XmlSecurityError> {
    let mut spec = KeyInfoSpec::None;
    loop {
        cursor.skip_insignificant();
        let Some(start) = cursor.peek_start() else {
            break;
        };
        let name = start.name.clone();
        if name.is(NS_DSIG, "X509Certificate") {
            cursor.bump();
            let der = decode_base64(
                &cursor.text_until_end(NS_DSIG, "X509Certificate")?,
                "X509Certificate",
            )?;
            spec = KeyInfoSpec::X509Certificate(der);
        } else if name.is(NS_DSIG, "X509IssuerSerial") {
            cursor.bump();
            cursor.expect_start(NS_DSIG, "X509IssuerName")?;
            let issuer = cursor.text_until_end(NS_DSIG, "X509IssuerName")?.trim().to_string();
            cursor.expect_start(NS_DSIG, "X509SerialNumber")?;
            let serial = cursor
                .text_until_end(NS_DSIG, "X509SerialNumber")?
                .trim()
                .to_string();
            cursor.expect_end(NS_DSIG, "X509IssuerSerial")?;
            if !matches!(spec, KeyInfoSpec::X509Certificate(_)) {
                spec = KeyInfoSpec::X509IssuerSerial { issuer, serial };
            }
        } else {
            let ns = name.namespace_uri().unwrap_or_default().to_string();
            cursor.bump();
            cursor.skip_to_end_of(&ns, name.local_name())?;
        }
    }
    cursor.expect_end(NS_DSIG, "X509Data")?;
    Ok(spec)
}

/// Parses a captured `<EncryptedKey>` subtree.
pub fn parse_encrypted_key(events: &[XmlEvent]) -> Result<EncryptedKeySpec, XmlSecurityError> {
    let mut cursor = EventCursor::new(events);
    let start = cursor.expect_start(NS_XENC, "EncryptedKey")?;
    let id = start.attribute_local("Id").map(str::to_string);

    let (encryption_method_uri, oaep) = parse_encryption_method(&mut cursor)?;

    let key_info = match cursor.try_start(NS_DSIG, "KeyInfo") {
        Some(_) => parse_key_info_children(&mut cursor)?,
        None => KeyInfoSpec::None,
    };

    let cipher_value = parse_cipher_data(&mut cursor)?;

    let mut reference_list = Vec::new();
    if cursor.try_start(NS_XENC, "ReferenceList").is_some() {
        while let Some(data_ref) = cursor.try_start(NS_XENC, "DataReference") {
            if let Some(fragment) = data_ref.attribute_local("URI").and_then(|u| u.strip_prefix('#'))
            {
                reference_list.push(fragment.to_string());
            }
            cursor.skip_to_end_of(NS_XENC, "DataReference")?;
        }
        cursor.expect_end(NS_XENC, "ReferenceList")?;
    }
    // CarriedKeyName and other trailing children are skipped.
    while let Some(start) = cursor.peek_start() {
        let name = start.name.clone();
        let ns = name.namespace_uri().unwrap_or_default().to_string();
        cursor.bump();
        cursor.skip_to_end_of(&ns, name.local_name())?;
    }
    cursor.expect_end(NS_XENC, "EncryptedKey")?;

    Ok(EncryptedKeySpec {
        id,
        encryption_method_uri,
        oaep,
        key_info,
        cipher_value,
        reference_list,
    })
}

/// Parses a captured `<EncryptedData>` subtree.
pub fn parse_encrypted_data(events: &[XmlEvent]) -> Result<EncryptedDataSpec, XmlSecurityError> {
    let mut cursor = EventCursor::new(events);
    let start = cursor.expect_start(NS_XENC, "EncryptedData")?;
    let id = start.attribute_local("Id").map(str::to_string);
    let type_uri = start.attribute_local("Type").map(str::to_string);

    let (encryption_method_uri, _oaep) = parse_encryption_method(&mut cursor)?;

    let mut key_info = KeyInfoSpec::None;
    let mut embedded_key = None;
    if cursor.try_start(NS_DSIG, "KeyInfo").is_some() {
        // An EncryptedKey may be nested here; otherwise the usual key
        // hints apply.
        if let Some(ek_start) = cursor.try_start(NS_XENC, "EncryptedKey") {
            let ek_events = cursor.capture_rest_of(ek_start)?;
            embedded_key = Some(parse_encrypted_key(&ek_events)?);
            cursor.expect_end(NS_DSIG, "KeyInfo")?;
        } else {
            key_info = parse_key_info_children(&mut cursor)?;
        }
    }

    let cipher_value = parse_cipher_data(&mut cursor)?;
    cursor.expect_end(NS_XENC, "EncryptedData")?;

    Ok(EncryptedDataSpec {
        id,
        type_uri,
        encryption_method_uri,
        key_info,
        embedded_key,
        cipher_value,
    })
}

/// Parses `<EncryptionMethod>` with the OAEP defaults of the
/// recommendation: absent DigestMethod means SHA-1, absent MGF means
/// MGF1 with SHA-1.
fn parse_encryption_method(
    cursor: &mut EventCursor<'_>,
) -> Result<(String, OaepParams), XmlSecurityError> {
    let method = cursor.expect_start(NS_XENC, "EncryptionMethod")?;
    let uri = required_attribute(method, "Algorithm")?;
    let mut oaep = OaepParams::default();

    loop {
        cursor.skip_insignificant();
        let Some(start) = cursor.peek_start() else {
            break;
        };
        let name = start.name.clone();
        if name.is(NS_DSIG, "DigestMethod") {
            if let Some(algorithm) = start.attribute_local("Algorithm") {
                oaep.digest_uri = algorithm.to_string();
            }
            cursor.bump();
            cursor.skip_to_end_of(NS_DSIG, "DigestMethod")?;
        } else if name.is(NS_XENC11, "MGF") {
            if let Some(algorithm) = start.attribute_local("Algorithm") {
                oaep.mgf_uri = algorithm.to_string();
            }
            cursor.bump();
            cursor.skip_to_end_of(NS_XENC11, "MGF")?;
        } else if name.is(NS_XENC, "OAEPparams") {
            cursor.bump();
            oaep.p_source =
                decode_base64(&cursor.text_until_end(NS_XENC, "OAEPparams")?, "OAEPparams")?;
        } else {
            let ns = name.namespace_uri().unwrap_or_default().to_string();
            cursor.bump();
            cursor.skip_to_end_of(&ns, name.local_name())?;
        }
    }
    cursor.expect_end(NS_XENC, "EncryptionMethod")?;
    Ok((uri, oaep))
}

fn parse_cipher_data(cursor: &mut EventCursor<'_>) -> Result<Vec<u8>, XmlSecurityError> {
    cursor.expect_start(NS_XENC, "CipherData")?;
    cursor.expect_start(NS_XENC, "CipherValue")?;
    let cipher_value = decode_base64(
        &cursor.text_until_end(NS_XENC, "CipherValue")?,
        "CipherValue",
    )?;
    cursor.expect_end(NS_XENC, "CipherData")?;
    Ok(cipher_value)
}

fn required_attribute(
    element: &StartElementEvent,
    local: &str,
) -> Result<String, XmlSecurityError> {
    element
        .attribute_local(local)
        .map(str::to_string)
        .ok_or_else(|| {
            XmlSecurityError::missing_element(format!(
                "<{}> lacks the {} attribute",
                element.name, local
            ))
        })
}
