// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Structure Writer
//!
//! Emits `<Signature>`, `<EncryptedKey>` and `<EncryptedData>` structures
//! as event sequences for the outbound processors. Children carrying
//! recommendation defaults (OAEP SHA-1 digest, MGF1-SHA-1) are omitted on
//! the wire, mirroring what the reader defaults back in.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use xmlsec_stream_domain::value_objects::xml_names::{dsig, xenc, xenc11, NS_DSIG, NS_EXC_C14N, NS_XENC};
use xmlsec_stream_domain::value_objects::{
    Attribute, EncryptedDataSpec, EncryptedKeySpec, KeyInfoSpec, NamespaceDecl, OaepParams, QName,
    SignedInfoSpec, StartElementEvent, XmlEvent,
};
use xmlsec_stream_domain::XmlSecurityError;

/// What the signature's KeyInfo carries.
pub enum KeyInfoContent {
    None,
    KeyName(String),
    X509IssuerSerial { issuer: String, serial: String },
    X509Certificate(Vec<u8>),
}

fn attr(local: &str, value: impl Into<String>) -> Attribute {
    Attribute::new(QName::local(local), value)
}

fn start(name: QName, attributes: Vec<Attribute>) -> XmlEvent {
    XmlEvent::start(StartElementEvent::new(name).with_attributes(attributes))
}

fn empty_element(out: &mut Vec<XmlEvent>, name: QName, attributes: Vec<Attribute>) {
    out.push(start(name.clone(), attributes));
    out.push(XmlEvent::end(name));
}

fn text_element(out: &mut Vec<XmlEvent>, name: QName, text: impl Into<String>) {
    out.push(start(name.clone(), Vec::new()));
    out.push(XmlEvent::text(text));
    out.push(XmlEvent::end(name));
}

/// Emits the SignedInfo subtree. Shared between the signing path (which
/// canonicalizes these events) and the final envelope emission.
pub fn signed_info_events(signed_info: &SignedInfoSpec) -> Vec<XmlEvent> {
    let mut out = Vec::new();
    out.push(start(dsig("SignedInfo"), Vec::new()));
    empty_element(
        &mut out,
        dsig("CanonicalizationMethod"),
        vec![attr("Algorithm", signed_info.canonicalization_uri.clone())],
    );
    empty_element(
        &mut out,
        dsig("SignatureMethod"),
        vec![attr("Algorithm", signed_info.signature_algorithm_uri.clone())],
    );
    for reference in &signed_info.references {
        let mut attributes = Vec::new();
        if let Some(uri) = &reference.uri {
            attributes.push(attr("URI", uri.clone()));
        }
        if let Some(type_uri) = &reference.type_uri {
            attributes.push(attr("Type", type_uri.clone()));
        }
        out.push(start(dsig("Reference"), attributes));
        if !reference.transforms.is_empty() {
            out.push(start(dsig("Transforms"), Vec::new()));
            for transform in &reference.transforms {
                out.push(start(
                    dsig("Transform"),
                    vec![attr("Algorithm", transform.algorithm_uri.clone())],
                ));
                if !transform.inclusive_namespace_prefixes.is_empty() {
                    let name = QName::with_prefix(NS_EXC_C14N, "ec", "InclusiveNamespaces");
                    out.push(XmlEvent::start(
                        StartElementEvent::new(name.clone())
                            .with_attributes(vec![attr(
                                "PrefixList",
                                transform.inclusive_namespace_prefixes.join(" "),
                            )])
                            .with_namespaces(vec![NamespaceDecl::new(Some("ec"), NS_EXC_C14N)]),
                    ));
                    out.push(XmlEvent::end(name));
                }
                out.push(XmlEvent::end(dsig("Transform")));
            }
            out.push(XmlEvent::end(dsig("Transforms")));
        }
        empty_element(
            &mut out,
            dsig("DigestMethod"),
            vec![attr("Algorithm", reference.digest_algorithm_uri.clone())],
        );
        text_element(
            &mut out,
            dsig("DigestValue"),
            BASE64.encode(&reference.expected_digest),
        );
        out.push(XmlEvent::end(dsig("Reference")));
    }
    out.push(XmlEvent::end(dsig("SignedInfo")));
    out
}

/// Emits a complete `<Signature>` element.
pub fn signature_events(
    id: &str,
    signed_info: &SignedInfoSpec,
    signature_value: &[u8],
    key_info: &KeyInfoContent,
) -> Result<Vec<XmlEvent>, XmlSecurityError> {
    let mut out = Vec::new();
    out.push(XmlEvent::start(
        StartElementEvent::new(dsig("Signature"))
            .with_attributes(vec![attr("Id", id)])
            .with_namespaces(vec![NamespaceDecl::new(Some("ds"), NS_DSIG)]),
    ));
    out.extend(signed_info_events(signed_info));
    text_element(
        &mut out,
        dsig("SignatureValue"),
        BASE64.encode(signature_value),
    );
    match key_info {
        KeyInfoContent::None => {}
        KeyInfoContent::KeyName(name) => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            text_element(&mut out, dsig("KeyName"), name.clone());
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
        KeyInfoContent::X509IssuerSerial { issuer, serial } => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            out.push(start(dsig("X509Data"), Vec::new()));
            out.push(start(dsig("X509IssuerSerial"), Vec::new()));
            text_element(&mut out, dsig("X509IssuerName"), issuer.clone());
            text_element(&mut out, dsig("X509SerialNumber"), serial.clone());
            out.push(XmlEvent::end(dsig("X509IssuerSerial")));
            out.push(XmlEvent::end(dsig("X509Data")));
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
        KeyInfoContent::X509Certificate(der) => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            out.push(start(dsig("X509Data"), Vec::new()));
            text_element(&mut out, dsig("X509Certificate"), BASE64.encode(der));
            out.push(XmlEvent::end(dsig("X509Data")));
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
    }
    out.push(XmlEvent::end(dsig("Signature")));
    Ok(out)
}

fn encryption_method_events(
    out: &mut Vec<XmlEvent>,
    algorithm_uri: &str,
    oaep: &OaepParams,
) {
    let defaults = OaepParams::default();
    let has_children = oaep.digest_uri != defaults.digest_uri
        || oaep.mgf_uri != defaults.mgf_uri
        || !oaep.p_source.is_empty();
    let method_attrs = vec![attr("Algorithm", algorithm_uri)];
    if !has_children {
        empty_element(out, xenc("EncryptionMethod"), method_attrs);
        return;
    }
    out.push(start(xenc("EncryptionMethod"), method_attrs));
    if oaep.digest_uri != defaults.digest_uri {
        empty_element(
            out,
            dsig("DigestMethod"),
            vec![attr("Algorithm", oaep.digest_uri.clone())],
        );
    }
    if oaep.mgf_uri != defaults.mgf_uri {
        empty_element(out, xenc11("MGF"), vec![attr("Algorithm", oaep.mgf_uri.clone())]);
    }
    if !oaep.p_source.is_empty() {
        text_element(out, xenc("OAEPparams"), BASE64.encode(&oaep.p_source));
    }
    out.push(XmlEvent::end(xenc("EncryptionMethod")));
}

fn cipher_data_events(out: &mut Vec<XmlEvent>, cipher_value: &[u8]) {
    out.push(start(xenc("CipherData"), Vec::new()));
    text_element(&mut *out, xenc("CipherValue"), BASE64.encode(cipher_value));
    out.push(XmlEvent::end(xenc("CipherData")));
}

fn key_info_spec_events(out: &mut Vec<XmlEvent>, key_info: &KeyInfoSpec) {
    match key_info {
        KeyInfoSpec::None => {}
        KeyInfoSpec::KeyName(name) => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            text_element(out, dsig("KeyName"), name.clone());
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
        KeyInfoSpec::X509Certificate(der) => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            out.push(start(dsig("X509Data"), Vec::new()));
            text_element(out, dsig("X509Certificate"), BASE64.encode(der));
            out.push(XmlEvent::end(dsig("X509Data")));
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
        KeyInfoSpec::X509IssuerSerial { issuer, serial } => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            out.push(start(dsig("X509Data"), Vec::new()));
            out.push(start(dsig("X509IssuerSerial"), Vec::new()));
            text_element(out, dsig("X509IssuerName"), issuer.clone());
            text_element(out, dsig("X509SerialNumber"), serial.clone());
            out.push(XmlEvent::end(dsig("X509IssuerSerial")));
            out.push(XmlEvent::end(dsig("X509Data")));
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
        KeyInfoSpec::EncryptedKeyRef(id) => {
            out.push(start(dsig("KeyInfo"), Vec::new()));
            empty_element(
                out,
                dsig("RetrievalMethod"),
                vec![attr("URI", format!("#{}", id))],
            );
            out.push(XmlEvent::end(dsig("KeyInfo")));
        }
    }
}

/// Emits a complete `<EncryptedKey>` element.
pub fn encrypted_key_events(spec: &EncryptedKeySpec) -> Result<Vec<XmlEvent>, XmlSecurityError> {
    let mut out = Vec::new();
    let mut attributes = Vec::new();
    if let Some(id) = &spec.id {
        attributes.push(attr("Id", id.clone()));
    }
    out.push(XmlEvent::start(
        StartElementEvent::new(xenc("EncryptedKey"))
            .with_attributes(attributes)
            .with_namespaces(vec![
                NamespaceDecl::new(Some("xenc"), NS_XENC),
                NamespaceDecl::new(Some("ds"), NS_DSIG),
            ]),
    ));
    encryption_method_events(&mut out, &spec.encryption_method_uri, &spec.oaep);
    key_info_spec_events(&mut out, &spec.key_info);
    cipher_data_events(&mut out, &spec.cipher_value);
    if !spec.reference_list.is_empty() {
        out.push(start(xenc("ReferenceList"), Vec::new()));
        for data_ref in &spec.reference_list {
            empty_element(
                &mut out,
                xenc("DataReference"),
                vec![attr("URI", format!("#{}", data_ref))],
            );
        }
        out.push(XmlEvent::end(xenc("ReferenceList")));
    }
    out.push(XmlEvent::end(xenc("EncryptedKey")));
    Ok(out)
}

/// Emits a complete `<EncryptedData>` element.
pub fn encrypted_data_events(spec: &EncryptedDataSpec) -> Result<Vec<XmlEvent>, XmlSecurityError> {
    let mut out = Vec::new();
    let mut attributes = Vec::new();
    if let Some(id) = &spec.id {
        attributes.push(attr("Id", id.clone()));
    }
    if let Some(type_uri) = &spec.type_uri {
        attributes.push(attr("Type", type_uri.clone()));
    }
    out.push(XmlEvent::start(
        StartElementEvent::new(xenc("EncryptedData"))
            .with_attributes(attributes)
            .with_namespaces(vec![
                NamespaceDecl::new(Some("xenc"), NS_XENC),
                NamespaceDecl::new(Some("ds"), NS_DSIG),
            ]),
    ));
    encryption_method_events(&mut out, &spec.encryption_method_uri, &OaepParams::default());
    if let Some(embedded) = &spec.embedded_key {
        out.push(start(dsig("KeyInfo"), Vec::new()));
        out.extend(encrypted_key_events(embedded)?);
        out.push(XmlEvent::end(dsig("KeyInfo")));
    } else {
        key_info_spec_events(&mut out, &spec.key_info);
    }
    cipher_data_events(&mut out, &spec.cipher_value);
    out.push(XmlEvent::end(xenc("EncryptedData")));
    Ok(out)
}
