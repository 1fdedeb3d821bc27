// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Encrypt-then-decrypt round trips through the outbound and inbound
//! pipelines, using RSA-OAEP key transport with an embedded EncryptedKey.

use std::rc::Rc;

use rsa::RsaPrivateKey;

use crate::common::{end_local, init_test_tracing, start_local, SimpleFragmentParser};
use xmlsec_stream::domain::entities::KeyMaterial;
use xmlsec_stream::domain::value_objects::xml_names::NS_XENC;
use xmlsec_stream::domain::value_objects::{QName, XmlEvent};
use xmlsec_stream::infrastructure::adapters::signature_crypto::{
    rsa_private_key_material, rsa_public_key_material,
};
use xmlsec_stream::{
    begin_inbound, begin_outbound, EncryptActionConfig, InboundSecurityProperties, OutboundAction,
    OutboundSecurityProperties, SecurePart, VecEventSink, VecEventSource, XmlSecAction,
};

fn rsa_pair() -> (KeyMaterial, KeyMaterial) {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    (
        rsa_private_key_material(&private).unwrap(),
        rsa_public_key_material(&private.to_public_key()).unwrap(),
    )
}

fn secret_document() -> Vec<XmlEvent> {
    vec![
        start_local("Doc", &[]),
        start_local("Secret", &[]),
        start_local("Note", &[("kind", "private")]),
        XmlEvent::text("hello & <stuff>"),
        end_local("Note"),
        end_local("Secret"),
        end_local("Doc"),
    ]
}

fn encrypt_document(part: SecurePart, transport_key: KeyMaterial) -> Vec<XmlEvent> {
    let mut encrypt = EncryptActionConfig::new(vec![part]);
    encrypt.transport_key = Some(transport_key);
    let properties =
        OutboundSecurityProperties::new().with_action(OutboundAction::Encrypt(encrypt));
    let mut writer = begin_outbound(properties, VecEventSink::new()).unwrap();
    for event in secret_document() {
        writer.write_event(event).unwrap();
    }
    writer.close().unwrap().into_events()
}

fn decrypt_document(events: Vec<XmlEvent>, decryption_key: KeyMaterial) -> Vec<XmlEvent> {
    let mut properties = InboundSecurityProperties::default();
    properties.decryption_key = Some(decryption_key);
    properties.fragment_parser = Some(Rc::new(SimpleFragmentParser));
    let mut reader = begin_inbound(properties, Box::new(VecEventSource::new(events))).unwrap();
    let events = reader.read_to_end().unwrap();
    assert!(reader
        .document_result()
        .performed_actions
        .contains(&XmlSecAction::Encryption));
    events
}

/// Content encryption replaces the children and decryption recovers the
/// exact original element content.
#[test]
fn test_content_encryption_roundtrip() {
    init_test_tracing();
    let (private, public) = rsa_pair();
    let encrypted = encrypt_document(SecurePart::content(QName::local("Secret")), public);

    // The plaintext is gone from the wire; an EncryptedData child took its
    // place inside <Secret>.
    assert!(!encrypted
        .iter()
        .any(|e| matches!(e, XmlEvent::Text(t) if t == "hello & <stuff>")));
    assert!(encrypted.iter().any(|e| e.is_start_of(NS_XENC, "EncryptedData")));
    assert!(encrypted.iter().any(|e| e.is_start_of(NS_XENC, "EncryptedKey")));
    assert!(encrypted
        .iter()
        .filter_map(XmlEvent::as_start)
        .any(|e| e.name.local_name() == "Secret"));

    let decrypted = decrypt_document(encrypted, private);

    // The recovered stream carries the original content.
    let note = decrypted
        .iter()
        .filter_map(XmlEvent::as_start)
        .find(|e| e.name.local_name() == "Note")
        .expect("note recovered");
    assert_eq!(note.attribute_local("kind"), Some("private"));
    assert!(decrypted
        .iter()
        .any(|e| matches!(e, XmlEvent::Text(t) if t == "hello & <stuff>")));
    assert!(!decrypted.iter().any(|e| e.is_start_of(NS_XENC, "EncryptedData")));
}

/// Element encryption removes the whole element and decryption restores
/// it.
#[test]
fn test_element_encryption_roundtrip() {
    init_test_tracing();
    let (private, public) = rsa_pair();
    let encrypted = encrypt_document(SecurePart::element(QName::local("Secret")), public);

    assert!(!encrypted
        .iter()
        .filter_map(XmlEvent::as_start)
        .any(|e| e.name.local_name() == "Secret"));

    let decrypted = decrypt_document(encrypted, private);
    assert!(decrypted
        .iter()
        .filter_map(XmlEvent::as_start)
        .any(|e| e.name.local_name() == "Secret"));
    assert!(decrypted
        .iter()
        .any(|e| matches!(e, XmlEvent::Text(t) if t == "hello & <stuff>")));
}

/// Sign-then-encrypt: the inbound pipeline decrypts before reference
/// verification, so a signature over plaintext content verifies.
#[test]
fn test_sign_then_encrypt_roundtrip() {
    use xmlsec_stream::{KeyIdentifierType, SignActionConfig};

    init_test_tracing();
    let (private, public) = rsa_pair();
    let hmac = KeyMaterial::symmetric(vec![0x0B; 32]);

    let mut sign = SignActionConfig::new(vec![SecurePart::element(QName::local("Note"))]);
    sign.signing_key = Some(hmac.clone());
    sign.key_identifier = KeyIdentifierType::KeyName("k".to_string());
    let mut encrypt = EncryptActionConfig::new(vec![SecurePart::content(QName::local("Secret"))]);
    encrypt.transport_key = Some(public);

    let properties = OutboundSecurityProperties::new()
        .with_action(OutboundAction::Sign(sign))
        .with_action(OutboundAction::Encrypt(encrypt));
    let mut writer = begin_outbound(properties, VecEventSink::new()).unwrap();
    for event in secret_document() {
        writer.write_event(event).unwrap();
    }
    let protected = writer.close().unwrap().into_events();

    let mut properties = InboundSecurityProperties::default();
    properties.decryption_key = Some(private);
    properties.verification_key = Some(hmac);
    properties.fragment_parser = Some(Rc::new(SimpleFragmentParser));
    let mut reader =
        begin_inbound(properties, Box::new(VecEventSource::new(protected))).unwrap();
    reader.read_to_end().unwrap();
    let result = reader.document_result();
    assert_eq!(result.signature_verified, Some(true));
    assert!(result.performed_actions.contains(&XmlSecAction::Signature));
    assert!(result.performed_actions.contains(&XmlSecAction::Encryption));
}
