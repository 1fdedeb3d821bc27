// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Sign-then-verify round trips through the outbound and inbound
//! pipelines.

use crate::common::{end_local, init_test_tracing, start_local, RecordingListener};
use xmlsec_stream::domain::entities::KeyMaterial;
use xmlsec_stream::domain::events::SecurityEventKind;
use xmlsec_stream::domain::value_objects::xml_names::NS_DSIG;
use xmlsec_stream::domain::value_objects::{QName, ReferenceOutcome, XmlEvent};
use xmlsec_stream::{
    begin_inbound, begin_outbound, InboundSecurityProperties, KeyIdentifierType, OutboundAction,
    OutboundSecurityProperties, SecurePart, SignActionConfig, VecEventSink, VecEventSource,
    XmlSecAction,
};

fn hmac_key() -> KeyMaterial {
    KeyMaterial::symmetric(vec![0x0B; 32])
}

fn sign_document(parts: Vec<SecurePart>, events: Vec<XmlEvent>) -> Vec<XmlEvent> {
    let mut sign = SignActionConfig::new(parts);
    sign.signing_key = Some(hmac_key());
    sign.key_identifier = KeyIdentifierType::KeyName("test-key".to_string());
    let properties =
        OutboundSecurityProperties::new().with_action(OutboundAction::Sign(sign));
    let mut writer = begin_outbound(properties, VecEventSink::new()).unwrap();
    for event in events {
        writer.write_event(event).unwrap();
    }
    writer.close().unwrap().into_events()
}

fn payload_document() -> Vec<XmlEvent> {
    vec![
        XmlEvent::StartDocument {
            encoding: Some("UTF-8".to_string()),
            standalone: None,
        },
        start_local("Doc", &[]),
        start_local("Payload", &[]),
        XmlEvent::text("sensitive content"),
        end_local("Payload"),
        end_local("Doc"),
        XmlEvent::EndDocument,
    ]
}

/// A document signed over element E verifies inbound with
/// `verified = true` and `processed-references = [E]`.
#[test]
fn test_detached_part_roundtrip() {
    init_test_tracing();
    let signed = sign_document(
        vec![SecurePart::element(QName::local("Payload"))],
        payload_document(),
    );
    // The signature landed inside the document element.
    assert!(signed
        .iter()
        .any(|e| e.is_start_of(NS_DSIG, "Signature")));

    let listener = RecordingListener::shared();
    let mut properties = InboundSecurityProperties::default();
    properties.verification_key = Some(hmac_key());
    properties.listeners.push(listener.clone());

    let mut reader =
        begin_inbound(properties, Box::new(VecEventSource::new(signed))).unwrap();
    let events = reader.read_to_end().unwrap();
    let result = reader.document_result();

    assert_eq!(result.signature_verified, Some(true));
    assert_eq!(result.signatures.len(), 1);
    let statuses = &result.signatures[0].reference_statuses;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].outcome, ReferenceOutcome::Verified);
    assert!(result.performed_actions.contains(&XmlSecAction::Signature));

    // The processed reference points at the Payload element's generated
    // id.
    let payload_id = events
        .iter()
        .filter_map(XmlEvent::as_start)
        .find(|e| e.name.local_name() == "Payload")
        .and_then(|e| e.id_attribute())
        .expect("payload id");
    assert_eq!(statuses[0].uri, format!("#{}", payload_id));

    // Algorithm events precede the verification outcome, which comes only
    // after every reference is resolved.
    let recorded = listener.events.borrow();
    let outcome_pos = recorded
        .iter()
        .position(|e| matches!(e.kind, SecurityEventKind::VerificationOutcome { .. }))
        .expect("outcome event");
    let last_algorithm_pos = recorded
        .iter()
        .rposition(|e| matches!(e.kind, SecurityEventKind::AlgorithmUsed { .. }))
        .expect("algorithm events");
    assert!(last_algorithm_pos < outcome_pos);
    match &recorded[outcome_pos].kind {
        SecurityEventKind::VerificationOutcome { verified, reference_statuses } => {
            assert!(*verified);
            assert_eq!(reference_statuses.len(), 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Signing the document element itself produces an enveloped signature
/// that verifies after the signature is appended into the signed scope.
#[test]
fn test_enveloped_root_roundtrip() {
    init_test_tracing();
    let signed = sign_document(
        vec![SecurePart::element(QName::local("Doc"))],
        payload_document(),
    );

    let mut properties = InboundSecurityProperties::default();
    properties.verification_key = Some(hmac_key());
    let mut reader =
        begin_inbound(properties, Box::new(VecEventSource::new(signed))).unwrap();
    reader.read_to_end().unwrap();
    let result = reader.document_result();
    assert_eq!(result.signature_verified, Some(true));
    assert_eq!(result.signatures[0].reference_statuses.len(), 1);
}

/// A tampered document fails with a digest mismatch.
#[test]
fn test_tampered_content_fails() {
    init_test_tracing();
    let mut signed = sign_document(
        vec![SecurePart::element(QName::local("Payload"))],
        payload_document(),
    );
    for event in signed.iter_mut() {
        if let XmlEvent::Text(text) = event {
            if text == "sensitive content" {
                *text = "tampered content".to_string();
            }
        }
    }

    let mut properties = InboundSecurityProperties::default();
    properties.verification_key = Some(hmac_key());
    let mut reader =
        begin_inbound(properties, Box::new(VecEventSource::new(signed))).unwrap();
    let err = reader.read_to_end().unwrap_err();
    assert!(matches!(
        err,
        xmlsec_stream::domain::XmlSecurityError::DigestMismatch(_)
    ));
}

/// A wrong verification key fails the signature value check before any
/// reference is reported verified.
#[test]
fn test_wrong_key_fails_signature_value() {
    init_test_tracing();
    let signed = sign_document(
        vec![SecurePart::element(QName::local("Payload"))],
        payload_document(),
    );

    let mut properties = InboundSecurityProperties::default();
    properties.verification_key = Some(KeyMaterial::symmetric(vec![0xEE; 32]));
    let mut reader =
        begin_inbound(properties, Box::new(VecEventSource::new(signed))).unwrap();
    let err = reader.read_to_end().unwrap_err();
    assert!(matches!(
        err,
        xmlsec_stream::domain::XmlSecurityError::SignatureMismatch(_)
    ));
}

/// Required inbound actions are enforced at document end.
#[test]
fn test_required_action_missing() {
    init_test_tracing();
    let mut properties = InboundSecurityProperties::default();
    properties.required_actions.push(XmlSecAction::Signature);
    let mut reader = begin_inbound(
        properties,
        Box::new(VecEventSource::new(payload_document())),
    )
    .unwrap();
    let err = reader.read_to_end().unwrap_err();
    assert!(matches!(
        err,
        xmlsec_stream::domain::XmlSecurityError::MissingElement(_)
    ));
}
