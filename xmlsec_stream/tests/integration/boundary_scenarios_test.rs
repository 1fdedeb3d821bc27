// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Boundary scenarios with literal inputs and expected outcomes:
//! manifest rejection, duplicate references, implicit canonicalization
//! after the enveloped transform, OAEP defaults, the unwrap timing
//! mitigation, and external-reference gating.

use std::rc::Rc;

use rsa::RsaPrivateKey;

use crate::common::{
    end_local, init_test_tracing, start_local, RecordingListener, SimpleFragmentParser,
};
use xmlsec_stream::application::services::encrypted_key::register_encrypted_key;
use xmlsec_stream::application::services::inbound_chain::InboundContext;
use xmlsec_stream::application::services::structure_writer::{
    self, encrypted_data_events, KeyInfoContent,
};
use xmlsec_stream::domain::entities::KeyMaterial;
use xmlsec_stream::domain::events::{SecurityEventKind, TokenUsage};
use xmlsec_stream::domain::services::algorithm_registry::{
    ALG_AES256_CBC, ALG_AES256_GCM, ALG_C14N_OMIT_COMMENTS, ALG_EXCL_C14N_OMIT_COMMENTS,
    ALG_HMAC_SHA256, ALG_RSA_OAEP_MGF1P, ALG_SHA256, ALG_TRANSFORM_ENVELOPED,
};
use xmlsec_stream::domain::value_objects::xml_names::{NS_DSIG, TYPE_MANIFEST};
use xmlsec_stream::domain::value_objects::{
    EncryptedDataSpec, EncryptedKeySpec, KeyInfoSpec, NamespaceDecl, OaepParams, QName,
    ReferenceSpec, SignedInfoSpec, StartElementEvent, TransformSpec, XmlEvent,
};
use xmlsec_stream::domain::XmlSecurityError;
use xmlsec_stream::infrastructure::adapters::key_transport::wrap_key;
use xmlsec_stream::infrastructure::adapters::signature_crypto::{
    self, rsa_private_key_material, rsa_public_key_material,
};
use xmlsec_stream::infrastructure::adapters::symmetric_cipher;
use xmlsec_stream::infrastructure::transforms::{canonicalize_to_bytes, AncestorScope};
use xmlsec_stream::{begin_inbound, InboundSecurityProperties, VecEventSource};

fn hmac_key() -> KeyMaterial {
    KeyMaterial::symmetric(vec![0x42; 32])
}

fn sha256_reference(uri: &str, digest: Vec<u8>, transforms: Vec<TransformSpec>) -> ReferenceSpec {
    ReferenceSpec {
        uri: Some(uri.to_string()),
        type_uri: None,
        digest_algorithm_uri: ALG_SHA256.to_string(),
        expected_digest: digest,
        transforms,
    }
}

fn signed_info(references: Vec<ReferenceSpec>) -> SignedInfoSpec {
    SignedInfoSpec {
        canonicalization_uri: ALG_EXCL_C14N_OMIT_COMMENTS.to_string(),
        signature_algorithm_uri: ALG_HMAC_SHA256.to_string(),
        references,
    }
}

/// Builds a correctly signed `<Signature>` element for a document whose
/// root is `root`.
fn hmac_signature_events(info: &SignedInfoSpec, root: &StartElementEvent) -> Vec<XmlEvent> {
    let signature_start = StartElementEvent::new(QName::with_prefix(NS_DSIG, "ds", "Signature"))
        .with_namespaces(vec![NamespaceDecl::new(Some("ds"), NS_DSIG)]);
    let scope = AncestorScope::from_ancestors(&[root.clone(), signature_start]);
    let canonical = canonicalize_to_bytes(
        &info.canonicalization_uri,
        Vec::new(),
        scope,
        &structure_writer::signed_info_events(info),
    )
    .unwrap();
    let value =
        signature_crypto::sign(&info.signature_algorithm_uri, &hmac_key(), &canonical).unwrap();
    structure_writer::signature_events(
        "sig-test",
        info,
        &value,
        &KeyInfoContent::KeyName("k".to_string()),
    )
    .unwrap()
}

fn verify_expecting_error(
    events: Vec<XmlEvent>,
    listener: Rc<RecordingListener>,
) -> XmlSecurityError {
    let mut properties = InboundSecurityProperties::default();
    properties.verification_key = Some(hmac_key());
    properties.listeners.push(listener);
    let mut reader = begin_inbound(properties, Box::new(VecEventSource::new(events))).unwrap();
    reader.read_to_end().unwrap_err()
}

/// Scenario 1: a Manifest-typed reference is rejected under the default
/// configuration, before any digest is computed.
#[test]
fn test_manifest_rejection() {
    init_test_tracing();
    let mut reference = sha256_reference("#x", vec![0u8; 32], vec![]);
    reference.type_uri = Some(TYPE_MANIFEST.to_string());
    let info = signed_info(vec![reference]);

    let root = StartElementEvent::new(QName::local("Doc"));
    let mut events = vec![XmlEvent::StartElement(root.clone())];
    events.extend(hmac_signature_events(&info, &root));
    events.push(start_local("E", &[("Id", "x")]));
    events.push(end_local("E"));
    events.push(end_local("Doc"));

    let listener = RecordingListener::shared();
    let err = verify_expecting_error(events, listener.clone());
    assert!(matches!(err, XmlSecurityError::SecurityViolation(_)));
    assert_eq!(err.category(), "secure-processing");

    // No digest was computed.
    assert!(!listener
        .events
        .borrow()
        .iter()
        .any(|e| matches!(e.kind, SecurityEventKind::AlgorithmUsed { .. })));
}

/// Scenario 2: two references with URI `#x` matching the same element:
/// the first match creates a verifier, the second fails as a duplicate.
#[test]
fn test_duplicate_reference() {
    init_test_tracing();
    let info = signed_info(vec![
        sha256_reference("#x", vec![0u8; 32], vec![]),
        sha256_reference("#x", vec![1u8; 32], vec![]),
    ]);

    let root = StartElementEvent::new(QName::local("Doc"));
    let mut events = vec![XmlEvent::StartElement(root.clone())];
    events.extend(hmac_signature_events(&info, &root));
    events.push(start_local("E", &[("Id", "x")]));
    events.push(end_local("E"));
    events.push(end_local("Doc"));

    let err = verify_expecting_error(events, RecordingListener::shared());
    assert!(matches!(err, XmlSecurityError::DuplicateReference(_)));
}

/// Scenario 3: a reference declaring only the enveloped-signature
/// transform digests through enveloped, then Canonical XML 1.0
/// omit-comments, in that order.
#[test]
fn test_enveloped_with_implicit_canonicalization() {
    init_test_tracing();
    let root = StartElementEvent::new(QName::local("Doc"))
        .with_attributes(vec![xmlsec_stream::domain::value_objects::Attribute::new(
            QName::local("Id"),
            "r",
        )]);
    let content = vec![
        XmlEvent::StartElement(root.clone()),
        start_local("Data", &[]),
        XmlEvent::text("payload"),
        end_local("Data"),
        end_local("Doc"),
    ];
    // The digest covers the canonical form of the document minus the
    // signature, which equals the canonical form of the unsigned content.
    let canonical =
        canonicalize_to_bytes(ALG_C14N_OMIT_COMMENTS, Vec::new(), AncestorScope::default(), &content)
            .unwrap();
    let digest = {
        use sha2::{Digest, Sha256};
        Sha256::digest(&canonical).to_vec()
    };

    let info = signed_info(vec![sha256_reference(
        "#r",
        digest,
        vec![TransformSpec::new(ALG_TRANSFORM_ENVELOPED)],
    )]);

    let mut events = content;
    let end = events.pop().unwrap();
    events.extend(hmac_signature_events(&info, &root));
    events.push(end);

    let mut properties = InboundSecurityProperties::default();
    properties.verification_key = Some(hmac_key());
    let mut reader = begin_inbound(properties, Box::new(VecEventSource::new(events))).unwrap();
    reader.read_to_end().unwrap();
    assert_eq!(reader.document_result().signature_verified, Some(true));
}

/// Scenario 4: an EncryptionMethod with no DigestMethod and no MGF child
/// defaults to SHA-1 and MGF1-SHA-1, and the unwrap proceeds.
#[test]
fn test_oaep_defaults_roundtrip() {
    init_test_tracing();
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let public_material = rsa_public_key_material(&private.to_public_key()).unwrap();
    let private_material = rsa_private_key_material(&private).unwrap();

    let rng = ring::rand::SystemRandom::new();
    let session_key = symmetric_cipher::generate_session_key(ALG_AES256_CBC, &rng).unwrap();
    let plaintext = b"<Inner>content</Inner>".to_vec();
    let cipher_value =
        symmetric_cipher::encrypt(ALG_AES256_CBC, &session_key, &plaintext, &rng).unwrap();
    let wrapped = wrap_key(
        ALG_RSA_OAEP_MGF1P,
        &OaepParams::default(),
        &public_material,
        &session_key,
    )
    .unwrap();

    let spec = EncryptedDataSpec {
        id: Some("ed-1".to_string()),
        type_uri: None,
        encryption_method_uri: ALG_AES256_CBC.to_string(),
        key_info: KeyInfoSpec::None,
        embedded_key: Some(EncryptedKeySpec {
            id: None,
            encryption_method_uri: ALG_RSA_OAEP_MGF1P.to_string(),
            oaep: OaepParams::default(),
            key_info: KeyInfoSpec::None,
            cipher_value: wrapped,
            reference_list: vec![],
        }),
        cipher_value,
    };
    let structure = encrypted_data_events(&spec).unwrap();
    // Defaults are omitted from the wire: no DigestMethod, no MGF child.
    assert!(!structure
        .iter()
        .filter_map(XmlEvent::as_start)
        .any(|e| e.name.local_name() == "DigestMethod" || e.name.local_name() == "MGF"));

    let mut events = vec![start_local("Doc", &[])];
    events.extend(structure);
    events.push(end_local("Doc"));

    let mut properties = InboundSecurityProperties::default();
    properties.decryption_key = Some(private_material);
    properties.fragment_parser = Some(Rc::new(SimpleFragmentParser));
    let mut reader = begin_inbound(properties, Box::new(VecEventSource::new(events))).unwrap();
    let decrypted = reader.read_to_end().unwrap();
    assert!(decrypted
        .iter()
        .any(|e| matches!(e, XmlEvent::Text(t) if t == "content")));
}

/// Scenario 5: an EncryptedKey whose ciphertext cannot decrypt yields a
/// synthesized key of the symmetric algorithm's exact length from the key
/// fetch, and the failure surfaces later as a cipher-integrity error.
#[test]
fn test_unwrap_timing_mitigation() {
    init_test_tracing();
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let private_material = rsa_private_key_material(&private).unwrap();

    // Direct token-level check: the key fetch succeeds and returns 32
    // bytes for aes256-cbc.
    let mut properties = InboundSecurityProperties::default();
    properties.decryption_key = Some(private_material.clone());
    properties.fragment_parser = Some(Rc::new(SimpleFragmentParser));
    let ctx = InboundContext::new(Rc::new(properties));
    let garbage_key = EncryptedKeySpec {
        id: Some("ek-1".to_string()),
        encryption_method_uri: ALG_RSA_OAEP_MGF1P.to_string(),
        oaep: OaepParams::default(),
        key_info: KeyInfoSpec::None,
        cipher_value: vec![0x5A; 256],
        reference_list: vec![],
    };
    register_encrypted_key(garbage_key.clone(), &ctx, "ek-1").unwrap();
    let token = ctx.providers.token_for("ek-1", &ctx.arena).unwrap();
    let key = ctx
        .arena
        .secret_key_for(token, ALG_AES256_CBC, TokenUsage::Decryption, Some("ek-1"))
        .expect("no error leaks from the key fetch");
    assert_eq!(key.symmetric_bytes().unwrap().len(), 32);

    // Memoized: the same bytes come back.
    let again = ctx
        .arena
        .secret_key_for(token, ALG_AES256_CBC, TokenUsage::Decryption, Some("ek-1"))
        .unwrap();
    assert_eq!(key.symmetric_bytes(), again.symmetric_bytes());

    // Full pipeline: decryption fails downstream at integrity-check time,
    // never as an unwrap error. AES-GCM makes the integrity failure
    // deterministic under the synthesized key.
    let rng = ring::rand::SystemRandom::new();
    let real_key = symmetric_cipher::generate_session_key(ALG_AES256_GCM, &rng).unwrap();
    let cipher_value =
        symmetric_cipher::encrypt(ALG_AES256_GCM, &real_key, b"<X>data</X>", &rng).unwrap();
    let spec = EncryptedDataSpec {
        id: Some("ed-1".to_string()),
        type_uri: None,
        encryption_method_uri: ALG_AES256_GCM.to_string(),
        key_info: KeyInfoSpec::None,
        embedded_key: Some(garbage_key),
        cipher_value,
    };
    let mut events = vec![start_local("Doc", &[])];
    events.extend(encrypted_data_events(&spec).unwrap());
    events.push(end_local("Doc"));

    let mut properties = InboundSecurityProperties::default();
    properties.decryption_key = Some(private_material);
    properties.fragment_parser = Some(Rc::new(SimpleFragmentParser));
    let mut reader = begin_inbound(properties, Box::new(VecEventSource::new(events))).unwrap();
    let err = reader.read_to_end().unwrap_err();
    assert!(matches!(err, XmlSecurityError::DigestMismatch(_)));
    assert!(!matches!(err, XmlSecurityError::KeyResolutionFailed(_)));
}

/// Scenario 6: an external reference is refused while external references
/// are disabled.
#[test]
fn test_external_reference_disabled() {
    init_test_tracing();
    let info = signed_info(vec![sha256_reference("http://example/", vec![0u8; 32], vec![])]);

    let root = StartElementEvent::new(QName::local("Doc"));
    let mut events = vec![XmlEvent::StartElement(root.clone())];
    events.extend(hmac_signature_events(&info, &root));
    events.push(end_local("Doc"));

    let err = verify_expecting_error(events, RecordingListener::shared());
    assert!(matches!(err, XmlSecurityError::SecurityViolation(_)));
}
