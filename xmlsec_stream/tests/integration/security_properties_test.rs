// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Property-based invariants: secure-processing limits fire before any
//! digest, recursion guards always clear, synthesized mitigation keys
//! carry the registry length, and canonical text round-trips.

use std::rc::Rc;

use proptest::prelude::*;

use crate::common::{end_local, init_test_tracing, parse_events, start_local, RecordingListener};
use xmlsec_stream::application::services::encrypted_key::register_encrypted_key;
use xmlsec_stream::application::services::inbound_chain::InboundContext;
use xmlsec_stream::application::services::structure_writer::{self, KeyInfoContent};
use xmlsec_stream::domain::entities::{
    KeyMaterial, SecurityToken, TokenArena, TokenId, TokenKeyResolver, TokenKind,
};
use xmlsec_stream::domain::events::{SecurityEventBus, SecurityEventKind, TokenUsage};
use xmlsec_stream::domain::services::algorithm_registry::{
    AlgorithmRegistry, ALG_AES128_CBC, ALG_AES128_GCM, ALG_AES192_CBC, ALG_AES256_CBC,
    ALG_AES256_GCM, ALG_EXCL_C14N_OMIT_COMMENTS, ALG_HMAC_SHA256, ALG_KW_AES256, ALG_SHA256,
};
use xmlsec_stream::domain::value_objects::{
    EncryptedKeySpec, KeyInfoSpec, OaepParams, ReferenceSpec, SignedInfoSpec, XmlEvent,
};
use xmlsec_stream::domain::XmlSecurityError;
use xmlsec_stream::infrastructure::transforms::{canonicalize_to_bytes, AncestorScope};
use xmlsec_stream::{begin_inbound, InboundSecurityProperties, VecEventSource};

fn reference_bomb(reference_count: usize) -> Vec<XmlEvent> {
    let references = (0..reference_count)
        .map(|i| ReferenceSpec {
            uri: Some(format!("#ref-{}", i)),
            type_uri: None,
            digest_algorithm_uri: ALG_SHA256.to_string(),
            expected_digest: vec![0u8; 32],
            transforms: vec![],
        })
        .collect();
    let info = SignedInfoSpec {
        canonicalization_uri: ALG_EXCL_C14N_OMIT_COMMENTS.to_string(),
        signature_algorithm_uri: ALG_HMAC_SHA256.to_string(),
        references,
    };
    // The signature value is garbage: the limit check must fire first.
    let signature = structure_writer::signature_events(
        "sig-bomb",
        &info,
        &[0u8; 32],
        &KeyInfoContent::None,
    )
    .unwrap();

    let mut events = vec![start_local("Doc", &[])];
    events.extend(signature);
    events.push(end_local("Doc"));
    events
}

struct SelfReferential;

impl TokenKeyResolver for SelfReferential {
    fn resolve_key(
        &self,
        arena: &TokenArena,
        token: TokenId,
        algorithm_uri: &str,
        usage: TokenUsage,
        correlation_id: Option<&str>,
    ) -> Result<Option<KeyMaterial>, XmlSecurityError> {
        arena
            .secret_key_for(token, algorithm_uri, usage, correlation_id)
            .map(Some)
    }
}

proptest! {
    /// For every reference count above the bound, verification fails with
    /// limit-exceeded and no digest is computed.
    #[test]
    fn prop_limit_exceeded_before_any_digest(count in 31usize..48) {
        init_test_tracing();
        let listener = RecordingListener::shared();
        let mut properties = InboundSecurityProperties::default();
        properties.verification_key = Some(KeyMaterial::symmetric(vec![1u8; 32]));
        properties.listeners.push(listener.clone());

        let mut reader = begin_inbound(
            properties,
            Box::new(VecEventSource::new(reference_bomb(count))),
        )
        .unwrap();
        let err = reader.read_to_end().unwrap_err();
        prop_assert!(matches!(err, XmlSecurityError::LimitExceeded(_)));
        let saw_algorithm_used = listener
            .events
            .borrow()
            .iter()
            .any(|e| matches!(e.kind, SecurityEventKind::AlgorithmUsed { .. }));
        prop_assert!(!saw_algorithm_used);
    }

    /// A key fetch from within a token's own resolver always fails with a
    /// recursive-reference error and leaves the guard cleared: the failure
    /// is identical on every attempt.
    #[test]
    fn prop_recursion_guard_clears(uri in "[a-z:#/]{1,24}", attempts in 1usize..5) {
        init_test_tracing();
        let arena = TokenArena::new(Rc::new(SecurityEventBus::new()));
        let token = arena.insert(
            SecurityToken::new(TokenKind::EncryptedKey).with_resolver(Rc::new(SelfReferential)),
        );
        for _ in 0..attempts {
            let err = arena
                .secret_key_for(token, &uri, TokenUsage::Decryption, None)
                .unwrap_err();
            prop_assert!(matches!(err, XmlSecurityError::RecursiveKeyReference(_)));
        }
    }

    /// For any EncryptedKey whose unwrap fails, the synthesized session
    /// key length equals the registry key length of the symmetric URI.
    #[test]
    fn prop_synthesized_key_matches_registry_length(
        symmetric_uri in prop::sample::select(vec![
            ALG_AES128_CBC,
            ALG_AES192_CBC,
            ALG_AES256_CBC,
            ALG_AES128_GCM,
            ALG_AES256_GCM,
        ]),
        garbage in prop::collection::vec(any::<u8>(), 24..64),
    ) {
        init_test_tracing();
        let mut properties = InboundSecurityProperties::default();
        // A symmetric KEK whose key-wrap integrity check cannot pass for
        // random data.
        properties.decryption_key = Some(KeyMaterial::symmetric(vec![7u8; 32]));
        properties.fragment_parser = None;
        properties.decrypt = false;
        let ctx = InboundContext::new(Rc::new(properties));

        let spec = EncryptedKeySpec {
            id: Some("ek-p".to_string()),
            encryption_method_uri: ALG_KW_AES256.to_string(),
            oaep: OaepParams::default(),
            key_info: KeyInfoSpec::None,
            cipher_value: garbage,
            reference_list: vec![],
        };
        register_encrypted_key(spec, &ctx, "ek-p").unwrap();
        let token = ctx.providers.token_for("ek-p", &ctx.arena).unwrap();
        let key = ctx
            .arena
            .secret_key_for(token, symmetric_uri, TokenUsage::Decryption, None)
            .unwrap();

        let expected = AlgorithmRegistry::global()
            .unwrap()
            .key_length_bits(symmetric_uri)
            .unwrap() as usize
            / 8;
        prop_assert_eq!(key.symmetric_bytes().unwrap().len(), expected);
    }

    /// Canonical serialization of text content round-trips through the
    /// fragment parser.
    #[test]
    fn prop_text_canonicalization_roundtrip(text in "[ -~]*") {
        init_test_tracing();
        let events = vec![
            start_local("E", &[]),
            XmlEvent::text(text.clone()),
            end_local("E"),
        ];
        let canonical = canonicalize_to_bytes(
            ALG_EXCL_C14N_OMIT_COMMENTS,
            Vec::new(),
            AncestorScope::default(),
            &events,
        )
        .unwrap();
        let parsed = parse_events(std::str::from_utf8(&canonical).unwrap()).unwrap();

        let recovered: String = parsed
            .iter()
            .filter_map(|e| match e {
                XmlEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(recovered, text);
    }
}
