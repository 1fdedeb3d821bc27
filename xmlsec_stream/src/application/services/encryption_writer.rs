// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Encryption Output Processing
//!
//! Replaces each selected part of the outbound document with an
//! `<EncryptedData>` structure. For every part a fresh session key is
//! generated with the exact length the symmetric algorithm URI mandates,
//! the captured scope is serialized canonically and encrypted, and the
//! session key is wrapped under the configured transport token and
//! embedded as an `<EncryptedKey>` inside the structure's KeyInfo.
//!
//! A `Content` part keeps the element tags and encrypts the children; an
//! `Element` part encrypts the whole element.

use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use ring::rand::SystemRandom;

use xmlsec_stream_domain::events::{SecurityEvent, TokenUsage};
use xmlsec_stream_domain::services::algorithm_registry::ALG_C14N_WITH_COMMENTS;
use xmlsec_stream_domain::value_objects::xml_names::{TYPE_ENCRYPTED_CONTENT, TYPE_ENCRYPTED_ELEMENT};
use xmlsec_stream_domain::value_objects::{
    EncryptedDataSpec, EncryptedKeySpec, KeyInfoSpec, OaepParams, QName, StartElementEvent,
    XmlEvent,
};
use xmlsec_stream_domain::XmlSecurityError;

use crate::application::services::outbound_chain::{OutboundContext, OutputProcessor};
use crate::application::services::structure_writer::encrypted_data_events;
use crate::config::{EncryptActionConfig, PartModifier};
use crate::infrastructure::adapters::key_transport::wrap_key;
use crate::infrastructure::adapters::symmetric_cipher;
use crate::infrastructure::transforms::{canonicalize_to_bytes, AncestorScope};

struct ActiveCapture {
    modifier: PartModifier,
    /// For Content parts, the element whose children are being captured.
    parent_name: QName,
    events: Vec<XmlEvent>,
    depth: usize,
}

/// Outbound handler producing element-level encryption.
pub struct EncryptionOutputProcessor {
    config: EncryptActionConfig,
    rng: SystemRandom,
    element_stack: Vec<StartElementEvent>,
    active: Option<ActiveCapture>,
}

impl EncryptionOutputProcessor {
    pub fn new(config: EncryptActionConfig) -> Result<Self, XmlSecurityError> {
        if config.transport_key.is_none() {
            return Err(XmlSecurityError::invalid_config(
                "ENCRYPT action has no transport key",
            ));
        }
        Ok(Self {
            config,
            rng: SystemRandom::new(),
            element_stack: Vec::new(),
            active: None,
        })
    }

    fn matching_part(&self, name: &QName) -> Option<PartModifier> {
        self.config
            .parts
            .iter()
            .find(|p| &p.name == name)
            .map(|p| p.modifier)
    }

    /// Encrypts a captured scope and returns the replacement events.
    fn encrypt_capture(
        &mut self,
        capture: &ActiveCapture,
        ctx: &mut OutboundContext,
    ) -> Result<Vec<XmlEvent>, XmlSecurityError> {
        let ancestors = AncestorScope::from_ancestors(&self.element_stack);
        // Comments survive encryption, so the serialization keeps them.
        let plaintext = canonicalize_to_bytes(
            ALG_C14N_WITH_COMMENTS,
            Vec::new(),
            ancestors,
            &capture.events,
        )?;

        // Session key bytes are wiped once the wrap and the encryption are
        // done.
        let session_key = Zeroizing::new(symmetric_cipher::generate_session_key(
            &self.config.symmetric_algorithm_uri,
            &self.rng,
        )?);
        ctx.bus.dispatch(&SecurityEvent::algorithm_used(
            self.config.symmetric_algorithm_uri.clone(),
            TokenUsage::Encryption,
            (session_key.len() * 8) as u32,
            None,
        ));
        let cipher_value = symmetric_cipher::encrypt(
            &self.config.symmetric_algorithm_uri,
            &session_key,
            &plaintext,
            &self.rng,
        )?;

        let transport_key = self
            .config
            .transport_key
            .as_ref()
            .ok_or_else(|| XmlSecurityError::invalid_config("ENCRYPT action has no transport key"))?;
        ctx.bus.dispatch(&SecurityEvent::algorithm_used(
            self.config.key_transport_uri.clone(),
            if transport_key.is_asymmetric() {
                TokenUsage::AsymmetricKeyWrap
            } else {
                TokenUsage::SymmetricKeyWrap
            },
            transport_key.key_length_bits(),
            None,
        ));
        let wrapped = wrap_key(
            &self.config.key_transport_uri,
            &OaepParams::default(),
            transport_key,
            &session_key,
        )?;

        let embedded_key = EncryptedKeySpec {
            id: None,
            encryption_method_uri: self.config.key_transport_uri.clone(),
            oaep: OaepParams::default(),
            key_info: match &self.config.key_name {
                Some(name) => KeyInfoSpec::KeyName(name.clone()),
                None => KeyInfoSpec::None,
            },
            cipher_value: wrapped,
            reference_list: Vec::new(),
        };
        let spec = EncryptedDataSpec {
            id: Some(format!("ed-{}", Uuid::new_v4())),
            type_uri: Some(
                match capture.modifier {
                    PartModifier::Element => TYPE_ENCRYPTED_ELEMENT,
                    PartModifier::Content => TYPE_ENCRYPTED_CONTENT,
                }
                .to_string(),
            ),
            encryption_method_uri: self.config.symmetric_algorithm_uri.clone(),
            key_info: KeyInfoSpec::None,
            embedded_key: Some(embedded_key),
            cipher_value,
        };
        debug!(encrypted_data = ?spec.id, modifier = ?capture.modifier, "part encrypted");
        encrypted_data_events(&spec)
    }
}

impl OutputProcessor for EncryptionOutputProcessor {
    fn process_event(
        &mut self,
        event: XmlEvent,
        ctx: &mut OutboundContext,
        out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError> {
        if let Some(mut capture) = self.active.take() {
            match &event {
                XmlEvent::StartElement(_) => {
                    capture.depth += 1;
                    capture.events.push(event);
                    self.active = Some(capture);
                }
                XmlEvent::EndElement { name } => {
                    if capture.depth == 0 {
                        // Content capture: this end tag belongs to the
                        // parent and stays in the clear.
                        debug_assert!(name == &capture.parent_name);
                        out.extend(self.encrypt_capture(&capture, ctx)?);
                        self.element_stack.pop();
                        out.push(event);
                    } else {
                        capture.depth -= 1;
                        capture.events.push(event);
                        if capture.depth == 0 && capture.modifier == PartModifier::Element {
                            out.extend(self.encrypt_capture(&capture, ctx)?);
                        } else {
                            self.active = Some(capture);
                        }
                    }
                }
                _ => {
                    capture.events.push(event);
                    self.active = Some(capture);
                }
            }
            return Ok(());
        }

        match event {
            XmlEvent::StartElement(ref element) => {
                match self.matching_part(&element.name) {
                    Some(PartModifier::Element) => {
                        self.active = Some(ActiveCapture {
                            modifier: PartModifier::Element,
                            parent_name: element.name.clone(),
                            events: vec![event],
                            depth: 1,
                        });
                    }
                    Some(PartModifier::Content) => {
                        // The element stays in the clear; children are
                        // captured from here.
                        self.element_stack.push(element.clone());
                        self.active = Some(ActiveCapture {
                            modifier: PartModifier::Content,
                            parent_name: element.name.clone(),
                            events: Vec::new(),
                            depth: 0,
                        });
                        out.push(event);
                    }
                    None => {
                        self.element_stack.push(element.clone());
                        out.push(event);
                    }
                }
            }
            XmlEvent::EndElement { .. } => {
                self.element_stack.pop();
                out.push(event);
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn finish(
        &mut self,
        _ctx: &mut OutboundContext,
        _out: &mut Vec<XmlEvent>,
    ) -> Result<(), XmlSecurityError> {
        if self.active.is_some() {
            return Err(XmlSecurityError::missing_element(
                "encrypted part never closed",
            ));
        }
        Ok(())
    }
}
