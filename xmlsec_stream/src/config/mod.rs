// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Properties
//!
//! The per-invocation configuration of the inbound and outbound pipelines:
//! which actions run, with which algorithms and keys, under which
//! secure-processing limits. Loading configuration from files is a
//! collaborator concern; these records are built programmatically.
//!
//! ## Outbound Defaults
//!
//! | Action  | Parameter           | Default                        |
//! |---------|---------------------|--------------------------------|
//! | SIGN    | signature algorithm | derived from key (RSA→rsa-sha1, symmetric→hmac-sha1) |
//! | SIGN    | digest algorithm    | xmldsig SHA-1                  |
//! | SIGN    | canonicalization    | exclusive c14n omit-comments   |
//! | SIGN    | key identifier      | X509 issuer-serial             |
//! | ENCRYPT | key transport       | rsa-oaep-mgf1p                 |
//! | ENCRYPT | symmetric cipher    | aes-256-cbc                    |

use std::rc::Rc;

use xmlsec_stream_domain::entities::{KeyMaterial, TokenArena, TokenId};
use xmlsec_stream_domain::events::{SecurityEventListener, TokenUsage};
use xmlsec_stream_domain::services::algorithm_registry::{
    ALG_AES256_CBC, ALG_EXCL_C14N_OMIT_COMMENTS, ALG_RSA_OAEP_MGF1P, ALG_SHA1,
};
use xmlsec_stream_domain::services::ResourceResolver;
use xmlsec_stream_domain::value_objects::{KeyInfoSpec, QName, SecurityLimits, XmlEvent};
use xmlsec_stream_domain::XmlSecurityError;

/// Parses decrypted plaintext back into events. The engine performs no XML
/// parsing of its own; integrators supply this boundary.
pub trait FragmentParser {
    fn parse_fragment(&self, bytes: &[u8]) -> Result<Vec<XmlEvent>, XmlSecurityError>;
}

/// Walks a KeyInfo locator and produces the matching token, typically by
/// consulting an application key store.
pub trait KeyResolverCallback {
    fn resolve_token(
        &self,
        key_info: &KeyInfoSpec,
        usage: TokenUsage,
        arena: &TokenArena,
    ) -> Result<Option<TokenId>, XmlSecurityError>;
}

/// The security actions a document can carry or require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum XmlSecAction {
    Signature,
    Encryption,
}

/// How the signer identifies its key in `<KeyInfo>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIdentifierType {
    X509IssuerSerial,
    X509Certificate,
    KeyName(String),
    NoKeyInfo,
}

impl Default for KeyIdentifierType {
    fn default() -> Self {
        KeyIdentifierType::X509IssuerSerial
    }
}

/// Whether a secured part covers the element or only its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartModifier {
    Element,
    Content,
}

/// One element selected for signing or encryption.
#[derive(Debug, Clone)]
pub struct SecurePart {
    pub name: QName,
    pub modifier: PartModifier,
}

impl SecurePart {
    /// An element part: the element itself is secured.
    pub fn element(name: QName) -> Self {
        Self {
            name,
            modifier: PartModifier::Element,
        }
    }

    /// A content part: the element's children are secured.
    pub fn content(name: QName) -> Self {
        Self {
            name,
            modifier: PartModifier::Content,
        }
    }
}

/// Parameters of one SIGN action.
pub struct SignActionConfig {
    pub parts: Vec<SecurePart>,
    /// Defaults from the signing key when absent.
    pub signature_algorithm_uri: Option<String>,
    pub digest_algorithm_uri: String,
    pub canonicalization_uri: String,
    pub key_identifier: KeyIdentifierType,
    pub signing_key: Option<KeyMaterial>,
    /// DER certificate chain, first certificate being the signer's.
    pub certificates: Vec<Vec<u8>>,
}

impl SignActionConfig {
    pub fn new(parts: Vec<SecurePart>) -> Self {
        Self {
            parts,
            signature_algorithm_uri: None,
            digest_algorithm_uri: ALG_SHA1.to_string(),
            canonicalization_uri: ALG_EXCL_C14N_OMIT_COMMENTS.to_string(),
            key_identifier: KeyIdentifierType::default(),
            signing_key: None,
            certificates: Vec::new(),
        }
    }
}

/// Parameters of one ENCRYPT action.
pub struct EncryptActionConfig {
    pub parts: Vec<SecurePart>,
    pub symmetric_algorithm_uri: String,
    pub key_transport_uri: String,
    /// Key that wraps the generated session key: RSA public material for
    /// key transport, symmetric material for kw-aes.
    pub transport_key: Option<KeyMaterial>,
    /// Optional `<KeyName>` emitted inside the EncryptedKey's KeyInfo.
    pub key_name: Option<String>,
}

impl EncryptActionConfig {
    pub fn new(parts: Vec<SecurePart>) -> Self {
        Self {
            parts,
            symmetric_algorithm_uri: ALG_AES256_CBC.to_string(),
            key_transport_uri: ALG_RSA_OAEP_MGF1P.to_string(),
            transport_key: None,
            key_name: None,
        }
    }
}

/// One outbound action, in emission order.
pub enum OutboundAction {
    Sign(SignActionConfig),
    Encrypt(EncryptActionConfig),
}

/// Outbound pipeline configuration.
#[derive(Default)]
pub struct OutboundSecurityProperties {
    pub actions: Vec<OutboundAction>,
    pub listeners: Vec<Rc<dyn SecurityEventListener>>,
}

impl OutboundSecurityProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: OutboundAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn validate(&self) -> Result<(), XmlSecurityError> {
        if self.actions.is_empty() {
            return Err(XmlSecurityError::invalid_config(
                "outbound properties declare no actions",
            ));
        }
        for action in &self.actions {
            match action {
                OutboundAction::Sign(sign) => {
                    if sign.parts.is_empty() {
                        return Err(XmlSecurityError::invalid_config(
                            "SIGN action declares no parts",
                        ));
                    }
                    if sign.signing_key.is_none() {
                        return Err(XmlSecurityError::invalid_config(
                            "SIGN action has no signing key",
                        ));
                    }
                }
                OutboundAction::Encrypt(encrypt) => {
                    if encrypt.parts.is_empty() {
                        return Err(XmlSecurityError::invalid_config(
                            "ENCRYPT action declares no parts",
                        ));
                    }
                    if encrypt.transport_key.is_none() {
                        return Err(XmlSecurityError::invalid_config(
                            "ENCRYPT action has no transport key",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Inbound pipeline configuration.
pub struct InboundSecurityProperties {
    pub verify_signatures: bool,
    pub decrypt: bool,
    pub required_actions: Vec<XmlSecAction>,
    pub limits: SecurityLimits,
    /// Direct verification key, used when KeyInfo is absent or opaque.
    pub verification_key: Option<KeyMaterial>,
    /// Direct decryption KEK, used when KeyInfo is absent or opaque.
    pub decryption_key: Option<KeyMaterial>,
    pub key_resolver: Option<Rc<dyn KeyResolverCallback>>,
    pub fragment_parser: Option<Rc<dyn FragmentParser>>,
    pub listeners: Vec<Rc<dyn SecurityEventListener>>,
    pub base_uri: Option<String>,
    pub external_resolvers: Vec<Rc<dyn ResourceResolver>>,
}

impl Default for InboundSecurityProperties {
    fn default() -> Self {
        Self {
            verify_signatures: true,
            decrypt: true,
            required_actions: Vec::new(),
            limits: SecurityLimits::default(),
            verification_key: None,
            decryption_key: None,
            key_resolver: None,
            fragment_parser: None,
            listeners: Vec::new(),
            base_uri: None,
            external_resolvers: Vec::new(),
        }
    }
}

impl InboundSecurityProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), XmlSecurityError> {
        self.limits.validate()?;
        if self.decrypt
            && self.fragment_parser.is_none()
            && (self.decryption_key.is_some() || self.key_resolver.is_some())
        {
            return Err(XmlSecurityError::invalid_config(
                "decryption requires a fragment parser to re-emit plaintext events",
            ));
        }
        Ok(())
    }
}
