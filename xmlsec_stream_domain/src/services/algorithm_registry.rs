// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Algorithm Registry
//!
//! Read-mostly mapping from algorithm URI to algorithm descriptor: family,
//! native primitive name, required key length, and a hint naming the
//! backend that implements it. The registry is built once from the
//! declarative table below and is the only process-wide state in the
//! engine; if construction fails, every signing and verification operation
//! is refused.
//!
//! Key lengths returned for symmetric URIs are exact: the same number of
//! bits is used for session-key generation and for the timing-mitigation
//! padding of failed unwraps.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::XmlSecurityError;

// Digest algorithms
pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ALG_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const ALG_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

// MAC algorithms
pub const ALG_HMAC_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha1";
pub const ALG_HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";
pub const ALG_HMAC_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha384";
pub const ALG_HMAC_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha512";

// Signature algorithms
pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ALG_DSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#dsa-sha1";
pub const ALG_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";

// Canonicalization algorithms
pub const ALG_C14N_OMIT_COMMENTS: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const ALG_C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const ALG_C14N11_OMIT_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const ALG_C14N11_WITH_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11#WithComments";
pub const ALG_EXCL_C14N_OMIT_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ALG_EXCL_C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

// Non-canonicalization transforms
pub const ALG_TRANSFORM_ENVELOPED: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

// Symmetric ciphers
pub const ALG_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const ALG_AES192_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const ALG_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const ALG_TRIPLEDES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";
pub const ALG_AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const ALG_AES192_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes192-gcm";
pub const ALG_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

// Key transport
pub const ALG_RSA_1_5: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const ALG_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
pub const ALG_RSA_OAEP: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";

// Symmetric key wrap
pub const ALG_KW_AES128: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes128";
pub const ALG_KW_AES192: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes192";
pub const ALG_KW_AES256: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes256";

// Mask generation functions
pub const ALG_MGF1_SHA1: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";
pub const ALG_MGF1_SHA256: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha256";

/// Algorithm families the engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Digest,
    Mac,
    Signature,
    Canonicalization,
    Transform,
    SymmetricCipher,
    KeyTransport,
    KeyWrap,
    MaskGeneration,
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct AlgorithmEntry {
    pub uri: &'static str,
    pub family: AlgorithmFamily,
    /// Native primitive name, e.g. `SHA-256` or `AES/CBC`.
    pub native_name: &'static str,
    /// Exact key length in bits where the algorithm mandates one.
    pub key_length_bits: Option<u32>,
    /// Symbolic key family used when generating symmetric session keys.
    pub key_family: Option<&'static str>,
    /// Which backend implements this algorithm.
    pub provider_hint: &'static str,
}

type Row = (
    &'static str,
    AlgorithmFamily,
    &'static str,
    Option<u32>,
    Option<&'static str>,
    &'static str,
);

/// The declarative table the registry is built from.
#[rustfmt::skip]
const ALGORITHM_TABLE: &[Row] = &[
    (ALG_SHA1,   AlgorithmFamily::Digest, "SHA-1",   None, None, "sha1"),
    (ALG_SHA256, AlgorithmFamily::Digest, "SHA-256", None, None, "sha2"),
    (ALG_SHA384, AlgorithmFamily::Digest, "SHA-384", None, None, "sha2"),
    (ALG_SHA512, AlgorithmFamily::Digest, "SHA-512", None, None, "sha2"),

    (ALG_HMAC_SHA1,   AlgorithmFamily::Mac, "HmacSHA1",   Some(160), Some("HMAC"), "hmac"),
    (ALG_HMAC_SHA256, AlgorithmFamily::Mac, "HmacSHA256", Some(256), Some("HMAC"), "hmac"),
    (ALG_HMAC_SHA384, AlgorithmFamily::Mac, "HmacSHA384", Some(384), Some("HMAC"), "hmac"),
    (ALG_HMAC_SHA512, AlgorithmFamily::Mac, "HmacSHA512", Some(512), Some("HMAC"), "hmac"),

    (ALG_RSA_SHA1,     AlgorithmFamily::Signature, "SHA1withRSA",    None, Some("RSA"), "rsa"),
    (ALG_RSA_SHA256,   AlgorithmFamily::Signature, "SHA256withRSA",  None, Some("RSA"), "rsa"),
    (ALG_RSA_SHA384,   AlgorithmFamily::Signature, "SHA384withRSA",  None, Some("RSA"), "rsa"),
    (ALG_RSA_SHA512,   AlgorithmFamily::Signature, "SHA512withRSA",  None, Some("RSA"), "rsa"),
    (ALG_DSA_SHA1,     AlgorithmFamily::Signature, "SHA1withDSA",    None, Some("DSA"), "unsupported"),
    (ALG_ECDSA_SHA256, AlgorithmFamily::Signature, "SHA256withECDSA", None, Some("EC"), "p256"),

    (ALG_C14N_OMIT_COMMENTS,      AlgorithmFamily::Canonicalization, "c14n",      None, None, "builtin"),
    (ALG_C14N_WITH_COMMENTS,      AlgorithmFamily::Canonicalization, "c14n",      None, None, "builtin"),
    (ALG_C14N11_OMIT_COMMENTS,    AlgorithmFamily::Canonicalization, "c14n11",    None, None, "builtin"),
    (ALG_C14N11_WITH_COMMENTS,    AlgorithmFamily::Canonicalization, "c14n11",    None, None, "builtin"),
    (ALG_EXCL_C14N_OMIT_COMMENTS, AlgorithmFamily::Canonicalization, "exc-c14n",  None, None, "builtin"),
    (ALG_EXCL_C14N_WITH_COMMENTS, AlgorithmFamily::Canonicalization, "exc-c14n",  None, None, "builtin"),

    (ALG_TRANSFORM_ENVELOPED, AlgorithmFamily::Transform, "enveloped-signature", None, None, "builtin"),

    (ALG_AES128_CBC,    AlgorithmFamily::SymmetricCipher, "AES/CBC",    Some(128), Some("AES"),    "aes+cbc"),
    (ALG_AES192_CBC,    AlgorithmFamily::SymmetricCipher, "AES/CBC",    Some(192), Some("AES"),    "aes+cbc"),
    (ALG_AES256_CBC,    AlgorithmFamily::SymmetricCipher, "AES/CBC",    Some(256), Some("AES"),    "aes+cbc"),
    (ALG_TRIPLEDES_CBC, AlgorithmFamily::SymmetricCipher, "DESede/CBC", Some(192), Some("DESede"), "unsupported"),
    (ALG_AES128_GCM,    AlgorithmFamily::SymmetricCipher, "AES/GCM",    Some(128), Some("AES"),    "aes-gcm"),
    (ALG_AES192_GCM,    AlgorithmFamily::SymmetricCipher, "AES/GCM",    Some(192), Some("AES"),    "aes-gcm"),
    (ALG_AES256_GCM,    AlgorithmFamily::SymmetricCipher, "AES/GCM",    Some(256), Some("AES"),    "aes-gcm"),

    (ALG_RSA_1_5,        AlgorithmFamily::KeyTransport, "RSA/PKCS1", None, Some("RSA"), "rsa"),
    (ALG_RSA_OAEP_MGF1P, AlgorithmFamily::KeyTransport, "RSA/OAEP",  None, Some("RSA"), "rsa"),
    (ALG_RSA_OAEP,       AlgorithmFamily::KeyTransport, "RSA/OAEP",  None, Some("RSA"), "rsa"),

    (ALG_KW_AES128, AlgorithmFamily::KeyWrap, "AESWrap", Some(128), Some("AES"), "aes"),
    (ALG_KW_AES192, AlgorithmFamily::KeyWrap, "AESWrap", Some(192), Some("AES"), "aes"),
    (ALG_KW_AES256, AlgorithmFamily::KeyWrap, "AESWrap", Some(256), Some("AES"), "aes"),

    (ALG_MGF1_SHA1,   AlgorithmFamily::MaskGeneration, "MGF1/SHA-1",   None, None, "rsa"),
    (ALG_MGF1_SHA256, AlgorithmFamily::MaskGeneration, "MGF1/SHA-256", None, None, "rsa"),
];

/// URI to algorithm-descriptor mapping, immutable after initialization.
pub struct AlgorithmRegistry {
    entries: HashMap<&'static str, AlgorithmEntry>,
}

static REGISTRY: Lazy<Result<AlgorithmRegistry, XmlSecurityError>> =
    Lazy::new(AlgorithmRegistry::builtin);

impl AlgorithmRegistry {
    /// Builds the registry from the declarative table, rejecting duplicate
    /// URIs and symmetric entries without a key length.
    fn builtin() -> Result<Self, XmlSecurityError> {
        let mut entries = HashMap::with_capacity(ALGORITHM_TABLE.len());
        for &(uri, family, native_name, key_length_bits, key_family, provider_hint) in
            ALGORITHM_TABLE
        {
            if matches!(family, AlgorithmFamily::SymmetricCipher | AlgorithmFamily::KeyWrap)
                && key_length_bits.is_none()
            {
                return Err(XmlSecurityError::invalid_config(format!(
                    "symmetric algorithm '{}' registered without a key length",
                    uri
                )));
            }
            let previous = entries.insert(
                uri,
                AlgorithmEntry {
                    uri,
                    family,
                    native_name,
                    key_length_bits,
                    key_family,
                    provider_hint,
                },
            );
            if previous.is_some() {
                return Err(XmlSecurityError::invalid_config(format!(
                    "algorithm '{}' registered twice",
                    uri
                )));
            }
        }
        Ok(Self { entries })
    }

    /// The process-wide registry. A failed initialization makes every
    /// signing and verification operation fail here.
    pub fn global() -> Result<&'static AlgorithmRegistry, XmlSecurityError> {
        REGISTRY.as_ref().map_err(Clone::clone)
    }

    /// Looks up an algorithm descriptor. Unknown URIs fail with an
    /// algorithm-not-registered error.
    pub fn lookup(&self, uri: &str) -> Result<&AlgorithmEntry, XmlSecurityError> {
        self.entries
            .get(uri)
            .ok_or_else(|| XmlSecurityError::unsupported_algorithm(uri))
    }

    /// Exact key length in bits for a symmetric URI. Used both for session
    /// key generation and for timing-mitigation padding.
    pub fn key_length_bits(&self, uri: &str) -> Result<u32, XmlSecurityError> {
        self.lookup(uri)?.key_length_bits.ok_or_else(|| {
            XmlSecurityError::unsupported_algorithm(format!(
                "algorithm '{}' has no mandated key length",
                uri
            ))
        })
    }

    /// Symbolic key family used when generating symmetric session keys.
    pub fn required_key_family(&self, uri: &str) -> Result<&'static str, XmlSecurityError> {
        self.lookup(uri)?.key_family.ok_or_else(|| {
            XmlSecurityError::unsupported_algorithm(format!(
                "algorithm '{}' has no key family",
                uri
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
