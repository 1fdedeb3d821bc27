// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Encrypted Structure Records
//!
//! Plain-data records for parsed `<EncryptedKey>` and `<EncryptedData>`
//! structures, plus the opaque `KeyInfo` locator used to find wrapping
//! tokens. The records deliberately carry no behavior beyond default
//! resolution: the EncryptedKey handler interprets them.
//!
//! ## OAEP Defaults
//!
//! For RSA-OAEP key transport the recommendation defaults an absent
//! `<DigestMethod>` to SHA-1 and an absent MGF parameter to MGF1 with
//! SHA-1. Those defaults are resolved here, at record construction, so the
//! unwrap path never re-derives them.

use serde::{Deserialize, Serialize};

/// xmldsig SHA-1, the default OAEP digest when `<DigestMethod>` is absent.
pub const DEFAULT_OAEP_DIGEST: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// MGF1 with SHA-1, the default mask generation function when absent.
pub const DEFAULT_OAEP_MGF: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";

/// Opaque locator for the token that protects a key or data.
///
/// The EncryptedKey handler never interprets these beyond dispatch: the
/// configured key-resolution callbacks walk them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyInfoSpec {
    /// No KeyInfo present; resolution falls through to the configured
    /// default token.
    None,
    /// `<KeyName>` content.
    KeyName(String),
    /// A DER-encoded certificate from `<X509Data>/<X509Certificate>`.
    X509Certificate(Vec<u8>),
    /// `<X509IssuerSerial>` content.
    X509IssuerSerial { issuer: String, serial: String },
    /// A same-document pointer at an `<EncryptedKey>` by id.
    EncryptedKeyRef(String),
}

impl Default for KeyInfoSpec {
    fn default() -> Self {
        KeyInfoSpec::None
    }
}

/// RSA-OAEP parameters with recommendation defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaepParams {
    pub digest_uri: String,
    pub mgf_uri: String,
    pub p_source: Vec<u8>,
}

impl Default for OaepParams {
    fn default() -> Self {
        Self {
            digest_uri: DEFAULT_OAEP_DIGEST.to_string(),
            mgf_uri: DEFAULT_OAEP_MGF.to_string(),
            p_source: Vec::new(),
        }
    }
}

/// A parsed `<EncryptedKey>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeySpec {
    pub id: Option<String>,
    pub encryption_method_uri: String,
    pub oaep: OaepParams,
    pub key_info: KeyInfoSpec,
    pub cipher_value: Vec<u8>,
    /// Ids of EncryptedData elements this key propagates to.
    pub reference_list: Vec<String>,
}

/// A parsed `<EncryptedData>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedDataSpec {
    pub id: Option<String>,
    pub type_uri: Option<String>,
    pub encryption_method_uri: String,
    pub key_info: KeyInfoSpec,
    /// An EncryptedKey nested inside this structure's KeyInfo, if any.
    pub embedded_key: Option<EncryptedKeySpec>,
    pub cipher_value: Vec<u8>,
}
